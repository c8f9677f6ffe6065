//! Task client: validation, submission and polling
//!
//! Every operation follows the same shape: validate locally, submit to get a
//! task id, then poll at a fixed interval until the provider reports a
//! terminal state or the local deadline passes. Poll-level network errors are
//! transient and never terminate a task early.

use crate::api::models::{
    CombineRequest, EditRequest, FailureStage, GenerationRequest, Model, TaskOutcome,
};
use crate::api::provider::{Endpoint, ProviderApi, TaskStatus, DUMMY_CALLBACK};
use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Maximum images per generate call; larger requests are clamped
pub const MAX_NUM_IMAGES: u32 = 4;
/// Maximum reference images for Pro generation
pub const MAX_REFERENCE_IMAGES: usize = 8;
/// Combine source image bounds
pub const MIN_COMBINE_IMAGES: usize = 2;
pub const MAX_COMBINE_IMAGES: usize = 8;

/// Polling discipline for one task
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_wait: Duration::from_secs(300),
        }
    }
}

/// Client for the three generation operations plus the credit query.
///
/// Holds no mutable state; safe to share across concurrent jobs.
#[derive(Clone)]
pub struct TaskClient {
    provider: Arc<dyn ProviderApi>,
    policy: PollPolicy,
}

impl TaskClient {
    pub fn new(provider: Arc<dyn ProviderApi>, policy: PollPolicy) -> Self {
        Self { provider, policy }
    }

    /// Text-to-image generation
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        validate_generate(request)?;
        let (endpoint, payload) = build_generate_payload(request);
        Ok(self.submit_and_wait(endpoint, payload, cancel).await)
    }

    /// Edit an image already resolved to a public URL
    pub async fn edit(
        &self,
        request: &EditRequest,
        image_url: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        validate_edit(request)?;
        let payload = build_edit_payload(request, image_url);
        Ok(self.submit_and_wait(Endpoint::Generate, payload, cancel).await)
    }

    /// Combine images already resolved to public URLs
    pub async fn combine(
        &self,
        request: &CombineRequest,
        image_urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        validate_combine(request)?;
        if image_urls.len() != request.image_paths.len() {
            return Err(Error::Validation(format!(
                "expected {} image URLs, got {}",
                request.image_paths.len(),
                image_urls.len()
            )));
        }
        let payload = build_combine_payload(request, image_urls);
        Ok(self
            .submit_and_wait(Endpoint::GeneratePro, payload, cancel)
            .await)
    }

    /// Remaining credit balance
    pub async fn credit_balance(&self) -> Result<f64> {
        self.provider.credit_balance().await
    }

    async fn submit_and_wait(
        &self,
        endpoint: Endpoint,
        payload: Value,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let task_id = match self.provider.create_task(endpoint, payload).await {
            Ok(id) => id,
            Err(e) => {
                return TaskOutcome::Failed {
                    stage: FailureStage::Submit,
                    reason: e.to_string(),
                }
            }
        };

        tracing::debug!(task_id = %task_id, "task submitted, polling");
        self.wait_for_task(&task_id, cancel).await
    }

    /// Poll a task until it reaches a terminal state or the deadline passes
    async fn wait_for_task(&self, task_id: &str, cancel: &CancellationToken) -> TaskOutcome {
        let start = Instant::now();

        loop {
            if start.elapsed() >= self.policy.max_wait {
                tracing::warn!(task_id = %task_id, "poll deadline exceeded, abandoning task");
                return TaskOutcome::TimedOut;
            }

            match self.provider.query_task(task_id).await {
                Ok(TaskStatus::Succeeded { image_url }) => {
                    return TaskOutcome::Succeeded { image_url };
                }
                Ok(TaskStatus::Failed { reason }) => {
                    return TaskOutcome::Failed {
                        stage: FailureStage::Generate,
                        reason,
                    };
                }
                Ok(TaskStatus::Generating) => {}
                // Transient: keep polling until the deadline
                Err(e) => {
                    tracing::warn!(task_id = %task_id, "status poll failed: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.policy.interval) => {}
                _ = cancel.cancelled() => {
                    return TaskOutcome::Failed {
                        stage: FailureStage::Generate,
                        reason: "cancelled".to_string(),
                    };
                }
            }
        }
    }
}

fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(Error::Validation("prompt must not be empty".to_string()));
    }
    Ok(())
}

fn validate_generate(request: &GenerationRequest) -> Result<()> {
    validate_prompt(&request.prompt)?;
    if !request.reference_image_urls.is_empty() && request.model == Model::Flash {
        return Err(Error::Validation(
            "reference images are only supported by the pro model".to_string(),
        ));
    }
    if request.reference_image_urls.len() > MAX_REFERENCE_IMAGES {
        return Err(Error::Validation(format!(
            "at most {} reference images are allowed",
            MAX_REFERENCE_IMAGES
        )));
    }
    Ok(())
}

fn validate_edit(request: &EditRequest) -> Result<()> {
    validate_prompt(&request.prompt)
}

fn validate_combine(request: &CombineRequest) -> Result<()> {
    validate_prompt(&request.prompt)?;
    if request.model != Model::Pro {
        return Err(Error::Validation(
            "combining images requires the pro model".to_string(),
        ));
    }
    let count = request.image_paths.len();
    if !(MIN_COMBINE_IMAGES..=MAX_COMBINE_IMAGES).contains(&count) {
        return Err(Error::Validation(format!(
            "combine requires between {} and {} source images, got {}",
            MIN_COMBINE_IMAGES, MAX_COMBINE_IMAGES, count
        )));
    }
    Ok(())
}

fn build_generate_payload(request: &GenerationRequest) -> (Endpoint, Value) {
    match request.model {
        Model::Flash => {
            // "TEXTTOIAMGE" is the provider's own spelling
            let payload = json!({
                "prompt": request.prompt,
                "type": "TEXTTOIAMGE",
                "numImages": request.num_images.clamp(1, MAX_NUM_IMAGES),
                "callBackUrl": DUMMY_CALLBACK,
                "image_size": request.aspect_ratio(),
            });
            (Endpoint::Generate, payload)
        }
        Model::Pro => {
            let mut payload = json!({
                "prompt": request.prompt,
                "resolution": request.resolution.provider_tier(),
                "callBackUrl": DUMMY_CALLBACK,
                "aspectRatio": request.aspect_ratio(),
            });
            if !request.reference_image_urls.is_empty() {
                payload["imageUrls"] = json!(request.reference_image_urls);
            }
            (Endpoint::GeneratePro, payload)
        }
    }
}

fn build_edit_payload(request: &EditRequest, image_url: &str) -> Value {
    json!({
        "prompt": request.prompt,
        "type": "IMAGETOIAMGE",
        "imageUrls": [image_url],
        "numImages": 1,
        "callBackUrl": DUMMY_CALLBACK,
        "image_size": request.aspect_ratio(),
    })
}

fn build_combine_payload(request: &CombineRequest, image_urls: &[String]) -> Value {
    json!({
        "prompt": request.prompt,
        "imageUrls": image_urls,
        "resolution": request.resolution.provider_tier(),
        "callBackUrl": DUMMY_CALLBACK,
        "aspectRatio": request.aspect_ratio(),
    })
}
