//! Scripted provider for exercising the poll loop without a network

use crate::api::provider::{Endpoint, ProviderApi, TaskStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Submission behavior of the scripted provider
pub enum Submit {
    Ok,
    Fail(String),
}

/// A provider that replays a fixed sequence of status responses.
///
/// When the script runs out, `fallback` is returned (default: still
/// generating, which drives timeout tests).
pub struct ScriptedProvider {
    submit: Submit,
    script: Mutex<VecDeque<std::result::Result<TaskStatus, String>>>,
    fallback: TaskStatus,
    create_calls: AtomicUsize,
    query_calls: AtomicUsize,
    /// Simulated task-creation latency, used to observe worker overlap
    create_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(
        submit: Submit,
        script: Vec<std::result::Result<TaskStatus, String>>,
    ) -> Self {
        Self {
            submit,
            script: Mutex::new(script.into()),
            fallback: TaskStatus::Generating,
            create_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            create_delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// A provider where every task immediately succeeds with `image_url`
    pub fn succeeding(image_url: &str) -> Self {
        let mut provider = Self::new(Submit::Ok, vec![]);
        provider.fallback = TaskStatus::Succeeded {
            image_url: image_url.to_string(),
        };
        provider
    }

    /// Add simulated submission latency so concurrent jobs overlap
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Highest number of jobs simultaneously between submission and terminal poll
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_status(&self) -> std::result::Result<TaskStatus, String> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[async_trait]
impl ProviderApi for ScriptedProvider {
    async fn create_task(&self, _endpoint: Endpoint, _payload: Value) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        match &self.submit {
            Submit::Fail(reason) => Err(Error::Provider(reason.clone())),
            Submit::Ok => {
                let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(current, Ordering::SeqCst);
                if let Some(delay) = self.create_delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(format!("task-{}", self.create_calls.load(Ordering::SeqCst)))
            }
        }
    }

    async fn query_task(&self, _task_id: &str) -> Result<TaskStatus> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let status = self.next_status();
        if matches!(
            status,
            Ok(TaskStatus::Succeeded { .. }) | Ok(TaskStatus::Failed { .. })
        ) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        status.map_err(Error::Network)
    }

    async fn credit_balance(&self) -> Result<f64> {
        Ok(100.0)
    }
}
