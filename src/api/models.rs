//! Request and outcome types for the NanoBanana API

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Generation model tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Flash,
    Pro,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Flash => "flash",
            Model::Pro => "pro",
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic output resolution, mapped to provider tiers on submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1024")]
    R1024,
    #[serde(rename = "2048")]
    R2048,
    #[serde(rename = "4096")]
    R4096,
}

impl Resolution {
    /// Provider resolution tier for the Pro endpoints
    pub fn provider_tier(&self) -> &'static str {
        match self {
            Resolution::R1024 => "1K",
            Resolution::R2048 => "2K",
            Resolution::R4096 => "4K",
        }
    }

    /// Parse a pixel-size string; unrecognized values fall back to 2048 (2K)
    pub fn from_pixels(value: &str) -> Self {
        match value {
            "1024" => Resolution::R1024,
            "4096" => Resolution::R4096,
            _ => Resolution::R2048,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::R1024 => "1024",
            Resolution::R2048 => "2048",
            Resolution::R4096 => "4096",
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::R2048
    }
}

/// Aspect ratio used when a request does not specify one
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

/// Text-to-image generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: Model,
    #[serde(default)]
    pub resolution: Resolution,
    /// "W:H" string, defaults to 1:1 when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    /// 1..4, clamped on submission
    pub num_images: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Public URLs of reference images (Pro only, up to 8)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_image_urls: Vec<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, model: Model) -> Self {
        Self {
            prompt: prompt.into(),
            model,
            resolution: Resolution::default(),
            aspect_ratio: None,
            num_images: 1,
            seed: None,
            negative_prompt: None,
            reference_image_urls: Vec::new(),
        }
    }

    pub fn aspect_ratio(&self) -> &str {
        self.aspect_ratio.as_deref().unwrap_or(DEFAULT_ASPECT_RATIO)
    }
}

/// Edit request against a local source image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditRequest {
    pub image_path: PathBuf,
    pub prompt: String,
    pub model: Model,
    /// None preserves the source size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
}

impl EditRequest {
    pub fn new(image_path: impl Into<PathBuf>, prompt: impl Into<String>, model: Model) -> Self {
        Self {
            image_path: image_path.into(),
            prompt: prompt.into(),
            model,
            resolution: None,
            aspect_ratio: None,
            negative_prompt: None,
        }
    }

    pub fn aspect_ratio(&self) -> &str {
        self.aspect_ratio.as_deref().unwrap_or(DEFAULT_ASPECT_RATIO)
    }
}

/// Multi-image combine request (Pro only, 2..8 sources)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombineRequest {
    pub image_paths: Vec<PathBuf>,
    pub prompt: String,
    pub model: Model,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
}

impl CombineRequest {
    pub fn new(image_paths: Vec<PathBuf>, prompt: impl Into<String>) -> Self {
        Self {
            image_paths,
            prompt: prompt.into(),
            model: Model::Pro,
            resolution: Resolution::default(),
            aspect_ratio: None,
            negative_prompt: None,
        }
    }

    pub fn aspect_ratio(&self) -> &str {
        self.aspect_ratio.as_deref().unwrap_or(DEFAULT_ASPECT_RATIO)
    }
}

/// Where a terminal task failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// No task identifier was ever obtained
    Submit,
    /// The provider accepted the task and later reported failure
    Generate,
}

/// Terminal result of one submitted task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded { image_url: String },
    Failed { stage: FailureStage, reason: String },
    /// Local poll deadline exceeded; the remote task may still be running
    TimedOut,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }

    /// Human-readable reason for a non-success outcome
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            TaskOutcome::Succeeded { .. } => None,
            TaskOutcome::Failed { reason, .. } => Some(reason.clone()),
            TaskOutcome::TimedOut => Some("generation timed out".to_string()),
        }
    }
}
