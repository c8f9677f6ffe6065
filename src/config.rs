//! Configuration file support for bananagen

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the configured API key
pub const API_KEY_ENV: &str = "NANOBANANA_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// NanoBanana API key (optional - NANOBANANA_API_KEY takes precedence)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Seconds between task status polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Client-side deadline for a single task, in seconds
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of jobs in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Batches larger than this prompt for confirmation in the CLI
    #[serde(default = "default_confirm_threshold")]
    pub confirm_threshold: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Imgur client id; the authenticated imgur backend joins the upload
    /// chain only when this is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imgur_client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory where generated images are saved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images_dir: Option<PathBuf>,

    /// History file location (JSON lines)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
}

// Defaults

fn default_base_url() -> String {
    "https://api.nanobananaapi.ai/api/v1".to_string()
}

fn default_poll_interval() -> u64 {
    3
}

fn default_max_wait() -> u64 {
    300
}

fn default_concurrency() -> usize {
    5
}

fn default_confirm_threshold() -> usize {
    20
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            confirm_threshold: default_confirm_threshold(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            images_dir: None,
            history_file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            batch: BatchConfig::default(),
            upload: UploadConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    /// Default config file location: `<config_dir>/bananagen/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("bananagen").join("config.toml"))
    }

    /// Resolve the API key: environment variable wins over the config file
    pub fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.api.api_key.clone().filter(|k| !k.is_empty()))
    }

    /// Imgur client id, if one is configured
    pub fn imgur_client_id(&self) -> Option<&str> {
        self.upload
            .imgur_client_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }

    /// Directory for generated images, created on demand
    pub fn images_dir(&self) -> PathBuf {
        self.storage.images_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("bananagen")
                .join("images")
        })
    }

    /// History store location
    pub fn history_file(&self) -> PathBuf {
        self.storage.history_file.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("bananagen")
                .join("history.jsonl")
        })
    }
}
