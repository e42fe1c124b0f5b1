use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

use crate::models::backend::BackendKind;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Backend used when a request does not name one.
    #[serde(default = "default_backend")]
    #[garde(skip)]
    pub default_backend: BackendKind,

    /// Ollama service hosting the vision model
    #[serde(default = "default_ollama_host")]
    #[garde(length(min = 1))]
    pub ollama_host: String,

    #[serde(default = "default_ollama_model")]
    #[garde(length(min = 1))]
    pub ollama_model: String,

    /// Path or name of the tesseract executable
    #[serde(default = "default_tesseract_bin")]
    #[garde(length(min = 1))]
    pub tesseract_bin: String,

    #[serde(default = "default_tesseract_lang")]
    #[garde(length(min = 1))]
    pub tesseract_lang: String,

    #[serde(default = "default_vision_timeout")]
    #[garde(range(min = 1))]
    pub vision_timeout_secs: u64,

    #[serde(default = "default_tesseract_timeout")]
    #[garde(range(min = 1))]
    pub tesseract_timeout_secs: u64,

    #[serde(default = "default_probe_interval")]
    #[garde(range(min = 1))]
    pub health_probe_interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    #[garde(range(min = 1))]
    pub health_probe_timeout_secs: u64,

    /// Automatic attempts per job before it is failed for good
    #[serde(default = "default_max_attempts")]
    #[garde(range(min = 1, max = 10))]
    pub max_attempts: u32,

    #[serde(default = "default_retry_backoff")]
    #[garde(skip)]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_worker_count")]
    #[garde(range(min = 1))]
    pub worker_count: usize,

    #[serde(default = "default_poll_interval")]
    #[garde(range(min = 1))]
    pub worker_poll_interval_ms: u64,

    /// Upper bound for a blocking `POST /verify`
    #[serde(default = "default_sync_timeout")]
    #[garde(range(min = 1))]
    pub sync_timeout_secs: u64,

    /// How long terminal jobs stay queryable
    #[serde(default = "default_retention")]
    #[garde(range(min = 1))]
    pub job_retention_secs: u64,

    #[serde(default = "default_cleanup_interval")]
    #[garde(range(min = 1))]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_max_file_size")]
    #[garde(range(min = 1, max = 100))]
    pub max_file_size_mb: u64,

    #[serde(default = "default_max_batch_size")]
    #[garde(range(min = 1, max = 500))]
    pub max_batch_size: usize,

    /// AES-256-GCM key for stored images (base64-encoded, 32 bytes).
    /// A random key is generated per process when unset.
    #[serde(default)]
    #[garde(skip)]
    pub encryption_key: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_backend() -> BackendKind {
    BackendKind::Tesseract
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2-vision".to_string()
}

fn default_tesseract_bin() -> String {
    "tesseract".to_string()
}

fn default_tesseract_lang() -> String {
    "eng".to_string()
}

fn default_vision_timeout() -> u64 {
    60
}

fn default_tesseract_timeout() -> u64 {
    10
}

fn default_probe_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_worker_count() -> usize {
    1
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_sync_timeout() -> u64 {
    120
}

fn default_retention() -> u64 {
    4 * 60 * 60
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_max_file_size() -> u64 {
    10
}

fn default_max_batch_size() -> usize {
    50
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            default_backend: default_backend(),
            ollama_host: default_ollama_host(),
            ollama_model: default_ollama_model(),
            tesseract_bin: default_tesseract_bin(),
            tesseract_lang: default_tesseract_lang(),
            vision_timeout_secs: default_vision_timeout(),
            tesseract_timeout_secs: default_tesseract_timeout(),
            health_probe_interval_secs: default_probe_interval(),
            health_probe_timeout_secs: default_probe_timeout(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            worker_count: default_worker_count(),
            worker_poll_interval_ms: default_poll_interval(),
            sync_timeout_secs: default_sync_timeout(),
            job_retention_secs: default_retention(),
            cleanup_interval_secs: default_cleanup_interval(),
            max_file_size_mb: default_max_file_size(),
            max_batch_size: default_max_batch_size(),
            encryption_key: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit key/value pairs (upper-case keys, as in the environment).
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: AppConfig = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn max_file_size_bytes(&self) -> usize {
        (self.max_file_size_mb as usize) * 1024 * 1024
    }

    pub fn extraction_timeout(&self, kind: BackendKind) -> Duration {
        match kind {
            BackendKind::Tesseract => Duration::from_secs(self.tesseract_timeout_secs),
            BackendKind::Ollama => Duration::from_secs(self.vision_timeout_secs),
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}
