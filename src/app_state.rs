use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::{
    health::HealthMonitor,
    ocr::BackendRegistry,
    store::JobStore,
    tesseract::TesseractOcr,
    vault::{ImageVault, VaultError},
    vision::OllamaClient,
};

/// Shared application state passed to all route handlers and workers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<JobStore>,
    pub health: Arc<HealthMonitor>,
    pub registry: Arc<BackendRegistry>,
    pub vault: Arc<ImageVault>,
}

impl AppState {
    pub fn new(config: AppConfig, registry: BackendRegistry, vault: ImageVault) -> Self {
        let registry = Arc::new(registry);
        let health = HealthMonitor::new(
            registry.clone(),
            Duration::from_secs(config.health_probe_timeout_secs),
        );
        let store = JobStore::new(config.max_attempts, config.retention());
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            health: Arc::new(health),
            registry,
            vault: Arc::new(vault),
        }
    }

    /// State wired to the real tesseract and Ollama backends.
    pub fn from_config(config: AppConfig) -> Result<Self, VaultError> {
        let vault = ImageVault::from_config(config.encryption_key.as_deref())?;
        let registry = default_registry(&config);
        Ok(Self::new(config, registry, vault))
    }
}

pub fn default_registry(config: &AppConfig) -> BackendRegistry {
    use crate::models::backend::BackendKind;

    BackendRegistry::new()
        .register(
            Arc::new(TesseractOcr::new(&config.tesseract_bin, &config.tesseract_lang)),
            config.extraction_timeout(BackendKind::Tesseract),
        )
        .register(
            Arc::new(OllamaClient::new(&config.ollama_host, &config.ollama_model)),
            config.extraction_timeout(BackendKind::Ollama),
        )
}
