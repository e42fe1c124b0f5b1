//! Text extraction port and the registry of configured backends.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::ImageFormat;

use crate::models::backend::BackendKind;

/// Raw text pulled from a label image.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    /// Backend's own confidence estimate in `[0, 1]`.
    pub confidence: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("{backend} did not answer within {secs}s")]
    Timeout { backend: BackendKind, secs: u64 },

    #[error("{backend} is unreachable: {message}")]
    Transport { backend: BackendKind, message: String },

    /// The backend refused this particular image; retrying will not help.
    #[error("{backend} rejected the image: {message}")]
    Rejected { backend: BackendKind, message: String },

    #[error("{backend} failed: {message}")]
    Backend { backend: BackendKind, message: String },

    #[error("{backend} returned an unreadable response: {message}")]
    Parse { backend: BackendKind, message: String },

    #[error("backend {0} is not configured")]
    NotConfigured(BackendKind),
}

/// One image-to-text capability. Availability is never asked of the
/// extractor on the request path; the health monitor calls `probe` on its
/// own schedule and publishes the outcome.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Cheap liveness check, run by the health monitor only.
    async fn probe(&self) -> Result<(), OcrError>;

    /// Called once when the backend flips to available.
    async fn warm_up(&self) -> Result<(), OcrError> {
        Ok(())
    }

    async fn extract(&self, image: &[u8], format: ImageFormat) -> Result<ExtractedText, OcrError>;
}

struct Registered {
    extractor: Arc<dyn TextExtractor>,
    timeout: Duration,
}

/// Configured extractors keyed by kind, each with its own extraction timeout.
#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<BackendKind, Registered>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, extractor: Arc<dyn TextExtractor>, timeout: Duration) -> Self {
        self.backends
            .insert(extractor.kind(), Registered { extractor, timeout });
        self
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.keys().copied().collect()
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn TextExtractor>> {
        self.backends.get(&kind).map(|r| r.extractor.clone())
    }

    pub fn timeout(&self, kind: BackendKind) -> Option<Duration> {
        self.backends.get(&kind).map(|r| r.timeout)
    }

    /// Run one extraction, bounded by the backend's timeout. The call runs to
    /// completion or timeout; dropping the future is the only cancellation.
    pub async fn extract(
        &self,
        kind: BackendKind,
        image: &[u8],
        format: ImageFormat,
    ) -> Result<ExtractedText, OcrError> {
        let registered = self.backends.get(&kind).ok_or(OcrError::NotConfigured(kind))?;
        match tokio::time::timeout(registered.timeout, registered.extractor.extract(image, format)).await {
            Ok(result) => result,
            Err(_) => Err(OcrError::Timeout {
                backend: kind,
                secs: registered.timeout.as_secs(),
            }),
        }
    }
}
