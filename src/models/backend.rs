use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Text extraction backends the service knows how to drive.
///
/// `Tesseract` is the fast classical OCR engine (seconds, noisy output);
/// `Ollama` is the slow vision-language model (tens of seconds, accurate).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackendKind {
    Tesseract,
    Ollama,
}

impl BackendKind {
    pub fn all() -> Vec<BackendKind> {
        BackendKind::iter().collect()
    }
}

/// Availability of one backend as of its last probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendHealth {
    pub available: bool,
    pub error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl BackendHealth {
    pub fn up(at: DateTime<Utc>) -> Self {
        Self {
            available: true,
            error: None,
            last_checked: Some(at),
        }
    }

    pub fn down(error: impl Into<String>, at: Option<DateTime<Utc>>) -> Self {
        Self {
            available: false,
            error: Some(error.into()),
            last_checked: at,
        }
    }
}

/// Overall service status reported by `GET /health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
}

/// Immutable view of every backend's health, swapped in whole by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSnapshot {
    pub backends: BTreeMap<BackendKind, BackendHealth>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl HealthSnapshot {
    /// Snapshot published before the first probe completes: nothing is usable yet.
    pub fn unprobed(kinds: impl IntoIterator<Item = BackendKind>) -> Self {
        Self {
            backends: kinds
                .into_iter()
                .map(|kind| (kind, BackendHealth::down("not yet probed", None)))
                .collect(),
            refreshed_at: None,
        }
    }

    pub fn is_available(&self, kind: BackendKind) -> bool {
        self.backends.get(&kind).is_some_and(|h| h.available)
    }

    pub fn available(&self) -> Vec<BackendKind> {
        self.backends
            .iter()
            .filter(|(_, h)| h.available)
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Degraded when any configured backend is down; the API stays up either way.
    pub fn overall(&self) -> OverallStatus {
        if !self.backends.is_empty() && self.backends.values().all(|h| h.available) {
            OverallStatus::Healthy
        } else {
            OverallStatus::Degraded
        }
    }

    /// Backend a job should run on, or `None` if it has to keep waiting.
    ///
    /// An explicit request is honoured only when that backend is up. Without one,
    /// the preferred backend wins if available, otherwise any available backend.
    pub fn resolve(
        &self,
        requested: Option<BackendKind>,
        preferred: BackendKind,
    ) -> Option<BackendKind> {
        match requested {
            Some(kind) => self.is_available(kind).then_some(kind),
            None if self.is_available(preferred) => Some(preferred),
            None => self.available().into_iter().next(),
        }
    }
}
