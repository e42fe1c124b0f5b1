//! Shared harness: scripted in-process backends and a wired application state.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::ImageFormat;
use label_verifier::app_state::AppState;
use label_verifier::config::AppConfig;
use label_verifier::models::backend::BackendKind;
use label_verifier::models::job::Job;
use label_verifier::services::ocr::{BackendRegistry, ExtractedText, OcrError, TextExtractor};
use label_verifier::services::vault::ImageVault;
use label_verifier::services::worker;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// What the fake backend does on one `extract` call.
pub enum Step {
    Text(String),
    Timeout,
    Unreachable,
    Failure,
    Reject,
}

pub struct ScriptedExtractor {
    kind: BackendKind,
    pub up: AtomicBool,
    pub calls: AtomicUsize,
    pub probe_delay: Mutex<Duration>,
    script: Mutex<VecDeque<Step>>,
    default_text: Mutex<String>,
}

impl ScriptedExtractor {
    pub fn new(kind: BackendKind, up: bool) -> Arc<Self> {
        Arc::new(Self {
            kind,
            up: AtomicBool::new(up),
            calls: AtomicUsize::new(0),
            probe_delay: Mutex::new(Duration::ZERO),
            script: Mutex::new(VecDeque::new()),
            default_text: Mutex::new(String::new()),
        })
    }

    /// Text returned once the script is exhausted.
    pub fn answer(&self, text: &str) {
        *self.default_text.lock().unwrap() = text.to_string();
    }

    pub fn then(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for ScriptedExtractor {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn probe(&self) -> Result<(), OcrError> {
        let delay = *self.probe_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OcrError::Transport {
                backend: self.kind,
                message: "connection refused".into(),
            })
        }
    }

    async fn extract(&self, _image: &[u8], _format: ImageFormat) -> Result<ExtractedText, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        let backend = self.kind;
        match step {
            None => Ok(ExtractedText {
                text: self.default_text.lock().unwrap().clone(),
                confidence: 0.9,
            }),
            Some(Step::Text(text)) => Ok(ExtractedText { text, confidence: 0.9 }),
            Some(Step::Timeout) => Err(OcrError::Timeout { backend, secs: 1 }),
            Some(Step::Unreachable) => Err(OcrError::Transport {
                backend,
                message: "connection reset".into(),
            }),
            Some(Step::Failure) => Err(OcrError::Backend {
                backend,
                message: "HTTP 500".into(),
            }),
            Some(Step::Reject) => Err(OcrError::Rejected {
                backend,
                message: "image could not be decoded".into(),
            }),
        }
    }
}

pub struct Harness {
    pub state: AppState,
    pub tesseract: Arc<ScriptedExtractor>,
    pub ollama: Arc<ScriptedExtractor>,
    workers: Vec<JoinHandle<()>>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        retry_backoff_ms: 10,
        worker_poll_interval_ms: 20,
        sync_timeout_secs: 5,
        health_probe_timeout_secs: 1,
        ..AppConfig::default()
    }
}

impl Harness {
    /// Both fakes registered; health is probed once before returning.
    pub async fn new(tesseract_up: bool, ollama_up: bool) -> Self {
        Self::with_config(test_config(), tesseract_up, ollama_up).await
    }

    pub async fn with_config(config: AppConfig, tesseract_up: bool, ollama_up: bool) -> Self {
        let tesseract = ScriptedExtractor::new(BackendKind::Tesseract, tesseract_up);
        let ollama = ScriptedExtractor::new(BackendKind::Ollama, ollama_up);
        let registry = BackendRegistry::new()
            .register(tesseract.clone(), Duration::from_secs(2))
            .register(ollama.clone(), Duration::from_secs(2));
        let state = AppState::new(config, registry, ImageVault::ephemeral());
        state.health.refresh().await;
        Self {
            state,
            tesseract,
            ollama,
            workers: Vec::new(),
        }
    }

    pub fn spawn_workers(&mut self, count: usize) {
        for id in 0..count {
            self.workers
                .push(tokio::spawn(worker::run_worker(self.state.clone(), id)));
        }
    }

    pub async fn wait(&self, id: Uuid) -> Job {
        self.state
            .store
            .wait_terminal(id, Duration::from_secs(5))
            .await
            .expect("job should reach a terminal state")
    }
}

/// One part of a hand-built `multipart/form-data` body.
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub data: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn file(name: &'a str, filename: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            filename: Some(filename),
            data,
        }
    }

    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            filename: None,
            data: value.as_bytes(),
        }
    }
}

pub const BOUNDARY: &str = "label-verifier-test-boundary";

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    part.name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name).as_bytes(),
            ),
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}
