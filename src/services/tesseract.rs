use std::process::Stdio;

use async_trait::async_trait;
use image::ImageFormat;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::models::backend::BackendKind;
use crate::services::ocr::{ExtractedText, OcrError, TextExtractor};

/// Used when the TSV pass fails or reports no word confidences.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Column holding the per-word confidence (0-100, -1 for non-words).
const TSV_CONF_COLUMN: usize = 10;

/// stderr fragments meaning "this image is unusable", not "tesseract is broken".
const IMAGE_REJECTIONS: &[&str] = &[
    "pixread",
    "unsupported image",
    "image file",
    "cannot be read",
    "too small to scale",
    "empty page",
];

/// Fast, low-accuracy classical OCR through the `tesseract` executable.
pub struct TesseractOcr {
    binary: String,
    lang: String,
}

impl TesseractOcr {
    pub fn new(binary: &str, lang: &str) -> Self {
        Self {
            binary: binary.to_string(),
            lang: lang.to_string(),
        }
    }

    /// Feed the image on stdin and collect stdout. `extra` selects the output config.
    async fn run(&self, image: &[u8], extra: &[&str]) -> Result<String, OcrError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.lang])
            .args(extra)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::Transport {
                backend: BackendKind::Tesseract,
                message: format!("failed to start {}: {e}", self.binary),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await.map_err(|e| OcrError::Backend {
                backend: BackendKind::Tesseract,
                message: format!("failed to write image: {e}"),
            })?;
        }

        let output = child.wait_with_output().await.map_err(|e| OcrError::Backend {
            backend: BackendKind::Tesseract,
            message: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn classify_failure(stderr: &str) -> OcrError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();
    if IMAGE_REJECTIONS.iter().any(|fragment| lower.contains(fragment)) {
        OcrError::Rejected {
            backend: BackendKind::Tesseract,
            message,
        }
    } else {
        OcrError::Backend {
            backend: BackendKind::Tesseract,
            message,
        }
    }
}

/// Mean word confidence from `tesseract ... tsv` output, scaled to `[0, 1]`.
pub fn mean_tsv_confidence(tsv: &str) -> Option<f64> {
    let confidences: Vec<f64> = tsv
        .lines()
        .skip(1)
        .filter_map(|line| line.split('\t').nth(TSV_CONF_COLUMN))
        .filter_map(|conf| conf.trim().parse::<f64>().ok())
        .filter(|conf| *conf >= 0.0)
        .collect();

    if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64 / 100.0)
    }
}

#[async_trait]
impl TextExtractor for TesseractOcr {
    fn kind(&self) -> BackendKind {
        BackendKind::Tesseract
    }

    async fn probe(&self) -> Result<(), OcrError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OcrError::Transport {
                backend: BackendKind::Tesseract,
                message: format!("{} not runnable: {e}", self.binary),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(OcrError::Backend {
                backend: BackendKind::Tesseract,
                message: format!("{} --version exited with {}", self.binary, output.status),
            })
        }
    }

    async fn extract(&self, image: &[u8], _format: ImageFormat) -> Result<ExtractedText, OcrError> {
        let text = self.run(image, &[]).await?;

        let confidence = match self.run(image, &["--psm", "3", "tsv"]).await {
            Ok(tsv) => mean_tsv_confidence(&tsv).unwrap_or(DEFAULT_CONFIDENCE),
            Err(e) => {
                tracing::debug!(error = %e, "tesseract confidence pass failed");
                DEFAULT_CONFIDENCE
            }
        };

        Ok(ExtractedText {
            text: text.trim().to_string(),
            confidence,
        })
    }
}
