use async_trait::async_trait;
use base64::Engine;
use image::ImageFormat;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::models::backend::BackendKind;
use crate::services::ocr::{ExtractedText, OcrError, TextExtractor};

/// Vision models report no confidence; this is the fixed estimate used instead.
const VISION_CONFIDENCE: f64 = 0.85;

const TRANSCRIBE_PROMPT: &str = concat!(
    "Extract ALL text from this alcohol beverage label image. ",
    "List every piece of text you can see, keeping the relative order. Include the brand name, ",
    "the product class/type (e.g. \"Bourbon Whiskey\", \"Pinot Noir\", \"IPA\"), the alcohol content ",
    "(e.g. \"13.5% alc./vol.\", \"80 Proof\"), the net contents (e.g. \"750 mL\"), bottler or importer ",
    "statements, the country of origin, and the complete government warning statement. ",
    "Respond with plain text, one distinct text element per line."
);

/// Client for a slow, accurate vision-language model served by Ollama.
pub struct OllamaClient {
    http: Client,
    host: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    images: Vec<String>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

fn base_name(model: &str) -> &str {
    model.split(':').next().unwrap_or(model)
}

impl OllamaClient {
    pub fn new(host: &str, model: &str) -> Self {
        Self {
            http: Client::new(),
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn transport(&self, err: reqwest::Error) -> OcrError {
        OcrError::Transport {
            backend: BackendKind::Ollama,
            message: format!("{}: {err}", self.host),
        }
    }

    fn status_error(status: StatusCode, body: String) -> OcrError {
        let message = format!("HTTP {status}: {}", body.trim());
        if status.is_client_error() {
            OcrError::Rejected {
                backend: BackendKind::Ollama,
                message,
            }
        } else {
            OcrError::Backend {
                backend: BackendKind::Ollama,
                message,
            }
        }
    }
}

#[async_trait]
impl TextExtractor for OllamaClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    /// The service answers and the configured model has been pulled.
    async fn probe(&self) -> Result<(), OcrError> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.host))
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        if !response.status().is_success() {
            return Err(OcrError::Backend {
                backend: BackendKind::Ollama,
                message: format!("HTTP {}", response.status()),
            });
        }

        let tags: TagsResponse = response.json().await.map_err(|e| OcrError::Parse {
            backend: BackendKind::Ollama,
            message: e.to_string(),
        })?;

        let wanted = base_name(&self.model);
        if tags.models.iter().any(|m| base_name(&m.name) == wanted) {
            Ok(())
        } else {
            let available: Vec<_> = tags.models.iter().map(|m| base_name(&m.name)).collect();
            Err(OcrError::Backend {
                backend: BackendKind::Ollama,
                message: format!(
                    "model '{}' not found; available: {}",
                    self.model,
                    if available.is_empty() { "none".to_string() } else { available.join(", ") }
                ),
            })
        }
    }

    /// Load the model into memory and keep it resident.
    async fn warm_up(&self) -> Result<(), OcrError> {
        let body = serde_json::json!({ "model": self.model, "keep_alive": -1 });
        let response = self
            .http
            .post(format!("{}/api/generate", self.host))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, text));
        }
        Ok(())
    }

    async fn extract(&self, image: &[u8], _format: ImageFormat) -> Result<ExtractedText, OcrError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: TRANSCRIBE_PROMPT,
                images: vec![base64::engine::general_purpose::STANDARD.encode(image)],
            }],
            stream: false,
            options: ChatOptions { temperature: 0.1 },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.host))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, text));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| OcrError::Parse {
            backend: BackendKind::Ollama,
            message: e.to_string(),
        })?;

        Ok(ExtractedText {
            text: chat.message.content.trim().to_string(),
            confidence: VISION_CONFIDENCE,
        })
    }
}
