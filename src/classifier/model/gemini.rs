use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::{capture::Screenshot, classifier::ClassifyError};

use super::{ensure_success, ModelSettings, VisionModel};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

/// Google Generative Language API.
pub struct GeminiModel {
    client: Client,
    settings: ModelSettings,
}

impl GeminiModel {
    pub fn new(client: Client, settings: ModelSettings) -> Self {
        Self { client, settings }
    }

    async fn send(&self, parts: Value) -> Result<String, ClassifyError> {
        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.settings.base_url, self.settings.model
            ))
            .header("x-goog-api-key", &self.settings.api_key)
            .json(&json!({ "contents": [{ "parts": parts }] }))
            .send()
            .await?;
        let response: GenerateContentResponse = ensure_success(response).await?.json().await?;
        extract_text(response)
    }
}

fn image_parts(image: &Screenshot, prompt: &str) -> Value {
    json!([
        { "text": prompt },
        {
            "inline_data": {
                "mime_type": "image/png",
                "data": general_purpose::STANDARD.encode(&image.png),
            }
        },
    ])
}

/// Gemini may split one answer over several parts.
fn extract_text(response: GenerateContentResponse) -> Result<String, ClassifyError> {
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();
    if text.is_empty() {
        return Err(ClassifyError::ModelUnavailable(
            "response contained no text".into(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl VisionModel for GeminiModel {
    #[instrument(skip_all)]
    async fn analyze_image(
        &self,
        image: &Screenshot,
        prompt: &str,
    ) -> Result<String, ClassifyError> {
        debug!("Sending {:?} to {}", image, self.settings.model);
        self.send(image_parts(image, prompt)).await
    }

    #[instrument(skip_all)]
    async fn generate_text(&self, prompt: &str) -> Result<String, ClassifyError> {
        self.send(json!([{ "text": prompt }])).await
    }
}
