use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::{capture::Screenshot, classifier::ClassifyError};

use super::{ensure_success, ModelSettings, VisionModel};

pub const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API.
pub struct ClaudeModel {
    client: Client,
    settings: ModelSettings,
}

impl ClaudeModel {
    pub fn new(client: Client, settings: ModelSettings) -> Self {
        Self { client, settings }
    }

    async fn send(&self, content: Value) -> Result<String, ClassifyError> {
        let body = request_body(&self.settings.model, content);
        let response = self
            .client
            .post(format!("{}/v1/messages", self.settings.base_url))
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;
        let response: MessagesResponse = ensure_success(response).await?.json().await?;
        extract_text(response)
    }
}

fn request_body(model: &str, content: Value) -> Value {
    json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "messages": [{
            "role": "user",
            "content": content,
        }],
    })
}

fn image_content(image: &Screenshot, prompt: &str) -> Value {
    json!([
        {
            "type": "text",
            "text": prompt,
        },
        {
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": "image/png",
                "data": general_purpose::STANDARD.encode(&image.png),
            },
        },
    ])
}

fn extract_text(response: MessagesResponse) -> Result<String, ClassifyError> {
    response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .find_map(|block| block.text)
        .ok_or_else(|| ClassifyError::ModelUnavailable("response contained no text".into()))
}

#[async_trait]
impl VisionModel for ClaudeModel {
    #[instrument(skip_all)]
    async fn analyze_image(
        &self,
        image: &Screenshot,
        prompt: &str,
    ) -> Result<String, ClassifyError> {
        debug!("Sending {:?} to {}", image, self.settings.model);
        self.send(image_content(image, prompt)).await
    }

    #[instrument(skip_all)]
    async fn generate_text(&self, prompt: &str) -> Result<String, ClassifyError> {
        self.send(Value::String(prompt.to_string())).await
    }
}
