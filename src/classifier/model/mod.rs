//! Clients for the vision models nannybot can talk to. Only two providers are supported, both
//! speaking plain JSON over HTTPS.

pub mod claude;
pub mod gemini;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::ValueEnum;
use reqwest::{Client, Response};

use crate::capture::Screenshot;

use super::ClassifyError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Claude,
    Gemini,
}

impl Provider {
    /// Environment variable holding the API key for this provider.
    pub fn credential_variable(&self) -> &'static str {
        match self {
            Provider::Claude => "ANTHROPIC_API_KEY",
            Provider::Gemini => "GOOGLE_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Claude => claude::DEFAULT_MODEL,
            Provider::Gemini => gemini::DEFAULT_MODEL,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Claude => claude::DEFAULT_BASE_URL,
            Provider::Gemini => gemini::DEFAULT_BASE_URL,
        }
    }
}

/// Everything needed to reach a provider.
#[derive(Clone)]
pub struct ModelSettings {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl std::fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn analyze_image(&self, image: &Screenshot, prompt: &str)
        -> Result<String, ClassifyError>;

    async fn generate_text(&self, prompt: &str) -> Result<String, ClassifyError>;
}

pub fn create_model(settings: ModelSettings) -> Result<Arc<dyn VisionModel>, ClassifyError> {
    let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    Ok(match settings.provider {
        Provider::Claude => Arc::new(claude::ClaudeModel::new(client, settings)),
        Provider::Gemini => Arc::new(gemini::GeminiModel::new(client, settings)),
    })
}

/// Turns a non-success status into [ClassifyError::ModelUnavailable], keeping the body around
/// since providers explain auth and quota problems there.
async fn ensure_success(response: Response) -> Result<Response, ClassifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClassifyError::ModelUnavailable(format!(
        "provider returned {status}: {body}"
    )))
}
