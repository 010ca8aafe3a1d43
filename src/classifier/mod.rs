//! Decides whether a screenshot matches the task the user said they'd be working on.
//! The actual judgement is delegated to a [VisionModel](model::VisionModel).

pub mod model;
pub mod prompt;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tracing::debug;

use crate::capture::Screenshot;

use self::model::VisionModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    OnTask,
    OffTask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub verdict: Verdict,
    pub rationale: Option<String>,
}

impl Classification {
    pub fn on_task() -> Self {
        Self {
            verdict: Verdict::OnTask,
            rationale: None,
        }
    }

    pub fn off_task() -> Self {
        Self {
            verdict: Verdict::OffTask,
            rationale: None,
        }
    }
}

#[derive(Debug)]
pub enum ClassifyError {
    /// Network, authentication or provider side failure.
    ModelUnavailable(String),
    /// The model answered, but not with a yes or a no.
    MalformedResponse(String),
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifyError::ModelUnavailable(e) => write!(f, "Vision model unavailable: {e}"),
            ClassifyError::MalformedResponse(text) => {
                write!(f, "Vision model gave an unusable answer: {text:?}")
            }
        }
    }
}

impl std::error::Error for ClassifyError {}

impl From<reqwest::Error> for ClassifyError {
    fn from(value: reqwest::Error) -> Self {
        ClassifyError::ModelUnavailable(value.to_string())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskClassifier: Send + Sync {
    async fn classify(
        &self,
        screenshot: &Screenshot,
        task: &str,
    ) -> Result<Classification, ClassifyError>;
}

/// Asks the model a yes/no question about the screenshot.
pub struct ModelTaskClassifier {
    model: Arc<dyn VisionModel>,
}

impl ModelTaskClassifier {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl TaskClassifier for ModelTaskClassifier {
    async fn classify(
        &self,
        screenshot: &Screenshot,
        task: &str,
    ) -> Result<Classification, ClassifyError> {
        let answer = self
            .model
            .analyze_image(screenshot, &prompt::on_task_prompt(task))
            .await?;
        debug!("Vision model answered {answer:?}");
        prompt::parse_classification(&answer)
    }
}
