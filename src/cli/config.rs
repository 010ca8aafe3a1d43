use std::{collections::HashMap, fmt, io::Read, sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    classifier::model::ModelSettings,
    overlay::challenge::{keyboard_text, ChallengeKind},
};

use super::Args;

/// Overrides the provider's base URL. Handy behind a proxy.
pub const API_BASE_VARIABLE: &str = "NANNYBOT_API_BASE";

/// Problems that stop nannybot before the first check.
#[derive(Debug, PartialEq, Eq)]
pub enum StartupError {
    EmptyTask,
    UntypeableTask,
    MissingCredential { variable: &'static str },
    NoOverlayBackend,
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::EmptyTask => write!(f, "The task description can't be empty"),
            StartupError::UntypeableTask => write!(
                f,
                "The task description ends up in the apology you have to type, so it may only use \
                 characters from a plain keyboard (printable ASCII)"
            ),
            StartupError::MissingCredential { variable } => write!(
                f,
                "{variable} is not set. An API key is required to talk to the vision model"
            ),
            StartupError::NoOverlayBackend => write!(
                f,
                "This build can't lock the screen. Rebuild with `--features x11` or `--features win`"
            ),
        }
    }
}

impl std::error::Error for StartupError {}

/// Reads the entries of the nearest `.env` file, searching up from the working directory. The
/// process environment is left untouched.
pub fn env_file_vars() -> HashMap<String, String> {
    collect_env_file(dotenvy::dotenv_iter())
}

fn collect_env_file<R: Read>(
    entries: Result<dotenvy::Iter<R>, dotenvy::Error>,
) -> HashMap<String, String> {
    let entries = match entries {
        Ok(entries) => entries,
        Err(e) => {
            debug!("No .env file loaded {e}");
            return HashMap::new();
        }
    };
    entries
        .filter_map(|entry| {
            entry
                .inspect_err(|e| warn!("Skipping a .env entry {e}"))
                .ok()
        })
        .collect()
}

/// Variables set in the process win over the ones from `.env`.
pub fn env_lookup(file_vars: HashMap<String, String>) -> impl Fn(&str) -> Option<String> {
    move |name| {
        std::env::var(name)
            .ok()
            .or_else(|| file_vars.get(name).cloned())
    }
}

/// Settings that stay fixed for the whole run.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub task: Arc<str>,
    pub interval: Duration,
    pub model: ModelSettings,
    pub challenge: ChallengeKind,
}

impl MonitorConfig {
    /// `env` looks up environment variables. It's a parameter so tests don't touch the real
    /// environment.
    pub fn from_args(
        args: &Args,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, StartupError> {
        if args.task.trim().is_empty() {
            return Err(StartupError::EmptyTask);
        }
        let task = keyboard_text(&args.task).ok_or(StartupError::UntypeableTask)?;

        let variable = args.model.credential_variable();
        let api_key = env(variable)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(StartupError::MissingCredential { variable })?;

        let base_url = env(API_BASE_VARIABLE)
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| args.model.default_base_url().to_string());

        Ok(Self {
            task: task.as_str().into(),
            interval: Duration::from_secs(args.interval),
            model: ModelSettings {
                provider: args.model,
                api_key,
                model: args
                    .model_name
                    .clone()
                    .unwrap_or_else(|| args.model.default_model().to_string()),
                base_url: base_url.trim_end_matches('/').to_string(),
            },
            challenge: args.challenge,
        })
    }
}
