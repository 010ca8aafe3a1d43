use std::{sync::Arc, time::Duration};

use anyhow::Result;
use poll::PollLoop;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    capture::{PrimaryScreenCapturer, ScreenCapturer},
    classifier::{model::create_model, ModelTaskClassifier, TaskClassifier},
    cli::config::MonitorConfig,
    overlay::{
        self,
        challenge::{ChallengeKind, ChallengeSource, ModelChallenges, TemplateChallenges},
        LockOverlay, Lockout,
    },
    utils::clock::{Clock, DefaultClock},
};

pub mod poll;
pub mod shutdown;

/// Runs the monitor until Ctrl+C, SIGTERM or a broken overlay.
pub async fn start_monitor(config: MonitorConfig) -> Result<()> {
    let shutdown_token = CancellationToken::new();

    let model = create_model(config.model.clone())?;
    let classifier = ModelTaskClassifier::new(model.clone());
    let challenges: Box<dyn ChallengeSource> = match config.challenge {
        ChallengeKind::Template => Box::new(TemplateChallenges::new()),
        ChallengeKind::Model => Box::new(ModelChallenges::new(model, TemplateChallenges::new())),
    };
    let lockout = LockOverlay::new(
        challenges,
        Arc::new(overlay::platform_surface),
        shutdown_token.clone(),
    );

    let poll = create_poll_loop(
        config.task.clone(),
        config.interval,
        PrimaryScreenCapturer::new(),
        classifier,
        lockout,
        &shutdown_token,
        DefaultClock,
    );

    let watcher = tokio::spawn(shutdown::detect_shutdown(shutdown_token.clone()));
    let result = poll.run().await;
    watcher.abort();

    result.inspect_err(|e| error!("Monitor stopped because of the overlay {e:?}"))?;
    info!("Monitor stopped");
    Ok(())
}

fn create_poll_loop(
    task: Arc<str>,
    interval: Duration,
    capturer: impl ScreenCapturer + 'static,
    classifier: impl TaskClassifier + 'static,
    lockout: impl Lockout + 'static,
    shutdown_token: &CancellationToken,
    clock: impl Clock,
) -> PollLoop {
    PollLoop::new(
        task,
        interval,
        Box::new(capturer),
        Box::new(classifier),
        Box::new(lockout),
        shutdown_token.clone(),
        Box::new(clock),
    )
}
