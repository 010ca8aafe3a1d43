//! The lock screen. [LockOverlay] is the main artifact of this module: it picks a challenge,
//! puts a [LockSurface] on screen and keeps it there until the challenge is typed back.

pub mod challenge;
pub mod state;
pub mod surface;

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::{
    challenge::ChallengeSource,
    state::LockSession,
    surface::{EngagedSurface, LockSurface},
};

/// How often the overlay thread looks at the shutdown token while waiting for input.
const EVENT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum OverlayError {
    /// The lock screen couldn't be put up or couldn't take over input.
    Render(String),
    /// The window system failed while the lock screen was up.
    Backend(String),
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayError::Render(e) => write!(f, "Failed to show the lock screen: {e}"),
            OverlayError::Backend(e) => write!(f, "Lock screen failed: {e}"),
        }
    }
}

impl std::error::Error for OverlayError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The challenge was typed correctly.
    Unlocked { failed_attempts: u32 },
    /// The process is shutting down. The overlay was released without a correct answer.
    Interrupted,
}

/// Seam between the poll loop and the lock screen.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Lockout: Send {
    /// Shows the lock screen and resolves once it is gone again.
    async fn lock(&mut self, task: &str) -> Result<LockOutcome, OverlayError>;
}

pub type SurfaceFactory =
    Arc<dyn Fn() -> Result<Box<dyn LockSurface>, OverlayError> + Send + Sync>;

pub struct LockOverlay {
    challenges: Box<dyn ChallengeSource>,
    surfaces: SurfaceFactory,
    shutdown: CancellationToken,
}

impl LockOverlay {
    pub fn new(
        challenges: Box<dyn ChallengeSource>,
        surfaces: SurfaceFactory,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            challenges,
            surfaces,
            shutdown,
        }
    }
}

#[async_trait]
impl Lockout for LockOverlay {
    async fn lock(&mut self, task: &str) -> Result<LockOutcome, OverlayError> {
        let challenge = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(LockOutcome::Interrupted),
            challenge = self.challenges.next_challenge(task) => challenge,
        };
        info!("Locking the screen until {challenge:?} is typed");

        let surfaces = self.surfaces.clone();
        let shutdown = self.shutdown.clone();
        // Window systems want their windows driven from one thread, so the whole lockout
        // happens on a blocking thread and the surface never crosses threads.
        tokio::task::spawn_blocking(move || {
            let surface = surfaces()?;
            run_lockout(surface, challenge, &shutdown)
        })
        .await
        .map_err(|e| OverlayError::Backend(format!("Overlay thread died {e}")))?
    }
}

/// Drives one lockout from Hidden to Unlocked on the current thread.
pub fn run_lockout(
    surface: Box<dyn LockSurface>,
    challenge: String,
    shutdown: &CancellationToken,
) -> Result<LockOutcome, OverlayError> {
    let mut session = LockSession::new();
    session.show(challenge);

    let mut surface = EngagedSurface::engage(surface)?;
    surface.render(&session.view())?;

    loop {
        if shutdown.is_cancelled() {
            warn!("Shutdown requested during a lockout, releasing the screen");
            return Ok(LockOutcome::Interrupted);
        }

        let Some(event) = surface.next_event(EVENT_POLL_TIMEOUT)? else {
            continue;
        };
        session.handle(event);
        debug!(input = session.buffer(), "Overlay event {:?}", event);

        if !session.requires_suppression() {
            break;
        }
        surface.render(&session.view())?;
    }

    surface.release();
    info!(
        "{:?} entered after {} failed attempts",
        session.challenge(),
        session.failed_attempts()
    );
    session.close();
    Ok(LockOutcome::Unlocked {
        failed_attempts: session.failed_attempts(),
    })
}

/// Name of the overlay backend compiled into this binary, if any.
pub fn backend_name() -> Option<&'static str> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "win")] {
            Some("win")
        } else if #[cfg(feature = "x11")] {
            Some("x11")
        } else {
            None
        }
    }
}

/// Creates the platform's lock surface.
pub fn platform_surface() -> Result<Box<dyn LockSurface>, OverlayError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "win")] {
            Ok(Box::new(win::WindowsLockSurface::new()?))
        } else if #[cfg(feature = "x11")] {
            Ok(Box::new(x11::X11LockSurface::new()?))
        } else {
            Err(OverlayError::Render(
                "no overlay backend was compiled in, enable the `x11` or `win` feature".into(),
            ))
        }
    }
}
