use std::time::Duration;

use tracing::debug;

use super::OverlayError;

pub const HEADLINE: &str = "GET BACK TO WORK";
pub const INSTRUCTION: &str = "Type this message to continue:";

/// What the user did, already translated from platform key events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Char(char),
    Backspace,
    Submit,
    /// A close, minimize or task switch attempt that was swallowed.
    Blocked,
}

/// Everything a surface needs to draw one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayView<'a> {
    pub challenge: &'a str,
    pub input: &'a str,
    pub feedback: Option<&'a str>,
}

/// Contract windows and linux overlays implement. A surface is created, used and dropped on the
/// same thread.
pub trait LockSurface {
    /// Shows the full screen window and takes over keyboard and pointer. Once this returns Ok the
    /// window can't be closed, minimized or switched away from until [LockSurface::release].
    fn engage(&mut self) -> Result<(), OverlayError>;

    fn render(&mut self, view: &OverlayView<'_>) -> Result<(), OverlayError>;

    /// Waits up to `timeout` for the next user action.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<SurfaceEvent>, OverlayError>;

    /// Gives input back and destroys the window. Must be safe to call more than once and on a
    /// surface that never got engaged.
    fn release(&mut self);
}

/// A surface between a successful [LockSurface::engage] and release. Dropping it releases the
/// surface, so errors, cancellation and panics can't leave the screen locked.
pub struct EngagedSurface {
    inner: Box<dyn LockSurface>,
    released: bool,
}

impl EngagedSurface {
    pub fn engage(mut inner: Box<dyn LockSurface>) -> Result<Self, OverlayError> {
        if let Err(e) = inner.engage() {
            inner.release();
            return Err(e);
        }
        Ok(Self {
            inner,
            released: false,
        })
    }

    pub fn render(&mut self, view: &OverlayView<'_>) -> Result<(), OverlayError> {
        self.inner.render(view)
    }

    pub fn next_event(&mut self, timeout: Duration) -> Result<Option<SurfaceEvent>, OverlayError> {
        self.inner.next_event(timeout)
    }

    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.release();
            debug!("Overlay released");
        }
    }
}

impl Drop for EngagedSurface {
    fn drop(&mut self) {
        self.release();
    }
}

/// Splits text into lines of at most `width` characters on word boundaries. Core X fonts have no
/// layout support, so the x11 surface wraps on its own.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split(' ') {
        if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}
