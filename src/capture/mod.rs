//! Screen capture. [PrimaryScreenCapturer] grabs the primary display and hands it over as PNG
//! bytes, ready to be sent to a vision model.

use std::{fmt, io::Cursor};

use chrono::{DateTime, Utc};
use image::{imageops::FilterType, DynamicImage, ImageOutputFormat};
use screenshots::Screen;
use tracing::{debug, instrument};

/// Longest side sent to the model. Anything bigger only inflates the request.
const MAX_DIMENSION: u32 = 1568;

/// A single still image of the display. Lives for one tick only.
#[derive(Clone)]
pub struct Screenshot {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub taken_at: DateTime<Utc>,
}

impl fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Screenshot")
            .field("bytes", &self.png.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("taken_at", &self.taken_at)
            .finish()
    }
}

#[derive(Debug)]
pub enum CaptureError {
    PermissionDenied(String),
    CaptureFailed(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::PermissionDenied(e) => write!(f, "Screen capture permission denied: {e}"),
            CaptureError::CaptureFailed(e) => write!(f, "Screen capture failed: {e}"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl CaptureError {
    /// Platform libraries only report failures as text, so permission problems are recognized by
    /// their wording.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if ["permission", "denied", "not authorized", "unauthorized"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            CaptureError::PermissionDenied(message)
        } else {
            CaptureError::CaptureFailed(message)
        }
    }
}

/// Contract every capture backend implements. Used by the poll loop once per tick.
#[cfg_attr(test, mockall::automock)]
pub trait ScreenCapturer: Send {
    fn capture(&mut self) -> Result<Screenshot, CaptureError>;
}

/// Captures the display flagged as primary, or the first one if none is.
pub struct PrimaryScreenCapturer;

impl PrimaryScreenCapturer {
    pub fn new() -> Self {
        Self
    }

    fn primary_screen() -> Result<Screen, CaptureError> {
        let screens = Screen::all().map_err(|e| CaptureError::from_message(e.to_string()))?;
        let primary = screens
            .iter()
            .position(|s| s.display_info.is_primary)
            .unwrap_or(0);
        screens
            .into_iter()
            .nth(primary)
            .ok_or_else(|| CaptureError::CaptureFailed("No displays found".into()))
    }
}

impl Default for PrimaryScreenCapturer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenCapturer for PrimaryScreenCapturer {
    #[instrument(skip(self))]
    fn capture(&mut self) -> Result<Screenshot, CaptureError> {
        let screen = Self::primary_screen()?;
        let taken_at = Utc::now();
        let image = screen
            .capture()
            .map_err(|e| CaptureError::from_message(e.to_string()))?;
        debug!(
            "Captured display {} ({}x{})",
            screen.display_info.id,
            image.width(),
            image.height()
        );
        encode_png(DynamicImage::ImageRgba8(image), taken_at)
    }
}

/// Downscales to [MAX_DIMENSION] if needed and encodes as PNG.
pub fn encode_png(image: DynamicImage, taken_at: DateTime<Utc>) -> Result<Screenshot, CaptureError> {
    let image = if image.width().max(image.height()) > MAX_DIMENSION {
        image.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Triangle)
    } else {
        image
    };

    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageOutputFormat::Png)
        .map_err(|e| CaptureError::CaptureFailed(format!("PNG encoding failed: {e}")))?;

    Ok(Screenshot {
        png: png.into_inner(),
        width: image.width(),
        height: image.height(),
        taken_at,
    })
}
