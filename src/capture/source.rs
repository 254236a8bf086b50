//! Capture sources.
//!
//! The coalescer only knows the [`CaptureSource`] trait. [`PngCaptureSource`] is
//! the built-in implementation: the host hands it raw RGBA frames through a
//! [`FrameGrabber`], and it downsizes and encodes them.

use std::collections::BTreeSet;
use std::io::Cursor;

use chrono::{DateTime, SecondsFormat, Utc};
use image::imageops::FilterType;
use image::{ImageFormat, RgbaImage};
use uuid::Uuid;

use super::packet::CapturePacket;
use super::reason::SnapReason;
use crate::error::CaptureError;

/// Produces one encoded capture for a finalized coalescing window.
///
/// Called on the host thread from the frame-end hook, so implementations must
/// return within one scheduling unit.
pub trait CaptureSource: Send {
    fn capture(
        &mut self,
        reasons: &BTreeSet<SnapReason>,
        at: DateTime<Utc>,
    ) -> Result<CapturePacket, CaptureError>;
}

/// Raw RGBA8 pixels for one rendered frame.
#[derive(Debug, Clone)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Host hook returning the most recent rendered frame, or `None` when there is
/// nothing to capture (e.g. the window is minimized).
pub trait FrameGrabber: Send {
    fn grab(&mut self) -> Option<RgbaFrame>;
}

impl<F> FrameGrabber for F
where
    F: FnMut() -> Option<RgbaFrame> + Send,
{
    fn grab(&mut self) -> Option<RgbaFrame> {
        self()
    }
}

pub struct PngCaptureSource<G> {
    grabber: G,
    width: u32,
    height: u32,
    game_id: String,
    project_id: String,
}

impl<G: FrameGrabber> PngCaptureSource<G> {
    /// A `width`/`height` of zero keeps the source frame size.
    pub fn new(grabber: G, width: u32, height: u32) -> Self {
        Self {
            grabber,
            width,
            height,
            game_id: String::new(),
            project_id: String::new(),
        }
    }

    pub fn with_ids(mut self, game_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        self.game_id = game_id.into();
        self.project_id = project_id.into();
        self
    }

    fn encode(&self, frame: RgbaFrame) -> Result<(Vec<u8>, u32, u32), CaptureError> {
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.pixels.len() != expected {
            return Err(CaptureError::FrameSize {
                expected,
                actual: frame.pixels.len(),
            });
        }

        let source = RgbaImage::from_raw(frame.width, frame.height, frame.pixels).ok_or(
            CaptureError::FrameSize {
                expected,
                actual: 0,
            },
        )?;

        let resize = self.width > 0
            && self.height > 0
            && (self.width != frame.width || self.height != frame.height);
        let image = if resize {
            image::imageops::resize(&source, self.width, self.height, FilterType::Triangle)
        } else {
            source
        };

        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| CaptureError::Encode(e.to_string()))?;

        Ok((bytes, image.width(), image.height()))
    }
}

impl<G: FrameGrabber> CaptureSource for PngCaptureSource<G> {
    fn capture(
        &mut self,
        reasons: &BTreeSet<SnapReason>,
        at: DateTime<Utc>,
    ) -> Result<CapturePacket, CaptureError> {
        let frame = self.grabber.grab().ok_or(CaptureError::NoSurface)?;
        if frame.width == 0 || frame.height == 0 {
            return Err(CaptureError::NoSurface);
        }
        let (source_width, source_height) = (frame.width, frame.height);

        let (image_bytes, width, height) = self.encode(frame)?;
        let capture_id = Uuid::new_v4().to_string();

        let payload = serde_json::json!({
            "capture_id": capture_id,
            "captured_at": at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "reasons": reasons,
            "image": {
                "format": "png",
                "width": width,
                "height": height,
                "source_width": source_width,
                "source_height": source_height,
            },
            "game_id": self.game_id,
            "project_id": self.project_id,
        });

        Ok(CapturePacket {
            capture_id,
            capture_time: at,
            image_bytes,
            image_format: "png".to_string(),
            payload,
        })
    }
}
