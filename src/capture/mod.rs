//! Capture data model and the capture source seam.
//!
//! A capture starts life as a [`CapturePacket`] produced by a [`CaptureSource`]
//! when the coalescer finalizes a window, and ends as a [`StoredCaptureRef`]
//! once the local store has written it to disk.

pub mod packet;
pub mod reason;
pub mod source;

pub use packet::{CapturePacket, SnapRequest, StoredCaptureRef};
pub use reason::{SnapReason, UNSPECIFIED_REASON};
pub use source::{CaptureSource, FrameGrabber, PngCaptureSource, RgbaFrame};
