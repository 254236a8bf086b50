//! GameLens: snapshot capture pipeline for game hosts.
//!
//! Snap requests made during a frame are coalesced into one capture, persisted
//! to a local date-partitioned store by a background task, and delivered to a
//! collector once a backend session is ready. See [`GameLens`] for the entry
//! point.

pub mod backend;
pub mod capture;
pub mod coalescer;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod settings;
pub mod store;
pub mod upload;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
mod integration_tests;

pub use capture::{CapturePacket, CaptureSource, FrameGrabber, PngCaptureSource, RgbaFrame, SnapReason};
pub use coalescer::{DropReason, SnapEvent, SnapOutcome};
pub use error::{GameLensError, Result};
pub use pipeline::{GameLens, GameLensBuilder, GameLensEvents};
pub use settings::{GameLensSettings, SettingsManager};
pub use store::StoreEvent;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "gamelens_lib=info,gamelens_cli=info";

/// Log filter for verbose runs.
pub const VERBOSE_LOG_FILTER: &str = "gamelens_lib=debug,gamelens_cli=debug";

/// Install a stderr fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`.
///
/// Safe to call more than once; only the first call installs anything.
/// Returns whether this call installed the subscriber.
pub fn init_logging(default_filter: &str) -> bool {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
