use std::path::PathBuf;

use thiserror::Error;

/// Failure to produce a capture from the host's current frame.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No capturable surface available")]
    NoSurface,

    #[error("Frame buffer size mismatch: expected {expected} bytes, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("Image encoding failed: {0}")]
    Encode(String),

    #[error("Metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Failure while persisting a capture to the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Capture {0} has no image format")]
    MissingFormat(String),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Failure to deliver a stored capture.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Backend not ready")]
    NotReady,

    #[error("Stored capture file missing: {0}")]
    MissingFile(PathBuf),

    #[error("Stored metadata unreadable: {0}")]
    BadMetadata(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl DeliveryError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::NotReady | DeliveryError::Transport(_))
    }
}

/// Failure talking to the backend (channel connect or session creation).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Invalid endpoint '{0}': {1}")]
    InvalidEndpoint(String, String),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connect timed out after {0}ms")]
    ConnectTimeout(u64),

    #[error("Channel not connected")]
    NotConnected,

    #[error("Session create failed: {status} {body}")]
    SessionStatus { status: u16, body: String },

    #[error("Session create response missing session_id: {0}")]
    MissingSessionId(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum GameLensError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Invalid settings: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, GameLensError>;
