use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reason::SnapReason;

/// A finished capture, handed from the capture source to the local store.
#[derive(Debug, Clone)]
pub struct CapturePacket {
    pub capture_id: String,
    pub capture_time: DateTime<Utc>,
    pub image_bytes: Vec<u8>,
    /// Image container, e.g. `"png"`.
    pub image_format: String,
    pub payload: serde_json::Value,
}

impl CapturePacket {
    /// File extension for the image, without the leading dot.
    pub fn image_extension(&self) -> Option<String> {
        let ext = self.image_format.trim().trim_start_matches('.');
        if ext.is_empty() {
            None
        } else {
            Some(ext.to_ascii_lowercase())
        }
    }
}

/// Reasons accumulated for one coalescing window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapRequest {
    pub reasons: BTreeSet<SnapReason>,
    pub requested_at: DateTime<Utc>,
}

impl SnapRequest {
    pub fn new(requested_at: DateTime<Utc>) -> Self {
        Self {
            reasons: BTreeSet::new(),
            requested_at,
        }
    }

    pub fn merge(&mut self, reason: SnapReason) {
        self.reasons.insert(reason);
    }
}

/// Location of a capture the store has written successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCaptureRef {
    pub image_path: PathBuf,
    pub metadata_path: PathBuf,
    pub capture_id: String,
}
