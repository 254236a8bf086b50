//! On-disk layout of the capture store.
//!
//! ```text
//! <root>/captures/<YYYY-MM-DD>/<millis>_<capture_id>.<ext>
//! <root>/captures/<YYYY-MM-DD>/<millis>_<capture_id>.json
//! ```
//!
//! The millisecond timestamp is zero-padded so lexical order within a partition
//! is chronological order.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

pub const CAPTURES_DIR: &str = "captures";
pub const METADATA_EXT: &str = "json";
pub const TEMP_EXT: &str = "tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Metadata,
    Temp,
}

#[derive(Debug, Clone)]
pub struct CaptureLayout {
    root: PathBuf,
}

impl CaptureLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.root.join(CAPTURES_DIR)
    }

    /// Date partition a capture taken at `time` belongs to.
    pub fn partition_dir(&self, time: DateTime<Utc>) -> PathBuf {
        self.captures_dir().join(time.format("%Y-%m-%d").to_string())
    }

    pub fn base_name(time: DateTime<Utc>, capture_id: &str) -> String {
        format!("{:013}_{}", time.timestamp_millis().max(0), capture_id)
    }

    /// Image and metadata paths for a capture, in that order.
    pub fn capture_paths(
        &self,
        time: DateTime<Utc>,
        capture_id: &str,
        image_ext: &str,
    ) -> (PathBuf, PathBuf) {
        let dir = self.partition_dir(time);
        let base = Self::base_name(time, capture_id);
        (
            dir.join(format!("{base}.{image_ext}")),
            dir.join(format!("{base}.{METADATA_EXT}")),
        )
    }
}

pub fn file_kind(path: &Path) -> FileKind {
    match path.extension().and_then(|e| e.to_str()) {
        Some(TEMP_EXT) => FileKind::Temp,
        Some(METADATA_EXT) => FileKind::Metadata,
        _ => FileKind::Image,
    }
}

/// Sibling path a file is staged at before being renamed into place.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("capture"));
    name.push(".");
    name.push(TEMP_EXT);
    path.with_file_name(name)
}
