use serde::Serialize;

use crate::capture::SnapReason;

/// Why a snap request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Disabled,
    SensitiveContext,
    RateLimited,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Disabled => "disabled",
            DropReason::SensitiveContext => "sensitive_context",
            DropReason::RateLimited => "rate_limited",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immediate result of `request_snap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapOutcome {
    Queued,
    Dropped(DropReason),
}

/// Signals published by the coalescer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SnapEvent {
    Queued {
        reason: SnapReason,
    },
    Dropped {
        reason: SnapReason,
        why: DropReason,
    },
    SensitiveChanged {
        sensitive: bool,
    },
    Captured {
        capture_id: String,
        reasons: Vec<SnapReason>,
    },
    CaptureFailed {
        error: String,
    },
}
