use serde::{Deserialize, Serialize};

/// Why a snap was requested.
///
/// Reasons are merged into a sorted set per coalescing window, so the ordering
/// here is only used to keep that set deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum SnapReason {
    AutoTimer,
    Manual,
    Custom(String),
}

impl SnapReason {
    /// Reason from a free-form tag. Same normalization as `From<String>`.
    pub fn custom(tag: impl Into<String>) -> Self {
        SnapReason::from(tag.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            SnapReason::AutoTimer => "auto_timer",
            SnapReason::Manual => "manual",
            SnapReason::Custom(tag) => tag,
        }
    }
}

impl std::fmt::Display for SnapReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag used when a blank reason is given.
pub const UNSPECIFIED_REASON: &str = "unspecified";

/// Tags are trimmed; a blank tag becomes [`UNSPECIFIED_REASON`].
impl From<String> for SnapReason {
    fn from(s: String) -> Self {
        match s.trim() {
            "" => SnapReason::Custom(UNSPECIFIED_REASON.to_string()),
            "auto_timer" => SnapReason::AutoTimer,
            "manual" => SnapReason::Manual,
            tag => SnapReason::Custom(tag.to_string()),
        }
    }
}

impl From<&str> for SnapReason {
    fn from(s: &str) -> Self {
        SnapReason::from(s.to_string())
    }
}

impl From<SnapReason> for String {
    fn from(reason: SnapReason) -> Self {
        match reason {
            SnapReason::Custom(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}
