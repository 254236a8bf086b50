//! Capture policy: the shared enabled flag, the sensitive-context set and the
//! minimum interval between accepted snaps.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Process-wide on/off switch, shared by the coalescer and the backend manager.
#[derive(Debug, Clone)]
pub struct EnabledFlag(Arc<AtomicBool>);

impl EnabledFlag {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }
}

impl Default for EnabledFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Tracks which host contexts (scenes, screens) must never be captured.
#[derive(Debug, Default)]
pub struct SensitiveContexts {
    registered: HashSet<String>,
    current: Option<String>,
    sensitive: bool,
}

impl SensitiveContexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Register or unregister `id`. Returns the new sensitivity if it flipped.
    pub fn set(&mut self, id: &str, sensitive: bool) -> Option<bool> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }

        if sensitive {
            self.registered.insert(id.to_string());
        } else {
            self.registered.remove(id);
        }
        self.recompute()
    }

    /// Record the host's active context. Returns the new sensitivity if it flipped.
    pub fn context_changed(&mut self, current: Option<&str>) -> Option<bool> {
        self.current = current
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from);
        self.recompute()
    }

    fn recompute(&mut self) -> Option<bool> {
        let sensitive = self
            .current
            .as_ref()
            .is_some_and(|c| self.registered.contains(c));

        if sensitive == self.sensitive {
            return None;
        }
        self.sensitive = sensitive;
        Some(sensitive)
    }
}

/// Minimum spacing between accepted snaps.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_accepted: Option<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_accepted else {
            return true;
        };
        // A clock that moved backwards yields a negative delta and keeps rejecting.
        match (now - last).to_std() {
            Ok(elapsed) => elapsed >= self.min_interval,
            Err(_) => false,
        }
    }

    pub fn accept(&mut self, now: DateTime<Utc>) {
        self.last_accepted = Some(now);
    }
}
