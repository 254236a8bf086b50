//! In-memory channel and session doubles shared by the crate's tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

use super::channel::RealtimeChannel;
use super::session_api::SessionApi;
use crate::error::BackendError;

/// Channel that records emitted frames and fails the first N connects.
#[derive(Default)]
pub struct MemoryChannel {
    connected: AtomicBool,
    failures_left: AtomicUsize,
    connect_calls: AtomicUsize,
    connect_times: Mutex<Vec<Instant>>,
    emitted: Mutex<Vec<(String, serde_json::Value)>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(connect_failures: usize) -> Self {
        let channel = Self::default();
        channel.failures_left.store(connect_failures, Ordering::SeqCst);
        channel
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// When each `connect` call was made, on the tokio clock.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_times.lock().clone()
    }

    /// Fail the next `n` connects.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn emitted(&self) -> Vec<(String, serde_json::Value)> {
        self.emitted.lock().clone()
    }
}

#[async_trait]
impl RealtimeChannel for MemoryChannel {
    async fn connect(&self) -> Result<(), BackendError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connect_times.lock().push(Instant::now());
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BackendError::Connect("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), BackendError> {
        if !self.is_connected() {
            return Err(BackendError::NotConnected);
        }
        self.emitted.lock().push((event.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Session API handing out `session-1`, `session-2`, ... after N failures.
#[derive(Default)]
pub struct CountingSessions {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
}

impl CountingSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: usize) -> Self {
        let sessions = Self::default();
        sessions.failures_left.store(failures, Ordering::SeqCst);
        sessions
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionApi for CountingSessions {
    async fn create_session(
        &self,
        _game_id: &str,
        _started_at: DateTime<Utc>,
    ) -> Result<String, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BackendError::SessionStatus {
                status: 500,
                body: "unavailable".to_string(),
            });
        }
        Ok(format!("session-{call}"))
    }
}
