//! Backend session manager.
//!
//! One tokio task drives the connection state machine:
//!
//! ```text
//! Disabled -> Connecting -> SessionPending -> Ready -> Backoff -> Connecting
//! ```
//!
//! Readiness (channel connected and a session id held) is published through a
//! `watch` channel. It is the only thing consumers check before delivering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, BackoffConfig};
use super::channel::RealtimeChannel;
use super::session_api::SessionApi;
use crate::coalescer::EnabledFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disabled,
    Connecting,
    SessionPending,
    Ready,
    Backoff,
}

/// Snapshot of the manager's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub state: ConnectionState,
    pub ready: bool,
    pub session_id: Option<String>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl Default for BackendStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disabled,
            ready: false,
            session_id: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Configuration for the backend manager
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub game_id: String,
    /// How often policy and channel liveness are polled while idle
    pub poll_interval: Duration,
    pub backoff: BackoffConfig,
    /// How long shutdown waits for the manager task
    pub shutdown_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            game_id: String::new(),
            poll_interval: Duration::from_millis(500),
            backoff: BackoffConfig::default(),
            shutdown_timeout: Duration::from_millis(500),
        }
    }
}

impl BackendConfig {
    pub fn with_game_id(mut self, game_id: impl Into<String>) -> Self {
        self.game_id = game_id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

pub struct BackendSessionManager {
    channel: Arc<dyn RealtimeChannel>,
    sessions: Arc<dyn SessionApi>,
    enabled: EnabledFlag,
    config: BackendConfig,
    backoff: Backoff,
    state: ConnectionState,
    session_id: Option<String>,
    last_error: Option<String>,
    /// Delay to sleep when entering `Backoff`
    pending_delay: Duration,
    reset_requested: Arc<AtomicBool>,
    cancel: CancellationToken,
    status_tx: watch::Sender<BackendStatus>,
}

impl BackendSessionManager {
    /// Spawn the manager task and return the handle that controls it.
    pub fn spawn(
        channel: Arc<dyn RealtimeChannel>,
        sessions: Arc<dyn SessionApi>,
        enabled: EnabledFlag,
        config: BackendConfig,
    ) -> BackendHandle {
        let (status_tx, status_rx) = watch::channel(BackendStatus::default());
        let cancel = CancellationToken::new();
        let reset_requested = Arc::new(AtomicBool::new(false));
        let shutdown_timeout = config.shutdown_timeout;

        let manager = Self {
            channel: channel.clone(),
            sessions,
            enabled,
            backoff: Backoff::new(config.backoff),
            config,
            state: ConnectionState::Disabled,
            session_id: None,
            last_error: None,
            pending_delay: Duration::ZERO,
            reset_requested: reset_requested.clone(),
            cancel: cancel.clone(),
            status_tx,
        };
        let join = tokio::spawn(manager.run());

        BackendHandle {
            status_rx,
            cancel,
            reset_requested,
            channel,
            join: TokioMutex::new(Some(join)),
            shutdown_timeout,
        }
    }

    async fn run(mut self) {
        tracing::info!("[backend] Manager started (game_id='{}')", self.config.game_id);

        while !self.cancel.is_cancelled() {
            if self.reset_requested.swap(false, Ordering::SeqCst) {
                tracing::info!("[backend] Session reset requested");
                self.session_id = None;
                if self.state == ConnectionState::Ready {
                    self.state = ConnectionState::SessionPending;
                }
            }

            if !self.enabled.is_enabled() && self.state != ConnectionState::Disabled {
                tracing::info!("[backend] Disabled by policy");
                self.state = ConnectionState::Disabled;
            }

            self.publish();

            let keep_going = match self.state {
                ConnectionState::Disabled => self.step_disabled().await,
                ConnectionState::Connecting => self.step_connecting().await,
                ConnectionState::SessionPending => self.step_session().await,
                ConnectionState::Ready => self.step_ready().await,
                ConnectionState::Backoff => self.step_backoff().await,
            };
            if !keep_going {
                break;
            }
        }

        self.channel.disconnect().await;
        self.state = ConnectionState::Disabled;
        self.publish();
        tracing::info!("[backend] Manager stopped");
    }

    async fn step_disabled(&mut self) -> bool {
        if self.enabled.is_enabled() {
            self.state = ConnectionState::Connecting;
            return true;
        }
        self.sleep(self.config.poll_interval).await
    }

    async fn step_connecting(&mut self) -> bool {
        if self.channel.is_connected() {
            self.state = ConnectionState::SessionPending;
            return true;
        }

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            result = self.channel.connect() => result,
        };
        match result {
            Ok(()) => {
                self.backoff.reset();
                self.last_error = None;
                self.state = ConnectionState::SessionPending;
            }
            Err(e) => self.fail(format!("connect failed: {e}")),
        }
        true
    }

    async fn step_session(&mut self) -> bool {
        if self.session_id.is_none() {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return false,
                result = self.sessions.create_session(&self.config.game_id, Utc::now()) => result,
            };
            match result {
                Ok(id) => {
                    tracing::info!("[backend] Session created: {}", id);
                    self.session_id = Some(id);
                }
                Err(e) => {
                    self.fail(format!("session create failed: {e}"));
                    return true;
                }
            }
        }

        self.last_error = None;
        self.state = ConnectionState::Ready;
        true
    }

    async fn step_ready(&mut self) -> bool {
        if !self.sleep(self.config.poll_interval).await {
            return false;
        }
        if !self.channel.is_connected() {
            tracing::warn!("[backend] Channel lost while ready");
            self.pending_delay = self.backoff.current_delay();
            self.state = ConnectionState::Backoff;
        }
        true
    }

    async fn step_backoff(&mut self) -> bool {
        tracing::debug!(
            "[backend] Backing off for {:?} (failures={})",
            self.pending_delay,
            self.backoff.failures()
        );
        if !self.sleep(self.pending_delay).await {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    fn fail(&mut self, error: String) {
        self.pending_delay = self.backoff.record_failure();
        tracing::warn!(
            "[backend] {} (attempt {}, retrying in {:?})",
            error,
            self.backoff.failures(),
            self.pending_delay
        );
        self.last_error = Some(error);
        self.state = ConnectionState::Backoff;
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn publish(&self) {
        let next = BackendStatus {
            state: self.state,
            ready: self.state == ConnectionState::Ready,
            session_id: self.session_id.clone(),
            consecutive_failures: self.backoff.failures(),
            last_error: self.last_error.clone(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// Read-only view of the manager plus its lifecycle controls.
pub struct BackendHandle {
    status_rx: watch::Receiver<BackendStatus>,
    cancel: CancellationToken,
    reset_requested: Arc<AtomicBool>,
    channel: Arc<dyn RealtimeChannel>,
    join: TokioMutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl BackendHandle {
    pub fn is_ready(&self) -> bool {
        self.status_rx.borrow().ready
    }

    pub fn session_id(&self) -> Option<String> {
        self.status_rx.borrow().session_id.clone()
    }

    pub fn status(&self) -> BackendStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<BackendStatus> {
        self.status_rx.clone()
    }

    pub fn channel(&self) -> Arc<dyn RealtimeChannel> {
        self.channel.clone()
    }

    /// Drop the held session id; a new one is requested on the next cycle.
    pub fn reset_session(&self) {
        self.reset_requested.store(true, Ordering::SeqCst);
    }

    /// Cancel the manager and wait (bounded) for it to disconnect and exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        if let Some(join) = self.join.lock().await.take() {
            match tokio::time::timeout(self.shutdown_timeout, join).await {
                Ok(Ok(())) => tracing::info!("[backend] Shutdown complete"),
                Ok(Err(e)) => tracing::warn!("[backend] Manager task failed: {}", e),
                Err(_) => {
                    tracing::warn!(
                        "[backend] Shutdown timed out after {:?}",
                        self.shutdown_timeout
                    );
                    self.channel.disconnect().await;
                }
            }
        }
    }
}

impl Drop for BackendHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
