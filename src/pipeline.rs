//! The `GameLens` orchestrator.
//!
//! Owns every stage of the pipeline and wires them together:
//!
//! ```text
//! snap() -> SnapCoalescer --(end_frame)--> CaptureSource -> LocalCaptureStore
//!                                                                |
//!                                              capture_saved ----+--> UploadQueue -> transport
//!                                                                          |
//!                                         BackendSessionManager (readiness)+
//! ```
//!
//! The host constructs one `GameLens`, calls [`GameLens::snap`] whenever it
//! wants a capture, [`GameLens::end_frame`] once per frame, and
//! [`GameLens::shutdown`] on exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{
    BackendHandle, BackendSessionManager, BackendStatus, HttpSessionService, RealtimeChannel,
    SessionApi, TcpChannel,
};
use crate::capture::{CaptureSource, FrameGrabber, PngCaptureSource, SnapReason};
use crate::coalescer::{EnabledFlag, SnapCoalescer, SnapEvent, SnapOutcome};
use crate::error::CaptureError;
use crate::host::{FrameScheduler, SchedulingHost};
use crate::settings::GameLensSettings;
use crate::store::{CaptureSink, LocalCaptureStore, StoreEvent};
use crate::upload::{ChannelTransport, LoggingTransport, UploadQueue, UploadStats, UploadTransport};

/// Event streams the host may consume. Dropping either receiver is fine.
pub struct GameLensEvents {
    pub snaps: mpsc::UnboundedReceiver<SnapEvent>,
    pub store: mpsc::UnboundedReceiver<StoreEvent>,
}

pub struct GameLensBuilder {
    settings: GameLensSettings,
    source: Option<Box<dyn CaptureSource>>,
    channel: Option<Arc<dyn RealtimeChannel>>,
    sessions: Option<Arc<dyn SessionApi>>,
    transport: Option<Arc<dyn UploadTransport>>,
}

impl GameLensBuilder {
    pub fn capture_source(mut self, source: impl CaptureSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Use the built-in PNG source fed by `grabber`, sized from settings.
    pub fn grabber(self, grabber: impl FrameGrabber + 'static) -> Self {
        let capture = &self.settings.capture;
        let source = PngCaptureSource::new(grabber, capture.width, capture.height).with_ids(
            self.settings.game_id().unwrap_or_default(),
            self.settings.project_id().unwrap_or_default(),
        );
        self.capture_source(source)
    }

    /// Real-time channel to use instead of a TCP channel to the endpoint.
    pub fn channel(mut self, channel: Arc<dyn RealtimeChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Session API to use instead of HTTP against the endpoint.
    pub fn session_api(mut self, sessions: Arc<dyn SessionApi>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Upload transport to use instead of the default for this configuration.
    pub fn transport(mut self, transport: Arc<dyn UploadTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate settings and start every background stage.
    pub async fn start(self) -> Result<(GameLens, GameLensEvents)> {
        let settings = self.settings;
        settings.validate().context("Invalid GameLens settings")?;

        let source = self
            .source
            .ok_or_else(|| anyhow!("No capture source configured"))?;
        let enabled = EnabledFlag::new(settings.enabled);

        let (store, store_rx) = LocalCaptureStore::spawn(settings.store_config())
            .await
            .context("Failed to start capture store")?;
        let store = Arc::new(store);

        let backend = start_backend(&settings, self.channel, self.sessions, enabled.clone())?;

        let transport: Arc<dyn UploadTransport> = match (self.transport, &backend) {
            (Some(transport), _) => transport,
            (None, Some(handle)) => Arc::new(ChannelTransport::new(handle.channel(), handle.subscribe())),
            (None, None) => Arc::new(LoggingTransport),
        };
        let uploads = Arc::new(UploadQueue::spawn(transport, settings.upload_config()));

        let (store_out_tx, store_out_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_store_events(store_rx, uploads.clone(), store_out_tx));

        let scheduler = Arc::new(FrameScheduler::new());
        let sink: Arc<dyn CaptureSink> = store.clone();
        let (coalescer, snap_rx) = SnapCoalescer::new(
            source,
            sink,
            scheduler.clone(),
            enabled.clone(),
            settings.min_interval(),
        );

        tracing::info!(
            "[gamelens] Started (enabled={}, backend={}, data_dir={:?})",
            settings.enabled,
            backend.is_some(),
            settings.data_dir()
        );

        let lens = GameLens {
            coalescer,
            scheduler,
            enabled,
            store,
            uploads,
            backend,
            forwarder: Some(forwarder),
            drain_timeout: store_drain_timeout(&settings),
        };
        let events = GameLensEvents {
            snaps: snap_rx,
            store: store_out_rx,
        };
        Ok((lens, events))
    }
}

fn start_backend(
    settings: &GameLensSettings,
    channel: Option<Arc<dyn RealtimeChannel>>,
    sessions: Option<Arc<dyn SessionApi>>,
    enabled: EnabledFlag,
) -> Result<Option<BackendHandle>> {
    let endpoint = settings.endpoint();
    if channel.is_none() && sessions.is_none() && endpoint.is_none() {
        tracing::info!("[gamelens] No backend endpoint configured; captures stay local");
        return Ok(None);
    }

    let channel: Arc<dyn RealtimeChannel> = match (channel, endpoint) {
        (Some(channel), _) => channel,
        (None, Some(endpoint)) => Arc::new(
            TcpChannel::new(endpoint, settings.connect_timeout())
                .context("Failed to configure real-time channel")?,
        ),
        (None, None) => return Err(anyhow!("Session API given without a channel or endpoint")),
    };
    let sessions: Arc<dyn SessionApi> = match (sessions, endpoint) {
        (Some(sessions), _) => sessions,
        (None, Some(endpoint)) => Arc::new(
            HttpSessionService::new(endpoint, settings.connect_timeout())
                .context("Failed to configure session service")?,
        ),
        (None, None) => return Err(anyhow!("Channel given without a session API or endpoint")),
    };

    Ok(Some(BackendSessionManager::spawn(
        channel,
        sessions,
        enabled,
        settings.backend_config(),
    )))
}

/// How long shutdown waits for saved captures to reach the upload queue.
fn store_drain_timeout(settings: &GameLensSettings) -> Duration {
    Duration::from_millis(settings.storage.shutdown_timeout_ms)
}

/// Hand every saved capture to the upload queue and pass all store events on.
async fn forward_store_events(
    mut store_rx: mpsc::UnboundedReceiver<StoreEvent>,
    uploads: Arc<UploadQueue>,
    out: mpsc::UnboundedSender<StoreEvent>,
) {
    while let Some(event) = store_rx.recv().await {
        match &event {
            StoreEvent::CaptureSaved(stored) => uploads.enqueue(stored.clone()),
            StoreEvent::CaptureFailed { capture_id, error } => {
                tracing::debug!("[gamelens] Capture {} not stored: {}", capture_id, error)
            }
            StoreEvent::Evicted { .. } => {}
        }
        let _ = out.send(event);
    }
}

pub struct GameLens {
    coalescer: SnapCoalescer,
    scheduler: Arc<FrameScheduler>,
    enabled: EnabledFlag,
    store: Arc<LocalCaptureStore>,
    uploads: Arc<UploadQueue>,
    backend: Option<BackendHandle>,
    forwarder: Option<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl GameLens {
    pub fn builder(settings: GameLensSettings) -> GameLensBuilder {
        GameLensBuilder {
            settings,
            source: None,
            channel: None,
            sessions: None,
            transport: None,
        }
    }

    /// Request a capture of the current frame. Never blocks.
    pub fn snap(&mut self, reason: impl Into<SnapReason>) -> SnapOutcome {
        self.coalescer.request_snap(reason)
    }

    /// Frame-end hook: run deferred captures, then advance to the next frame.
    ///
    /// Returns the ids of captures taken. Every deferred task runs and the
    /// frame advances even when one fails; the first capture failure is then
    /// returned.
    pub fn end_frame(&mut self) -> Result<Vec<String>, CaptureError> {
        let mut captured = Vec::new();
        let mut failure = None;
        for task in self.scheduler.take_deferred() {
            match self.coalescer.run_deferred(task) {
                Ok(Some(id)) => captured.push(id),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("[gamelens] Capture failed: {}", e);
                    failure.get_or_insert(e);
                }
            }
        }
        self.scheduler.advance();
        match failure {
            Some(e) => Err(e),
            None => Ok(captured),
        }
    }

    pub fn current_frame(&self) -> u64 {
        self.scheduler.current_unit()
    }

    pub fn enable(&self) {
        tracing::info!("[gamelens] Enabled");
        self.enabled.set(true);
    }

    pub fn disable(&self) {
        tracing::info!("[gamelens] Disabled");
        self.enabled.set(false);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.is_enabled()
    }

    pub fn set_sensitive_context(&mut self, id: &str, sensitive: bool) {
        self.coalescer.set_sensitive_context(id, sensitive);
    }

    pub fn context_changed(&mut self, current: Option<&str>) {
        self.coalescer.context_changed(current);
    }

    pub fn is_sensitive(&self) -> bool {
        self.coalescer.is_sensitive()
    }

    pub fn backend_ready(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_ready())
    }

    pub fn session_id(&self) -> Option<String> {
        self.backend.as_ref().and_then(|b| b.session_id())
    }

    pub fn backend_status(&self) -> Option<BackendStatus> {
        self.backend.as_ref().map(|b| b.status())
    }

    /// Drop the backend session; a new one is created on the next cycle.
    pub fn reset_session(&self) {
        if let Some(backend) = &self.backend {
            backend.reset_session();
        }
    }

    pub fn upload_stats(&self) -> UploadStats {
        self.uploads.stats()
    }

    /// Flush any pending capture, then stop every stage in pipeline order.
    ///
    /// Returns the final upload counters.
    pub async fn shutdown(mut self) -> UploadStats {
        tracing::info!("[gamelens] Shutting down");

        // A snap requested this frame is still owed a capture.
        if let Err(e) = self.end_frame() {
            tracing::warn!("[gamelens] Final capture failed during shutdown: {}", e);
        }

        self.store.shutdown().await;

        if let Some(forwarder) = self.forwarder.take() {
            let abort = forwarder.abort_handle();
            if tokio::time::timeout(self.drain_timeout, forwarder).await.is_err() {
                tracing::warn!("[gamelens] Store events not drained before shutdown");
                abort.abort();
            }
        }

        self.uploads.shutdown().await;

        if let Some(backend) = &self.backend {
            backend.shutdown().await;
        }

        let stats = self.uploads.stats();
        tracing::info!("[gamelens] Shutdown complete ({:?})", stats);
        stats
    }
}
