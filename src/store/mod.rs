//! Local capture store.
//!
//! A single background task owns all capture file I/O. The host thread only
//! pushes packets onto an unbounded queue; the worker writes each one as an
//! image plus JSON metadata pair, enforces the per-partition ceiling and reports
//! the outcome on an event channel.

pub mod layout;
pub mod retention;

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};

use crate::capture::{CapturePacket, StoredCaptureRef};
use crate::error::StoreError;

pub use layout::CaptureLayout;
pub use retention::enforce_retention;

/// Anything that accepts finished captures without blocking the caller.
pub trait CaptureSink: Send + Sync {
    fn enqueue(&self, packet: CapturePacket);
}

/// Configuration for the local capture store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory; captures land under `<root>/captures/`
    pub root_dir: PathBuf,
    /// Image files kept per date partition before the oldest are evicted
    pub max_files_per_partition: usize,
    /// How long shutdown waits for queued writes to finish
    pub shutdown_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            root_dir: data.join("gamelens"),
            max_files_per_partition: 5000,
            shutdown_timeout: Duration::from_millis(500),
        }
    }
}

impl StoreConfig {
    pub fn with_root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_dir = path.into();
        self
    }

    pub fn with_max_files(mut self, max: usize) -> Self {
        self.max_files_per_partition = max;
        self
    }
}

/// Work sent to the store task
#[derive(Debug)]
pub enum StoreTask {
    Persist(Box<CapturePacket>),
    Shutdown,
}

/// Outcomes reported by the store task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    CaptureSaved(StoredCaptureRef),
    CaptureFailed { capture_id: String, error: String },
    Evicted { partition: PathBuf, count: usize },
}

pub struct LocalCaptureStore {
    task_tx: RwLock<Option<mpsc::UnboundedSender<StoreTask>>>,
    shutdown_rx: TokioMutex<Option<oneshot::Receiver<()>>>,
    shutdown_timeout: Duration,
}

impl LocalCaptureStore {
    /// Create the capture directory and spawn the store task.
    /// Returns the store and the receiver for its events.
    pub async fn spawn(
        config: StoreConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<StoreEvent>), StoreError> {
        let layout = CaptureLayout::new(&config.root_dir);
        let captures_dir = layout.captures_dir();
        tokio::fs::create_dir_all(&captures_dir)
            .await
            .map_err(|source| StoreError::Write {
                path: captures_dir.clone(),
                source,
            })?;

        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let worker = StoreWorker {
            layout,
            max_files: config.max_files_per_partition,
            events: event_tx,
        };
        tokio::spawn(async move {
            worker.run(task_rx).await;
            let _ = done_tx.send(());
        });

        tracing::info!("[store] Capture store ready at {:?}", captures_dir);

        let store = Self {
            task_tx: RwLock::new(Some(task_tx)),
            shutdown_rx: TokioMutex::new(Some(done_rx)),
            shutdown_timeout: config.shutdown_timeout,
        };
        Ok((store, event_rx))
    }

    pub fn is_running(&self) -> bool {
        self.task_tx.read().is_some()
    }

    /// Stop accepting packets and wait (bounded) for queued writes to drain.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.task_tx.write().take() {
            let _ = tx.send(StoreTask::Shutdown);
        }

        if let Some(rx) = self.shutdown_rx.lock().await.take() {
            match tokio::time::timeout(self.shutdown_timeout, rx).await {
                Ok(Ok(())) => tracing::info!("[store] Shutdown complete"),
                Ok(Err(_)) => tracing::warn!("[store] Worker exited without signalling"),
                Err(_) => tracing::warn!(
                    "[store] Shutdown timed out after {:?}; abandoning queued writes",
                    self.shutdown_timeout
                ),
            }
        }
    }
}

impl CaptureSink for LocalCaptureStore {
    fn enqueue(&self, packet: CapturePacket) {
        match *self.task_tx.read() {
            Some(ref tx) => {
                if tx.send(StoreTask::Persist(Box::new(packet))).is_err() {
                    tracing::warn!("[store] Worker gone, capture dropped");
                }
            }
            None => tracing::debug!(
                "[store] Dropping capture {} after shutdown",
                packet.capture_id
            ),
        }
    }
}

struct StoreWorker {
    layout: CaptureLayout,
    max_files: usize,
    events: mpsc::UnboundedSender<StoreEvent>,
}

impl StoreWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<StoreTask>) {
        tracing::debug!("[store] Worker started (max_files={})", self.max_files);

        while let Some(task) = rx.recv().await {
            match task {
                StoreTask::Persist(packet) => self.persist(*packet).await,
                StoreTask::Shutdown => {
                    tracing::debug!("[store] Worker shutting down");
                    break;
                }
            }
        }
    }

    async fn persist(&self, packet: CapturePacket) {
        let capture_id = packet.capture_id.clone();
        let partition = self.layout.partition_dir(packet.capture_time);

        let stored = match write_capture(&self.layout, &packet).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!("[store] Failed to persist capture {}: {}", capture_id, e);
                self.emit(StoreEvent::CaptureFailed {
                    capture_id,
                    error: e.to_string(),
                });
                return;
            }
        };

        let evicted = enforce_retention(&partition, self.max_files).await;
        if evicted > 0 {
            self.emit(StoreEvent::Evicted {
                partition,
                count: evicted,
            });
        }

        tracing::debug!("[store] Saved capture {} -> {:?}", capture_id, stored.image_path);
        self.emit(StoreEvent::CaptureSaved(stored));
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }
}

/// Write the image and metadata pair for `packet`.
///
/// Both files are staged and renamed into place. If the metadata write fails the
/// image is removed again so no unpaired file is left behind.
pub async fn write_capture(
    layout: &CaptureLayout,
    packet: &CapturePacket,
) -> Result<StoredCaptureRef, StoreError> {
    let ext = packet
        .image_extension()
        .ok_or_else(|| StoreError::MissingFormat(packet.capture_id.clone()))?;
    let (image_path, metadata_path) =
        layout.capture_paths(packet.capture_time, &packet.capture_id, &ext);

    if let Some(dir) = image_path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| StoreError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
    }

    let metadata = serde_json::to_vec_pretty(&packet.payload)?;

    write_atomic(&image_path, &packet.image_bytes).await?;
    if let Err(e) = write_atomic(&metadata_path, &metadata).await {
        let _ = tokio::fs::remove_file(&image_path).await;
        return Err(e);
    }

    Ok(StoredCaptureRef {
        image_path,
        metadata_path,
        capture_id: packet.capture_id.clone(),
    })
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let tmp = layout::temp_path(path);
    let staged = async {
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    staged.map_err(|source| {
        // Best-effort; the next retention pass sweeps it otherwise.
        let _ = std::fs::remove_file(&tmp);
        StoreError::Write {
            path: path.to_path_buf(),
            source,
        }
    })
}
