//! Upload queue.
//!
//! A single background task delivers stored captures in FIFO order through an
//! [`UploadTransport`]. Before each attempt the worker waits for the transport
//! to report ready; that wait is unbounded and free. Retries happen inline, so a
//! failing item holds back the ones queued after it until it is delivered or
//! given up.

pub mod retry;
pub mod transport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;

use crate::capture::StoredCaptureRef;

pub use retry::RetryPolicy;
pub use transport::{ChannelTransport, LoggingTransport, UploadTransport, CAPTURE_EVENT};

/// A stored capture waiting for delivery.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub stored: StoredCaptureRef,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

impl UploadItem {
    pub fn new(stored: StoredCaptureRef) -> Self {
        Self {
            stored,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub delivered: u64,
    pub failed: u64,
    pub retries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> UploadStats {
        UploadStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Configuration for the upload queue
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub retry: RetryPolicy,
    /// How long shutdown waits for queued deliveries
    pub shutdown_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            shutdown_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
pub enum UploadTask {
    Deliver(Box<UploadItem>),
    Shutdown,
}

pub struct UploadQueue {
    task_tx: RwLock<Option<mpsc::UnboundedSender<UploadTask>>>,
    shutdown_rx: TokioMutex<Option<oneshot::Receiver<()>>>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    shutdown_timeout: Duration,
}

impl UploadQueue {
    /// Spawn the upload task.
    pub fn spawn(transport: Arc<dyn UploadTransport>, config: UploadConfig) -> Self {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        tracing::info!(
            "[upload] Queue started (transport={}, max_attempts={})",
            transport.name(),
            config.retry.max_attempts
        );

        let worker = UploadWorker {
            transport,
            retry: config.retry,
            cancel: cancel.clone(),
            counters: counters.clone(),
        };
        tokio::spawn(async move {
            worker.run(task_rx).await;
            let _ = done_tx.send(());
        });

        Self {
            task_tx: RwLock::new(Some(task_tx)),
            shutdown_rx: TokioMutex::new(Some(done_rx)),
            cancel,
            counters,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Queue a stored capture for delivery. Dropped after shutdown.
    pub fn enqueue(&self, stored: StoredCaptureRef) {
        match *self.task_tx.read() {
            Some(ref tx) => {
                if tx.send(UploadTask::Deliver(Box::new(UploadItem::new(stored)))).is_err() {
                    tracing::warn!("[upload] Worker gone, item dropped");
                }
            }
            None => tracing::debug!(
                "[upload] Dropping {} after shutdown",
                stored.capture_id
            ),
        }
    }

    pub fn stats(&self) -> UploadStats {
        self.counters.snapshot()
    }

    /// Stop accepting items, cut short any retry wait and wait (bounded) for
    /// the worker to exit.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.task_tx.write().take() {
            let _ = tx.send(UploadTask::Shutdown);
        }
        self.cancel.cancel();

        if let Some(rx) = self.shutdown_rx.lock().await.take() {
            match tokio::time::timeout(self.shutdown_timeout, rx).await {
                Ok(Ok(())) => tracing::info!("[upload] Shutdown complete ({:?})", self.stats()),
                Ok(Err(_)) => tracing::warn!("[upload] Worker exited without signalling"),
                Err(_) => tracing::warn!(
                    "[upload] Shutdown timed out after {:?}",
                    self.shutdown_timeout
                ),
            }
        }
    }
}

struct UploadWorker {
    transport: Arc<dyn UploadTransport>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    counters: Arc<Counters>,
}

impl UploadWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<UploadTask>) {
        while let Some(task) = rx.recv().await {
            match task {
                UploadTask::Deliver(item) => self.deliver(*item).await,
                UploadTask::Shutdown => {
                    tracing::debug!("[upload] Worker shutting down");
                    break;
                }
            }
        }
    }

    async fn deliver(&self, mut item: UploadItem) {
        let capture_id = item.stored.capture_id.clone();
        loop {
            // Waiting for the backend is not an attempt.
            tokio::select! {
                biased;
                _ = self.transport.ready() => {}
                _ = self.cancel.cancelled() => {
                    tracing::debug!("[upload] {} abandoned on shutdown before delivery", capture_id);
                    break;
                }
            }

            item.attempts += 1;
            let err = match self.transport.deliver(&item).await {
                Ok(()) => {
                    tracing::debug!(
                        "[upload] Delivered {} (attempt {})",
                        capture_id,
                        item.attempts
                    );
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                tracing::error!("[upload] Dropping {}: {}", capture_id, err);
                break;
            }
            if !self.retry.allows_another(item.attempts) {
                tracing::warn!(
                    "[upload] Giving up on {} after {} attempts: {}",
                    capture_id,
                    item.attempts,
                    err
                );
                break;
            }

            let delay = self.retry.delay_after(item.attempts);
            tracing::debug!(
                "[upload] Attempt {} for {} failed ({}); retrying in {:?}",
                item.attempts,
                capture_id,
                err,
                delay
            );
            self.counters.retries.fetch_add(1, Ordering::Relaxed);

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("[upload] Retry of {} abandoned on shutdown", capture_id);
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }
}
