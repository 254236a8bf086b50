//! Delivery transports for stored captures.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use tokio::sync::watch;

use super::UploadItem;
use crate::backend::{BackendStatus, RealtimeChannel};
use crate::error::DeliveryError;

/// Event name capture frames are emitted under.
pub const CAPTURE_EVENT: &str = "capture_event";

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Resolves once a delivery attempt can succeed. Time spent here does not
    /// count against the retry budget.
    async fn ready(&self) {}

    async fn deliver(&self, item: &UploadItem) -> Result<(), DeliveryError>;

    fn name(&self) -> &'static str;
}

/// Logs the capture and reports success. Used when no collector is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTransport;

#[async_trait]
impl UploadTransport for LoggingTransport {
    async fn deliver(&self, item: &UploadItem) -> Result<(), DeliveryError> {
        tracing::info!(
            "[upload] Would upload capture {} ({:?})",
            item.stored.capture_id,
            item.stored.image_path
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

/// Emits captures on the backend's real-time channel once it is ready.
pub struct ChannelTransport {
    channel: Arc<dyn RealtimeChannel>,
    status: watch::Receiver<BackendStatus>,
}

impl ChannelTransport {
    pub fn new(channel: Arc<dyn RealtimeChannel>, status: watch::Receiver<BackendStatus>) -> Self {
        Self { channel, status }
    }
}

#[async_trait]
impl UploadTransport for ChannelTransport {
    async fn ready(&self) {
        let mut status = self.status.clone();
        if status
            .wait_for(|s| s.ready && s.session_id.is_some())
            .await
            .is_err()
        {
            // Manager gone; deliver() reports NotReady from the last status.
            tracing::debug!("[upload] Backend status closed while waiting for readiness");
        }
    }

    async fn deliver(&self, item: &UploadItem) -> Result<(), DeliveryError> {
        let session_id = {
            let status = self.status.borrow();
            match (&status.session_id, status.ready) {
                (Some(id), true) => id.clone(),
                _ => return Err(DeliveryError::NotReady),
            }
        };

        let stored = &item.stored;
        let image = read_stored(&stored.image_path).await?;
        let metadata_raw = read_stored(&stored.metadata_path).await?;
        let metadata: serde_json::Value = serde_json::from_slice(&metadata_raw)
            .map_err(|e| DeliveryError::BadMetadata(e.to_string()))?;

        let image_format = stored
            .image_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();

        let payload = serde_json::json!({
            "session_id": session_id,
            "capture_id": stored.capture_id,
            "image_format": image_format,
            "image_base64": base64::engine::general_purpose::STANDARD.encode(&image),
            "metadata": metadata,
        });

        self.channel
            .emit(CAPTURE_EVENT, payload)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

async fn read_stored(path: &Path) -> Result<Vec<u8>, DeliveryError> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => DeliveryError::MissingFile(path.to_path_buf()),
        _ => DeliveryError::BadMetadata(format!("{}: {}", path.display(), e)),
    })
}
