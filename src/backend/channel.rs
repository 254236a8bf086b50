//! Real-time channel to the collector.
//!
//! The wire format is newline-delimited JSON: every frame is one object
//! `{"event": <name>, "data": <payload>}` followed by `\n`, in both directions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::BackendError;

/// A bidirectional event channel the backend manager keeps alive.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn connect(&self) -> Result<(), BackendError>;

    fn is_connected(&self) -> bool;

    async fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), BackendError>;

    async fn disconnect(&self);
}

/// One NDJSON frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// [`RealtimeChannel`] over a plain TCP socket to the endpoint's host and port.
pub struct TcpChannel {
    addr: String,
    connect_timeout: Duration,
    writer: TokioMutex<Option<OwnedWriteHalf>>,
    /// Liveness flag of the current connection. Each connection gets a fresh
    /// flag so a reader outliving its socket can only clear its own.
    link: parking_lot::Mutex<Arc<AtomicBool>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TcpChannel {
    pub fn new(endpoint_base: &str, connect_timeout: Duration) -> Result<Self, BackendError> {
        let invalid = |why: &str| BackendError::InvalidEndpoint(endpoint_base.to_string(), why.to_string());

        let url = Url::parse(endpoint_base).map_err(|e| invalid(&e.to_string()))?;
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;

        Ok(Self {
            addr: format!("{host}:{port}"),
            connect_timeout,
            writer: TokioMutex::new(None),
            link: parking_lot::Mutex::new(Arc::new(AtomicBool::new(false))),
            reader: parking_lot::Mutex::new(None),
        })
    }

    /// `host:port` this channel dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn link(&self) -> Arc<AtomicBool> {
        self.link.lock().clone()
    }

    fn stop_reader(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl RealtimeChannel for TcpChannel {
    async fn connect(&self) -> Result<(), BackendError> {
        if self.is_connected() {
            return Ok(());
        }

        tracing::debug!("[channel] Connecting to {}", self.addr);
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(BackendError::Connect(e.to_string())),
            Err(_) => {
                return Err(BackendError::ConnectTimeout(
                    self.connect_timeout.as_millis() as u64,
                ))
            }
        };
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        self.stop_reader();
        let mut writer = self.writer.lock().await;
        *writer = Some(write_half);
        let link = Arc::new(AtomicBool::new(true));
        *self.link.lock() = link.clone();
        drop(writer);

        let addr = self.addr.clone();
        *self.reader.lock() = Some(tokio::spawn(async move {
            read_frames(read_half, &addr).await;
            link.store(false, Ordering::SeqCst);
        }));

        tracing::info!("[channel] Connected to {}", self.addr);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.lock().load(Ordering::SeqCst)
    }

    async fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), BackendError> {
        let frame = ChannelFrame {
            event: event.to_string(),
            data: payload,
        };
        let mut line = serde_json::to_vec(&frame)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(BackendError::NotConnected);
        };

        if let Err(e) = stream.write_all(&line).await {
            tracing::warn!("[channel] Write to {} failed: {}", self.addr, e);
            *writer = None;
            self.link().store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.stop_reader();
        if let Some(mut stream) = self.writer.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        if self.link().swap(false, Ordering::SeqCst) {
            tracing::info!("[channel] Disconnected from {}", self.addr);
        }
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Log incoming frames until EOF or a read error.
async fn read_frames(read_half: OwnedReadHalf, addr: &str) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match serde_json::from_str::<ChannelFrame>(&line) {
                Ok(frame) => match frame.event.as_str() {
                    "response" => tracing::info!("[channel] Server response: {}", frame.data),
                    "error" => tracing::warn!("[channel] Server error: {}", frame.data),
                    other => tracing::debug!("[channel] Ignoring '{}' frame", other),
                },
                Err(e) => tracing::warn!("[channel] Malformed frame from {}: {}", addr, e),
            },
            Ok(None) => {
                tracing::info!("[channel] {} closed the connection", addr);
                break;
            }
            Err(e) => {
                tracing::warn!("[channel] Read from {} failed: {}", addr, e);
                break;
            }
        }
    }
}
