//! End-to-end pipeline tests.
//!
//! These drive a real `GameLens` (store, upload queue, backend manager) with a
//! scripted capture source, the in-memory channel and a local axum session
//! endpoint.

#![cfg(test)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tokio::net::TcpListener;

use crate::backend::testing::{CountingSessions, MemoryChannel};
use crate::backend::HttpSessionService;
use crate::capture::{CapturePacket, CaptureSource, SnapReason};
use crate::coalescer::{DropReason, SnapEvent, SnapOutcome};
use crate::error::CaptureError;
use crate::pipeline::{GameLens, GameLensEvents};
use crate::settings::GameLensSettings;
use crate::store::StoreEvent;
use crate::upload::{UploadStats, CAPTURE_EVENT};

/// Capture source stamping captures one second apart on a fixed day.
struct ScriptedSource {
    taken: Arc<AtomicUsize>,
}

impl CaptureSource for ScriptedSource {
    fn capture(
        &mut self,
        reasons: &BTreeSet<SnapReason>,
        _at: DateTime<Utc>,
    ) -> Result<CapturePacket, CaptureError> {
        let n = self.taken.fetch_add(1, Ordering::SeqCst);
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
            + chrono::Duration::seconds(n as i64);
        let capture_id = format!("cap-{n}");
        Ok(CapturePacket {
            capture_id: capture_id.clone(),
            capture_time: at,
            image_bytes: vec![0x89, b'P', b'N', b'G', n as u8],
            image_format: "png".to_string(),
            payload: serde_json::json!({ "capture_id": capture_id, "reasons": reasons }),
        })
    }
}

fn settings(temp: &TempDir) -> GameLensSettings {
    let mut settings = GameLensSettings::default();
    settings.data_dir = Some(temp.path().to_string_lossy().into_owned());
    settings.backend.game_id = Some("it-game".to_string());
    settings.backend.poll_interval_ms = 5;
    settings.backend.base_delay_ms = 5;
    settings.backend.max_delay_ms = 20;
    settings.backend.shutdown_timeout_ms = 5000;
    settings.capture.min_seconds_between_snaps = 0.0;
    settings.storage.shutdown_timeout_ms = 5000;
    settings.upload.base_delay_ms = 5;
    settings.upload.max_delay_ms = 20;
    settings.upload.shutdown_timeout_ms = 5000;
    settings
}

fn source() -> (ScriptedSource, Arc<AtomicUsize>) {
    let taken = Arc::new(AtomicUsize::new(0));
    (
        ScriptedSource {
            taken: taken.clone(),
        },
        taken,
    )
}

async fn session_server() -> String {
    let router = Router::new().route(
        "/collect/session",
        post(|Json(body): Json<serde_json::Value>| async move {
            let game = body["game_id"].as_str().unwrap_or_default().to_string();
            Json(serde_json::json!({ "session_id": format!("srv-{game}") }))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn drain_store(events: &mut GameLensEvents) -> Vec<StoreEvent> {
    std::iter::from_fn(|| events.store.try_recv().ok()).collect()
}

fn drain_snaps(events: &mut GameLensEvents) -> Vec<SnapEvent> {
    std::iter::from_fn(|| events.snaps.try_recv().ok()).collect()
}

#[tokio::test]
async fn test_capture_reaches_collector_with_session() {
    let temp = TempDir::new().unwrap();
    let base = session_server().await;
    let channel = Arc::new(MemoryChannel::new());
    let (source, _) = source();

    let (mut lens, mut events) = GameLens::builder(settings(&temp))
        .capture_source(source)
        .channel(channel.clone())
        .session_api(Arc::new(
            HttpSessionService::new(&base, Duration::from_secs(5)).unwrap(),
        ))
        .start()
        .await
        .unwrap();

    eventually("backend ready", || lens.backend_ready()).await;
    assert_eq!(lens.session_id().as_deref(), Some("srv-it-game"));

    lens.snap(SnapReason::Manual);
    lens.snap("level_up");
    lens.snap(SnapReason::Manual);
    assert_eq!(lens.end_frame().unwrap(), vec!["cap-0".to_string()]);

    eventually("capture delivered", || !channel.emitted().is_empty()).await;
    let stats = lens.shutdown().await;
    assert_eq!(stats.delivered, 1);

    let emitted = channel.emitted();
    assert_eq!(emitted.len(), 1);
    let (event, payload) = &emitted[0];
    assert_eq!(event, CAPTURE_EVENT);
    assert_eq!(payload["session_id"], "srv-it-game");
    assert_eq!(payload["capture_id"], "cap-0");
    assert_eq!(
        payload["metadata"]["reasons"],
        serde_json::json!(["manual", "level_up"])
    );

    let saved = drain_store(&mut events)
        .into_iter()
        .filter(|e| matches!(e, StoreEvent::CaptureSaved(_)))
        .count();
    assert_eq!(saved, 1);
}

#[tokio::test]
async fn test_retention_keeps_newest_two_of_three() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp);
    settings.storage.max_files_per_partition = 2;
    let (source, _) = source();

    let (mut lens, mut events) = GameLens::builder(settings)
        .capture_source(source)
        .start()
        .await
        .unwrap();

    for _ in 0..3 {
        assert_eq!(lens.snap(SnapReason::AutoTimer), SnapOutcome::Queued);
        assert_eq!(lens.end_frame().unwrap().len(), 1);
    }
    lens.shutdown().await;

    let partition = temp.path().join("captures").join("2026-03-14");
    let mut names: Vec<String> = std::fs::read_dir(&partition)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 4);
    assert!(names.iter().all(|n| !n.contains("cap-0")));
    assert!(names.iter().any(|n| n.ends_with("cap-1.png")));
    assert!(names.iter().any(|n| n.ends_with("cap-2.json")));

    let evicted: usize = drain_store(&mut events)
        .iter()
        .map(|e| match e {
            StoreEvent::Evicted { count, .. } => *count,
            _ => 0,
        })
        .sum();
    assert_eq!(evicted, 1);
}

#[tokio::test]
async fn test_capture_taken_before_backend_ready_is_delivered() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp);
    // Two failed connects: ready after roughly 100 + 200 ms.
    settings.backend.base_delay_ms = 100;
    settings.backend.max_delay_ms = 200;
    settings.upload.max_attempts = 2;
    let channel = Arc::new(MemoryChannel::failing(2));
    let (source, _) = source();

    let (mut lens, _events) = GameLens::builder(settings)
        .capture_source(source)
        .channel(channel.clone())
        .session_api(Arc::new(CountingSessions::new()))
        .start()
        .await
        .unwrap();

    lens.snap(SnapReason::Manual);
    assert_eq!(lens.end_frame().unwrap().len(), 1);
    assert!(!lens.backend_ready());

    // Well past the upload retry budget, still inside the first backoff.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(lens.upload_stats(), UploadStats::default());

    eventually("backend ready", || lens.backend_ready()).await;
    eventually("capture delivered", || lens.upload_stats().delivered == 1).await;
    let stats = lens.shutdown().await;

    assert_eq!(
        stats,
        UploadStats {
            delivered: 1,
            failed: 0,
            retries: 0
        }
    );
    assert_eq!(channel.connect_calls(), 3);
    let emitted = channel.emitted();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].1["session_id"], "session-1");
    assert_eq!(emitted[0].1["capture_id"], "cap-0");
}

#[tokio::test]
async fn test_shutdown_while_backend_unreachable_is_bounded() {
    let temp = TempDir::new().unwrap();
    let channel = Arc::new(MemoryChannel::failing(usize::MAX));
    let (source, _) = source();

    let (mut lens, _events) = GameLens::builder(settings(&temp))
        .capture_source(source)
        .channel(channel.clone())
        .session_api(Arc::new(CountingSessions::new()))
        .start()
        .await
        .unwrap();

    lens.snap(SnapReason::Manual);
    lens.end_frame().unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(lens.backend_status().unwrap().consecutive_failures > 0);
    assert_eq!(lens.upload_stats().retries, 0);

    let stats = tokio::time::timeout(Duration::from_secs(5), lens.shutdown())
        .await
        .unwrap();
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.failed, 1);
    assert!(channel.emitted().is_empty());
}

#[tokio::test]
async fn test_disabled_pipeline_captures_nothing() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp);
    settings.enabled = false;
    let channel = Arc::new(MemoryChannel::new());
    let (source, taken) = source();

    let (mut lens, mut events) = GameLens::builder(settings)
        .capture_source(source)
        .channel(channel.clone())
        .session_api(Arc::new(CountingSessions::new()))
        .start()
        .await
        .unwrap();

    for _ in 0..3 {
        assert_eq!(
            lens.snap(SnapReason::AutoTimer),
            SnapOutcome::Dropped(DropReason::Disabled)
        );
        lens.end_frame().unwrap();
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(channel.connect_calls(), 0);
    lens.shutdown().await;

    assert_eq!(taken.load(Ordering::SeqCst), 0);
    let drops = drain_snaps(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SnapEvent::Dropped { why: DropReason::Disabled, .. }))
        .count();
    assert_eq!(drops, 3);
}

#[tokio::test]
async fn test_sensitive_context_blocks_until_cleared() {
    let temp = TempDir::new().unwrap();
    let (source, taken) = source();

    let (mut lens, mut events) = GameLens::builder(settings(&temp))
        .capture_source(source)
        .start()
        .await
        .unwrap();

    lens.set_sensitive_context("inventory", true);
    lens.context_changed(Some("inventory"));
    assert!(lens.is_sensitive());
    assert_eq!(
        lens.snap(SnapReason::Manual),
        SnapOutcome::Dropped(DropReason::SensitiveContext)
    );
    lens.end_frame().unwrap();

    lens.context_changed(Some("world"));
    assert!(!lens.is_sensitive());
    assert_eq!(lens.snap(SnapReason::Manual), SnapOutcome::Queued);
    lens.end_frame().unwrap();
    lens.shutdown().await;

    assert_eq!(taken.load(Ordering::SeqCst), 1);
    let sensitivity: Vec<bool> = drain_snaps(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SnapEvent::SensitiveChanged { sensitive } => Some(sensitive),
            _ => None,
        })
        .collect();
    assert_eq!(sensitivity, vec![true, false]);
}
