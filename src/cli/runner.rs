//! Simulated host loop.
//!
//! Drives a `GameLens` the way a game would: one `end_frame()` per tick, an
//! automatic snap on a fixed frame interval, and an optional sensitive window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::capture::{RgbaFrame, SnapReason};
use crate::coalescer::SnapOutcome;
use crate::pipeline::GameLens;
use crate::settings::{GameLensSettings, SettingsManager};
use crate::upload::UploadStats;

use super::args::Args;
use super::output::run_event_loop;

/// Context id the simulation marks sensitive.
pub const SIMULATED_MENU: &str = "pause_menu";

const FRAME_WIDTH: u32 = 320;
const FRAME_HEIGHT: u32 = 180;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SimulationSummary {
    pub frames: u64,
    pub snaps_queued: u64,
    pub snaps_dropped: u64,
    pub captures: u64,
    pub capture_failures: u64,
    pub uploads: UploadStats,
}

/// Load settings from the configured file and apply command-line overrides.
pub async fn load_settings(args: &Args) -> Result<GameLensSettings> {
    let manager = match &args.settings {
        Some(path) => SettingsManager::with_path(path).await?,
        None => SettingsManager::new().await?,
    };
    let mut settings = manager.get().await;

    if let Some(dir) = &args.data_dir {
        settings.data_dir = Some(dir.to_string_lossy().into_owned());
    }
    if let Some(endpoint) = &args.endpoint {
        settings.backend.endpoint = Some(endpoint.clone());
    }
    if let Some(game_id) = &args.game_id {
        settings.backend.game_id = Some(game_id.clone());
    }
    if args.disabled {
        settings.enabled = false;
    }

    Ok(settings)
}

/// Frame source that paints a gradient shifted by the current frame number.
pub fn synthetic_grabber(frame: Arc<AtomicU64>) -> impl FnMut() -> Option<RgbaFrame> + Send {
    move || {
        let shift = frame.load(Ordering::Relaxed) as u32;
        let mut pixels = Vec::with_capacity((FRAME_WIDTH * FRAME_HEIGHT * 4) as usize);
        for y in 0..FRAME_HEIGHT {
            for x in 0..FRAME_WIDTH {
                pixels.extend_from_slice(&[
                    ((x + shift) % 256) as u8,
                    ((y + shift) % 256) as u8,
                    (shift % 256) as u8,
                    255,
                ]);
            }
        }
        Some(RgbaFrame {
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            pixels,
        })
    }
}

/// Tick period for `fps`, never zero.
fn frame_period(fps: f64) -> Duration {
    Duration::from_secs_f64(1.0 / fps).max(Duration::from_nanos(1))
}

/// Run the simulation described by `args` to completion.
pub async fn run_simulation(args: &Args) -> Result<SimulationSummary> {
    args.validate()?;
    let settings = load_settings(args).await?;

    let frame = Arc::new(AtomicU64::new(0));
    let (mut lens, events) = GameLens::builder(settings)
        .grabber(synthetic_grabber(frame.clone()))
        .start()
        .await
        .context("Failed to start GameLens")?;

    let printer = tokio::spawn(run_event_loop(events, args.json));

    let mut summary = SimulationSummary::default();
    let mut ticker = tokio::time::interval(frame_period(args.fps));

    for n in 0..args.frames {
        ticker.tick().await;
        frame.store(n, Ordering::Relaxed);

        if args.sensitive_at == Some(n) {
            lens.set_sensitive_context(SIMULATED_MENU, true);
            lens.context_changed(Some(SIMULATED_MENU));
        }
        if args.clear_at == Some(n) {
            lens.context_changed(None);
        }

        if n % args.snap_every == 0 {
            // Two requests in one frame coalesce into a single capture.
            for reason in [SnapReason::AutoTimer, SnapReason::custom("checkpoint")] {
                match lens.snap(reason) {
                    SnapOutcome::Queued => summary.snaps_queued += 1,
                    SnapOutcome::Dropped(_) => summary.snaps_dropped += 1,
                }
            }
        }

        match lens.end_frame() {
            Ok(ids) => summary.captures += ids.len() as u64,
            Err(e) => {
                tracing::warn!("Frame {} capture failed: {}", n, e);
                summary.capture_failures += 1;
            }
        }
        summary.frames += 1;
    }

    summary.uploads = lens.shutdown().await;

    match printer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Output handler error: {}", e),
        Err(e) => tracing::warn!("Output handler panicked: {}", e),
    }

    Ok(summary)
}
