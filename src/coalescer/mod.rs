//! Snap coalescer.
//!
//! Lives on the host thread. Every call is an in-memory update or a channel
//! push; the only real work (asking the capture source for a packet) happens in
//! [`SnapCoalescer::finalize`], which the host runs once per window after the
//! scheduling unit completes.
//!
//! Rate limiting gates opening a window, not merging into one, so any number of
//! requests in one unit produce exactly one capture carrying all their reasons.

pub mod events;
pub mod policy;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::capture::{CaptureSource, SnapReason, SnapRequest};
use crate::error::CaptureError;
use crate::host::{DeferredTask, SchedulingHost};
use crate::store::CaptureSink;

pub use events::{DropReason, SnapEvent, SnapOutcome};
pub use policy::{EnabledFlag, RateLimiter, SensitiveContexts};

/// The coalescing window currently accepting reasons.
#[derive(Debug)]
struct OpenWindow {
    unit: u64,
    request: SnapRequest,
}

pub struct SnapCoalescer {
    enabled: EnabledFlag,
    sensitive: SensitiveContexts,
    limiter: RateLimiter,
    window: Option<OpenWindow>,
    source: Box<dyn CaptureSource>,
    sink: Arc<dyn CaptureSink>,
    host: Arc<dyn SchedulingHost>,
    events: mpsc::UnboundedSender<SnapEvent>,
}

impl SnapCoalescer {
    /// Create a coalescer and the receiver for its signals.
    pub fn new(
        source: Box<dyn CaptureSource>,
        sink: Arc<dyn CaptureSink>,
        host: Arc<dyn SchedulingHost>,
        enabled: EnabledFlag,
        min_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SnapEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let coalescer = Self {
            enabled,
            sensitive: SensitiveContexts::new(),
            limiter: RateLimiter::new(min_interval),
            window: None,
            source,
            sink,
            host,
            events,
        };
        (coalescer, event_rx)
    }

    pub fn enabled_flag(&self) -> &EnabledFlag {
        &self.enabled
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive.is_sensitive()
    }

    pub fn has_open_window(&self) -> bool {
        self.window.is_some()
    }

    pub fn request_snap(&mut self, reason: impl Into<SnapReason>) -> SnapOutcome {
        self.request_snap_at(reason, Utc::now())
    }

    pub fn request_snap_at(&mut self, reason: impl Into<SnapReason>, now: DateTime<Utc>) -> SnapOutcome {
        let reason = reason.into();
        tracing::debug!("[gamelens] Snap requested: reason='{}'", reason);

        if !self.enabled.is_enabled() {
            return self.drop_request(reason, DropReason::Disabled);
        }
        if self.sensitive.is_sensitive() {
            return self.drop_request(reason, DropReason::SensitiveContext);
        }

        let unit = self.host.current_unit();
        let same_unit = self.window.as_ref().is_some_and(|w| w.unit == unit);

        if !same_unit {
            if let Some(stale) = self.window.as_ref().map(|w| w.unit) {
                tracing::debug!("[gamelens] Flushing window left open from unit {}", stale);
                if let Err(e) = self.finalize(stale) {
                    tracing::error!("[gamelens] Capture for unit {} failed: {}", stale, e);
                }
            }

            if !self.limiter.allows(now) {
                return self.drop_request(reason, DropReason::RateLimited);
            }

            self.limiter.accept(now);
            self.window = Some(OpenWindow {
                unit,
                request: SnapRequest::new(now),
            });
            self.host.defer(DeferredTask::FinalizeSnap { unit });
        }

        if let Some(window) = self.window.as_mut() {
            window.request.merge(reason.clone());
        }
        self.emit(SnapEvent::Queued { reason });
        SnapOutcome::Queued
    }

    /// Dispatch a task the host deferred on our behalf.
    pub fn run_deferred(&mut self, task: DeferredTask) -> Result<Option<String>, CaptureError> {
        match task {
            DeferredTask::FinalizeSnap { unit } => self.finalize(unit),
        }
    }

    /// Turn the window opened in `unit` into one capture.
    ///
    /// Returns the capture id, or `None` when `unit` is not the open window
    /// (already finalized) or policy changed since the window opened. The window
    /// is closed even when the capture source fails.
    pub fn finalize(&mut self, unit: u64) -> Result<Option<String>, CaptureError> {
        if self.window.as_ref().map(|w| w.unit) != Some(unit) {
            return Ok(None);
        }
        let Some(window) = self.window.take() else {
            return Ok(None);
        };
        let request = window.request;

        // Policy may have changed between request and frame end.
        let blocked = if !self.enabled.is_enabled() {
            Some(DropReason::Disabled)
        } else if self.sensitive.is_sensitive() {
            Some(DropReason::SensitiveContext)
        } else {
            None
        };
        if let Some(why) = blocked {
            for reason in request.reasons {
                self.drop_request(reason, why);
            }
            return Ok(None);
        }

        let packet = match self.source.capture(&request.reasons, request.requested_at) {
            Ok(packet) => packet,
            Err(e) => {
                self.emit(SnapEvent::CaptureFailed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let capture_id = packet.capture_id.clone();
        tracing::debug!(
            "[gamelens] Captured {} for unit {} ({} reasons, {} bytes)",
            capture_id,
            unit,
            request.reasons.len(),
            packet.image_bytes.len()
        );
        self.sink.enqueue(packet);
        self.emit(SnapEvent::Captured {
            capture_id: capture_id.clone(),
            reasons: request.reasons.into_iter().collect(),
        });

        Ok(Some(capture_id))
    }

    /// Mark `id` as sensitive (or not) and recompute against the current context.
    pub fn set_sensitive_context(&mut self, id: &str, sensitive: bool) {
        tracing::debug!("[gamelens] Sensitive context '{}' = {}", id, sensitive);
        if let Some(flipped) = self.sensitive.set(id, sensitive) {
            self.emit(SnapEvent::SensitiveChanged { sensitive: flipped });
        }
    }

    /// Host notification that the active context changed.
    pub fn context_changed(&mut self, current: Option<&str>) {
        if let Some(flipped) = self.sensitive.context_changed(current) {
            tracing::info!(
                "[gamelens] Context {:?} sensitive={}",
                self.sensitive.current(),
                flipped
            );
            self.emit(SnapEvent::SensitiveChanged { sensitive: flipped });
        }
    }

    fn drop_request(&self, reason: SnapReason, why: DropReason) -> SnapOutcome {
        tracing::debug!("[gamelens] Snap dropped: reason='{}' why={}", reason, why);
        self.emit(SnapEvent::Dropped { reason, why });
        SnapOutcome::Dropped(why)
    }

    fn emit(&self, event: SnapEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturePacket;
    use crate::host::FrameScheduler;
    use chrono::Duration as ChronoDuration;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct RecordingSink {
        packets: Mutex<Vec<CapturePacket>>,
    }

    impl CaptureSink for RecordingSink {
        fn enqueue(&self, packet: CapturePacket) {
            self.packets.lock().push(packet);
        }
    }

    struct FakeSource {
        fail: bool,
    }

    impl CaptureSource for FakeSource {
        fn capture(
            &mut self,
            reasons: &BTreeSet<SnapReason>,
            at: DateTime<Utc>,
        ) -> Result<CapturePacket, CaptureError> {
            if self.fail {
                return Err(CaptureError::NoSurface);
            }
            Ok(CapturePacket {
                capture_id: uuid::Uuid::new_v4().to_string(),
                capture_time: at,
                image_bytes: vec![0x89, b'P', b'N', b'G'],
                image_format: "png".to_string(),
                payload: serde_json::json!({ "reasons": reasons }),
            })
        }
    }

    struct Harness {
        coalescer: SnapCoalescer,
        events: mpsc::UnboundedReceiver<SnapEvent>,
        scheduler: Arc<FrameScheduler>,
        sink: Arc<RecordingSink>,
    }

    impl Harness {
        fn new(min_interval: Duration) -> Self {
            Self::with_source(FakeSource { fail: false }, min_interval)
        }

        fn with_source(source: FakeSource, min_interval: Duration) -> Self {
            let scheduler = Arc::new(FrameScheduler::new());
            let sink = Arc::new(RecordingSink::default());
            let (coalescer, events) = SnapCoalescer::new(
                Box::new(source),
                sink.clone(),
                scheduler.clone(),
                EnabledFlag::new(true),
                min_interval,
            );
            Self {
                coalescer,
                events,
                scheduler,
                sink,
            }
        }

        /// Run deferred work and advance to the next frame, like the host does.
        fn end_frame(&mut self) -> Vec<Option<String>> {
            let results = self
                .scheduler
                .take_deferred()
                .into_iter()
                .map(|task| self.coalescer.run_deferred(task).unwrap())
                .collect();
            self.scheduler.advance();
            results
        }

        fn captured(&self) -> usize {
            self.sink.packets.lock().len()
        }

        fn drain_events(&mut self) -> Vec<SnapEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    #[test]
    fn test_same_unit_requests_coalesce_into_one_capture() {
        let mut h = Harness::new(Duration::from_millis(350));
        let now = Utc::now();

        assert_eq!(h.coalescer.request_snap_at(SnapReason::Manual, now), SnapOutcome::Queued);
        assert_eq!(h.coalescer.request_snap_at(SnapReason::Manual, now), SnapOutcome::Queued);
        assert_eq!(
            h.coalescer.request_snap_at(SnapReason::AutoTimer, now),
            SnapOutcome::Queued
        );
        assert_eq!(h.scheduler.pending(), 1);

        h.end_frame();

        assert_eq!(h.captured(), 1);
        let packets = h.sink.packets.lock();
        assert_eq!(
            packets[0].payload["reasons"],
            serde_json::json!(["auto_timer", "manual"])
        );
        assert_eq!(packets[0].capture_time, now);
    }

    #[test]
    fn test_blank_reasons_merge_as_unspecified() {
        let mut h = Harness::new(Duration::ZERO);
        let now = Utc::now();

        h.coalescer.request_snap_at("", now);
        h.coalescer.request_snap_at("   ", now);
        h.coalescer.request_snap_at(" checkpoint ", now);
        h.end_frame();

        let packets = h.sink.packets.lock();
        assert_eq!(
            packets[0].payload["reasons"],
            serde_json::json!(["checkpoint", "unspecified"])
        );
    }

    #[test]
    fn test_each_unit_produces_one_capture() {
        let mut h = Harness::new(Duration::ZERO);
        let t0 = Utc::now();

        for frame in 0..4 {
            let now = t0 + ChronoDuration::milliseconds(frame * 16);
            h.coalescer.request_snap_at("a", now);
            h.coalescer.request_snap_at("b", now);
            h.end_frame();
        }

        assert_eq!(h.captured(), 4);
        assert!(!h.coalescer.has_open_window());
    }

    #[test]
    fn test_disabled_drops_everything() {
        let mut h = Harness::new(Duration::ZERO);
        h.coalescer.enabled_flag().set(false);

        let outcome = h.coalescer.request_snap(SnapReason::Manual);
        h.end_frame();

        assert_eq!(outcome, SnapOutcome::Dropped(DropReason::Disabled));
        assert_eq!(h.captured(), 0);
        assert_eq!(
            h.drain_events(),
            vec![SnapEvent::Dropped {
                reason: SnapReason::Manual,
                why: DropReason::Disabled
            }]
        );
    }

    #[test]
    fn test_sensitive_context_blocks_until_cleared() {
        let mut h = Harness::new(Duration::ZERO);
        h.coalescer.set_sensitive_context("res://Login.tscn", true);
        h.coalescer.context_changed(Some("res://Login.tscn"));

        assert_eq!(
            h.coalescer.request_snap(SnapReason::Manual),
            SnapOutcome::Dropped(DropReason::SensitiveContext)
        );
        h.end_frame();
        assert_eq!(h.captured(), 0);

        h.coalescer.context_changed(Some("res://Level1.tscn"));
        assert_eq!(h.coalescer.request_snap(SnapReason::Manual), SnapOutcome::Queued);
        h.end_frame();
        assert_eq!(h.captured(), 1);

        let flips: Vec<_> = h
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                SnapEvent::SensitiveChanged { sensitive } => Some(sensitive),
                _ => None,
            })
            .collect();
        assert_eq!(flips, vec![true, false]);
    }

    #[test]
    fn test_context_turning_sensitive_before_finalize_discards_window() {
        let mut h = Harness::new(Duration::ZERO);
        h.coalescer.set_sensitive_context("checkout", true);

        h.coalescer.request_snap(SnapReason::Manual);
        h.coalescer.context_changed(Some("checkout"));
        let results = h.end_frame();

        assert_eq!(results, vec![None]);
        assert_eq!(h.captured(), 0);
        assert!(h.drain_events().contains(&SnapEvent::Dropped {
            reason: SnapReason::Manual,
            why: DropReason::SensitiveContext
        }));
    }

    #[test]
    fn test_rate_limit_between_windows() {
        let mut h = Harness::new(Duration::from_millis(350));
        let t0 = Utc::now();

        h.coalescer.request_snap_at(SnapReason::Manual, t0);
        h.end_frame();

        let too_soon = h
            .coalescer
            .request_snap_at(SnapReason::Manual, t0 + ChronoDuration::milliseconds(100));
        assert_eq!(too_soon, SnapOutcome::Dropped(DropReason::RateLimited));
        h.end_frame();

        let spaced = h
            .coalescer
            .request_snap_at(SnapReason::Manual, t0 + ChronoDuration::milliseconds(350));
        assert_eq!(spaced, SnapOutcome::Queued);
        h.end_frame();

        assert_eq!(h.captured(), 2);
    }

    #[test]
    fn test_finalize_is_idempotent_per_window() {
        let mut h = Harness::new(Duration::ZERO);
        let unit = h.scheduler.current_unit();
        h.coalescer.request_snap(SnapReason::Manual);

        assert!(h.coalescer.finalize(unit).unwrap().is_some());
        assert!(h.coalescer.finalize(unit).unwrap().is_none());
        assert!(h.coalescer.finalize(unit + 7).unwrap().is_none());
        assert_eq!(h.captured(), 1);
    }

    #[test]
    fn test_stale_window_is_flushed_on_next_unit() {
        let mut h = Harness::new(Duration::ZERO);
        h.coalescer.request_snap(SnapReason::Manual);
        // Host advanced without draining deferred work.
        h.scheduler.advance();
        h.coalescer.request_snap(SnapReason::AutoTimer);

        assert_eq!(h.captured(), 1);
        h.end_frame();
        assert_eq!(h.captured(), 2);
    }

    #[test]
    fn test_capture_failure_closes_window_and_reports() {
        let mut h = Harness::with_source(FakeSource { fail: true }, Duration::ZERO);
        let unit = h.scheduler.current_unit();
        h.coalescer.request_snap(SnapReason::Manual);

        let err = h.coalescer.finalize(unit).unwrap_err();
        assert!(matches!(err, CaptureError::NoSurface));
        assert!(!h.coalescer.has_open_window());
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, SnapEvent::CaptureFailed { .. })));
    }
}
