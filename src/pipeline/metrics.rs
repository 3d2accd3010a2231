//! Frame rate and latency bookkeeping.

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use serde::Serialize;

use crate::config::Resolution;
use crate::pipeline::fanout::FanOutSizes;

/// Weight kept from the previous FPS estimate on every update.
pub const FPS_SMOOTHING: f64 = 0.9;

/// Read-only snapshot handed to the presentation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerformanceSample {
    pub fps: f64,
    pub last_latency_ms: f64,
    /// Capture timestamp to publish, including time spent waiting in the slot.
    pub capture_latency_ms: f64,
    pub capture_size: Resolution,
    pub inference_size: Resolution,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub frames_dropped: u64,
}

impl PerformanceSample {
    /// `WxH` of the preview buffer, for HUD display.
    pub fn capture_size_label(&self) -> String {
        self.capture_size.to_string()
    }

    pub fn inference_size_label(&self) -> String {
        self.inference_size.to_string()
    }
}

#[derive(Debug, Default)]
pub struct MetricsTracker {
    fps: f64,
    last_frame_end: Option<Instant>,
    last_latency: Duration,
    capture_latency: Duration,
    sizes: Option<FanOutSizes>,
    processed: u64,
    skipped: u64,
    dropped: u64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one processed frame into the estimates.
    pub fn record_frame(
        &mut self,
        started: Instant,
        finished: Instant,
        sizes: FanOutSizes,
    ) -> PerformanceSample {
        self.last_latency = finished.saturating_duration_since(started);
        if let Some(previous) = self.last_frame_end {
            self.update_fps(finished.saturating_duration_since(previous));
        }
        self.last_frame_end = Some(finished);
        self.sizes = Some(sizes);
        self.processed += 1;

        let latency_ms = self.last_latency.as_secs_f64() * 1000.0;
        histogram!("iris_frame_latency_ms").record(latency_ms);
        gauge!("iris_fps").set(self.fps);
        counter!("iris_frames_processed").increment(1);

        self.sample()
    }

    /// Age of the frame captured at `captured` when its results were published.
    pub fn record_capture_age(&mut self, captured: Instant, published: Instant) {
        self.capture_latency = published.saturating_duration_since(captured);
        histogram!("iris_capture_latency_ms").record(self.capture_latency.as_secs_f64() * 1000.0);
    }

    /// Apply one interval to the moving average. Zero intervals are ignored.
    pub fn update_fps(&mut self, interval: Duration) {
        let interval_ms = interval.as_secs_f64() * 1000.0;
        if interval_ms > 0.0 {
            self.fps = FPS_SMOOTHING * self.fps + (1.0 - FPS_SMOOTHING) * (1000.0 / interval_ms);
        }
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
        counter!("iris_frames_skipped").increment(1);
    }

    /// Sync the running total of frames the source replaced before pickup.
    pub fn set_dropped(&mut self, total: u64) {
        if total > self.dropped {
            counter!("iris_frames_dropped").increment(total - self.dropped);
            self.dropped = total;
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn sample(&self) -> PerformanceSample {
        let sizes = self.sizes;
        PerformanceSample {
            fps: self.fps,
            last_latency_ms: self.last_latency.as_secs_f64() * 1000.0,
            capture_latency_ms: self.capture_latency.as_secs_f64() * 1000.0,
            capture_size: sizes.map_or(Resolution::ZERO, |s| s.preview),
            inference_size: sizes.map_or(Resolution::ZERO, |s| s.inference),
            frames_processed: self.processed,
            frames_skipped: self.skipped,
            frames_dropped: self.dropped,
        }
    }
}
