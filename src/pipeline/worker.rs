//! Per-frame orchestration and the dedicated worker thread that drives it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{FrameSink, FrameSource, LatestFrameSlot, RawFrame, Session};
use crate::collab::Collaborators;
use crate::config::{ConfigHandle, Mode, PipelineConfig};
use crate::error::{FrameError, PipelineError, Result, StageError, StageResult};
use crate::pipeline::buffer::RgbaBuffer;
use crate::pipeline::detection::DetectionSet;
use crate::pipeline::dispatch::ModeDispatcher;
use crate::pipeline::fanout::{FanOutSizes, ResolutionFanOut};
use crate::pipeline::metrics::{MetricsTracker, PerformanceSample};
use crate::pipeline::normalize::FrameNormalizer;
use crate::WorkerConfig;

/// Snapshots the worker publishes for the presentation layer.
///
/// Each publish replaces the whole value; readers hold on to an `Arc` and
/// never see a partially written list.
#[derive(Debug, Default)]
pub struct PipelineOutputs {
    detections: ArcSwap<DetectionSet>,
    performance: ArcSwap<PerformanceSample>,
    detector_ready: AtomicBool,
}

impl PipelineOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detections(&self) -> Arc<DetectionSet> {
        self.detections.load_full()
    }

    /// Detections to draw while the presentation shows `mode`. Empty when the
    /// published set belongs to another mode.
    pub fn visible_detections(&self, mode: Mode) -> Arc<DetectionSet> {
        let current = self.detections.load_full();
        if current.mode == mode {
            current
        } else {
            Arc::new(DetectionSet::empty(mode))
        }
    }

    pub fn performance(&self) -> Arc<PerformanceSample> {
        self.performance.load_full()
    }

    /// Whether the object detector has a model loaded.
    pub fn detector_ready(&self) -> bool {
        self.detector_ready.load(Ordering::Acquire)
    }

    fn publish_detector_ready(&self, ready: bool) {
        if self.detector_ready.swap(ready, Ordering::AcqRel) != ready {
            info!(ready, "object detector readiness changed");
        }
    }

    fn publish_detections(&self, set: Arc<DetectionSet>) {
        self.detections.store(set);
    }

    fn clear_detections(&self, mode: Mode) {
        self.detections.store(Arc::new(DetectionSet::empty(mode)));
    }

    fn publish_performance(&self, sample: PerformanceSample) {
        self.performance.store(Arc::new(sample));
    }
}

/// Receives the preview at the end of every processed frame.
///
/// Everything is borrowed for the call only; copy what needs to outlive it.
pub trait PreviewSink: Send {
    fn present(
        &mut self,
        preview: &RgbaBuffer,
        detections: &DetectionSet,
        performance: &PerformanceSample,
    );
}

/// Sink that drops every frame.
#[derive(Debug, Default)]
pub struct DiscardPreview;

impl PreviewSink for DiscardPreview {
    fn present(&mut self, _: &RgbaBuffer, _: &DetectionSet, _: &PerformanceSample) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub sequence: u64,
    pub sizes: FanOutSizes,
    pub detections: usize,
    pub latency: Duration,
}

#[derive(Debug, Clone)]
pub enum FrameOutcome {
    Processed(FrameReport),
    /// Dropped for a transient reason; the previous preview and detections
    /// stay in effect.
    Skipped(FrameError),
}

/// Normalizer, fan-out, dispatcher and metrics for one pipeline instance.
pub struct FramePipeline {
    normalizer: FrameNormalizer,
    fanout: ResolutionFanOut,
    dispatcher: ModeDispatcher,
    metrics: MetricsTracker,
    outputs: Arc<PipelineOutputs>,
    sink: Box<dyn PreviewSink>,
}

impl FramePipeline {
    pub fn new(collaborators: Collaborators, face_timeout: Duration) -> Self {
        Self {
            normalizer: FrameNormalizer::default(),
            fanout: ResolutionFanOut::new(),
            dispatcher: ModeDispatcher::new(collaborators, face_timeout),
            metrics: MetricsTracker::new(),
            outputs: Arc::new(PipelineOutputs::new()),
            sink: Box::new(DiscardPreview),
        }
    }

    pub fn with_sink(mut self, sink: impl PreviewSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn outputs(&self) -> Arc<PipelineOutputs> {
        Arc::clone(&self.outputs)
    }

    pub fn dispatcher(&self) -> &ModeDispatcher {
        &self.dispatcher
    }

    pub fn fanout(&self) -> &ResolutionFanOut {
        &self.fanout
    }

    /// Adopt `config` ahead of the first frame so a configured model is loaded
    /// before frames start arriving.
    pub fn prepare(&mut self, config: &PipelineConfig) {
        if self.dispatcher.sync(config) {
            self.outputs.clear_detections(config.mode);
        }
        self.outputs.publish_detector_ready(self.dispatcher.detector_ready());
    }

    /// Run one frame under `config`.
    ///
    /// Transient problems come back as [`FrameOutcome::Skipped`]; only
    /// session level failures are returned as errors.
    #[instrument(level = "debug", skip_all, fields(seq = raw.sequence))]
    pub fn process(&mut self, raw: &RawFrame, config: &PipelineConfig) -> Result<FrameOutcome> {
        let started = Instant::now();
        self.prepare(config);

        match self.run_stages(raw, config) {
            Ok(set) => {
                let finished = Instant::now();
                let sizes = self.fanout.sizes();
                self.metrics.record_capture_age(raw.timestamp, finished);
                let sample = self.metrics.record_frame(started, finished, sizes);
                let report = FrameReport {
                    sequence: raw.sequence,
                    sizes,
                    detections: set.len(),
                    latency: finished.saturating_duration_since(started),
                };
                let set = Arc::new(set);
                self.outputs.publish_performance(sample);
                self.outputs.publish_detections(Arc::clone(&set));
                self.sink.present(self.fanout.preview(), &set, &sample);
                Ok(FrameOutcome::Processed(report))
            }
            Err(StageError::Skip(e)) => {
                warn!(seq = raw.sequence, "frame skipped: {}", e);
                self.metrics.record_skip();
                self.outputs.publish_performance(self.metrics.sample());
                Ok(FrameOutcome::Skipped(e))
            }
            Err(StageError::Fatal(e)) => Err(e),
        }
    }

    fn run_stages(&mut self, raw: &RawFrame, config: &PipelineConfig) -> StageResult<DetectionSet> {
        let mirror = config.lens.mirrors();
        let canonical = self.normalizer.normalize(raw, mirror)?;
        self.fanout.fan_out(canonical, config)?;
        let set = self.dispatcher.dispatch(&mut self.fanout, raw.sequence, mirror)?;
        if self.dispatcher.filter_failed() {
            // The filter may have written part of the preview before failing.
            self.fanout.fan_out(self.normalizer.canonical(), config)?;
        }
        Ok(set)
    }

    /// Running total of frames the source replaced before they were picked up.
    pub fn note_dropped(&mut self, total: u64) {
        self.metrics.set_dropped(total);
    }

    /// Free every frame buffer. The next frame reallocates.
    pub fn release(&mut self) {
        self.normalizer.release();
        self.fanout.release();
        self.dispatcher.release();
        debug!("pipeline buffers released");
    }
}

/// Runs a [`FramePipeline`] on its own thread, fed by a [`FrameSource`].
pub struct PipelineWorker {
    handle: Option<JoinHandle<Result<()>>>,
    stop: Arc<AtomicBool>,
    outputs: Arc<PipelineOutputs>,
}

impl PipelineWorker {
    pub fn spawn(
        source: Box<dyn FrameSource>,
        pipeline: FramePipeline,
        config: ConfigHandle,
        settings: WorkerConfig,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let outputs = pipeline.outputs();
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("frame-worker".into())
            .spawn(move || run(source, pipeline, config, settings, flag))
            .map_err(|e| PipelineError::Session(format!("failed to spawn frame worker: {e}")))?;
        Ok(Self {
            handle: Some(handle),
            stop,
            outputs,
        })
    }

    pub fn outputs(&self) -> Arc<PipelineOutputs> {
        Arc::clone(&self.outputs)
    }

    /// False once the worker exited, either on request or after a session error.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the worker and wait for it. Returns the session error, if any.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| PipelineError::Session("frame worker panicked".into()))?,
            None => Ok(()),
        }
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("frame worker ended with error: {}", e);
        }
    }
}

struct ActiveSession {
    session: Session,
    opened_with: Arc<PipelineConfig>,
}

fn open_session(
    source: &mut dyn FrameSource,
    slot: &LatestFrameSlot,
    config: Arc<PipelineConfig>,
) -> Result<ActiveSession> {
    let sink = FrameSink::new(slot.clone());
    let session = source.open(config.lens, config.capture_resolution, sink)?;
    info!(
        session = session.id,
        lens = ?config.lens,
        requested = %config.capture_resolution,
        "session opened"
    );
    Ok(ActiveSession {
        session,
        opened_with: config,
    })
}

fn close_session(
    source: &mut dyn FrameSource,
    pipeline: &mut FramePipeline,
    slot: &LatestFrameSlot,
    active: ActiveSession,
) {
    source.close(active.session);
    slot.clear();
    pipeline.release();
    info!(session = active.session.id, "session closed");
}

fn pin_to_core(core: usize) {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!(core, "could not enumerate cores, worker not pinned");
        return;
    };
    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => info!(core, "frame worker pinned"),
        _ => warn!(core, "could not pin frame worker"),
    }
}

fn run(
    mut source: Box<dyn FrameSource>,
    mut pipeline: FramePipeline,
    config: ConfigHandle,
    settings: WorkerConfig,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    if let Some(core) = settings.pin_core {
        pin_to_core(core);
    }
    let poll = Duration::from_millis(settings.idle_poll_ms.max(1));
    let slot = LatestFrameSlot::new();
    let initial = config.snapshot();
    pipeline.prepare(&initial);
    let mut active = open_session(source.as_mut(), &slot, initial)?;

    let outcome = loop {
        if stop.load(Ordering::Acquire) {
            break Ok(());
        }
        let frame = slot.take_timeout(poll);

        // Frame boundary: one consistent view of the configuration.
        let snapshot = config.snapshot();
        if active.opened_with.needs_session_restart(&snapshot) {
            info!(
                lens = ?snapshot.lens,
                capture = %snapshot.capture_resolution,
                "capture settings changed, restarting session"
            );
            close_session(source.as_mut(), &mut pipeline, &slot, active);
            active = open_session(source.as_mut(), &slot, snapshot)?;
            // Anything taken above came from the old session.
            continue;
        }

        let Some(frame) = frame else { continue };
        pipeline.note_dropped(slot.stats().dropped);
        if let Err(e) = pipeline.process(&frame, &snapshot) {
            error!(seq = frame.sequence, "session failed: {}", e);
            break Err(e);
        }
    };

    close_session(source.as_mut(), &mut pipeline, &slot, active);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::test_pattern;
    use crate::capture::Rotation;
    use crate::collab::{FaceDetector, FaceOrientation, FaceTicket};
    use crate::config::{LensFacing, Resolution};

    /// Wants sensor-oriented frames and never finds anything.
    struct SensorNoFaces;

    impl FaceDetector for SensorNoFaces {
        fn orientation(&self) -> FaceOrientation {
            FaceOrientation::Sensor
        }

        fn process(&mut self, _frame: &RgbaBuffer) -> FaceTicket {
            FaceTicket::ready(Ok(Vec::new()))
        }
    }

    #[test]
    fn processes_and_publishes() {
        let mut pipeline = FramePipeline::new(Collaborators::default(), Duration::from_millis(50));
        let outputs = pipeline.outputs();
        let config = PipelineConfig {
            capture_resolution: Resolution::new(64, 48),
            ..PipelineConfig::default()
        };
        let frame = test_pattern(Resolution::new(64, 48), Rotation::Deg0, 1);
        let outcome = pipeline.process(&frame, &config).unwrap();
        let FrameOutcome::Processed(report) = outcome else {
            panic!("expected processed frame");
        };
        assert_eq!(report.sizes.preview, Resolution::new(64, 48));
        assert!(report.sizes.shared);
        assert_eq!(outputs.performance().frames_processed, 1);
        assert_eq!(outputs.detections().mode, Mode::Passthrough);
    }

    #[test]
    fn capture_latency_counts_from_frame_timestamp() {
        let mut pipeline = FramePipeline::new(Collaborators::default(), Duration::from_millis(50));
        let config = PipelineConfig {
            capture_resolution: Resolution::new(32, 16),
            ..PipelineConfig::default()
        };
        let mut frame = test_pattern(Resolution::new(32, 16), Rotation::Deg0, 1);
        frame.timestamp -= Duration::from_millis(20);
        pipeline.process(&frame, &config).unwrap();

        let perf = pipeline.outputs().performance();
        assert!(perf.capture_latency_ms >= 20.0);
        assert!(perf.capture_latency_ms >= perf.last_latency_ms);
    }

    #[test]
    fn release_frees_face_scratch_buffer() {
        let collaborators = Collaborators::default().with_faces(SensorNoFaces);
        let mut pipeline = FramePipeline::new(collaborators, Duration::from_millis(50));
        let config = PipelineConfig {
            lens: LensFacing::Front,
            capture_resolution: Resolution::new(32, 16),
            mode: Mode::FaceDetection,
            ..PipelineConfig::default()
        };
        let frame = test_pattern(Resolution::new(32, 16), Rotation::Deg0, 1);
        pipeline.process(&frame, &config).unwrap();
        assert!(!pipeline.dispatcher().face_scratch().is_empty());

        pipeline.release();
        assert!(pipeline.dispatcher().face_scratch().is_empty());
        assert!(pipeline.fanout().preview().is_empty());
    }

    #[test]
    fn bad_frame_is_skipped_not_fatal() {
        let mut pipeline = FramePipeline::new(Collaborators::default(), Duration::from_millis(50));
        let config = PipelineConfig::default();
        let mut frame = test_pattern(Resolution::new(64, 48), Rotation::Deg90, 1);
        frame.planes.truncate(1);
        let outcome = pipeline.process(&frame, &config).unwrap();
        assert!(matches!(outcome, FrameOutcome::Skipped(FrameError::PlaneCount { .. })));
        assert_eq!(pipeline.outputs().performance().frames_skipped, 1);
    }

    #[test]
    fn front_lens_is_mirrored() {
        let mut pipeline = FramePipeline::new(Collaborators::default(), Duration::from_millis(50));
        let config = PipelineConfig {
            lens: LensFacing::Front,
            capture_resolution: Resolution::new(32, 16),
            ..PipelineConfig::default()
        };
        let frame = test_pattern(Resolution::new(32, 16), Rotation::Deg0, 0);
        pipeline.process(&frame, &config).unwrap();
        let preview = pipeline.fanout().preview();

        let mut unmirrored = pipeline_preview_without_mirror(&frame);
        unmirrored.flip_horizontal();
        assert_eq!(preview.as_bytes(), unmirrored.as_bytes());
    }

    fn pipeline_preview_without_mirror(frame: &RawFrame) -> RgbaBuffer {
        let mut pipeline = FramePipeline::new(Collaborators::default(), Duration::from_millis(50));
        let config = PipelineConfig {
            capture_resolution: frame.size(),
            ..PipelineConfig::default()
        };
        pipeline.process(frame, &config).unwrap();
        pipeline.fanout().preview().clone()
    }
}
