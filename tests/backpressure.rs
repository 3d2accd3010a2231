use std::path::Path;
use std::time::Duration;

use flume::{Receiver, Sender};

use iris::capture::source::test_pattern;
use iris::capture::{FrameSink, FrameSource, Rotation, Session};
use iris::collab::{Collaborators, ObjectDetector, ObjectHit};
use iris::error::CollaboratorError;
use iris::pipeline::{DetectionSet, PerformanceSample, PreviewSink, RgbaBuffer};
use iris::{
    ConfigHandle, FramePipeline, LensFacing, Mode, PipelineConfig, PipelineWorker, Resolution,
    WorkerConfig,
};

const WAIT: Duration = Duration::from_secs(5);
const SIZE: Resolution = Resolution::new(32, 24);

#[derive(Debug)]
enum SourceEvent {
    Opened(Session, FrameSink),
    Closed(Session),
}

/// Hands every session's sink to the test, which then delivers frames by hand.
struct ManualSource {
    events: Sender<SourceEvent>,
    next_id: u64,
}

impl FrameSource for ManualSource {
    fn open(
        &mut self,
        lens: LensFacing,
        requested: Resolution,
        sink: FrameSink,
    ) -> iris::Result<Session> {
        self.next_id += 1;
        let session = Session {
            id: self.next_id,
            lens,
            requested,
        };
        let _ = self.events.send(SourceEvent::Opened(session, sink));
        Ok(session)
    }

    fn close(&mut self, session: Session) {
        let _ = self.events.send(SourceEvent::Closed(session));
    }
}

/// Blocks inside `infer` until the test opens the gate.
struct GatedDetector {
    entered: Sender<()>,
    gate: Receiver<()>,
}

impl ObjectDetector for GatedDetector {
    fn load_model(&mut self, _path: &Path) -> bool {
        true
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn infer(
        &mut self,
        _buffer: &RgbaBuffer,
        _confidence: f32,
        _iou: f32,
        _active_class_ids: &[u32],
    ) -> Result<Vec<ObjectHit>, CollaboratorError> {
        let _ = self.entered.send(());
        self.gate
            .recv_timeout(WAIT)
            .map_err(|_| CollaboratorError::Failed("gate never opened".into()))?;
        Ok(Vec::new())
    }
}

/// Reports the sequence number of every frame that completes.
struct SequenceSink(Sender<u64>);

impl PreviewSink for SequenceSink {
    fn present(&mut self, _: &RgbaBuffer, detections: &DetectionSet, _: &PerformanceSample) {
        let _ = self.0.send(detections.frame);
    }
}

fn worker_settings() -> WorkerConfig {
    WorkerConfig {
        idle_poll_ms: 5,
        ..WorkerConfig::default()
    }
}

fn expect_open(events: &Receiver<SourceEvent>) -> (Session, FrameSink) {
    match events.recv_timeout(WAIT) {
        Ok(SourceEvent::Opened(session, sink)) => (session, sink),
        other => panic!("expected session open, got {other:?}"),
    }
}

#[test]
fn newest_frame_is_processed_next_and_older_ones_are_dropped() {
    let (events_tx, events) = flume::unbounded();
    let (entered_tx, entered) = flume::unbounded();
    let (gate, gate_rx) = flume::unbounded();
    let (done_tx, done) = flume::unbounded();

    let config = ConfigHandle::new(PipelineConfig {
        capture_resolution: SIZE,
        mode: Mode::ObjectDetection,
        ..PipelineConfig::default()
    })
    .unwrap();
    let collaborators = Collaborators::default().with_detector(GatedDetector {
        entered: entered_tx,
        gate: gate_rx,
    });
    let pipeline = FramePipeline::new(collaborators, Duration::from_millis(50))
        .with_sink(SequenceSink(done_tx));
    let source = ManualSource {
        events: events_tx,
        next_id: 0,
    };
    let worker =
        PipelineWorker::spawn(Box::new(source), pipeline, config, worker_settings()).unwrap();
    let outputs = worker.outputs();

    let (_session, sink) = expect_open(&events);
    sink.deliver(test_pattern(SIZE, Rotation::Deg0, 1));
    entered.recv_timeout(WAIT).expect("frame 1 reached the detector");

    // Frame 1 is still in flight.
    for seq in 2..=4 {
        sink.deliver(test_pattern(SIZE, Rotation::Deg0, seq));
    }
    gate.send(()).unwrap();
    gate.send(()).unwrap();

    assert_eq!(done.recv_timeout(WAIT).unwrap(), 1);
    assert_eq!(done.recv_timeout(WAIT).unwrap(), 4);
    assert!(done.recv_timeout(Duration::from_millis(100)).is_err());

    let perf = outputs.performance();
    assert_eq!(perf.frames_processed, 2);
    assert_eq!(perf.frames_dropped, 2);

    worker.stop().unwrap();
}

#[test]
fn lens_change_restarts_the_session_and_mode_change_does_not() {
    let (events_tx, events) = flume::unbounded();
    let config = ConfigHandle::new(PipelineConfig {
        capture_resolution: SIZE,
        ..PipelineConfig::default()
    })
    .unwrap();
    let source = ManualSource {
        events: events_tx,
        next_id: 0,
    };
    let pipeline = FramePipeline::new(Collaborators::default(), Duration::from_millis(50));
    let worker =
        PipelineWorker::spawn(Box::new(source), pipeline, config.clone(), worker_settings()).unwrap();

    let (first, _sink) = expect_open(&events);
    assert_eq!(first.lens, LensFacing::Back);

    config.set_mode(Mode::FaceDetection).unwrap();
    config.set_filter("Gray").unwrap();
    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());

    config.set_lens(LensFacing::Front).unwrap();
    match events.recv_timeout(WAIT) {
        Ok(SourceEvent::Closed(session)) => assert_eq!(session.id, first.id),
        other => panic!("expected close, got {other:?}"),
    }
    let (second, _sink) = expect_open(&events);
    assert_eq!(second.lens, LensFacing::Front);
    assert_ne!(second.id, first.id);

    config.set_capture_resolution("16x12").unwrap();
    assert!(matches!(events.recv_timeout(WAIT), Ok(SourceEvent::Closed(_))));
    let (third, _sink) = expect_open(&events);
    assert_eq!(third.requested, Resolution::new(16, 12));

    worker.stop().unwrap();
    assert!(matches!(events.recv_timeout(WAIT), Ok(SourceEvent::Closed(s)) if s.id == third.id));
}
