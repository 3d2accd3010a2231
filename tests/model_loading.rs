use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use iris::capture::source::test_pattern;
use iris::capture::{FrameSink, FrameSource, Rotation, Session};
use iris::collab::{Collaborators, ObjectDetector, ObjectHit};
use iris::error::CollaboratorError;
use iris::pipeline::{PixelBox, RgbaBuffer};
use iris::{
    ConfigHandle, FramePipeline, LensFacing, Mode, PipelineConfig, PipelineWorker, Resolution,
    WorkerConfig,
};

/// Records load requests. Only `.onnx` files load; once loaded it finds one
/// person per frame.
#[derive(Clone, Default)]
struct RecordingDetector {
    loads: Arc<Mutex<Vec<PathBuf>>>,
    ready: bool,
}

impl RecordingDetector {
    fn loads(&self) -> Vec<PathBuf> {
        self.loads.lock().unwrap().clone()
    }
}

impl ObjectDetector for RecordingDetector {
    fn load_model(&mut self, path: &Path) -> bool {
        self.loads.lock().unwrap().push(path.to_path_buf());
        self.ready = path.extension().is_some_and(|e| e == "onnx");
        self.ready
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn infer(
        &mut self,
        buffer: &RgbaBuffer,
        _confidence: f32,
        _iou: f32,
        _active_class_ids: &[u32],
    ) -> Result<Vec<ObjectHit>, CollaboratorError> {
        Ok(vec![ObjectHit {
            class_id: 0,
            label: String::new(),
            confidence: 0.7,
            bbox: PixelBox::new(0.0, 0.0, buffer.width() as f32, buffer.height() as f32),
        }])
    }
}

/// Opens sessions that never deliver a frame.
struct IdleSource;

impl FrameSource for IdleSource {
    fn open(
        &mut self,
        lens: LensFacing,
        requested: Resolution,
        _sink: FrameSink,
    ) -> iris::Result<Session> {
        Ok(Session {
            id: 1,
            lens,
            requested,
        })
    }

    fn close(&mut self, _session: Session) {}
}

fn config(model: Option<&str>) -> PipelineConfig {
    PipelineConfig {
        capture_resolution: Resolution::new(32, 24),
        mode: Mode::ObjectDetection,
        model_path: model.map(PathBuf::from),
        ..PipelineConfig::default()
    }
}

#[test]
fn detections_start_once_the_model_loads() {
    let detector = RecordingDetector::default();
    let collaborators = Collaborators::default().with_detector(detector.clone());
    let mut p = FramePipeline::new(collaborators, Duration::from_millis(20));
    let outputs = p.outputs();
    let frame = |seq| test_pattern(Resolution::new(32, 24), Rotation::Deg0, seq);

    p.process(&frame(1), &config(None)).unwrap();
    assert!(!outputs.detector_ready());
    assert!(outputs.detections().is_empty());

    p.process(&frame(2), &config(Some("weights.bin"))).unwrap();
    p.process(&frame(3), &config(Some("weights.bin"))).unwrap();
    assert!(!outputs.detector_ready());
    assert!(outputs.detections().is_empty());

    p.process(&frame(4), &config(Some("yolo.onnx"))).unwrap();
    assert!(outputs.detector_ready());
    assert_eq!(outputs.detections().len(), 1);
    assert_eq!(outputs.detections().detections[0].label, "person");

    p.process(&frame(5), &config(Some("yolo.onnx"))).unwrap();
    assert_eq!(
        detector.loads(),
        vec![PathBuf::from("weights.bin"), PathBuf::from("yolo.onnx")]
    );
}

#[test]
fn worker_loads_configured_model_before_first_frame() {
    let detector = RecordingDetector::default();
    let collaborators = Collaborators::default().with_detector(detector.clone());
    let pipeline = FramePipeline::new(collaborators, Duration::from_millis(20));
    let config = ConfigHandle::new(config(Some("models/yolo.onnx"))).unwrap();
    let settings = WorkerConfig {
        idle_poll_ms: 5,
        ..WorkerConfig::default()
    };

    let worker = PipelineWorker::spawn(Box::new(IdleSource), pipeline, config, settings).unwrap();
    let outputs = worker.outputs();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !outputs.detector_ready() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(outputs.detector_ready());
    assert_eq!(detector.loads(), vec![PathBuf::from("models/yolo.onnx")]);
    worker.stop().unwrap();
}
