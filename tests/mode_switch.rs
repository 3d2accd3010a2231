use std::path::Path;
use std::time::Duration;

use iris::capture::source::test_pattern;
use iris::capture::Rotation;
use iris::collab::{
    Collaborators, FaceDetector, FaceReply, FaceTicket, Filter, ObjectDetector, ObjectHit,
};
use iris::error::CollaboratorError;
use iris::pipeline::{FrameOutcome, FramePipeline, PixelBox, RgbaBuffer};
use iris::{FilterId, FrameError, Mode, PipelineConfig, Resolution};

/// Finds one "person" in the top-left quarter of every frame.
struct AlwaysPerson;

impl ObjectDetector for AlwaysPerson {
    fn load_model(&mut self, _path: &Path) -> bool {
        true
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn infer(
        &mut self,
        buffer: &RgbaBuffer,
        _confidence: f32,
        _iou: f32,
        _active_class_ids: &[u32],
    ) -> Result<Vec<ObjectHit>, CollaboratorError> {
        let (w, h) = (buffer.width() as f32, buffer.height() as f32);
        Ok(vec![ObjectHit {
            class_id: 0,
            label: String::new(),
            confidence: 0.8,
            bbox: PixelBox::new(0.0, 0.0, w / 2.0, h / 2.0),
        }])
    }
}

/// Never answers.
#[derive(Default)]
struct SilentFaces(Vec<FaceReply>);

impl FaceDetector for SilentFaces {
    fn process(&mut self, _frame: &RgbaBuffer) -> FaceTicket {
        let (ticket, reply) = FaceTicket::pending();
        self.0.push(reply);
        ticket
    }
}

fn config(mode: Mode) -> PipelineConfig {
    PipelineConfig {
        capture_resolution: Resolution::new(64, 48),
        independent_inference_resolution: true,
        inference_width: 32,
        mode,
        ..PipelineConfig::default()
    }
}

fn frame(sequence: u64) -> iris::capture::RawFrame {
    test_pattern(Resolution::new(64, 48), Rotation::Deg0, sequence)
}

fn pipeline() -> FramePipeline {
    let collaborators = Collaborators::default()
        .with_detector(AlwaysPerson)
        .with_faces(SilentFaces::default());
    FramePipeline::new(collaborators, Duration::from_millis(20))
}

#[test]
fn object_detections_are_relative_to_inference_buffer() {
    let mut p = pipeline();
    p.process(&frame(1), &config(Mode::ObjectDetection)).unwrap();
    let set = p.outputs().detections();
    assert_eq!(set.mode, Mode::ObjectDetection);
    assert_eq!(set.source_size, Resolution::new(32, 24));
    assert_eq!(set.frame, 1);
    assert_eq!(set.detections[0].label, "person");
    assert_eq!(set.detections[0].caption(), "person 80%");
}

#[test]
fn switching_mode_clears_detections_even_when_frame_is_skipped() {
    let mut p = pipeline();
    let outputs = p.outputs();
    p.process(&frame(1), &config(Mode::ObjectDetection)).unwrap();
    assert_eq!(outputs.detections().len(), 1);

    let mut broken = frame(2);
    broken.planes.clear();
    let outcome = p.process(&broken, &config(Mode::Passthrough)).unwrap();
    assert!(matches!(outcome, FrameOutcome::Skipped(_)));

    let set = outputs.detections();
    assert!(set.is_empty());
    assert_eq!(set.mode, Mode::Passthrough);
}

#[test]
fn face_timeout_after_switch_never_shows_object_boxes() {
    let mut p = pipeline();
    let outputs = p.outputs();
    p.process(&frame(1), &config(Mode::ObjectDetection)).unwrap();

    let outcome = p.process(&frame(2), &config(Mode::FaceDetection)).unwrap();
    assert!(matches!(outcome, FrameOutcome::Skipped(FrameError::FaceTimeout(_))));
    let set = outputs.detections();
    assert!(set.is_empty());
    assert_eq!(set.mode, Mode::FaceDetection);
}

#[test]
fn transient_skip_keeps_last_detections_within_a_mode() {
    let mut p = pipeline();
    let outputs = p.outputs();
    p.process(&frame(1), &config(Mode::ObjectDetection)).unwrap();

    let mut broken = frame(2);
    broken.planes[1] = iris::capture::Plane::new(Vec::<u8>::new(), 32, 1);
    let outcome = p.process(&broken, &config(Mode::ObjectDetection)).unwrap();
    assert!(matches!(outcome, FrameOutcome::Skipped(FrameError::EmptyPlane { index: 1 })));
    assert_eq!(outputs.detections().frame, 1);
    assert_eq!(outputs.detections().len(), 1);
}

#[test]
fn presentation_hides_sets_from_another_mode() {
    let mut p = pipeline();
    let outputs = p.outputs();
    p.process(&frame(1), &config(Mode::ObjectDetection)).unwrap();

    // The user switched to passthrough; the worker has not reached the next
    // frame boundary yet.
    assert!(outputs.visible_detections(Mode::Passthrough).is_empty());
    assert_eq!(outputs.visible_detections(Mode::ObjectDetection).len(), 1);
}

/// Paints the top half white, then gives up.
struct FailsHalfway;

impl Filter for FailsHalfway {
    fn apply(&mut self, _filter: FilterId, buffer: &mut RgbaBuffer) -> Result<(), CollaboratorError> {
        let half = buffer.as_bytes().len() / 2;
        buffer.as_bytes_mut()[..half].fill(255);
        Err(CollaboratorError::Failed("out of scratch memory".into()))
    }
}

fn passthrough(filter: FilterId) -> PipelineConfig {
    PipelineConfig {
        filter,
        ..config(Mode::Passthrough)
    }
}

fn is_gray(px: [u8; 4]) -> bool {
    px[0] == px[1] && px[1] == px[2]
}

#[test]
fn passthrough_filter_touches_preview_only() {
    let mut plain = pipeline();
    plain.process(&frame(1), &passthrough(FilterId::Normal)).unwrap();

    let mut gray = pipeline();
    let outcome = gray.process(&frame(1), &passthrough(FilterId::Gray)).unwrap();
    assert!(matches!(outcome, FrameOutcome::Processed(_)));
    assert!(gray.outputs().detections().is_empty());

    let preview = gray.fanout().preview();
    assert_eq!(preview.size(), Resolution::new(64, 48));
    let mut pixels = (0..48).flat_map(|y| (0..64).map(move |x| (x, y)));
    assert!(pixels.all(|(x, y)| preview.pixel(x, y).is_some_and(is_gray)));

    let inference = gray.fanout().inference();
    assert_eq!(inference.size(), Resolution::new(32, 24));
    assert_eq!(inference.as_bytes(), plain.fanout().inference().as_bytes());
    let colored = (0..24).flat_map(|y| (0..32).map(move |x| (x, y)));
    assert!(colored
        .filter_map(|(x, y)| inference.pixel(x, y))
        .any(|px| !is_gray(px)));
}

#[test]
fn failing_filter_shows_unfiltered_preview() {
    let mut plain = pipeline();
    plain.process(&frame(1), &passthrough(FilterId::Normal)).unwrap();

    let collaborators = Collaborators::default().with_filter(FailsHalfway);
    let mut p = FramePipeline::new(collaborators, Duration::from_millis(20));
    let outcome = p.process(&frame(1), &passthrough(FilterId::Blur)).unwrap();

    assert!(matches!(outcome, FrameOutcome::Processed(_)));
    assert_eq!(p.outputs().performance().frames_processed, 1);
    assert_eq!(p.fanout().preview().as_bytes(), plain.fanout().preview().as_bytes());
    assert_eq!(p.fanout().inference().as_bytes(), plain.fanout().inference().as_bytes());
}
