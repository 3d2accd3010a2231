//! Contracts for the external collaborators the dispatcher drives: the
//! preview filter, the object detector and the face detector.

pub mod filters;
pub mod labels;

use std::path::Path;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::warn;

use crate::config::FilterId;
use crate::error::CollaboratorError;
use crate::pipeline::buffer::RgbaBuffer;
use crate::pipeline::detection::{BoundingBox, PixelBox};

pub use filters::BasicFilters;

/// Applies a preview filter in place.
pub trait Filter: Send {
    fn apply(&mut self, filter: FilterId, buffer: &mut RgbaBuffer) -> Result<(), CollaboratorError>;
}

/// One object found by the detector, in pixels of the buffer it was given.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHit {
    pub class_id: u32,
    /// Detector supplied label; empty to use the class catalog.
    pub label: String,
    pub confidence: f32,
    pub bbox: PixelBox,
}

pub trait ObjectDetector: Send {
    /// Load model weights. Returns false if the model could not be loaded.
    fn load_model(&mut self, path: &Path) -> bool;

    fn is_ready(&self) -> bool;

    /// Label table indexed by class id. `None` means the COCO catalog.
    fn labels(&self) -> Option<&[String]> {
        None
    }

    fn infer(
        &mut self,
        buffer: &RgbaBuffer,
        confidence: f32,
        iou: f32,
        active_class_ids: &[u32],
    ) -> Result<Vec<ObjectHit>, CollaboratorError>;
}

/// Placeholder detector for builds without an inference engine.
#[derive(Debug, Default)]
pub struct UnloadedDetector;

impl ObjectDetector for UnloadedDetector {
    fn load_model(&mut self, path: &Path) -> bool {
        warn!(path = %path.display(), "no inference engine compiled in");
        false
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn infer(
        &mut self,
        _buffer: &RgbaBuffer,
        _confidence: f32,
        _iou: f32,
        _active_class_ids: &[u32],
    ) -> Result<Vec<ObjectHit>, CollaboratorError> {
        Err(CollaboratorError::NotReady)
    }
}

/// Which frame a face detector wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaceOrientation {
    /// The preview exactly as displayed, mirrored for the front lens.
    #[default]
    AsDisplayed,
    /// Upright but never mirrored.
    Sensor,
}

/// Coordinate space a face box arrives in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FaceBox {
    Normalized(BoundingBox),
    Pixels(PixelBox),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceHit {
    pub bbox: FaceBox,
    pub tracking_id: Option<i64>,
}

pub type FaceResult = Result<Vec<FaceHit>, CollaboratorError>;

/// Pending answer from a face detector.
///
/// Synchronous engines answer with [`FaceTicket::ready`]. Asynchronous ones
/// hand back [`FaceTicket::pending`] and complete the [`FaceReply`] from their
/// own thread.
#[derive(Debug)]
pub struct FaceTicket {
    rx: Receiver<FaceResult>,
}

/// Completion side of a [`FaceTicket`].
#[derive(Debug)]
pub struct FaceReply {
    tx: Sender<FaceResult>,
}

impl FaceTicket {
    pub fn ready(result: FaceResult) -> Self {
        let (ticket, reply) = Self::pending();
        reply.send(result);
        ticket
    }

    pub fn pending() -> (Self, FaceReply) {
        let (tx, rx) = flume::bounded(1);
        (Self { rx }, FaceReply { tx })
    }

    /// Block for at most `timeout`.
    pub fn wait(self, timeout: Duration) -> FaceResult {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(CollaboratorError::TimedOut(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(CollaboratorError::Disconnected),
        }
    }
}

impl FaceReply {
    /// Deliver the result. A reply for an abandoned ticket is dropped.
    pub fn send(self, result: FaceResult) {
        let _ = self.tx.send(result);
    }
}

/// Face engine contract.
///
/// The frame is borrowed for the duration of the call only; asynchronous
/// engines copy what they need before returning the ticket.
pub trait FaceDetector: Send {
    fn orientation(&self) -> FaceOrientation {
        FaceOrientation::AsDisplayed
    }

    fn process(&mut self, frame: &RgbaBuffer) -> FaceTicket;
}

/// Face detector for builds without a face engine.
#[derive(Debug, Default)]
pub struct NoFaceDetector;

impl FaceDetector for NoFaceDetector {
    fn process(&mut self, _frame: &RgbaBuffer) -> FaceTicket {
        FaceTicket::ready(Err(CollaboratorError::NotReady))
    }
}

/// The set of collaborators a pipeline drives.
pub struct Collaborators {
    pub filter: Box<dyn Filter>,
    pub detector: Box<dyn ObjectDetector>,
    pub faces: Box<dyn FaceDetector>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            filter: Box::new(BasicFilters::new()),
            detector: Box::new(UnloadedDetector),
            faces: Box::new(NoFaceDetector),
        }
    }
}

impl Collaborators {
    pub fn with_detector(mut self, detector: impl ObjectDetector + 'static) -> Self {
        self.detector = Box::new(detector);
        self
    }

    pub fn with_faces(mut self, faces: impl FaceDetector + 'static) -> Self {
        self.faces = Box::new(faces);
        self
    }

    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_times_out() {
        let (ticket, _reply) = FaceTicket::pending();
        let err = ticket.wait(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, CollaboratorError::TimedOut(_)));
    }

    #[test]
    fn ticket_answered_from_another_thread() {
        let (ticket, reply) = FaceTicket::pending();
        std::thread::spawn(move || {
            reply.send(Ok(vec![FaceHit {
                bbox: FaceBox::Normalized(BoundingBox::FULL),
                tracking_id: Some(7),
            }]))
        });
        let faces = ticket.wait(Duration::from_secs(2)).unwrap();
        assert_eq!(faces[0].tracking_id, Some(7));
    }

    #[test]
    fn dropped_reply_disconnects() {
        let (ticket, reply) = FaceTicket::pending();
        drop(reply);
        assert!(matches!(
            ticket.wait(Duration::from_secs(1)),
            Err(CollaboratorError::Disconnected)
        ));
    }

    #[test]
    fn unloaded_detector_is_not_ready() {
        let mut d = UnloadedDetector;
        assert!(!d.is_ready());
        assert!(!d.load_model(Path::new("yolov8n.onnx")));
        assert!(matches!(
            d.infer(&RgbaBuffer::new(), 0.5, 0.45, &[0]),
            Err(CollaboratorError::NotReady)
        ));
    }
}
