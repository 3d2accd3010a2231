//! Mode Dispatcher: routes the fanned-out buffers to the active analysis mode.
//!
//! The mode is a closed set of states carrying only what each one needs.
//! Transitions happen only through [`ModeDispatcher::sync`], which the
//! pipeline calls once at the top of every frame with that frame's config
//! snapshot.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::collab::labels::{label_for, resolve_class_ids};
use crate::collab::{Collaborators, FaceBox, FaceOrientation, ObjectHit};
use crate::config::{DetectorParams, FilterId, Mode, PipelineConfig, Resolution};
use crate::error::{CollaboratorError, FrameError, StageResult};
use crate::pipeline::buffer::RgbaBuffer;
use crate::pipeline::detection::{BoundingBox, Detection, DetectionKind, DetectionSet};
use crate::pipeline::fanout::ResolutionFanOut;

#[derive(Debug, Clone, PartialEq)]
pub enum ModeState {
    Passthrough { filter: FilterId },
    ObjectDetection { params: DetectorParams },
    FaceDetection,
}

impl ModeState {
    pub fn from_config(config: &PipelineConfig) -> Self {
        match config.mode {
            Mode::Passthrough => ModeState::Passthrough {
                filter: config.filter,
            },
            Mode::ObjectDetection => ModeState::ObjectDetection {
                params: config.detector.clone(),
            },
            Mode::FaceDetection => ModeState::FaceDetection,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            ModeState::Passthrough { .. } => Mode::Passthrough,
            ModeState::ObjectDetection { .. } => Mode::ObjectDetection,
            ModeState::FaceDetection => Mode::FaceDetection,
        }
    }
}

pub struct ModeDispatcher {
    collaborators: Collaborators,
    state: ModeState,
    face_timeout: Duration,
    /// Un-mirrored copy for face engines that want sensor orientation.
    face_input: RgbaBuffer,
    /// Last model path handed to the detector, loaded or not.
    requested_model: Option<PathBuf>,
    filter_failed: bool,
}

impl ModeDispatcher {
    pub fn new(collaborators: Collaborators, face_timeout: Duration) -> Self {
        Self {
            collaborators,
            state: ModeState::Passthrough {
                filter: FilterId::Normal,
            },
            face_timeout,
            face_input: RgbaBuffer::new(),
            requested_model: None,
            filter_failed: false,
        }
    }

    pub fn state(&self) -> &ModeState {
        &self.state
    }

    pub fn detector_ready(&self) -> bool {
        self.collaborators.detector.is_ready()
    }

    /// True when the last passthrough dispatch left the preview in an unknown
    /// state because the filter failed part way.
    pub fn filter_failed(&self) -> bool {
        self.filter_failed
    }

    /// Adopt the frame's configuration. Returns `true` when the mode changed,
    /// in which case any published detections belong to the previous mode.
    pub fn sync(&mut self, config: &PipelineConfig) -> bool {
        self.sync_model(config);
        let next = ModeState::from_config(config);
        let changed = next.mode() != self.state.mode();
        if changed {
            info!(from = %self.state.mode(), to = %next.mode(), "mode transition");
            if self.state.mode() == Mode::FaceDetection {
                self.face_input.release();
            }
        }
        self.state = next;
        changed
    }

    /// Each distinct path is handed to the detector once. A failed load is
    /// not retried until the path changes again.
    fn sync_model(&mut self, config: &PipelineConfig) {
        if config.model_path == self.requested_model {
            return;
        }
        self.requested_model = config.model_path.clone();
        let Some(path) = self.requested_model.as_deref() else {
            return;
        };
        if self.collaborators.detector.load_model(path) {
            info!(path = %path.display(), "object detection model loaded");
        } else {
            warn!(path = %path.display(), "object detection model failed to load");
        }
    }

    /// Drop the scratch buffer kept for sensor-oriented face engines.
    pub fn release(&mut self) {
        self.face_input.release();
    }

    #[cfg(test)]
    pub(crate) fn face_scratch(&self) -> &RgbaBuffer {
        &self.face_input
    }

    /// Run the active mode against the fanned-out buffers of frame `frame`.
    ///
    /// `mirrored` tells whether the preview was mirrored for the viewer.
    #[instrument(level = "debug", skip(self, fanout), fields(mode = %self.state.mode()))]
    pub fn dispatch(
        &mut self,
        fanout: &mut ResolutionFanOut,
        frame: u64,
        mirrored: bool,
    ) -> StageResult<DetectionSet> {
        self.filter_failed = false;
        let mut set = match self.state {
            ModeState::Passthrough { filter } => {
                if filter != FilterId::Normal {
                    if let Err(e) = self.collaborators.filter.apply(filter, fanout.preview_mut()) {
                        warn!(%filter, "filter failed, showing unfiltered preview: {}", e);
                        self.filter_failed = true;
                    }
                }
                DetectionSet {
                    source_size: fanout.preview().size(),
                    ..DetectionSet::empty(Mode::Passthrough)
                }
            }
            ModeState::ObjectDetection { ref params } => {
                detect_objects(&mut self.collaborators, params, fanout.inference())
            }
            ModeState::FaceDetection => self.detect_faces(fanout.preview(), mirrored)?,
        };
        set.frame = frame;
        debug!(detections = set.len(), source = %set.source_size, "dispatch complete");
        Ok(set)
    }

    fn detect_faces(&mut self, preview: &RgbaBuffer, mirrored: bool) -> StageResult<DetectionSet> {
        let faces = &mut self.collaborators.faces;
        let unmirror = mirrored && faces.orientation() == FaceOrientation::Sensor;
        let input = if unmirror {
            self.face_input.copy_from(preview)?;
            self.face_input.flip_horizontal();
            &self.face_input
        } else {
            preview
        };
        let source_size = input.size();

        let hits = match faces.process(input).wait(self.face_timeout) {
            Ok(hits) => hits,
            Err(CollaboratorError::NotReady) => Vec::new(),
            Err(CollaboratorError::TimedOut(waited)) => {
                return Err(FrameError::FaceTimeout(waited).into())
            }
            Err(e) => {
                warn!("face detector failed: {}", e);
                Vec::new()
            }
        };

        let detections = hits
            .into_iter()
            .map(|hit| Detection {
                kind: DetectionKind::Face,
                label: "Face".to_string(),
                confidence: 1.0,
                bbox: match hit.bbox {
                    FaceBox::Normalized(b) => {
                        BoundingBox::from_edges(b.x, b.y, b.right(), b.bottom())
                    }
                    FaceBox::Pixels(px) => BoundingBox::from_pixels(px, source_size),
                },
                tracking_id: hit.tracking_id,
            })
            .collect();

        Ok(DetectionSet {
            frame: 0,
            mode: Mode::FaceDetection,
            source_size,
            mirrored: unmirror,
            detections,
        })
    }
}

/// A detector that is not ready, or fails, produces an empty list.
fn detect_objects(
    collaborators: &mut Collaborators,
    params: &DetectorParams,
    buffer: &RgbaBuffer,
) -> DetectionSet {
    let detector = &mut collaborators.detector;
    let source_size = buffer.size();
    let mut set = DetectionSet {
        source_size,
        ..DetectionSet::empty(Mode::ObjectDetection)
    };
    if !detector.is_ready() {
        return set;
    }
    let class_ids = resolve_class_ids(detector.labels(), &params.active_classes);
    if class_ids.is_empty() {
        return set;
    }

    let hits = match detector.infer(buffer, params.confidence, params.iou, &class_ids) {
        Ok(hits) => hits,
        Err(CollaboratorError::NotReady) => return set,
        Err(e) => {
            warn!("object detector failed: {}", e);
            return set;
        }
    };

    let labels = detector.labels();
    set.detections = hits
        .into_iter()
        .map(|hit| to_detection(hit, labels, source_size))
        .collect();
    set
}

fn to_detection(hit: ObjectHit, labels: Option<&[String]>, source_size: Resolution) -> Detection {
    let label = if hit.label.is_empty() {
        label_for(labels, hit.class_id)
    } else {
        hit.label
    };
    Detection {
        kind: DetectionKind::Object,
        label,
        confidence: hit.confidence.clamp(0.0, 1.0),
        bbox: BoundingBox::from_pixels(hit.bbox, source_size),
        tracking_id: None,
    }
}
