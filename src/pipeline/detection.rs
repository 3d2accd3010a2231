//! Detection snapshot types shared by every analysis mode.
//!
//! Boxes are stored normalized to `[0, 1]` of the buffer the collaborator
//! consumed, and every [`DetectionSet`] carries that buffer's pixel size so
//! the projector always scales against the right reference.

use crate::config::{Mode, Resolution};

/// Axis-aligned box in pixel units of some buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PixelBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Box normalized to `[0, 1]` of its source buffer: `x, y, width, height`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const FULL: BoundingBox = BoundingBox {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    /// Build from edges, clamped into the unit square.
    pub fn from_edges(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        let l = left.clamp(0.0, 1.0);
        let t = top.clamp(0.0, 1.0);
        let r = right.clamp(0.0, 1.0).max(l);
        let b = bottom.clamp(0.0, 1.0).max(t);
        Self {
            x: l,
            y: t,
            width: r - l,
            height: b - t,
        }
    }

    pub fn from_pixels(px: PixelBox, size: Resolution) -> Self {
        let (w, h) = (size.width as f32, size.height as f32);
        Self::from_edges(px.x / w, px.y / h, px.right() / w, px.bottom() / h)
    }

    pub fn to_pixels(&self, size: Resolution) -> PixelBox {
        let (w, h) = (size.width as f32, size.height as f32);
        PixelBox::new(self.x * w, self.y * h, self.width * w, self.height * h)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionKind {
    Object,
    Face,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub kind: DetectionKind,
    pub label: String,
    /// In `[0, 1]`
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub tracking_id: Option<i64>,
}

impl Detection {
    /// Overlay caption, e.g. `person 87%` or `Face 3`.
    pub fn caption(&self) -> String {
        match (self.kind, self.tracking_id) {
            (DetectionKind::Object, _) => {
                format!("{} {}%", self.label, (self.confidence * 100.0) as i32)
            }
            (DetectionKind::Face, Some(id)) => format!("Face {id}"),
            (DetectionKind::Face, None) => "Face".to_string(),
        }
    }
}

/// Everything detected in one frame. Published as a whole and never mutated
/// after publication.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSet {
    pub frame: u64,
    pub mode: Mode,
    /// Pixel size of the buffer the boxes are relative to
    pub source_size: Resolution,
    /// Boxes are in sensor orientation while the display is mirrored
    pub mirrored: bool,
    pub detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn empty(mode: Mode) -> Self {
        Self {
            frame: 0,
            mode,
            source_size: Resolution::ZERO,
            mirrored: false,
            detections: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }
}

impl Default for DetectionSet {
    fn default() -> Self {
        Self::empty(Mode::Passthrough)
    }
}
