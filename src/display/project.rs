//! Coordinate Projector: detection boxes -> container (overlay) space.
//!
//! Content is scaled to fit and centred, so the container may show empty
//! bands on two sides. Boxes are first expressed in pixels of the buffer the
//! detector consumed, flipped around that buffer's width when the set is
//! mirrored, and only then scaled.

use crate::config::Resolution;
use crate::pipeline::detection::{Detection, DetectionKind, DetectionSet};

/// Size of the overlay surface, in display units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerSize {
    pub width: f32,
    pub height: f32,
}

impl ContainerSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    fn is_finite(&self) -> bool {
        self.left.is_finite() && self.top.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// Scale-to-fit transform from a source buffer into a container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    source: Resolution,
}

impl Letterbox {
    /// `None` when either size is empty or not finite.
    pub fn fit(source: Resolution, container: ContainerSize) -> Option<Self> {
        if source.is_empty()
            || !(container.width.is_finite() && container.height.is_finite())
            || container.width <= 0.0
            || container.height <= 0.0
        {
            return None;
        }
        let (sw, sh) = (source.width as f32, source.height as f32);
        let scale = (container.width / sw).min(container.height / sh);
        Some(Self {
            scale,
            offset_x: (container.width - sw * scale) / 2.0,
            offset_y: (container.height - sh * scale) / 2.0,
            source,
        })
    }

    /// Region of the container covered by content.
    pub fn content(&self) -> Rect {
        Rect::new(
            self.offset_x,
            self.offset_y,
            self.source.width as f32 * self.scale,
            self.source.height as f32 * self.scale,
        )
    }

    /// Map a rect in source pixels into the container.
    pub fn map(&self, r: Rect, mirrored: bool) -> Rect {
        let left = if mirrored {
            self.source.width as f32 - r.right()
        } else {
            r.left
        };
        Rect::new(
            self.offset_x + left * self.scale,
            self.offset_y + r.top * self.scale,
            r.width * self.scale,
            r.height * self.scale,
        )
    }
}

/// A detection placed in container space, ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayRect {
    pub rect: Rect,
    pub kind: DetectionKind,
    pub caption: String,
    pub tracking_id: Option<i64>,
}

pub fn project(
    detections: &[Detection],
    source_size: Resolution,
    container: ContainerSize,
    mirrored: bool,
) -> Vec<DisplayRect> {
    let Some(fit) = Letterbox::fit(source_size, container) else {
        return Vec::new();
    };
    detections
        .iter()
        .filter_map(|d| {
            let px = d.bbox.to_pixels(source_size);
            let rect = fit.map(Rect::new(px.x, px.y, px.width, px.height), mirrored);
            rect.is_finite().then(|| DisplayRect {
                rect,
                kind: d.kind,
                caption: d.caption(),
                tracking_id: d.tracking_id,
            })
        })
        .collect()
}

/// Project a published set against the size it was produced from.
pub fn project_set(set: &DetectionSet, container: ContainerSize) -> Vec<DisplayRect> {
    project(&set.detections, set.source_size, container, set.mirrored)
}
