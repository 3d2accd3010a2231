use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::Resolution;

/// One image plane as delivered by the sensor.
#[derive(Debug, Clone)]
pub struct Plane {
    /// Immutable plane data - can be shared across threads without copying
    pub data: Bytes,
    /// Bytes between the starts of consecutive rows
    pub row_stride: usize,
    /// Bytes between horizontally adjacent samples
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: impl Into<Bytes>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data: data.into(),
            row_stride,
            pixel_stride,
        }
    }
}

/// Sample layouts the normalizer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    /// Y, U, V planes, chroma subsampled 2x2. Pixel stride 2 covers the
    /// semi-planar NV12/NV21 variants.
    Yuv420,
    /// Single interleaved RGBA8 plane
    Rgba8,
}

impl PixelLayout {
    pub fn plane_count(self) -> usize {
        match self {
            PixelLayout::Yuv420 => 3,
            PixelLayout::Rgba8 => 1,
        }
    }
}

/// Clockwise rotation needed to bring the sensor image upright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Map a degree hint onto a quarter turn. Any multiple of 90 is accepted.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    /// Dimensions after applying this rotation to `size`.
    pub fn apply(self, size: Resolution) -> Resolution {
        if self.swaps_axes() {
            size.transposed()
        } else {
            size
        }
    }
}

/// Raw sensor frame, valid for the duration of one delivery.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub planes: Vec<Plane>,
    pub rotation: Rotation,
    /// When the sensor delivered the frame. Capture latency is measured from here.
    pub timestamp: Instant,
}

impl RawFrame {
    pub fn size(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Size of the frame once rotated upright.
    pub fn upright_size(&self) -> Resolution {
        self.rotation.apply(self.size())
    }
}
