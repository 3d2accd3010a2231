//! Frame Normalizer: raw sensor frame -> upright RGBA canonical frame.

use tracing::{info, instrument};

use crate::capture::convert::validate;
use crate::capture::{Bt601Kernel, ColorKernel, RawFrame, Rotation};
use crate::error::StageResult;
use crate::pipeline::buffer::{RgbaBuffer, BYTES_PER_PIXEL};

pub struct FrameNormalizer<K = Bt601Kernel> {
    kernel: K,
    /// Converted frame in sensor orientation, only used when rotating.
    sensor: RgbaBuffer,
    canonical: RgbaBuffer,
}

impl Default for FrameNormalizer<Bt601Kernel> {
    fn default() -> Self {
        Self::new(Bt601Kernel)
    }
}

impl<K: ColorKernel> FrameNormalizer<K> {
    pub fn new(kernel: K) -> Self {
        Self {
            kernel,
            sensor: RgbaBuffer::new(),
            canonical: RgbaBuffer::new(),
        }
    }

    /// Convert, rotate upright, then mirror if asked.
    ///
    /// The canonical buffer is left untouched when the frame fails
    /// validation.
    #[instrument(level = "trace", skip_all, fields(seq = raw.sequence))]
    pub fn normalize(&mut self, raw: &RawFrame, mirror: bool) -> StageResult<&RgbaBuffer> {
        validate(raw)?;

        let upright = raw.upright_size();
        if self.canonical.size() != upright && !self.canonical.is_empty() {
            info!(from = %self.canonical.size(), to = %upright, "canonical frame size changed");
        }

        if raw.rotation == Rotation::Deg0 {
            self.canonical.ensure(upright)?;
            self.kernel.to_rgba(raw, self.canonical.as_bytes_mut());
            if mirror {
                self.canonical.flip_horizontal();
            }
        } else {
            self.sensor.ensure(raw.size())?;
            self.kernel.to_rgba(raw, self.sensor.as_bytes_mut());
            self.canonical.ensure(upright)?;
            rotate_into(&self.sensor, raw.rotation, mirror, &mut self.canonical);
        }
        Ok(&self.canonical)
    }

    pub fn canonical(&self) -> &RgbaBuffer {
        &self.canonical
    }

    pub fn release(&mut self) {
        self.sensor.release();
        self.canonical.release();
    }
}

/// Rotate `src` clockwise by `rotation` into `dst`, then flip horizontally
/// when `mirror` is set. `dst` must already have the rotated dimensions.
pub fn rotate_into(src: &RgbaBuffer, rotation: Rotation, mirror: bool, dst: &mut RgbaBuffer) {
    let (sw, sh) = (src.width() as usize, src.height() as usize);
    let dw = dst.width() as usize;
    let src_stride = src.stride();
    let dst_stride = dst.stride();
    let src_px = src.as_bytes();
    let dst_px = dst.as_bytes_mut();

    for (dy, row) in dst_px.chunks_exact_mut(dst_stride).enumerate() {
        for dx in 0..dw {
            // Mirroring is relative to the viewer, so it applies to the
            // upright image.
            let ux = if mirror { dw - 1 - dx } else { dx };
            let (sx, sy) = match rotation {
                Rotation::Deg0 => (ux, dy),
                Rotation::Deg90 => (dy, sh - 1 - ux),
                Rotation::Deg180 => (sw - 1 - ux, sh - 1 - dy),
                Rotation::Deg270 => (sw - 1 - dy, ux),
            };
            let from = sy * src_stride + sx * BYTES_PER_PIXEL;
            let to = dx * BYTES_PER_PIXEL;
            row[to..to + BYTES_PER_PIXEL].copy_from_slice(&src_px[from..from + BYTES_PER_PIXEL]);
        }
    }
}
