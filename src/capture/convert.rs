//! Sensor planes -> interleaved RGBA.

use crate::capture::frame::{PixelLayout, Plane, RawFrame};
use crate::error::{FrameError, FrameResult};

/// Pixel-format conversion kernel.
///
/// `out` is `width * height * 4` bytes in sensor orientation. The frame has
/// already passed [`validate`].
pub trait ColorKernel: Send {
    fn to_rgba(&mut self, frame: &RawFrame, out: &mut [u8]);
}

/// Check plane count, strides and lengths before any pixel is touched.
pub fn validate(frame: &RawFrame) -> FrameResult<()> {
    if frame.width == 0 || frame.height == 0 {
        return Err(FrameError::ZeroSized {
            width: frame.width,
            height: frame.height,
        });
    }
    let expected = frame.layout.plane_count();
    if frame.planes.len() != expected {
        return Err(FrameError::PlaneCount {
            expected,
            actual: frame.planes.len(),
        });
    }
    if let Some(index) = frame.planes.iter().position(|p| p.data.is_empty()) {
        return Err(FrameError::EmptyPlane { index });
    }

    let (w, h) = (frame.width as usize, frame.height as usize);
    match frame.layout {
        PixelLayout::Yuv420 => {
            check_plane(0, &frame.planes[0], w, h, &[1])?;
            let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
            check_plane(1, &frame.planes[1], cw, ch, &[1, 2])?;
            check_plane(2, &frame.planes[2], cw, ch, &[1, 2])?;
        }
        PixelLayout::Rgba8 => check_plane(0, &frame.planes[0], w, h, &[4])?,
    }
    Ok(())
}

fn check_plane(
    index: usize,
    plane: &Plane,
    samples_per_row: usize,
    rows: usize,
    pixel_strides: &[usize],
) -> FrameResult<()> {
    let ps = plane.pixel_stride;
    if !pixel_strides.contains(&ps) {
        return Err(FrameError::PixelStride { index, stride: ps });
    }
    // Last sample of a row ends at (n - 1) * ps + sample width.
    let sample = if ps == 4 { 4 } else { 1 };
    let row_bytes = (samples_per_row - 1) * ps + sample;
    if plane.row_stride < row_bytes {
        return Err(FrameError::StrideMismatch {
            index,
            stride: plane.row_stride,
            row_bytes,
        });
    }
    let needed = (rows - 1) * plane.row_stride + row_bytes;
    if plane.data.len() < needed {
        return Err(FrameError::PlaneTooShort {
            index,
            expected: needed,
            actual: plane.data.len(),
        });
    }
    Ok(())
}

/// BT.601 full-range YUV 4:2:0 conversion; RGBA input is repacked.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bt601Kernel;

impl ColorKernel for Bt601Kernel {
    fn to_rgba(&mut self, frame: &RawFrame, out: &mut [u8]) {
        let (w, h) = (frame.width as usize, frame.height as usize);
        match frame.layout {
            PixelLayout::Yuv420 => {
                let (y, u, v) = (&frame.planes[0], &frame.planes[1], &frame.planes[2]);
                for j in 0..h {
                    let y_row = &y.data[j * y.row_stride..];
                    let u_row = &u.data[(j / 2) * u.row_stride..];
                    let v_row = &v.data[(j / 2) * v.row_stride..];
                    let out_row = &mut out[j * w * 4..(j + 1) * w * 4];
                    for i in 0..w {
                        let luma = y_row[i] as f32;
                        let cb = u_row[(i / 2) * u.pixel_stride] as f32 - 128.0;
                        let cr = v_row[(i / 2) * v.pixel_stride] as f32 - 128.0;
                        let px = &mut out_row[i * 4..i * 4 + 4];
                        px[0] = (luma + 1.402 * cr).clamp(0.0, 255.0) as u8;
                        px[1] = (luma - 0.344_136 * cb - 0.714_136 * cr).clamp(0.0, 255.0) as u8;
                        px[2] = (luma + 1.772 * cb).clamp(0.0, 255.0) as u8;
                        px[3] = 255;
                    }
                }
            }
            PixelLayout::Rgba8 => {
                let plane = &frame.planes[0];
                let row_bytes = w * 4;
                for j in 0..h {
                    let src = &plane.data[j * plane.row_stride..j * plane.row_stride + row_bytes];
                    out[j * row_bytes..(j + 1) * row_bytes].copy_from_slice(src);
                }
            }
        }
    }
}
