//! Long-lived RGBA buffers reused across frames.

use fast_image_resize as fr;
use image::{ImageBuffer, Rgba, RgbaImage};
use tracing::debug;

use crate::config::Resolution;
use crate::error::{FrameError, FrameResult, PipelineError, Result};

pub const BYTES_PER_PIXEL: usize = 4;

/// Interleaved RGBA8 buffer that tracks its own dimensions.
///
/// [`RgbaBuffer::ensure`] only touches the allocation when the requested size
/// needs more capacity than the buffer already has.
#[derive(Debug, Default, Clone)]
pub struct RgbaBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
    reallocations: u64,
}

impl RgbaBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(size: Resolution) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.ensure(size)?;
        Ok(buffer)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.size().is_empty()
    }

    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// How many times the backing storage grew.
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Size the buffer to `size`. Returns whether the dimensions changed.
    pub fn ensure(&mut self, size: Resolution) -> Result<bool> {
        if size == self.size() {
            return Ok(false);
        }
        let len = size.pixels() * BYTES_PER_PIXEL;
        if len > self.data.capacity() {
            self.data
                .try_reserve_exact(len - self.data.len())
                .map_err(|_| PipelineError::ResourceExhausted {
                    width: size.width,
                    height: size.height,
                })?;
            self.reallocations += 1;
        }
        self.data.resize(len, 0);
        debug!(
            from = %self.size(),
            to = %size,
            "rgba buffer resized"
        );
        self.width = size.width;
        self.height = size.height;
        Ok(true)
    }

    /// Drop the backing storage.
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.width = 0;
        self.height = 0;
    }

    pub fn copy_from(&mut self, other: &RgbaBuffer) -> Result<()> {
        self.ensure(other.size())?;
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = y as usize * self.stride() + x as usize * BYTES_PER_PIXEL;
        let px = self.data.get(at..at + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Mirror the buffer left to right in place.
    pub fn flip_horizontal(&mut self) {
        let stride = self.stride();
        if stride == 0 {
            return;
        }
        for row in self.data.chunks_exact_mut(stride) {
            let (mut left, mut right) = (0, self.width as usize - 1);
            while left < right {
                for c in 0..BYTES_PER_PIXEL {
                    row.swap(left * BYTES_PER_PIXEL + c, right * BYTES_PER_PIXEL + c);
                }
                left += 1;
                right -= 1;
            }
        }
    }

    pub fn as_image(&self) -> Option<ImageBuffer<Rgba<u8>, &[u8]>> {
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
    }

    /// Owned copy for encoding or hand-off.
    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }
}

/// Scales one RGBA buffer into another that is already sized.
pub struct BufferScaler {
    resizer: fr::Resizer,
    options: fr::ResizeOptions,
}

impl Default for BufferScaler {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferScaler {
    pub fn new() -> Self {
        Self {
            resizer: fr::Resizer::new(),
            options: fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        }
    }

    /// Resample `src` to the current size of `dst`.
    pub fn scale(&mut self, src: &RgbaBuffer, dst: &mut RgbaBuffer) -> FrameResult<()> {
        if src.size() == dst.size() {
            dst.data.copy_from_slice(&src.data);
            return Ok(());
        }
        let (dst_w, dst_h) = (dst.width, dst.height);
        let src_image = fr::images::ImageRef::new(src.width, src.height, &src.data, fr::PixelType::U8x4)
            .map_err(|e| FrameError::Resize(e.to_string()))?;
        let mut dst_image =
            fr::images::Image::from_slice_u8(dst_w, dst_h, dst.as_bytes_mut(), fr::PixelType::U8x4)
                .map_err(|e| FrameError::Resize(e.to_string()))?;
        self.resizer
            .resize(&src_image, &mut dst_image, Some(&self.options))
            .map_err(|e| FrameError::Resize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_reuses_storage_for_same_or_smaller_sizes() {
        let mut buf = RgbaBuffer::new();
        assert!(buf.ensure(Resolution::new(64, 48)).unwrap());
        assert_eq!(buf.reallocations(), 1);
        assert!(!buf.ensure(Resolution::new(64, 48)).unwrap());
        assert!(buf.ensure(Resolution::new(32, 24)).unwrap());
        assert!(buf.ensure(Resolution::new(64, 48)).unwrap());
        assert_eq!(buf.reallocations(), 1);
        assert_eq!(buf.as_bytes().len(), 64 * 48 * 4);
    }

    #[test]
    fn release_frees_storage() {
        let mut buf = RgbaBuffer::with_size(Resolution::new(8, 8)).unwrap();
        buf.release();
        assert!(buf.is_empty());
        assert!(buf.as_bytes().is_empty());
    }

    #[test]
    fn flips_rows() {
        let mut buf = RgbaBuffer::with_size(Resolution::new(3, 1)).unwrap();
        buf.as_bytes_mut()
            .copy_from_slice(&[1, 1, 1, 255, 2, 2, 2, 255, 3, 3, 3, 255]);
        buf.flip_horizontal();
        assert_eq!(buf.pixel(0, 0), Some([3, 3, 3, 255]));
        assert_eq!(buf.pixel(1, 0), Some([2, 2, 2, 255]));
        assert_eq!(buf.pixel(2, 0), Some([1, 1, 1, 255]));
    }

    #[test]
    fn scales_solid_color() {
        let mut src = RgbaBuffer::with_size(Resolution::new(64, 36)).unwrap();
        src.fill([200, 100, 50, 255]);
        let mut dst = RgbaBuffer::with_size(Resolution::new(16, 9)).unwrap();
        BufferScaler::new().scale(&src, &mut dst).unwrap();
        assert_eq!(dst.pixel(8, 4), Some([200, 100, 50, 255]));
    }
}
