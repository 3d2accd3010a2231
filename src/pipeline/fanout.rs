//! Resolution Fan-out: one canonical frame -> preview and inference buffers.
//!
//! Both derived buffers keep the canonical frame's aspect ratio. Sizes come
//! from the configured width and the *captured* aspect ratio, never from the
//! nominal requested height, so a sensor that delivers a different ratio than
//! requested never produces a stretched preview.

use tracing::{debug, info};

use crate::config::{PipelineConfig, Resolution};
use crate::error::StageResult;
use crate::pipeline::buffer::{BufferScaler, RgbaBuffer};

/// Height matching `width` at the aspect ratio of `reference`.
fn height_for_width(width: u32, reference: Resolution) -> u32 {
    let height = (width as f64 * reference.height as f64 / reference.width as f64).round();
    (height as u32).max(1)
}

/// Preview dimensions for `canonical` given the configured capture target.
///
/// The target is requested in sensor orientation, so it is transposed when its
/// orientation disagrees with the upright canonical frame.
pub fn preview_size(canonical: Resolution, target: Resolution) -> Resolution {
    if canonical.is_empty() || target.is_empty() {
        return Resolution::ZERO;
    }
    let target = if canonical.is_portrait() != target.is_portrait() {
        target.transposed()
    } else {
        target
    };
    if canonical == target {
        return canonical;
    }
    Resolution::new(target.width, height_for_width(target.width, canonical))
}

/// Dimensions of an independently sized inference buffer.
///
/// With only a width configured the height follows the canonical aspect
/// ratio. A fixed height (square detector input) is used as given.
pub fn inference_size(canonical: Resolution, width: u32, fixed_height: Option<u32>) -> Resolution {
    if canonical.is_empty() {
        return Resolution::ZERO;
    }
    match fixed_height {
        Some(height) => Resolution::new(width, height),
        None => Resolution::new(width, height_for_width(width, canonical)),
    }
}

/// Sizes produced by one fan-out pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutSizes {
    pub preview: Resolution,
    pub inference: Resolution,
    pub shared: bool,
}

/// Owns the preview and inference buffers across frames.
pub struct ResolutionFanOut {
    preview: RgbaBuffer,
    inference: RgbaBuffer,
    preview_scaler: BufferScaler,
    inference_scaler: BufferScaler,
    shared: bool,
}

impl Default for ResolutionFanOut {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionFanOut {
    pub fn new() -> Self {
        Self {
            preview: RgbaBuffer::new(),
            inference: RgbaBuffer::new(),
            preview_scaler: BufferScaler::new(),
            inference_scaler: BufferScaler::new(),
            shared: true,
        }
    }

    pub fn fan_out(
        &mut self,
        canonical: &RgbaBuffer,
        config: &PipelineConfig,
    ) -> StageResult<FanOutSizes> {
        let source = canonical.size();

        let preview_target = preview_size(source, config.capture_resolution);
        if self.preview.ensure(preview_target)? {
            info!(
                canonical = %source,
                preview = %preview_target,
                requested = %config.capture_resolution,
                "preview buffer sized"
            );
        }
        if preview_target == source {
            self.preview.copy_from(canonical)?;
        } else {
            self.preview_scaler.scale(canonical, &mut self.preview)?;
        }

        if config.independent_inference_resolution {
            let target = inference_size(source, config.inference_width, config.inference_height);
            if self.inference.ensure(target)? {
                info!(canonical = %source, inference = %target, "inference buffer sized");
            }
            self.inference_scaler.scale(canonical, &mut self.inference)?;
            self.shared = false;
        } else if !self.shared {
            debug!("inference buffer now shares the preview");
            self.inference.release();
            self.shared = true;
        }

        Ok(self.sizes())
    }

    pub fn sizes(&self) -> FanOutSizes {
        FanOutSizes {
            preview: self.preview.size(),
            inference: self.inference().size(),
            shared: self.shared,
        }
    }

    pub fn preview(&self) -> &RgbaBuffer {
        &self.preview
    }

    pub fn preview_mut(&mut self) -> &mut RgbaBuffer {
        &mut self.preview
    }

    /// The buffer analysis runs on. Aliases the preview when sizing is shared.
    pub fn inference(&self) -> &RgbaBuffer {
        if self.shared {
            &self.preview
        } else {
            &self.inference
        }
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn release(&mut self) {
        self.preview.release();
        self.inference.release();
        self.shared = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_copies_when_sizes_match() {
        let canonical = Resolution::new(1280, 720);
        assert_eq!(preview_size(canonical, Resolution::new(1280, 720)), canonical);
    }

    #[test]
    fn preview_height_follows_captured_aspect() {
        // Asked for 4:3 but the sensor delivered 16:9.
        let canonical = Resolution::new(1920, 1080);
        assert_eq!(
            preview_size(canonical, Resolution::new(640, 480)),
            Resolution::new(640, 360)
        );
    }

    #[test]
    fn preview_target_follows_upright_orientation() {
        // 1280x720 sensor mounted at 90 degrees.
        let canonical = Resolution::new(720, 1280);
        assert_eq!(preview_size(canonical, Resolution::new(1280, 720)), canonical);
        assert_eq!(
            preview_size(canonical, Resolution::new(640, 480)),
            Resolution::new(480, 853)
        );
    }

    #[test]
    fn inference_derives_or_fixes_height() {
        let canonical = Resolution::new(1920, 1080);
        assert_eq!(inference_size(canonical, 640, None), Resolution::new(640, 360));
        assert_eq!(inference_size(canonical, 640, Some(640)), Resolution::new(640, 640));
    }

    #[test]
    fn empty_canonical_gives_empty_sizes() {
        assert_eq!(preview_size(Resolution::ZERO, Resolution::new(640, 480)), Resolution::ZERO);
        assert_eq!(inference_size(Resolution::ZERO, 640, None), Resolution::ZERO);
    }
}
