//! Built-in preview filters on top of `image` operations.

use image::{imageops, Pixel, Rgba};
use tracing::trace;

use crate::collab::Filter;
use crate::config::{FilterId, Resolution};
use crate::error::CollaboratorError;
use crate::pipeline::buffer::{RgbaBuffer, BYTES_PER_PIXEL};

const BLUR_SIGMA: f32 = 2.6;
const BINARY_THRESHOLD: u8 = 128;
const UNDERWATER_RED_BOOST: u8 = 40;
const DEHAZE_CONTRAST: f32 = 20.0;
/// Half width of the 5x5 morphology window.
const MORPH_RADIUS: usize = 2;

#[derive(Debug, Default)]
pub struct BasicFilters {
    /// Scratch plane reused by the morphology passes.
    scratch: Vec<u8>,
    /// Vignette weights (0..=255), cached per size.
    stage_mask: Vec<u8>,
    stage_size: Option<Resolution>,
}

impl BasicFilters {
    pub fn new() -> Self {
        Self::default()
    }

    fn stage(&mut self, buffer: &mut RgbaBuffer) {
        let size = buffer.size();
        if self.stage_size != Some(size) {
            self.stage_mask = vignette_mask(size);
            self.stage_size = Some(size);
        }
        for (px, &weight) in buffer
            .as_bytes_mut()
            .chunks_exact_mut(BYTES_PER_PIXEL)
            .zip(&self.stage_mask)
        {
            for c in &mut px[..3] {
                *c = ((*c as u16 * weight as u16) / 255) as u8;
            }
        }
    }

    fn morph(&mut self, buffer: &mut RgbaBuffer, close: bool) {
        let (erode, dilate): (fn(u8, u8) -> u8, fn(u8, u8) -> u8) = (u8::min, u8::max);
        if close {
            rank_filter(&mut self.scratch, buffer, dilate);
            rank_filter(&mut self.scratch, buffer, erode);
        } else {
            rank_filter(&mut self.scratch, buffer, erode);
            rank_filter(&mut self.scratch, buffer, dilate);
        }
    }
}

impl Filter for BasicFilters {
    fn apply(&mut self, filter: FilterId, buffer: &mut RgbaBuffer) -> Result<(), CollaboratorError> {
        if buffer.is_empty() {
            return Ok(());
        }
        trace!(%filter, size = %buffer.size(), "applying filter");
        match filter {
            FilterId::Normal => {}
            FilterId::Gray => map_pixels(buffer, |px| {
                let l = luma(px);
                [l, l, l, px[3]]
            }),
            FilterId::Binary => map_pixels(buffer, |px| {
                let v = if luma(px) > BINARY_THRESHOLD { 255 } else { 0 };
                [v, v, v, px[3]]
            }),
            FilterId::Underwater => map_pixels(buffer, |px| {
                [px[0].saturating_add(UNDERWATER_RED_BOOST), px[1], px[2], px[3]]
            }),
            FilterId::Histogram => equalize_luma(buffer),
            FilterId::Stage => self.stage(buffer),
            FilterId::MorphOpen => self.morph(buffer, false),
            FilterId::MorphClose => self.morph(buffer, true),
            FilterId::Blur => {
                let out = imageops::blur(&view(buffer)?, BLUR_SIGMA);
                buffer.as_bytes_mut().copy_from_slice(out.as_raw());
            }
            FilterId::Beauty => {
                let smoothed = imageops::blur(&view(buffer)?, 1.5);
                let out = imageops::unsharpen(&smoothed, 1.0, 2);
                buffer.as_bytes_mut().copy_from_slice(out.as_raw());
            }
            FilterId::Dehaze => {
                let out = imageops::contrast(&view(buffer)?, DEHAZE_CONTRAST);
                buffer.as_bytes_mut().copy_from_slice(out.as_raw());
            }
        }
        Ok(())
    }
}

fn view(buffer: &RgbaBuffer) -> Result<image::ImageBuffer<Rgba<u8>, &[u8]>, CollaboratorError> {
    buffer
        .as_image()
        .ok_or_else(|| CollaboratorError::Failed(format!("buffer {} is inconsistent", buffer.size())))
}

fn luma(px: &[u8]) -> u8 {
    Rgba([px[0], px[1], px[2], px[3]]).to_luma().0[0]
}

fn map_pixels(buffer: &mut RgbaBuffer, f: impl Fn(&[u8]) -> [u8; 4]) {
    for px in buffer.as_bytes_mut().chunks_exact_mut(BYTES_PER_PIXEL) {
        let out = f(px);
        px.copy_from_slice(&out);
    }
}

/// Equalize the luma histogram, shifting RGB by the luma delta so chroma is kept.
fn equalize_luma(buffer: &mut RgbaBuffer) {
    let mut histogram = [0u32; 256];
    for px in buffer.as_bytes().chunks_exact(BYTES_PER_PIXEL) {
        histogram[luma(px) as usize] += 1;
    }
    let total: u32 = histogram.iter().sum();
    let mut cdf = [0u32; 256];
    let mut running = 0;
    for (slot, count) in cdf.iter_mut().zip(histogram) {
        running += count;
        *slot = running;
    }
    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    if total == cdf_min {
        // Flat image
        return;
    }
    let scale = 255.0 / (total - cdf_min) as f32;
    let lut: Vec<i16> = cdf
        .iter()
        .map(|&c| (c.saturating_sub(cdf_min) as f32 * scale).round() as i16)
        .collect();

    map_pixels(buffer, |px| {
        let y = luma(px);
        let delta = lut[y as usize] - y as i16;
        let shift = |c: u8| (c as i16 + delta).clamp(0, 255) as u8;
        [shift(px[0]), shift(px[1]), shift(px[2]), px[3]]
    });
}

/// Soft radial falloff: a disc of radius min(w, h) / 2 with a smoothed edge.
fn vignette_mask(size: Resolution) -> Vec<u8> {
    let (w, h) = (size.width as usize, size.height as usize);
    let radius = w.min(h) as f32 / 2.0;
    let softness = (radius / 2.0).max(1.0);
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let mut mask = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let d = ((x as f32 + 0.5 - cx).powi(2) + (y as f32 + 0.5 - cy).powi(2)).sqrt();
            let weight = 1.0 / (1.0 + (1.7 * (d - radius) / softness).exp());
            mask.push((weight * 255.0).round() as u8);
        }
    }
    mask
}

/// Separable square min/max filter over the colour channels.
fn rank_filter(scratch: &mut Vec<u8>, buffer: &mut RgbaBuffer, pick: fn(u8, u8) -> u8) {
    let (w, h) = (buffer.width() as usize, buffer.height() as usize);
    let stride = buffer.stride();
    scratch.clear();
    scratch.extend_from_slice(buffer.as_bytes());
    let px = buffer.as_bytes_mut();

    for y in 0..h {
        let row = y * stride;
        for x in 0..w {
            let (lo, hi) = (x.saturating_sub(MORPH_RADIUS), (x + MORPH_RADIUS).min(w - 1));
            for c in 0..3 {
                let mut v = scratch[row + lo * BYTES_PER_PIXEL + c];
                for k in lo + 1..=hi {
                    v = pick(v, scratch[row + k * BYTES_PER_PIXEL + c]);
                }
                px[row + x * BYTES_PER_PIXEL + c] = v;
            }
        }
    }

    scratch.copy_from_slice(px);
    for y in 0..h {
        let (lo, hi) = (y.saturating_sub(MORPH_RADIUS), (y + MORPH_RADIUS).min(h - 1));
        for x in 0..w {
            let col = x * BYTES_PER_PIXEL;
            for c in 0..3 {
                let mut v = scratch[lo * stride + col + c];
                for k in lo + 1..=hi {
                    v = pick(v, scratch[k * stride + col + c]);
                }
                px[y * stride + col + c] = v;
            }
        }
    }
}
