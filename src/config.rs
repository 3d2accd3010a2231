//! Live pipeline configuration.
//!
//! The presentation layer writes through [`ConfigHandle`]; the frame worker
//! takes one snapshot per frame with [`ConfigHandle::snapshot`], so a frame
//! never observes a half-applied change.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collab::labels::COCO_LABELS;
use crate::error::{ConfigError, ConfigResult};

/// Largest capture edge accepted from a resolution string.
pub const MAX_DIMENSION: u32 = 8192;
pub const MIN_INFERENCE_DIMENSION: u32 = 32;
pub const MAX_INFERENCE_DIMENSION: u32 = 4096;

/// Pixel dimensions, written and parsed as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const ZERO: Resolution = Resolution::new(0, 0);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }

    pub fn transposed(self) -> Self {
        Self::new(self.height, self.width)
    }

    /// Width over height; zero for an empty size.
    pub fn aspect(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::ZERO
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::MalformedResolution(s.to_string());
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(malformed)?;
        let width: u32 = w.trim().parse().map_err(|_| malformed())?;
        let height: u32 = h.trim().parse().map_err(|_| malformed())?;
        check_range("capture width", width, 1, MAX_DIMENSION)?;
        check_range("capture height", height, 1, MAX_DIMENSION)?;
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    Back,
    Front,
}

impl LensFacing {
    /// Front-facing capture is shown mirrored to the viewer.
    pub fn mirrors(self) -> bool {
        matches!(self, LensFacing::Front)
    }
}

/// Analysis mode applied to each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Passthrough,
    ObjectDetection,
    FaceDetection,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Passthrough => "passthrough",
            Mode::ObjectDetection => "object_detection",
            Mode::FaceDetection => "face_detection",
        })
    }
}

/// The closed set of preview filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FilterId {
    Normal,
    Beauty,
    Dehaze,
    Underwater,
    Stage,
    Gray,
    Histogram,
    Binary,
    MorphOpen,
    MorphClose,
    Blur,
}

impl FilterId {
    pub const ALL: [FilterId; 11] = [
        FilterId::Normal,
        FilterId::Beauty,
        FilterId::Dehaze,
        FilterId::Underwater,
        FilterId::Stage,
        FilterId::Gray,
        FilterId::Histogram,
        FilterId::Binary,
        FilterId::MorphOpen,
        FilterId::MorphClose,
        FilterId::Blur,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FilterId::Normal => "Normal",
            FilterId::Beauty => "Beauty",
            FilterId::Dehaze => "Dehaze",
            FilterId::Underwater => "Underwater",
            FilterId::Stage => "Stage",
            FilterId::Gray => "Gray",
            FilterId::Histogram => "Histogram",
            FilterId::Binary => "Binary",
            FilterId::MorphOpen => "Morph Open",
            FilterId::MorphClose => "Morph Close",
            FilterId::Blur => "Blur",
        }
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterId::ALL
            .into_iter()
            .find(|id| id.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnknownFilter(s.to_string()))
    }
}

impl TryFrom<String> for FilterId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FilterId> for String {
    fn from(value: FilterId) -> Self {
        value.as_str().to_string()
    }
}

/// Parameters handed to the object detector each frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    pub confidence: f32,
    pub iou: f32,
    /// Class names to keep. Resolved to ids against the detector's label table.
    pub active_classes: BTreeSet<String>,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            iou: 0.45,
            active_classes: COCO_LABELS.iter().map(|label| label.to_string()).collect(),
        }
    }
}

/// Everything the worker reads at the top of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub lens: LensFacing,
    pub capture_resolution: Resolution,
    pub independent_inference_resolution: bool,
    pub inference_width: u32,
    /// Fixed inference height. `None` derives it from the capture aspect ratio.
    pub inference_height: Option<u32>,
    pub mode: Mode,
    pub filter: FilterId,
    pub detector: DetectorParams,
    /// Object detection model handed to the detector when it changes.
    pub model_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lens: LensFacing::Back,
            capture_resolution: Resolution::new(1280, 720),
            independent_inference_resolution: false,
            inference_width: 640,
            inference_height: None,
            mode: Mode::Passthrough,
            filter: FilterId::Normal,
            detector: DetectorParams::default(),
            model_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        check_range("capture width", self.capture_resolution.width, 1, MAX_DIMENSION)?;
        check_range("capture height", self.capture_resolution.height, 1, MAX_DIMENSION)?;
        check_range(
            "inference width",
            self.inference_width,
            MIN_INFERENCE_DIMENSION,
            MAX_INFERENCE_DIMENSION,
        )?;
        if let Some(height) = self.inference_height {
            check_range(
                "inference height",
                height,
                MIN_INFERENCE_DIMENSION,
                MAX_INFERENCE_DIMENSION,
            )?;
        }
        check_unit("detector confidence", self.detector.confidence)?;
        check_unit("detector iou", self.detector.iou)?;
        if self
            .model_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(ConfigError::EmptyModelPath);
        }
        Ok(())
    }

    /// True when moving from `self` to `next` needs the capture session reopened.
    pub fn needs_session_restart(&self, next: &PipelineConfig) -> bool {
        self.lens != next.lens || self.capture_resolution != next.capture_resolution
    }
}

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> ConfigResult<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        })
    }
}

fn check_unit(field: &'static str, value: f32) -> ConfigResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value as f64,
            min: 0.0,
            max: 1.0,
        })
    }
}

/// Shared, atomically swapped pipeline configuration.
///
/// Cloning the handle shares the same underlying configuration.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<PipelineConfig>>,
    generation: Arc<AtomicU64>,
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(PipelineConfig::default())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl ConfigHandle {
    pub fn new(config: PipelineConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Consistent copy of the whole configuration.
    pub fn snapshot(&self) -> Arc<PipelineConfig> {
        self.inner.load_full()
    }

    /// Number of accepted changes since the handle was created.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Apply `mutate` to a copy of the current configuration and publish it if
    /// it validates. On error nothing changes.
    pub fn update<F>(&self, mut mutate: F) -> ConfigResult<Arc<PipelineConfig>>
    where
        F: FnMut(&mut PipelineConfig) -> ConfigResult<()>,
    {
        // `rcu` may retry under contention; the last attempt is the one stored.
        let mut outcome = Ok(self.snapshot());
        self.inner.rcu(|current| {
            let mut next = PipelineConfig::clone(current);
            match mutate(&mut next).and_then(|()| next.validate()) {
                Ok(()) => {
                    let next = Arc::new(next);
                    outcome = Ok(Arc::clone(&next));
                    next
                }
                Err(e) => {
                    outcome = Err(e);
                    Arc::clone(current)
                }
            }
        });
        match outcome {
            Ok(applied) => {
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(generation, ?applied, "pipeline configuration updated");
                Ok(applied)
            }
            Err(e) => {
                info!("rejected configuration change: {}", e);
                Err(e)
            }
        }
    }

    pub fn set_capture_resolution(&self, value: &str) -> ConfigResult<()> {
        let resolution: Resolution = value.parse()?;
        self.update(|c| {
            c.capture_resolution = resolution;
            Ok(())
        })
        .map(drop)
    }

    pub fn set_lens(&self, lens: LensFacing) -> ConfigResult<()> {
        self.update(|c| {
            c.lens = lens;
            Ok(())
        })
        .map(drop)
    }

    pub fn set_mode(&self, mode: Mode) -> ConfigResult<()> {
        self.update(|c| {
            c.mode = mode;
            Ok(())
        })
        .map(drop)
    }

    pub fn set_filter(&self, value: &str) -> ConfigResult<()> {
        let filter: FilterId = value.parse()?;
        self.update(|c| {
            c.filter = filter;
            Ok(())
        })
        .map(drop)
    }

    pub fn set_independent_inference(&self, enabled: bool) -> ConfigResult<()> {
        self.update(|c| {
            c.independent_inference_resolution = enabled;
            Ok(())
        })
        .map(drop)
    }

    pub fn set_inference_size(&self, width: u32, height: Option<u32>) -> ConfigResult<()> {
        self.update(|c| {
            c.inference_width = width;
            c.inference_height = height;
            Ok(())
        })
        .map(drop)
    }

    pub fn set_detector_confidence(&self, confidence: f32) -> ConfigResult<()> {
        self.update(|c| {
            c.detector.confidence = confidence;
            Ok(())
        })
        .map(drop)
    }

    pub fn set_detector_iou(&self, iou: f32) -> ConfigResult<()> {
        self.update(|c| {
            c.detector.iou = iou;
            Ok(())
        })
        .map(drop)
    }

    /// Point the detector at a new model. `None` keeps whatever is loaded.
    pub fn set_model_path(&self, path: Option<PathBuf>) -> ConfigResult<()> {
        self.update(|c| {
            c.model_path = path.clone();
            Ok(())
        })
        .map(drop)
    }

    /// Flip membership of `class` in the active class set.
    pub fn toggle_class(&self, class: &str) -> ConfigResult<()> {
        self.update(|c| {
            if !c.detector.active_classes.remove(class) {
                c.detector.active_classes.insert(class.to_string());
            }
            Ok(())
        })
        .map(drop)
    }

    pub fn set_active_classes<I, S>(&self, classes: I) -> ConfigResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let classes: BTreeSet<String> = classes.into_iter().map(Into::into).collect();
        self.update(|c| {
            c.detector.active_classes = classes.clone();
            Ok(())
        })
        .map(drop)
    }
}
