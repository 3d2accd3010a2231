//! Error taxonomy for the frame pipeline.
//!
//! Per-frame failures ([`FrameError`]) are recovered inside the pipeline and
//! never reach the caller as `Err`. Configuration and session level failures
//! ([`ConfigError`], [`PipelineError`]) propagate.

use std::time::Duration;

use thiserror::Error;

/// A rejected configuration change. The previous configuration stays in effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed resolution '{0}', expected WIDTHxHEIGHT")]
    MalformedResolution(String),
    #[error("{field} out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("unknown filter '{0}'")]
    UnknownFilter(String),
    #[error("model path is empty")]
    EmptyModelPath,
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

/// Errors reported by an external collaborator (filter, detector, face engine).
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("engine not ready")]
    NotReady,
    #[error("collaborator failed: {0}")]
    Failed(String),
    #[error("collaborator dropped the request")]
    Disconnected,
    #[error("no answer within {0:?}")]
    TimedOut(Duration),
}

/// Transient, per-frame error. The frame is skipped and the last good preview
/// and detection state are kept.
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    #[error("plane {index} is empty")]
    EmptyPlane { index: usize },
    #[error("frame has {actual} planes, layout needs {expected}")]
    PlaneCount { expected: usize, actual: usize },
    #[error("plane {index}: row stride {stride} too small for {row_bytes} bytes per row")]
    StrideMismatch {
        index: usize,
        stride: usize,
        row_bytes: usize,
    },
    #[error("plane {index}: pixel stride {stride} unsupported")]
    PixelStride { index: usize, stride: usize },
    #[error("plane {index} holds {actual} bytes, needs at least {expected}")]
    PlaneTooShort {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("frame has zero dimension {width}x{height}")]
    ZeroSized { width: u32, height: u32 },
    #[error("resize failed: {0}")]
    Resize(String),
    #[error("face detector did not answer within {0:?}")]
    FaceTimeout(Duration),
}

/// Session level error. The caller is expected to close the session.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not allocate a {width}x{height} RGBA buffer")]
    ResourceExhausted { width: u32, height: u32 },
    #[error("frame source session failed: {0}")]
    Session(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Outcome of a single pipeline stage: either skip this frame or end the session.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Skip(#[from] FrameError),
    #[error(transparent)]
    Fatal(#[from] PipelineError),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type FrameResult<T> = std::result::Result<T, FrameError>;
pub type StageResult<T> = std::result::Result<T, StageError>;
pub type Result<T> = std::result::Result<T, PipelineError>;
