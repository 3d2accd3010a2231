//! Real-time camera frame pipeline: normalize, fan out, analyse, project.

pub mod capture;
pub mod collab;
pub mod config;
pub mod display;
pub mod error;
pub mod pipeline;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use crate::config::{ConfigHandle, FilterId, LensFacing, Mode, PipelineConfig, Resolution};
pub use crate::error::{ConfigError, FrameError, PipelineError, Result};
pub use crate::pipeline::{FramePipeline, PipelineOutputs, PipelineWorker};

/// Top level settings, read from an optional TOML file and `IRIS__*`
/// environment variables (`IRIS__PIPELINE__MODE=face_detection`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub worker: WorkerConfig,
    pub source: SourceConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> error::ConfigResult<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }
        let settings: Settings = builder
            .add_source(
                ::config::Environment::with_prefix("IRIS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.pipeline.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Longest wait for a face detector answer before the frame is skipped
    pub face_timeout_ms: u64,
    /// How often the worker wakes to check for config changes while idle
    pub idle_poll_ms: u64,
    /// Pin the frame worker to this CPU core
    pub pin_core: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            face_timeout_ms: 500,
            idle_poll_ms: 50,
            pin_core: None,
        }
    }
}

/// Synthetic frame source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub fps: u32,
    /// Clockwise sensor mounting, in degrees
    pub back_rotation: i32,
    pub front_rotation: i32,
    /// Deliver this size regardless of what is requested
    pub sensor_override: Option<Resolution>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            back_rotation: 90,
            front_rotation: 270,
            sensor_override: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Stop after this many seconds; run until interrupted when unset
    pub run_secs: Option<u64>,
    /// Write the first processed preview here as PNG
    pub snapshot_path: Option<PathBuf>,
    /// Seconds between performance log lines
    pub report_interval_secs: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            run_secs: None,
            snapshot_path: None,
            report_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "iris=info".to_string(),
        }
    }
}
