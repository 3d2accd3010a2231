//! iris: drives the frame pipeline from the synthetic source.

use std::path::PathBuf;
use std::time::Duration;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use iris::capture::SyntheticSource;
use iris::collab::Collaborators;
use iris::pipeline::{DetectionSet, PerformanceSample, PreviewSink, RgbaBuffer};
use iris::{ConfigHandle, FramePipeline, PipelineWorker, Settings};

/// Writes the first preview it sees to a PNG file.
struct SnapshotSink {
    path: PathBuf,
    written: bool,
}

impl PreviewSink for SnapshotSink {
    fn present(&mut self, preview: &RgbaBuffer, _: &DetectionSet, _: &PerformanceSample) {
        if self.written {
            return;
        }
        self.written = true;
        let Some(image) = preview.to_image() else {
            warn!("preview buffer inconsistent, snapshot skipped");
            return;
        };
        match image.save(&self.path) {
            Ok(()) => info!(path = %self.path.display(), size = %preview.size(), "snapshot written"),
            Err(e) => warn!(path = %self.path.display(), "snapshot failed: {}", e),
        }
    }
}

fn init_tracing(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(filter))?;
    let fmt = tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime());
    let registry = tracing_subscriber::registry().with(filter).with(fmt);
    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());
    registry.try_init().map_err(|e| eyre!(e))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref())
        .wrap_err("failed to load settings")?;
    init_tracing(&settings.logging.filter)?;

    info!("iris starting");
    info!(
        capture = %settings.pipeline.capture_resolution,
        lens = ?settings.pipeline.lens,
        mode = %settings.pipeline.mode,
        "initial configuration"
    );

    let config = ConfigHandle::new(settings.pipeline.clone())?;
    let mut pipeline = FramePipeline::new(
        Collaborators::default(),
        Duration::from_millis(settings.worker.face_timeout_ms),
    );
    if let Some(path) = settings.output.snapshot_path.clone() {
        pipeline = pipeline.with_sink(SnapshotSink {
            path,
            written: false,
        });
    }

    let source = Box::new(SyntheticSource::new(settings.source.clone()));
    let worker = PipelineWorker::spawn(source, pipeline, config.clone(), settings.worker.clone())?;
    let outputs = worker.outputs();

    let mut report = tokio::time::interval(Duration::from_secs(
        settings.output.report_interval_secs.max(1),
    ));
    let deadline = async {
        match settings.output.run_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => {
                info!("run duration elapsed");
                break;
            }
            _ = report.tick() => {
                if !worker.is_running() {
                    error!("frame worker stopped");
                    break;
                }
                let perf = outputs.performance();
                let detections = outputs.visible_detections(config.snapshot().mode);
                info!(
                    fps = perf.fps,
                    latency_ms = perf.last_latency_ms,
                    capture_latency_ms = perf.capture_latency_ms,
                    detector_ready = outputs.detector_ready(),
                    capture = %perf.capture_size_label(),
                    inference = %perf.inference_size_label(),
                    processed = perf.frames_processed,
                    skipped = perf.frames_skipped,
                    dropped = perf.frames_dropped,
                    detections = detections.len(),
                    "pipeline status"
                );
            }
        }
    }

    worker.stop()?;
    info!("iris shutting down");
    Ok(())
}
