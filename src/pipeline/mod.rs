pub mod buffer;
pub mod detection;
pub mod dispatch;
pub mod fanout;
pub mod metrics;
pub mod normalize;
pub mod worker;

pub use buffer::{BufferScaler, RgbaBuffer};
pub use detection::{BoundingBox, Detection, DetectionKind, DetectionSet, PixelBox};
pub use dispatch::{ModeDispatcher, ModeState};
pub use fanout::{FanOutSizes, ResolutionFanOut};
pub use metrics::{MetricsTracker, PerformanceSample};
pub use normalize::FrameNormalizer;
pub use worker::{
    DiscardPreview, FrameOutcome, FramePipeline, FrameReport, PipelineOutputs, PipelineWorker,
    PreviewSink,
};
