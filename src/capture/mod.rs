pub mod convert;
pub mod frame;
pub mod latest;
pub mod source;

pub use convert::{Bt601Kernel, ColorKernel};
pub use frame::{PixelLayout, Plane, RawFrame, Rotation};
pub use latest::{LatestFrameSlot, SlotStats};
pub use source::{FrameSink, FrameSource, Session, SyntheticSource};
