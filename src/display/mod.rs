pub mod project;

pub use project::{project, project_set, ContainerSize, DisplayRect, Letterbox, Rect};
