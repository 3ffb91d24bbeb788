pub mod face;
pub mod frame;
pub mod model;
pub mod pipeline;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use face::{Detection, Embedding};
pub use frame::FrameSource;
pub use model::ModelPaths;
pub use pipeline::{FaceEngine, Pipeline, Strategy};
pub use video::Camera;
