pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod matcher;
pub mod reference;
pub mod verify;

pub use error::{Result, VerifyError};

// Re-export vision types for convenience
pub use facegate_vision::{
    face, frame, pipeline, video, Detection, Embedding, FaceEngine, FrameSource, Pipeline,
    Strategy,
};
