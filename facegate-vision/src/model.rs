use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};
use std::path::{Path, PathBuf};

pub const DETECTOR_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const ENCODER_FILE: &str = "face_recognition_sface_2021dec.onnx";

/// Locations of the YuNet detector and SFace encoder models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub encoder: PathBuf,
}

impl ModelPaths {
    /// Both models under `dir` with their upstream file names.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_FILE),
            encoder: dir.join(ENCODER_FILE),
        }
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(ort::Error::<()>::from)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load(path: &Path, what: &str) -> Result<Session> {
    if !path.exists() {
        anyhow::bail!("{what} model not found at {}", path.display());
    }
    log::debug!("loading {what} model from {}", path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {what} model {}", path.display()))
}

pub fn detector_session(models: &ModelPaths) -> Result<Session> {
    load(&models.detector, "detector")
}

pub fn recog_session(models: &ModelPaths) -> Result<Session> {
    load(&models.encoder, "recognition")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_in_dir() {
        let paths = ModelPaths::in_dir(Path::new("/opt/models"));
        assert_eq!(paths.detector, Path::new("/opt/models").join(DETECTOR_FILE));
        assert_eq!(paths.encoder, Path::new("/opt/models").join(ENCODER_FILE));
    }

    #[test]
    fn test_missing_model_is_reported() {
        let paths = ModelPaths::in_dir(Path::new("/nonexistent/facegate"));
        let err = detector_session(&paths).err().unwrap();
        assert!(err.to_string().contains("detector model not found"));
    }
}
