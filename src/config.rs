use anyhow::{Context, Result};
use facegate_vision::{pipeline::Thresholds, video::CaptureFormat, ModelPaths};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_CONFIG_PATH").unwrap_or("/usr/local/etc/facegate/config.toml"))
});

pub static MODEL_DIR: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_MODEL_DIR").unwrap_or("/usr/local/share/facegate/models"))
});

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub fps: u32,
    /// Seconds the live check may run before giving up.
    pub timeout_secs: u64,
    /// Consecutive sampled frames with an accepted match needed to pass.
    pub required_matches: u32,
    /// Process one out of every `sample_every` captured frames.
    pub sample_every: u32,
    /// Linear shrink applied to frames before detection.
    pub downscale: u32,
    /// Encoder match flag: distance at or below this counts as the same face.
    pub tolerance: f32,
    /// Stricter bound a match must also stay under to be accepted.
    pub strict_distance: f32,
    pub detection_score: f32,
    pub nms_threshold: f32,
    pub download_timeout_secs: u64,
    pub max_download_bytes: u64,
    /// Reference image extensions, tried in order.
    pub extensions: Vec<String>,
    pub model_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            fps: 30,
            timeout_secs: 15,
            required_matches: 3,
            sample_every: 2,
            downscale: 4,
            // OpenCV's recommended L2 threshold for SFace
            tolerance: 1.128,
            strict_distance: 0.95,
            detection_score: 0.6,
            nms_threshold: 0.3,
            download_timeout_secs: 10,
            max_download_bytes: 16 * 1024 * 1024,
            extensions: ["jpg", "jpeg", "png", "bmp"].map(String::from).to_vec(),
            model_dir: MODEL_DIR.to_path_buf(),
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn models(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            score: self.detection_score,
            nms: self.nms_threshold,
        }
    }

    pub fn capture_format(&self) -> CaptureFormat {
        CaptureFormat {
            width: self.frame_width,
            height: self.frame_height,
            fps: self.fps,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.required_matches == 0 {
            anyhow::bail!("required_matches must be at least 1");
        }
        if self.sample_every == 0 {
            anyhow::bail!("sample_every must be at least 1");
        }
        if self.downscale == 0 {
            anyhow::bail!("downscale must be at least 1");
        }
        if self.strict_distance > self.tolerance {
            anyhow::bail!(
                "strict_distance ({}) must not exceed tolerance ({})",
                self.strict_distance,
                self.tolerance
            );
        }
        if self.extensions.is_empty() {
            anyhow::bail!("at least one reference image extension is required");
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = load_config(Some(Path::new("/nonexistent/facegate.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.timeout(), Duration::from_secs(15));
        assert_eq!(cfg.required_matches, 3);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "camera = \"/dev/video2\"\ntimeout_secs = 5").unwrap();

        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.camera, "/dev/video2");
        assert_eq!(cfg.timeout_secs, 5);
        assert_eq!(cfg.sample_every, 2);
        assert_eq!(cfg.extensions, vec!["jpg", "jpeg", "png", "bmp"]);
    }

    #[test]
    fn test_rejects_loose_strict_distance() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tolerance = 0.5\nstrict_distance = 0.9").unwrap();

        let err = load_config(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("strict_distance"));
    }

    #[test]
    fn test_rejects_zero_streak() {
        let cfg = Config {
            required_matches: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
