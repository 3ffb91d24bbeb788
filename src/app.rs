use std::ffi::OsString;

use facegate_vision::video::Camera;
use log::{error, info};

use crate::cli::{self, Cli};
use crate::config::{self, Config};
use crate::error::{Result, VerifyError, EXIT_VERIFIED};
use crate::fetch::{Fetch, HttpFetcher};
use crate::reference::{self, ReferenceSource};
use crate::verify::{self, Clock, LoopSettings, Outcome, SystemClock};
use crate::{FaceEngine, FrameSource, Pipeline};

/// Everything a run needs from the outside world.
pub trait Backend {
    type Engine: FaceEngine;
    type Fetcher: Fetch;
    type Frames: FrameSource;
    type Clock: Clock;

    fn engine(&mut self, cfg: &Config) -> anyhow::Result<Self::Engine>;
    fn fetcher(&mut self, cfg: &Config) -> Self::Fetcher;
    fn open_camera(&mut self, cfg: &Config) -> anyhow::Result<Self::Frames>;
    fn clock(&mut self) -> Self::Clock;
}

/// ONNX models, HTTP and a V4L2 camera.
pub struct Hardware;

impl Backend for Hardware {
    type Engine = Pipeline;
    type Fetcher = HttpFetcher;
    type Frames = Camera;
    type Clock = SystemClock;

    fn engine(&mut self, cfg: &Config) -> anyhow::Result<Pipeline> {
        Pipeline::new(&cfg.models(), cfg.thresholds())
    }

    fn fetcher(&mut self, cfg: &Config) -> HttpFetcher {
        HttpFetcher::new(cfg.download_timeout(), cfg.max_download_bytes)
    }

    fn open_camera(&mut self, cfg: &Config) -> anyhow::Result<Camera> {
        Camera::open(&cfg.camera, cfg.capture_format())
    }

    fn clock(&mut self) -> SystemClock {
        SystemClock
    }
}

/// Run against real hardware and return the process exit code.
pub fn run<I, T>(args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    run_with(args, &mut Hardware)
}

pub fn run_with<B, I, T>(args: I, backend: &mut B) -> u8
where
    B: Backend,
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match cli::parse(args) {
        Ok(cli) => cli,
        Err(e) => {
            error!("{}", e);
            return e.exit_code();
        }
    };

    info!("Starting face verification for {}", cli.token);
    match verify_identity(&cli, backend) {
        Ok(confidence) => {
            info!(
                "✓ Face verification SUCCESSFUL for {} (confidence {}%)",
                cli.token, confidence
            );
            EXIT_VERIFIED
        }
        Err(e) => {
            error!("{}", e);
            info!("✗ Face verification FAILED for {}", cli.token);
            e.exit_code()
        }
    }
}

/// Config file plus command-line overrides.
pub fn load_settings(cli: &Cli) -> Result<Config> {
    let mut cfg = config::load_config(cli.config.as_deref()).map_err(VerifyError::Config)?;
    if let Some(secs) = cli.timeout {
        cfg.timeout_secs = secs;
    }
    if let Some(camera) = &cli.camera {
        cfg.camera = camera.clone();
    }
    Ok(cfg)
}

fn verify_identity<B: Backend>(cli: &Cli, backend: &mut B) -> Result<f32> {
    let cfg = load_settings(cli)?;
    let source = ReferenceSource::parse(&cli.source);

    let mut engine = backend.engine(&cfg).map_err(VerifyError::Engine)?;
    let fetcher = backend.fetcher(&cfg);
    let reference = reference::acquire(&source, &cli.token, &mut engine, &fetcher, &cfg)?;

    info!("Opening camera: {}", cfg.camera);
    let mut camera = backend
        .open_camera(&cfg)
        .map_err(VerifyError::CameraUnavailable)?;

    let settings = LoopSettings::from_config(&cfg);
    info!(
        "Camera ready, timeout {}s. Please look at the camera...",
        settings.timeout.as_secs()
    );

    let clock = backend.clock();
    match verify::verify(&reference, &mut camera, &mut engine, &clock, &settings) {
        Outcome::Verified { confidence, .. } => Ok(confidence),
        Outcome::TimedOut { .. } => Err(VerifyError::NotVerified(cfg.timeout_secs)),
        Outcome::CameraLost(e) => Err(VerifyError::CameraReadFailure(e)),
    }
}
