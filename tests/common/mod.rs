#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result;
use facegate::app::Backend;
use facegate::config::Config;
use facegate::fetch::Fetch;
use facegate::verify::Clock;
use facegate::{Detection, Embedding, FaceEngine, FrameSource, Strategy, VerifyError};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};

/// What the fakes saw during a run.
#[derive(Debug, Default)]
pub struct Trace {
    pub engines: u32,
    pub strategies: Vec<Strategy>,
    pub encodes: u32,
    pub fetched: Vec<String>,
    pub cameras: u32,
    pub frames_read: u32,
}

pub type Shared = Rc<RefCell<Trace>>;

/// A frame with one face whose encoding sits at `angle` degrees.
/// Angle 0 is the reference; a few degrees away still matches.
pub fn face(angle: u8) -> RgbImage {
    RgbImage::from_pixel(16, 16, Rgb([angle, 255, 0]))
}

pub fn no_face() -> RgbImage {
    RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]))
}

pub fn png(img: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn encoding_at(degrees: f32) -> Embedding {
    let (sin, cos) = degrees.to_radians().sin_cos();
    Embedding::from_raw(vec![cos, sin])
}

/// Reads the fake face out of the image colour. Green marks a face, red
/// carries the encoding angle.
pub struct FakeEngine {
    pub trace: Shared,
    /// Only the thorough strategy can see faces.
    pub thorough_only: bool,
    /// Report this many copies of each face.
    pub faces_per_image: usize,
}

impl FakeEngine {
    pub fn new(trace: Shared) -> Self {
        Self {
            trace,
            thorough_only: false,
            faces_per_image: 1,
        }
    }
}

impl FaceEngine for FakeEngine {
    fn locate(&mut self, img: &DynamicImage, strategy: Strategy) -> Result<Vec<Detection>> {
        self.trace.borrow_mut().strategies.push(strategy);
        if self.thorough_only && strategy == Strategy::Fast {
            return Ok(Vec::new());
        }

        let (w, h) = img.dimensions();
        let px = img.get_pixel(w / 2, h / 2);
        if px[1] < 128 {
            return Ok(Vec::new());
        }

        let mut landmarks = [0.0; 10];
        landmarks[0] = px[0] as f32;
        let face = Detection {
            bbox: [0.0, 0.0, w as f32, h as f32],
            score: 0.9,
            landmarks,
        };
        Ok(vec![face; self.faces_per_image])
    }

    fn encode(&mut self, _img: &DynamicImage, face: &Detection) -> Result<Embedding> {
        self.trace.borrow_mut().encodes += 1;
        Ok(encoding_at(face.landmarks[0]))
    }
}

pub struct ScriptedFrames {
    pub trace: Shared,
    pub frames: VecDeque<RgbImage>,
}

impl FrameSource for ScriptedFrames {
    fn next_frame(&mut self) -> Result<RgbImage> {
        self.trace.borrow_mut().frames_read += 1;
        self.frames
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("device disconnected"))
    }
}

/// Advances by `step` every time it is read.
pub struct StepClock {
    base: Instant,
    ticks: Cell<u32>,
    step: Duration,
}

impl StepClock {
    pub fn new(step: Duration) -> Self {
        Self {
            base: Instant::now(),
            ticks: Cell::new(0),
            step,
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> Instant {
        self.ticks.set(self.ticks.get() + 1);
        self.base + self.step * self.ticks.get()
    }
}

pub struct FakeFetcher {
    pub trace: Shared,
    pub body: Option<Vec<u8>>,
}

impl Fetch for FakeFetcher {
    fn fetch(&self, url: &str) -> facegate::Result<Vec<u8>> {
        self.trace.borrow_mut().fetched.push(url.to_string());
        self.body
            .clone()
            .ok_or_else(|| VerifyError::DownloadFailure {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            })
    }
}

pub struct FakeBackend {
    pub trace: Shared,
    pub engine_fails: bool,
    pub thorough_only: bool,
    pub download: Option<Vec<u8>>,
    pub camera_fails: bool,
    pub frames: Vec<RgbImage>,
    pub step: Duration,
}

impl FakeBackend {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            trace: Shared::default(),
            engine_fails: false,
            thorough_only: false,
            download: None,
            camera_fails: false,
            frames,
            step: Duration::from_millis(100),
        }
    }
}

impl Backend for FakeBackend {
    type Engine = FakeEngine;
    type Fetcher = FakeFetcher;
    type Frames = ScriptedFrames;
    type Clock = StepClock;

    fn engine(&mut self, _cfg: &Config) -> Result<FakeEngine> {
        self.trace.borrow_mut().engines += 1;
        if self.engine_fails {
            anyhow::bail!("detector model not found");
        }
        let mut engine = FakeEngine::new(self.trace.clone());
        engine.thorough_only = self.thorough_only;
        Ok(engine)
    }

    fn fetcher(&mut self, _cfg: &Config) -> FakeFetcher {
        FakeFetcher {
            trace: self.trace.clone(),
            body: self.download.clone(),
        }
    }

    fn open_camera(&mut self, _cfg: &Config) -> Result<ScriptedFrames> {
        self.trace.borrow_mut().cameras += 1;
        if self.camera_fails {
            anyhow::bail!("no such device");
        }
        Ok(ScriptedFrames {
            trace: self.trace.clone(),
            frames: std::mem::take(&mut self.frames).into(),
        })
    }

    fn clock(&mut self) -> StepClock {
        StepClock::new(self.step)
    }
}

/// A config file for tests; the handle must outlive the run.
pub fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// Directory holding `<token>.png` with the given image.
pub fn reference_dir(token: &str, img: &RgbImage) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    img.save(dir.path().join(format!("{token}.png"))).unwrap();
    dir
}
