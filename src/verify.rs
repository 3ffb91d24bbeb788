//! Live verification loop.
//!
//! Frames are pulled from a [`FrameSource`] until one of three things
//! happens: the match streak reaches the required length, the deadline
//! passes, or the source fails.

use std::time::{Duration, Instant};

use image::{DynamicImage, RgbImage};
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::frame::downscale;
use crate::matcher::{self, Comparison, MatchPolicy};
use crate::{Embedding, FaceEngine, FrameSource, Strategy};

/// Time source for the deadline check.
pub trait Clock {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub timeout: Duration,
    pub required_matches: u32,
    pub sample_every: u32,
    pub downscale: u32,
    pub policy: MatchPolicy,
}

impl LoopSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            timeout: cfg.timeout(),
            required_matches: cfg.required_matches.max(1),
            sample_every: cfg.sample_every.max(1),
            downscale: cfg.downscale.max(1),
            policy: MatchPolicy::from_config(cfg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakState {
    Sampling(u32),
    Succeeded,
}

/// Consecutive sampled frames with an accepted match.
#[derive(Debug)]
pub struct Streak {
    count: u32,
    required: u32,
}

impl Streak {
    pub fn new(required: u32) -> Self {
        Self {
            count: 0,
            required: required.max(1),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn record(&mut self, accepted: bool) -> StreakState {
        if accepted {
            self.count += 1;
        } else {
            self.count = 0;
        }
        if self.count >= self.required {
            StreakState::Succeeded
        } else {
            StreakState::Sampling(self.count)
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Verified { frames: u64, confidence: f32 },
    TimedOut { frames: u64 },
    CameraLost(anyhow::Error),
}

pub fn verify<S, E, C>(
    reference: &Embedding,
    frames: &mut S,
    engine: &mut E,
    clock: &C,
    settings: &LoopSettings,
) -> Outcome
where
    S: FrameSource,
    E: FaceEngine,
    C: Clock,
{
    let start = clock.now();
    let mut streak = Streak::new(settings.required_matches);
    let sample_every = u64::from(settings.sample_every.max(1));
    let mut captured: u64 = 0;

    loop {
        let frame = match frames.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Could not read frame from camera: {:#}", e);
                return Outcome::CameraLost(e);
            }
        };
        captured += 1;

        if clock.now().saturating_duration_since(start) > settings.timeout {
            info!("Verification timeout ({}s)", settings.timeout.as_secs());
            return Outcome::TimedOut { frames: captured };
        }

        if (captured - 1) % sample_every != 0 {
            continue;
        }

        let best = sample(reference, &frame, engine, settings);
        let accepted = best.filter(|c| c.accepted);
        match streak.record(accepted.is_some()) {
            StreakState::Succeeded => {
                let confidence = accepted.map(|c| c.confidence()).unwrap_or_default();
                info!(
                    "Face match found! Confidence: {}% (Match {}/{})",
                    confidence,
                    streak.count(),
                    settings.required_matches
                );
                return Outcome::Verified {
                    frames: captured,
                    confidence,
                };
            }
            StreakState::Sampling(n) => match accepted {
                Some(c) => info!(
                    "Face match found! Confidence: {}% (Match {}/{})",
                    c.confidence(),
                    n,
                    settings.required_matches
                ),
                None => debug!("frame {}: no accepted match, streak reset", captured),
            },
        }
    }
}

/// Best comparison in one frame. Engine failures count as "no face".
fn sample<E: FaceEngine>(
    reference: &Embedding,
    frame: &RgbImage,
    engine: &mut E,
    settings: &LoopSettings,
) -> Option<Comparison> {
    let small = DynamicImage::ImageRgb8(downscale(frame, settings.downscale));
    let candidates = match engine.encode_all(&small, Strategy::Fast) {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!("Skipping frame: {:#}", e);
            return None;
        }
    };

    let best = matcher::best_match(&settings.policy, reference, &candidates);
    if let Some(c) = &best {
        debug!(
            "{} face(s), closest distance {:.3} (tolerance {}, strict {})",
            candidates.len(),
            c.distance,
            settings.policy.tolerance,
            settings.policy.strict_distance
        );
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streak_reaches_threshold() {
        let mut streak = Streak::new(3);
        assert_eq!(streak.record(true), StreakState::Sampling(1));
        assert_eq!(streak.record(true), StreakState::Sampling(2));
        assert_eq!(streak.record(true), StreakState::Succeeded);
    }

    #[test]
    fn test_streak_resets_on_miss() {
        let mut streak = Streak::new(3);
        streak.record(true);
        streak.record(true);
        assert_eq!(streak.record(false), StreakState::Sampling(0));
        assert_eq!(streak.count(), 0);
        assert_eq!(streak.record(true), StreakState::Sampling(1));
    }

    #[test]
    fn test_single_match_requirement() {
        let mut streak = Streak::new(1);
        assert_eq!(streak.record(false), StreakState::Sampling(0));
        assert_eq!(streak.record(true), StreakState::Succeeded);
    }

    #[test]
    fn test_settings_clamp_zero_values() {
        let cfg = Config {
            sample_every: 0,
            downscale: 0,
            ..Config::default()
        };
        let settings = LoopSettings::from_config(&cfg);
        assert_eq!(settings.sample_every, 1);
        assert_eq!(settings.downscale, 1);
        assert_eq!(settings.required_matches, 3);
    }
}
