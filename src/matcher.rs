use crate::{config::Config, Embedding};

/// The two-part acceptance rule for a candidate face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    pub tolerance: f32,
    pub strict_distance: f32,
}

impl MatchPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            tolerance: cfg.tolerance,
            strict_distance: cfg.strict_distance,
        }
    }

    pub fn compare(&self, reference: &Embedding, candidate: &Embedding) -> Comparison {
        let distance = reference.distance(candidate);
        Comparison {
            distance,
            within_tolerance: distance <= self.tolerance,
            accepted: distance <= self.tolerance && distance < self.strict_distance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub distance: f32,
    /// The encoder-level "same face" flag.
    pub within_tolerance: bool,
    /// Flag set and distance under the strict bound.
    pub accepted: bool,
}

impl Comparison {
    /// Percentage shown to the operator; 100 for identical encodings.
    pub fn confidence(&self) -> f32 {
        let pct = (1.0 - self.distance / 2.0).clamp(0.0, 1.0) * 100.0;
        (pct * 10.0).round() / 10.0
    }
}

/// Closest comparison among `candidates`, if any.
pub fn best_match(
    policy: &MatchPolicy,
    reference: &Embedding,
    candidates: &[Embedding],
) -> Option<Comparison> {
    candidates
        .iter()
        .map(|c| policy.compare(reference, c))
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
}
