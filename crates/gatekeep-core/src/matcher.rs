//! Nearest-identity search over the registry's enrolled descriptors.

use crate::registry::RegistrySnapshot;
use crate::types::{Subject, DESCRIPTOR_DIM};
use thiserror::Error;

/// Default maximum acceptable Euclidean distance for a positive match.
pub const DEFAULT_MAX_DISTANCE: f32 = 0.5;

/// Distances closer than this are treated as equal for tie-breaking.
const TIE_EPSILON: f32 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("invalid descriptor: expected {expected} dimensions, got {actual}")]
    InvalidDescriptor { expected: usize, actual: usize },
    #[error("descriptor contains non-finite values")]
    NonFinite,
}

/// Result of matching one probe descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// The accepted identity, `None` if nothing is within the threshold.
    pub subject: Option<Subject>,
    /// Distance to the closest enrolled descriptor (`INFINITY` on an empty gallery).
    pub distance: f32,
    /// `max(0, 1 - distance / max_distance) * 100`.
    pub confidence: f32,
}

impl MatchResult {
    fn none(distance: f32, confidence: f32) -> Self {
        Self {
            subject: None,
            distance,
            confidence,
        }
    }

    /// Confidence rounded to an integer percentage.
    pub fn confidence_pct(&self) -> u8 {
        self.confidence.round().clamp(0.0, 100.0) as u8
    }
}

/// Strategy for comparing a probe against the enrolled gallery.
pub trait Matcher {
    fn find_closest(&self, probe: &[f32], gallery: &RegistrySnapshot) -> Result<MatchResult, MatchError>;
}

/// Euclidean-distance matcher with a fixed acceptance threshold.
///
/// Traverses every gallery entry. Equidistant candidates resolve to the
/// lowest [`Subject`] so results are reproducible.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub max_distance: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(max_distance: f32) -> Self {
        Self { max_distance }
    }

    pub fn confidence(&self, distance: f32) -> f32 {
        (1.0 - distance / self.max_distance).max(0.0) * 100.0
    }
}

impl Matcher for EuclideanMatcher {
    fn find_closest(&self, probe: &[f32], gallery: &RegistrySnapshot) -> Result<MatchResult, MatchError> {
        if probe.len() != DESCRIPTOR_DIM {
            return Err(MatchError::InvalidDescriptor {
                expected: DESCRIPTOR_DIM,
                actual: probe.len(),
            });
        }
        if probe.iter().any(|v| !v.is_finite()) {
            return Err(MatchError::NonFinite);
        }

        let mut best: Option<(Subject, f32)> = None;
        for (subject, descriptor) in gallery.faces() {
            let distance = descriptor.euclidean_distance(probe);
            let replace = match best {
                None => true,
                Some((best_subject, best_distance)) => {
                    if (distance - best_distance).abs() <= TIE_EPSILON {
                        subject < best_subject
                    } else {
                        distance < best_distance
                    }
                }
            };
            if replace {
                best = Some((subject, distance));
            }
        }

        let Some((subject, distance)) = best else {
            return Ok(MatchResult::none(f32::INFINITY, 0.0));
        };

        let confidence = self.confidence(distance);
        if distance > self.max_distance {
            return Ok(MatchResult::none(distance, confidence));
        }

        Ok(MatchResult {
            subject: Some(subject),
            distance,
            confidence,
        })
    }
}
