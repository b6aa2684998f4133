//! Nearest-sample identification against a gallery.

use crate::gallery::Gallery;
use crate::types::{Descriptor, DescriptorError};
use serde::Serialize;

/// Default acceptance distance. Provisional: not calibrated against real
/// biometric data, so deployments should override it via configuration.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Closest identity found for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub identity: String,
    pub label: String,
    pub distance: f32,
}

/// Result of matching a query descriptor against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Whether `best` is within the threshold.
    pub matched: bool,
    /// Closest candidate; `None` only when the gallery is empty.
    pub best: Option<Candidate>,
    pub threshold: f32,
}

impl MatchResult {
    pub fn empty_gallery(threshold: f32) -> Self {
        Self {
            matched: false,
            best: None,
            threshold,
        }
    }

    pub fn is_empty_gallery(&self) -> bool {
        self.best.is_none()
    }

    /// The accepted identity, if any.
    pub fn accepted(&self) -> Option<&Candidate> {
        self.best.as_ref().filter(|_| self.matched)
    }

    /// Near miss kept for manual review; never an accepted match.
    pub fn suggestion(&self) -> Option<&Candidate> {
        self.best.as_ref().filter(|_| !self.matched)
    }
}

/// Strategy for comparing a query descriptor against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, query: &Descriptor, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Euclidean nearest-sample matcher.
///
/// Every sample of every identity is compared, so an identity is represented
/// by its single closest sample rather than an average. All entries are
/// always visited; there is no early exit.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, query: &Descriptor, gallery: &Gallery, threshold: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_entry = None;

        for entry in gallery.entries() {
            for sample in &entry.samples {
                let dist = query.euclidean_distance(sample);
                // Strict comparison: the first sample at a tied distance wins.
                if dist < best_dist {
                    best_dist = dist;
                    best_entry = Some(entry);
                }
            }
        }

        let Some(entry) = best_entry else {
            return MatchResult::empty_gallery(threshold);
        };

        MatchResult {
            matched: best_dist <= threshold,
            best: Some(Candidate {
                identity: entry.identity_id.clone(),
                label: entry.label.clone(),
                distance: best_dist,
            }),
            threshold,
        }
    }
}

/// Validate a raw query vector and match it with [`EuclideanMatcher`].
pub fn identify(query: &[f32], gallery: &Gallery, threshold: f32) -> Result<MatchResult, DescriptorError> {
    let query = Descriptor::new(query.to_vec())?;
    let result = EuclideanMatcher.compare(&query, gallery, threshold);

    match (&result.best, result.matched) {
        (None, _) => tracing::debug!("identify: gallery empty"),
        (Some(c), true) => {
            tracing::info!(identity = %c.identity, distance = c.distance, threshold, "identify: matched")
        }
        (Some(c), false) => tracing::info!(
            candidate = %c.identity,
            distance = c.distance,
            threshold,
            "identify: no match within threshold"
        ),
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::axis;
    use crate::types::{DescriptorRow, EXPECTED_DIM};

    fn gallery(rows: &[(&str, f32)]) -> Gallery {
        Gallery::from_rows(rows.iter().map(|&(id, x)| DescriptorRow {
            identity_id: id.into(),
            label: format!("label-{id}"),
            descriptor: axis(x),
        }))
    }

    fn query() -> Vec<f32> {
        axis(0.0).values().to_vec()
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let result = identify(&query(), &Gallery::default(), 10.0).unwrap();
        assert!(result.is_empty_gallery());
        assert!(!result.matched);
        assert!(result.accepted().is_none());
        assert!(result.suggestion().is_none());
    }

    #[test]
    fn test_self_match_is_exact() {
        let g = gallery(&[("a", 0.7), ("b", -1.3)]);
        let stored = axis(-1.3);
        let result = identify(stored.values(), &g, 0.0).unwrap();
        let c = result.accepted().unwrap();
        assert_eq!(c.identity, "b");
        assert_eq!(c.distance, 0.0);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let g = gallery(&[("a", 0.1)]);
        for len in [0, 1, EXPECTED_DIM - 1, EXPECTED_DIM + 1] {
            assert_eq!(
                identify(&vec![0.0; len], &g, 0.5),
                Err(DescriptorError::WrongLength(len))
            );
        }
    }

    #[test]
    fn test_closest_sample_beats_average() {
        // A: samples at 0.1 and 0.9 (mean 0.5); B: single sample at 0.3.
        let g = gallery(&[("A", 0.1), ("A", 0.9), ("B", 0.3)]);
        let result = identify(&query(), &g, 0.5).unwrap();
        let c = result.accepted().unwrap();
        assert_eq!(c.identity, "A");
        assert!((c.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_near_miss_is_suggestion_only() {
        let g = gallery(&[("A", 0.6), ("B", 1.5)]);
        let result = identify(&query(), &g, 0.5).unwrap();
        assert!(!result.matched);
        assert!(result.accepted().is_none());
        let c = result.suggestion().unwrap();
        assert_eq!(c.identity, "A");
        assert!((c.distance - 0.6).abs() < 1e-6);
        assert_eq!(result.threshold, 0.5);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let g = gallery(&[("A", 0.5)]);
        assert!(identify(&query(), &g, 0.5).unwrap().matched);
    }

    #[test]
    fn test_threshold_monotonic() {
        let g = gallery(&[("A", 0.25), ("B", 0.4), ("C", 0.8)]);
        let low = identify(&query(), &g, 0.3).unwrap();
        assert!(low.matched);
        for t in [0.31, 0.5, 1.0, 100.0] {
            let high = identify(&query(), &g, t).unwrap();
            assert!(high.matched);
            assert_eq!(high.best, low.best);
        }
    }

    #[test]
    fn test_tie_first_encountered_wins() {
        let g = gallery(&[("first", 0.3), ("second", -0.3)]);
        let result = identify(&query(), &g, 0.5).unwrap();
        assert_eq!(result.best.unwrap().identity, "first");
    }

    #[test]
    fn test_visits_every_entry() {
        // Best match is the last sample of the last identity.
        let g = gallery(&[("x", 5.0), ("y", 4.0), ("y", 3.0), ("z", 2.0), ("z", 0.05)]);
        let result = EuclideanMatcher.compare(&axis(0.0), &g, 0.5);
        let c = result.accepted().unwrap();
        assert_eq!(c.identity, "z");
        assert_eq!(c.label, "label-z");
    }
}
