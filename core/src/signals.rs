//! Confidence signals derived from one retrieval call.
//!
//! The signal bundle is the contract between the retrieval engine and the
//! ticket orchestrator: the orchestrator never inspects raw results to make
//! a routing decision, only the bundle. The constructors here are the single
//! place where the `confident` and `attempts_exhausted` invariants are
//! computed, so the engine and the orchestrator's failure synthesis cannot
//! drift apart.

use serde::{Deserialize, Serialize};

/// Suggested next move when a retrieval attempt was not confident but the
/// attempt budget is not yet exhausted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackHint {
    /// Retry with a lower score threshold. The relaxation magnitude is the
    /// caller's policy, not the engine's.
    RelaxThreshold,
    /// Retry without the category restriction.
    BroadenScope,
}

/// Derived summary of one retrieval call.
///
/// Invariants (enforced by [`RetrievalSignals::from_scores`] and
/// [`RetrievalSignals::zero_confidence`]):
/// - `confident` is true iff `mean_similarity >= confidence_threshold` and
///   `result_count > 0`;
/// - `attempts_exhausted` is true iff `attempt >= max_attempts`;
/// - with zero results, mean/max/min similarity are all 0 and `confident`
///   is false.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalSignals {
    /// Mean fused score of the returned results (0 when empty).
    pub mean_similarity: f32,
    /// Highest fused score (0 when empty).
    pub max_similarity: f32,
    /// Lowest fused score (0 when empty).
    pub min_similarity: f32,
    /// Number of results at or above the score threshold.
    pub result_count: usize,
    /// Wall-clock latency of the retrieval call in milliseconds.
    pub latency_ms: u64,
    /// Whether the results are trusted enough to auto-resolve.
    pub confident: bool,
    /// Whether the attempt budget is spent.
    pub attempts_exhausted: bool,
    /// 1-indexed attempt number this bundle belongs to.
    pub attempt: u32,
    /// Populated when another attempt is worth making.
    pub fallback: Option<FallbackHint>,
}

impl RetrievalSignals {
    /// Build the signal bundle for a completed retrieval call.
    ///
    /// `scores` are the fused scores of the results actually returned
    /// (already threshold-filtered and truncated to top-k).
    pub fn from_scores(
        scores: &[f32],
        attempt: u32,
        max_attempts: u32,
        confidence_threshold: f32,
        latency_ms: u64,
    ) -> Self {
        let result_count = scores.len();
        let (mean, max, min) = if result_count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let sum: f32 = scores.iter().sum();
            let max = scores.iter().cloned().fold(f32::MIN, f32::max);
            let min = scores.iter().cloned().fold(f32::MAX, f32::min);
            (sum / result_count as f32, max, min)
        };

        let confident = mean >= confidence_threshold && result_count > 0;
        let attempts_exhausted = attempt >= max_attempts;
        let fallback = if !confident && !attempts_exhausted {
            // The attempt right before the last one gives up on the
            // category restriction instead of lowering the bar further.
            if attempt + 1 >= max_attempts {
                Some(FallbackHint::BroadenScope)
            } else {
                Some(FallbackHint::RelaxThreshold)
            }
        } else {
            None
        };

        Self {
            mean_similarity: mean,
            max_similarity: max,
            min_similarity: min,
            result_count,
            latency_ms,
            confident,
            attempts_exhausted,
            attempt,
            fallback,
        }
    }

    /// Synthesize the bundle for a retrieval attempt that failed outright
    /// (index unreachable, embedding error, latency budget exceeded).
    ///
    /// Failures count as zero-confidence attempts so they consume the
    /// attempt budget instead of looping forever.
    pub fn zero_confidence(attempt: u32, max_attempts: u32, latency_ms: u64) -> Self {
        Self::from_scores(&[], attempt, max_attempts, f32::INFINITY, latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confident_requires_mean_and_nonzero_count() {
        let s = RetrievalSignals::from_scores(&[0.8, 0.7, 0.75], 1, 3, 0.70, 12);
        assert!(s.confident);
        assert!(!s.attempts_exhausted);
        assert_eq!(s.result_count, 3);
        assert!((s.mean_similarity - 0.75).abs() < 1e-6);
        assert_eq!(s.max_similarity, 0.8);
        assert_eq!(s.min_similarity, 0.7);
        assert_eq!(s.fallback, None);
    }

    #[test]
    fn empty_results_are_never_confident() {
        let s = RetrievalSignals::from_scores(&[], 1, 3, 0.0, 5);
        assert!(!s.confident);
        assert_eq!(s.mean_similarity, 0.0);
        assert_eq!(s.max_similarity, 0.0);
        assert_eq!(s.min_similarity, 0.0);
        assert_eq!(s.result_count, 0);
    }

    #[test]
    fn exhaustion_at_max_attempts() {
        let s = RetrievalSignals::from_scores(&[0.3], 3, 3, 0.70, 5);
        assert!(!s.confident);
        assert!(s.attempts_exhausted);
        assert_eq!(s.fallback, None);
    }

    #[test]
    fn fallback_relaxes_then_broadens() {
        let first = RetrievalSignals::from_scores(&[0.3], 1, 3, 0.70, 5);
        assert_eq!(first.fallback, Some(FallbackHint::RelaxThreshold));

        let second = RetrievalSignals::from_scores(&[0.3], 2, 3, 0.70, 5);
        assert_eq!(second.fallback, Some(FallbackHint::BroadenScope));
    }

    #[test]
    fn zero_confidence_consumes_the_attempt() {
        let s = RetrievalSignals::zero_confidence(2, 3, 5000);
        assert!(!s.confident);
        assert!(!s.attempts_exhausted);
        assert_eq!(s.attempt, 2);
        assert_eq!(s.result_count, 0);
    }
}
