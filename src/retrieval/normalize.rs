//! Min-max score normalization

/// Value assigned to every score when a result set has no spread
pub const DEFAULT_DEGENERATE_SCORE: f32 = 1.0;

/// Maps the raw scores of one result set onto [0, 1]
pub trait ScoreNormalizer: Send + Sync {
    fn normalize(&self, raw: &[f32]) -> Vec<f32>;
}

/// Min-max scaling with an explicit policy for a zero-width range
#[derive(Debug, Clone, Copy)]
pub struct MinMaxNormalizer {
    degenerate_score: f32,
}

impl MinMaxNormalizer {
    /// `degenerate_score` is clamped to [0, 1]
    pub fn new(degenerate_score: f32) -> Self {
        Self {
            degenerate_score: if degenerate_score.is_finite() {
                degenerate_score.clamp(0.0, 1.0)
            } else {
                DEFAULT_DEGENERATE_SCORE
            },
        }
    }

    pub fn degenerate_score(&self) -> f32 {
        self.degenerate_score
    }
}

impl Default for MinMaxNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_DEGENERATE_SCORE)
    }
}

impl ScoreNormalizer for MinMaxNormalizer {
    fn normalize(&self, raw: &[f32]) -> Vec<f32> {
        min_max_normalize(raw, self.degenerate_score)
    }
}

/// `(raw - min) / (max - min)` over the finite values of `raw`
///
/// When `max == min` (identical scores, or a single element) every finite
/// value becomes `degenerate`: items nobody can tell apart are not penalized.
/// Non-finite values map to 0.0.
pub fn min_max_normalize(raw: &[f32], degenerate: f32) -> Vec<f32> {
    let (min, max) = raw
        .iter()
        .filter(|s| s.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });

    let range = max - min;
    raw.iter()
        .map(|&s| {
            if !s.is_finite() {
                0.0
            } else if range <= 0.0 || !range.is_finite() {
                degenerate
            } else {
                ((s - min) / range).clamp(0.0, 1.0)
            }
        })
        .collect()
}
