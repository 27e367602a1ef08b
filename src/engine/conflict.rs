use serde::Serialize;

use super::outcome::OutcomeScores;

/// Default margin, as a fraction of total score mass, under which the top two
/// outcomes are considered in conflict.
pub const DEFAULT_CONFLICT_THRESHOLD: f64 = 0.05;

/// Only the gap is reported; which outcome wins a tie is decided by
/// `ensemble::pick_winner`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConflictReport {
    /// Gap between the best and second-best scores.
    pub margin: f64,
    pub conflict_detected: bool,
}

/// Classify an aggregate as conflicted when `top1 − top2 < threshold · Σ scores`.
pub fn detect(scores: &OutcomeScores, threshold: f64) -> ConflictReport {
    let ranked = scores.ranked();
    let margin = ranked[0].1 - ranked[1].1;
    ConflictReport {
        margin,
        conflict_detected: margin < threshold * scores.total(),
    }
}
