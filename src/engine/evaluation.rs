//! Post-match evaluation of a prediction.

use serde::Serialize;

use super::error::{check_confidence, EngineResult};
use super::outcome::Outcome;

/// Default confidence at or above which a wrong call is flagged overconfident.
pub const DEFAULT_OVERCONFIDENCE_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionEvaluation {
    pub was_correct: bool,
    /// |confidence − y| with y = 1 for a correct call, 0 otherwise
    pub calibration_error: f64,
    pub overconfidence_flag: bool,
}

pub fn evaluate(
    predicted: Outcome,
    confidence: f64,
    actual: Outcome,
    overconfidence_threshold: f64,
) -> EngineResult<PredictionEvaluation> {
    let confidence = check_confidence(confidence)?;
    let was_correct = predicted == actual;
    let y = if was_correct { 1.0 } else { 0.0 };
    Ok(PredictionEvaluation {
        was_correct,
        calibration_error: (confidence - y).abs(),
        overconfidence_flag: !was_correct && confidence >= overconfidence_threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn correct_call() {
        let e = evaluate(Outcome::Home, 0.7, Outcome::Home, 0.75).unwrap();
        assert!(e.was_correct);
        assert_relative_eq!(e.calibration_error, 0.3, epsilon = 1e-12);
        assert!(!e.overconfidence_flag);
    }

    #[test]
    fn confident_miss_is_flagged() {
        let e = evaluate(Outcome::Away, 0.8, Outcome::Draw, 0.75).unwrap();
        assert!(!e.was_correct);
        assert_relative_eq!(e.calibration_error, 0.8, epsilon = 1e-12);
        assert!(e.overconfidence_flag);
    }

    #[test]
    fn timid_miss_is_not_flagged() {
        let e = evaluate(Outcome::Away, 0.4, Outcome::Home, 0.75).unwrap();
        assert!(!e.overconfidence_flag);
    }
}
