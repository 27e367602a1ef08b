//! Crowd-wisdom consolidation.
//!
//! Independent user predictions for a match are tallied per outcome. The
//! consensus is the most-picked outcome; ties go to the outcome whose backers
//! were more confident on average, then to the outcome picked first.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::{check_confidence, EngineResult};
use super::outcome::{Outcome, OutcomeScores};

/// One user's prediction for a match.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSubmission {
    pub id: String,
    pub predicted_outcome: Outcome,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrowdConsensus {
    pub total_predictions: i64,
    pub home_win_predictions: i64,
    pub draw_predictions: i64,
    pub away_win_predictions: i64,
    pub consensus_prediction: Option<Outcome>,
    /// Share of submissions that picked the consensus outcome.
    pub consensus_confidence: f64,
    /// Mean `confidence` over every submission.
    pub average_confidence: f64,
    /// `|model probability of consensus − consensus_confidence|`; `None`
    /// without a model prediction for the match.
    pub model_vs_crowd_divergence: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    count: i64,
    confidence_sum: f64,
    first_seen: Option<DateTime<Utc>>,
}

impl Tally {
    fn mean_confidence(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.confidence_sum / self.count as f64
        }
    }
}

/// Consolidate all submissions for a match.
///
/// The result depends only on the submission set, not on its order:
/// submissions are processed sorted by `(created_at, id)` so float sums are
/// reproduced bit for bit on every recompute.
pub fn consolidate(
    submissions: &[UserSubmission],
    model_probabilities: Option<&OutcomeScores>,
) -> EngineResult<CrowdConsensus> {
    for s in submissions {
        check_confidence(s.confidence)?;
    }

    let mut ordered: Vec<&UserSubmission> = submissions.iter().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut tallies = [Tally::default(); 3];
    let mut confidence_sum = 0.0;
    for s in &ordered {
        let t = &mut tallies[s.predicted_outcome.index()];
        t.count += 1;
        t.confidence_sum += s.confidence;
        t.first_seen.get_or_insert(s.created_at);
        confidence_sum += s.confidence;
    }

    let total = ordered.len() as i64;
    let consensus = if total == 0 {
        None
    } else {
        Outcome::ALL
            .into_iter()
            .filter(|o| tallies[o.index()].count > 0)
            .max_by(|a, b| {
                let (ta, tb) = (tallies[a.index()], tallies[b.index()]);
                ta.count
                    .cmp(&tb.count)
                    .then_with(|| ta.mean_confidence().total_cmp(&tb.mean_confidence()))
                    // earlier first submission wins, so reverse the date order
                    .then_with(|| tb.first_seen.cmp(&ta.first_seen))
                    .then_with(|| b.index().cmp(&a.index()))
            })
    };

    let consensus_confidence = consensus
        .map(|o| tallies[o.index()].count as f64 / total as f64)
        .unwrap_or(0.0);
    let average_confidence = if total == 0 {
        0.0
    } else {
        confidence_sum / total as f64
    };
    let model_vs_crowd_divergence = match (consensus, model_probabilities) {
        (Some(o), Some(model)) => Some((model.get(o) - consensus_confidence).abs()),
        _ => None,
    };

    Ok(CrowdConsensus {
        total_predictions: total,
        home_win_predictions: tallies[Outcome::Home.index()].count,
        draw_predictions: tallies[Outcome::Draw.index()].count,
        away_win_predictions: tallies[Outcome::Away.index()].count,
        consensus_prediction: consensus,
        consensus_confidence,
        average_confidence,
        model_vs_crowd_divergence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::EngineError;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 18, 0, 0).unwrap()
    }

    fn sub(id: &str, o: Outcome, c: f64, minutes: i64) -> UserSubmission {
        UserSubmission {
            id: id.into(),
            predicted_outcome: o,
            confidence: c,
            created_at: base_time() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn empty_set_has_no_consensus() {
        let c = consolidate(&[], None).unwrap();
        assert_eq!(c.total_predictions, 0);
        assert_eq!(c.consensus_prediction, None);
        assert_eq!(c.consensus_confidence, 0.0);
        assert_eq!(c.model_vs_crowd_divergence, None);
    }

    #[test]
    fn majority_wins() {
        let subs = vec![
            sub("a", Outcome::Home, 0.7, 0),
            sub("b", Outcome::Away, 0.9, 1),
            sub("c", Outcome::Home, 0.5, 2),
            sub("d", Outcome::Draw, 0.4, 3),
        ];
        let c = consolidate(&subs, None).unwrap();
        assert_eq!(c.consensus_prediction, Some(Outcome::Home));
        assert_eq!(c.home_win_predictions, 2);
        assert_eq!(c.draw_predictions, 1);
        assert_eq!(c.away_win_predictions, 1);
        assert_relative_eq!(c.consensus_confidence, 0.5, epsilon = 1e-12);
        assert_relative_eq!(c.average_confidence, 2.5 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn count_tie_goes_to_more_confident_outcome() {
        let subs = vec![
            sub("a", Outcome::Home, 0.6, 0),
            sub("b", Outcome::Away, 0.9, 1),
        ];
        let c = consolidate(&subs, None).unwrap();
        assert_eq!(c.consensus_prediction, Some(Outcome::Away));
    }

    #[test]
    fn full_tie_goes_to_earliest_submission() {
        let subs = vec![
            sub("late", Outcome::Home, 0.6, 10),
            sub("early", Outcome::Draw, 0.6, 2),
        ];
        let c = consolidate(&subs, None).unwrap();
        assert_eq!(c.consensus_prediction, Some(Outcome::Draw));
    }

    #[test]
    fn divergence_against_model() {
        let subs = vec![
            sub("a", Outcome::Home, 0.7, 0),
            sub("b", Outcome::Home, 0.8, 1),
            sub("c", Outcome::Away, 0.6, 2),
            sub("d", Outcome::Home, 0.9, 3),
        ];
        let model = OutcomeScores {
            home: 0.45,
            draw: 0.30,
            away: 0.25,
        };
        let c = consolidate(&subs, Some(&model)).unwrap();
        assert_relative_eq!(c.consensus_confidence, 0.75, epsilon = 1e-12);
        assert_relative_eq!(c.model_vs_crowd_divergence.unwrap(), 0.30, epsilon = 1e-12);
    }

    #[test]
    fn recompute_is_bit_identical_regardless_of_order() {
        let subs = vec![
            sub("a", Outcome::Home, 0.1, 0),
            sub("b", Outcome::Draw, 0.2, 1),
            sub("c", Outcome::Away, 0.3, 2),
            sub("d", Outcome::Home, 0.7, 3),
            sub("e", Outcome::Draw, 0.33, 4),
        ];
        let mut reversed = subs.clone();
        reversed.reverse();

        let first = consolidate(&subs, None).unwrap();
        let second = consolidate(&subs, None).unwrap();
        let third = consolidate(&reversed, None).unwrap();
        assert_eq!(first.average_confidence.to_bits(), second.average_confidence.to_bits());
        assert_eq!(first.average_confidence.to_bits(), third.average_confidence.to_bits());
        assert_eq!(first, third);
    }

    #[test]
    fn invalid_confidence_is_rejected() {
        let subs = vec![sub("a", Outcome::Home, 1.5, 0)];
        assert_eq!(
            consolidate(&subs, None).unwrap_err(),
            EngineError::InvalidConfidence(1.5)
        );
    }
}
