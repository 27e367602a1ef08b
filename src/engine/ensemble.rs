//! Weighted ensemble voting.
//!
//! Three upstream models vote on the full-time result: the full-time model,
//! the half-time model and the pattern-detection model. Each outcome's score
//! is the sum of `confidence × weight` over the sources that voted for it:
//!
//!   score[o] = Σ_{s votes o} confidence_s · weight_s
//!
//! The winner is the arg-max; ties go to the outcome backed by the
//! highest-priority source (full_time > half_time > pattern). The final
//! confidence is the winner's share of the total score mass.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::conflict;
use super::error::{check_confidence, EngineError, EngineResult};
use super::outcome::{Outcome, OutcomeScores};

/// Tolerance on `Σ weights == 1`.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Scores closer than this are treated as tied for winner selection.
const TIE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteSource {
    FullTime,
    HalfTime,
    Pattern,
}

impl VoteSource {
    /// Tie-break priority, strongest first.
    pub const PRIORITY: [VoteSource; 3] =
        [VoteSource::FullTime, VoteSource::HalfTime, VoteSource::Pattern];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoteSource::FullTime => "full_time",
            VoteSource::HalfTime => "half_time",
            VoteSource::Pattern => "pattern",
        }
    }

    /// Lower is stronger.
    pub fn rank(&self) -> usize {
        match self {
            VoteSource::FullTime => 0,
            VoteSource::HalfTime => 1,
            VoteSource::Pattern => 2,
        }
    }
}

impl fmt::Display for VoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteSource {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full_time" | "ft" => Ok(VoteSource::FullTime),
            "half_time" | "ht" => Ok(VoteSource::HalfTime),
            "pattern" | "pt" => Ok(VoteSource::Pattern),
            _ => Err(EngineError::UnknownSource(s.to_string())),
        }
    }
}

/// One source's opinion on a match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vote {
    pub source: VoteSource,
    pub prediction: Outcome,
    pub confidence: f64,
}

/// Source weights; must be non-negative and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub ft: f64,
    pub ht: f64,
    pub pt: f64,
}

impl EnsembleWeights {
    pub fn new(ft: f64, ht: f64, pt: f64) -> EngineResult<Self> {
        let w = EnsembleWeights { ft, ht, pt };
        w.validate()?;
        Ok(w)
    }

    pub fn validate(&self) -> EngineResult<()> {
        for (name, v) in [("ft", self.ft), ("ht", self.ht), ("pt", self.pt)] {
            if !v.is_finite() || v < 0.0 {
                return Err(EngineError::InvalidWeights(format!(
                    "{} weight must be a non-negative number, got {}",
                    name, v
                )));
            }
        }
        let sum = self.ft + self.ht + self.pt;
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(EngineError::InvalidWeights(format!(
                "weights must sum to 1.0, got {:.6}",
                sum
            )));
        }
        Ok(())
    }

    pub fn get(&self, source: VoteSource) -> f64 {
        match source {
            VoteSource::FullTime => self.ft,
            VoteSource::HalfTime => self.ht,
            VoteSource::Pattern => self.pt,
        }
    }
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        EnsembleWeights {
            ft: 0.5,
            ht: 0.3,
            pt: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceVote {
    pub prediction: Outcome,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleVotes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_time: Option<SourceVote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub half_time: Option<SourceVote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<SourceVote>,
}

impl EnsembleVotes {
    fn slot(&mut self, source: VoteSource) -> &mut Option<SourceVote> {
        match source {
            VoteSource::FullTime => &mut self.full_time,
            VoteSource::HalfTime => &mut self.half_time,
            VoteSource::Pattern => &mut self.pattern,
        }
    }

    /// Votes in source-priority order.
    pub fn iter(&self) -> impl Iterator<Item = Vote> + '_ {
        VoteSource::PRIORITY.into_iter().filter_map(move |source| {
            let v = match source {
                VoteSource::FullTime => self.full_time,
                VoteSource::HalfTime => self.half_time,
                VoteSource::Pattern => self.pattern,
            };
            v.map(|v| Vote {
                source,
                prediction: v.prediction,
                confidence: v.confidence,
            })
        })
    }
}

/// Embedded in a prediction; serialises to the shape the admin panels read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleBreakdown {
    pub votes: EnsembleVotes,
    pub weights_used: EnsembleWeights,
    pub scores: OutcomeScores,
    pub winner: Outcome,
    pub final_confidence: f64,
    pub conflict_detected: bool,
    /// Only present when a conflict was flagged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_margin: Option<f64>,
}

/// Validate and slot votes by source. Duplicate sources are rejected.
pub fn collect_votes(votes: &[Vote]) -> EngineResult<EnsembleVotes> {
    let mut slots = EnsembleVotes::default();
    for vote in votes {
        check_confidence(vote.confidence)?;
        let slot = slots.slot(vote.source);
        if slot.is_some() {
            return Err(EngineError::DuplicateVote(vote.source.to_string()));
        }
        *slot = Some(SourceVote {
            prediction: vote.prediction,
            confidence: vote.confidence,
        });
    }
    Ok(slots)
}

/// Per-outcome weighted scores. Outcomes nobody voted for score zero.
pub fn score_votes(votes: &EnsembleVotes, weights: &EnsembleWeights) -> OutcomeScores {
    let mut scores = OutcomeScores::default();
    for vote in votes.iter() {
        scores.add(vote.prediction, vote.confidence * weights.get(vote.source));
    }
    scores
}

/// Arg-max with the source-priority tie-break.
fn pick_winner(scores: &OutcomeScores, votes: &EnsembleVotes) -> Outcome {
    let best = scores.ranked()[0].1;
    let strongest_backer = |o: Outcome| {
        votes
            .iter()
            .filter(|v| v.prediction == o)
            .map(|v| v.source.rank())
            .min()
            .unwrap_or(usize::MAX)
    };
    Outcome::ALL
        .into_iter()
        .filter(|o| best - scores.get(*o) <= TIE_EPSILON)
        .min_by_key(|o| (strongest_backer(*o), o.index()))
        .unwrap_or(Outcome::Home)
}

/// Aggregate source votes into a full breakdown.
///
/// Fails with `InsufficientVotes` when there is nothing to aggregate: no
/// votes, all weights zero, or zero total score mass. Callers must not
/// emit a prediction in that case.
pub fn aggregate(
    votes: &[Vote],
    weights: &EnsembleWeights,
    conflict_threshold: f64,
) -> EngineResult<EnsembleBreakdown> {
    weights.validate()?;
    if votes.is_empty() {
        return Err(EngineError::InsufficientVotes("no votes".into()));
    }
    let slotted = collect_votes(votes)?;
    if slotted.iter().all(|v| weights.get(v.source) == 0.0) {
        return Err(EngineError::InsufficientVotes(
            "every voting source has zero weight".into(),
        ));
    }

    let scores = score_votes(&slotted, weights);
    let total = scores.total();
    if total <= 0.0 {
        return Err(EngineError::InsufficientVotes(
            "votes carry no score mass".into(),
        ));
    }

    let winner = pick_winner(&scores, &slotted);
    let report = conflict::detect(&scores, conflict_threshold);

    Ok(EnsembleBreakdown {
        votes: slotted,
        weights_used: *weights,
        scores,
        winner,
        final_confidence: scores.get(winner) / total,
        conflict_detected: report.conflict_detected,
        conflict_margin: report.conflict_detected.then_some(report.margin),
    })
}
