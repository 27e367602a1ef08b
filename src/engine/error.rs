use thiserror::Error;

/// Errors raised by the scoring engine.
///
/// Every computation in `engine` is pure, so these are reported straight back
/// to the caller and never retried here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// No usable votes, all weights zero, or zero total score mass.
    #[error("insufficient votes: {0}")]
    InsufficientVotes(String),

    /// The record has no `last_updated`; freshness is unknown, not stale.
    #[error("missing freshness data for {table_name}/{record_id}")]
    MissingFreshnessData {
        table_name: String,
        record_id: String,
    },

    #[error("probability out of range [0, 1]: {0}")]
    InvalidProbability(f64),

    #[error("decimal odds must be greater than 1.0: {0}")]
    InvalidOdds(f64),

    #[error("confidence out of range [0, 1]: {0}")]
    InvalidConfidence(f64),

    #[error("decay rate must be a non-negative number: {0}")]
    InvalidDecayRate(f64),

    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    #[error("invalid state transition: from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("unknown outcome: {0}")]
    UnknownOutcome(String),

    #[error("duplicate vote from source {0}")]
    DuplicateVote(String),

    #[error("unknown vote source: {0}")]
    UnknownSource(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Reject probabilities outside [0, 1] (NaN included).
pub fn check_probability(p: f64) -> EngineResult<f64> {
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(EngineError::InvalidProbability(p))
    }
}

pub fn check_confidence(c: f64) -> EngineResult<f64> {
    if (0.0..=1.0).contains(&c) {
        Ok(c)
    } else {
        Err(EngineError::InvalidConfidence(c))
    }
}

/// Decimal odds must be strictly greater than 1.0 and finite.
pub fn check_odds(odds: f64) -> EngineResult<f64> {
    if odds.is_finite() && odds > 1.0 {
        Ok(odds)
    } else {
        Err(EngineError::InvalidOdds(odds))
    }
}
