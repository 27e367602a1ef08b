//! Value-bet evaluation against bookmaker decimal odds.
//!
//! For a model probability `p` and decimal odds `d`:
//!   implied probability = 1 / d
//!   expected value      = p·d − 1
//!   Kelly fraction      = (b·p − q) / b,  b = d − 1, q = 1 − p
//!
//! The Kelly fraction is floored at zero (no edge, no bet) and capped at one
//! (never stake more than the bankroll). Inputs are not clamped: a
//! probability outside [0, 1] or odds ≤ 1 are rejected.

use serde::{Deserialize, Serialize};

use super::error::{check_odds, check_probability, EngineResult};

/// Expected-value cut-offs for the confidence buckets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceThresholds {
    pub medium: f64,
    pub high: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        ConfidenceThresholds {
            medium: 0.05,
            high: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueBetEvaluation {
    pub model_probability: f64,
    pub bookmaker_odds: f64,
    pub implied_probability: f64,
    pub expected_value: f64,
    pub kelly_fraction: f64,
    pub confidence_level: ConfidenceLevel,
}

/// Full-Kelly stake fraction, clamped to [0, 1].
pub fn kelly_fraction(model_probability: f64, bookmaker_odds: f64) -> EngineResult<f64> {
    let p = check_probability(model_probability)?;
    let d = check_odds(bookmaker_odds)?;

    // Net odds per unit staked (decimal 2.5 → 1.5 profit per unit)
    let b = d - 1.0;
    let q = 1.0 - p;
    let f = (b * p - q) / b;

    if f <= 0.0 {
        return Ok(0.0); // no edge
    }
    Ok(f.min(1.0))
}

/// Expected profit per unit staked.
pub fn expected_value(model_probability: f64, bookmaker_odds: f64) -> EngineResult<f64> {
    let p = check_probability(model_probability)?;
    let d = check_odds(bookmaker_odds)?;
    Ok(p * d - 1.0)
}

pub fn confidence_level(expected_value: f64, thresholds: ConfidenceThresholds) -> ConfidenceLevel {
    if expected_value >= thresholds.high {
        ConfidenceLevel::High
    } else if expected_value >= thresholds.medium {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

pub fn evaluate(
    model_probability: f64,
    bookmaker_odds: f64,
    thresholds: ConfidenceThresholds,
) -> EngineResult<ValueBetEvaluation> {
    let ev = expected_value(model_probability, bookmaker_odds)?;
    Ok(ValueBetEvaluation {
        model_probability,
        bookmaker_odds,
        implied_probability: 1.0 / bookmaker_odds,
        expected_value: ev,
        kelly_fraction: kelly_fraction(model_probability, bookmaker_odds)?,
        confidence_level: confidence_level(ev, thresholds),
    })
}

/// Whether a bet should be shown: strictly positive excess over the
/// caller's minimum and still active. Activation lifetime is decided
/// elsewhere.
pub fn is_surfaced(expected_value: f64, is_active: bool, min_expected_value: f64) -> bool {
    is_active && expected_value > min_expected_value
}
