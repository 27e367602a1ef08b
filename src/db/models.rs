use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::ensemble::{EnsembleBreakdown, VoteSource};
use crate::engine::outcome::Outcome;

/// One upstream model's vote for a match, written by the prediction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVote {
    pub match_id: String,
    /// "full_time" | "half_time" | "pattern"
    pub source: VoteSource,
    pub predicted_outcome: Outcome,
    /// Source confidence (0.0–1.0)
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// The ensemble prediction for a match. One row per match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Option<i64>,
    pub match_id: String,
    pub predicted_outcome: Outcome,
    /// Winner's share of the ensemble score mass (0.0–1.0)
    pub confidence_score: f64,
    pub ensemble_breakdown: Option<EnsembleBreakdown>,
    pub model_version: Option<String>,
    /// Set when the ensemble disagreed with itself
    pub blocked_reason: Option<String>,
    // Evaluation, attached once the match is resolved
    pub actual_outcome: Option<Outcome>,
    pub was_correct: Option<bool>,
    pub calibration_error: Option<f64>,
    pub overconfidence_flag: Option<bool>,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's crowd prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPrediction {
    pub id: Option<i64>,
    pub match_id: String,
    pub user_id: String,
    pub predicted_outcome: Outcome,
    pub confidence_score: f64,
    pub reasoning: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Consolidated crowd opinion for a match. Fully replaced on each recompute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrowdWisdom {
    pub match_id: String,
    pub total_predictions: i64,
    pub home_win_predictions: i64,
    pub draw_predictions: i64,
    pub away_win_predictions: i64,
    pub consensus_prediction: Option<Outcome>,
    pub consensus_confidence: f64,
    pub average_confidence: f64,
    pub model_vs_crowd_divergence: Option<f64>,
    pub last_calculated_at: DateTime<Utc>,
}

/// Freshness tracking for any record, keyed by (table_name, record_id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InformationFreshness {
    pub id: Option<i64>,
    pub table_name: String,
    pub record_id: String,
    /// e.g. "odds", "lineup", "injury"
    pub data_type: String,
    pub last_updated: Option<DateTime<Utc>>,
    /// Fraction per day
    pub decay_rate: f64,
    /// `None` until scored, or when `last_updated` is missing
    pub freshness_score: Option<f64>,
    pub is_stale: bool,
    pub stale_threshold_days: f64,
    pub updated_at: DateTime<Utc>,
}

/// Bookmaker 1X2 decimal odds for a match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOdds {
    pub id: Option<i64>,
    pub match_id: String,
    pub bookmaker: String,
    pub api_source: String,
    pub home_win_odds: f64,
    pub draw_odds: f64,
    pub away_win_odds: f64,
    pub last_updated: DateTime<Utc>,
}

impl MarketOdds {
    /// Record id used for freshness tracking.
    pub fn record_id(&self) -> String {
        format!("{}:{}", self.match_id, self.bookmaker)
    }

    pub fn odds_for(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Home => self.home_win_odds,
            Outcome::Draw => self.draw_odds,
            Outcome::Away => self.away_win_odds,
        }
    }
}

/// A priced bet, one per (match_id, bet_type, bookmaker)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueBet {
    pub id: Option<i64>,
    pub match_id: String,
    /// Outcome name: "HOME" | "DRAW" | "AWAY"
    pub bet_type: String,
    pub bookmaker: String,
    pub bookmaker_odds: f64,
    pub model_probability: f64,
    pub implied_probability: f64,
    pub expected_value: f64,
    pub kelly_fraction: f64,
    /// "low" | "medium" | "high"
    pub confidence_level: String,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

/// A/B test of a generated feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureExperiment {
    pub id: Option<i64>,
    pub experiment_name: String,
    pub feature_type: String,
    pub feature_expression: String,
    pub base_features: serde_json::Value,
    pub generated_feature: serde_json::Value,
    pub test_start_date: DateTime<Utc>,
    pub test_end_date: Option<DateTime<Utc>>,
    pub sample_size: i64,
    pub control_accuracy: Option<f64>,
    pub test_accuracy: Option<f64>,
    pub improvement_delta: Option<f64>,
    pub p_value: Option<f64>,
    pub statistical_significance: bool,
    pub is_active: bool,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Historical record of one ensemble aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleRun {
    pub id: i64,
    pub match_id: String,
    pub breakdown: EnsembleBreakdown,
    pub confidence_score: f64,
    pub created_at: DateTime<Utc>,
}
