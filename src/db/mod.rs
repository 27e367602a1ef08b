use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::engine::ensemble::{EnsembleBreakdown, VoteSource};
use crate::engine::outcome::Outcome;

pub mod models;
use models::*;

/// Thread-safe SQLite record store (single connection with mutex).
///
/// Every aggregate is written with a single `INSERT … ON CONFLICT DO UPDATE`
/// keyed by its natural key, so a recompute replaces the whole row at once.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path.
    /// `":memory:"` opens a private in-memory store.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Model votes ───────────────────────────────────────────────────────────

    /// Insert or replace one source's vote for a match
    pub fn upsert_model_vote(&self, vote: &ModelVote) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO model_votes (match_id, source, predicted_outcome, confidence, created_at)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(match_id, source) DO UPDATE SET
                predicted_outcome=excluded.predicted_outcome,
                confidence=excluded.confidence,
                created_at=excluded.created_at",
            params![
                vote.match_id,
                vote.source,
                vote.predicted_outcome,
                vote.confidence,
                vote.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_votes_for_match(&self, match_id: &str) -> Result<Vec<ModelVote>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT match_id, source, predicted_outcome, confidence, created_at
             FROM model_votes WHERE match_id=?1 ORDER BY source",
        )?;
        let votes = stmt
            .query_map(params![match_id], map_model_vote)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(votes)
    }

    /// Matches whose votes are not yet reflected in an unevaluated
    /// prediction: no prediction at all, or a vote newer than it.
    pub fn list_pending_vote_matches(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT v.match_id FROM model_votes v
             LEFT JOIN predictions p ON p.match_id = v.match_id
             WHERE p.match_id IS NULL
                OR (p.evaluated_at IS NULL AND v.created_at > p.updated_at)
             ORDER BY v.match_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    // ── Predictions ───────────────────────────────────────────────────────────

    /// Write a complete prediction for its match. Returns `false` when
    /// nothing was written: the stored prediction is evaluated, or its
    /// content is identical to `p`.
    pub fn upsert_prediction(&self, p: &Prediction) -> Result<bool> {
        let breakdown = p
            .ensemble_breakdown
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT INTO predictions (
                match_id, predicted_outcome, confidence_score, ensemble_breakdown,
                model_version, blocked_reason, created_at, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
             ON CONFLICT(match_id) DO UPDATE SET
                predicted_outcome=excluded.predicted_outcome,
                confidence_score=excluded.confidence_score,
                ensemble_breakdown=excluded.ensemble_breakdown,
                model_version=excluded.model_version,
                blocked_reason=excluded.blocked_reason,
                updated_at=excluded.updated_at
             WHERE predictions.evaluated_at IS NULL
               AND (predictions.predicted_outcome IS NOT excluded.predicted_outcome
                    OR predictions.confidence_score IS NOT excluded.confidence_score
                    OR predictions.ensemble_breakdown IS NOT excluded.ensemble_breakdown
                    OR predictions.model_version IS NOT excluded.model_version
                    OR predictions.blocked_reason IS NOT excluded.blocked_reason)",
            params![
                p.match_id,
                p.predicted_outcome,
                p.confidence_score,
                breakdown,
                p.model_version,
                p.blocked_reason,
                p.created_at,
                p.updated_at,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_prediction(&self, match_id: &str) -> Result<Option<Prediction>> {
        let conn = self.conn()?;
        let p = conn
            .query_row(
                &format!("SELECT {} FROM predictions WHERE match_id=?1", PREDICTION_COLUMNS),
                params![match_id],
                map_prediction,
            )
            .optional()?;
        Ok(p)
    }

    /// Latest predictions first
    pub fn list_predictions(&self, limit: i64) -> Result<Vec<Prediction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM predictions ORDER BY updated_at DESC LIMIT ?1",
            PREDICTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit], map_prediction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Attach evaluation results. Only the first evaluation sticks; returns
    /// `false` if the prediction was already evaluated.
    pub fn save_evaluation(&self, p: &Prediction) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE predictions SET
                actual_outcome=?1, was_correct=?2, calibration_error=?3,
                overconfidence_flag=?4, evaluated_at=?5, updated_at=?6
             WHERE match_id=?7 AND evaluated_at IS NULL",
            params![
                p.actual_outcome,
                p.was_correct,
                p.calibration_error,
                p.overconfidence_flag,
                p.evaluated_at,
                p.updated_at,
                p.match_id,
            ],
        )?;
        Ok(changed > 0)
    }

    // ── Ensemble runs ─────────────────────────────────────────────────────────

    pub fn insert_ensemble_run(
        &self,
        match_id: &str,
        breakdown: &EnsembleBreakdown,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        let breakdown_json = serde_json::to_string(breakdown)?;
        let weights_json = serde_json::to_string(&breakdown.weights_used)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO ensemble_runs (match_id, breakdown, model_weights, confidence_score, created_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                match_id,
                breakdown_json,
                weights_json,
                breakdown.final_confidence,
                at
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_ensemble_runs(&self, match_id: &str, limit: i64) -> Result<Vec<EnsembleRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, match_id, breakdown, confidence_score, created_at
             FROM ensemble_runs WHERE match_id=?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let runs = stmt
            .query_map(params![match_id, limit], |row| {
                let raw: String = row.get(2)?;
                Ok(EnsembleRun {
                    id: row.get(0)?,
                    match_id: row.get(1)?,
                    breakdown: parse_json_column(2, &raw)?,
                    confidence_score: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    // ── User predictions & crowd wisdom ───────────────────────────────────────

    pub fn insert_user_prediction(&self, up: &UserPrediction) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_predictions (
                match_id, user_id, predicted_outcome, confidence_score, reasoning, created_at
             ) VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                up.match_id,
                up.user_id,
                up.predicted_outcome,
                up.confidence_score,
                up.reasoning,
                up.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_user_predictions(&self, match_id: &str) -> Result<Vec<UserPrediction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, match_id, user_id, predicted_outcome, confidence_score, reasoning, created_at
             FROM user_predictions WHERE match_id=?1 ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![match_id], |row| {
                Ok(UserPrediction {
                    id: row.get(0)?,
                    match_id: row.get(1)?,
                    user_id: row.get(2)?,
                    predicted_outcome: row.get(3)?,
                    confidence_score: row.get(4)?,
                    reasoning: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_user_prediction_matches(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT match_id FROM user_predictions ORDER BY match_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Replace the crowd aggregate for a match
    pub fn upsert_crowd_wisdom(&self, cw: &CrowdWisdom) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO crowd_wisdom (
                match_id, total_predictions, home_win_predictions, draw_predictions,
                away_win_predictions, consensus_prediction, consensus_confidence,
                average_confidence, model_vs_crowd_divergence, last_calculated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(match_id) DO UPDATE SET
                total_predictions=excluded.total_predictions,
                home_win_predictions=excluded.home_win_predictions,
                draw_predictions=excluded.draw_predictions,
                away_win_predictions=excluded.away_win_predictions,
                consensus_prediction=excluded.consensus_prediction,
                consensus_confidence=excluded.consensus_confidence,
                average_confidence=excluded.average_confidence,
                model_vs_crowd_divergence=excluded.model_vs_crowd_divergence,
                last_calculated_at=excluded.last_calculated_at",
            params![
                cw.match_id,
                cw.total_predictions,
                cw.home_win_predictions,
                cw.draw_predictions,
                cw.away_win_predictions,
                cw.consensus_prediction,
                cw.consensus_confidence,
                cw.average_confidence,
                cw.model_vs_crowd_divergence,
                cw.last_calculated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_crowd_wisdom(&self, match_id: &str) -> Result<Option<CrowdWisdom>> {
        let conn = self.conn()?;
        let cw = conn
            .query_row(
                "SELECT match_id, total_predictions, home_win_predictions, draw_predictions,
                        away_win_predictions, consensus_prediction, consensus_confidence,
                        average_confidence, model_vs_crowd_divergence, last_calculated_at
                 FROM crowd_wisdom WHERE match_id=?1",
                params![match_id],
                |row| {
                    Ok(CrowdWisdom {
                        match_id: row.get(0)?,
                        total_predictions: row.get(1)?,
                        home_win_predictions: row.get(2)?,
                        draw_predictions: row.get(3)?,
                        away_win_predictions: row.get(4)?,
                        consensus_prediction: row.get(5)?,
                        consensus_confidence: row.get(6)?,
                        average_confidence: row.get(7)?,
                        model_vs_crowd_divergence: row.get(8)?,
                        last_calculated_at: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(cw)
    }

    // ── Information freshness ─────────────────────────────────────────────────

    /// Mark a tracked record as just updated. Decay parameters are only set
    /// when the row is first created.
    pub fn touch_freshness(
        &self,
        table_name: &str,
        record_id: &str,
        data_type: &str,
        decay_rate: f64,
        stale_threshold_days: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO information_freshness (
                table_name, record_id, data_type, last_updated, decay_rate,
                freshness_score, is_stale, stale_threshold_days, updated_at
             ) VALUES (?1,?2,?3,?4,?5,1.0,0,?6,?4)
             ON CONFLICT(table_name, record_id) DO UPDATE SET
                data_type=excluded.data_type,
                last_updated=excluded.last_updated,
                freshness_score=1.0,
                is_stale=0,
                updated_at=excluded.updated_at",
            params![table_name, record_id, data_type, at, decay_rate, stale_threshold_days],
        )?;
        Ok(())
    }

    /// Register a tracked record whose update time is not known yet
    pub fn register_freshness(&self, row: &InformationFreshness) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO information_freshness (
                table_name, record_id, data_type, last_updated, decay_rate,
                freshness_score, is_stale, stale_threshold_days, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
             ON CONFLICT(table_name, record_id) DO NOTHING",
            params![
                row.table_name,
                row.record_id,
                row.data_type,
                row.last_updated,
                row.decay_rate,
                row.freshness_score,
                row.is_stale,
                row.stale_threshold_days,
                row.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_freshness(&self) -> Result<Vec<InformationFreshness>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM information_freshness ORDER BY id",
            FRESHNESS_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], map_freshness)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_freshness(
        &self,
        table_name: &str,
        record_id: &str,
    ) -> Result<Option<InformationFreshness>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM information_freshness WHERE table_name=?1 AND record_id=?2",
                    FRESHNESS_COLUMNS
                ),
                params![table_name, record_id],
                map_freshness,
            )
            .optional()?;
        Ok(row)
    }

    /// Stale rows, least fresh first
    pub fn list_stale_freshness(&self, limit: i64) -> Result<Vec<InformationFreshness>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM information_freshness WHERE is_stale=1
             ORDER BY freshness_score ASC LIMIT ?1",
            FRESHNESS_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit], map_freshness)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Store a recomputed score. Skipped if the record was touched since
    /// `seen_last_updated` was read, so a concurrent touch is never undone.
    pub fn update_freshness_score(
        &self,
        id: i64,
        seen_last_updated: Option<DateTime<Utc>>,
        freshness_score: Option<f64>,
        is_stale: bool,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE information_freshness
             SET freshness_score=?1, is_stale=?2, updated_at=?3
             WHERE id=?4 AND last_updated IS ?5",
            params![freshness_score, is_stale, at, id, seen_last_updated],
        )?;
        Ok(changed > 0)
    }

    // ── Market odds & value bets ──────────────────────────────────────────────

    pub fn upsert_market_odds(&self, odds: &MarketOdds) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO market_odds (
                match_id, bookmaker, api_source, home_win_odds, draw_odds, away_win_odds, last_updated
             ) VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(match_id, bookmaker) DO UPDATE SET
                api_source=excluded.api_source,
                home_win_odds=excluded.home_win_odds,
                draw_odds=excluded.draw_odds,
                away_win_odds=excluded.away_win_odds,
                last_updated=excluded.last_updated",
            params![
                odds.match_id,
                odds.bookmaker,
                odds.api_source,
                odds.home_win_odds,
                odds.draw_odds,
                odds.away_win_odds,
                odds.last_updated,
            ],
        )?;
        Ok(())
    }

    pub fn list_market_odds(&self) -> Result<Vec<MarketOdds>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, match_id, bookmaker, api_source, home_win_odds, draw_odds,
                    away_win_odds, last_updated
             FROM market_odds ORDER BY match_id, bookmaker",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(MarketOdds {
                    id: row.get(0)?,
                    match_id: row.get(1)?,
                    bookmaker: row.get(2)?,
                    api_source: row.get(3)?,
                    home_win_odds: row.get(4)?,
                    draw_odds: row.get(5)?,
                    away_win_odds: row.get(6)?,
                    last_updated: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn upsert_value_bet(&self, bet: &ValueBet) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO value_bets (
                match_id, bet_type, bookmaker, bookmaker_odds, model_probability,
                implied_probability, expected_value, kelly_fraction, confidence_level,
                is_active, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
             ON CONFLICT(match_id, bet_type, bookmaker) DO UPDATE SET
                bookmaker_odds=excluded.bookmaker_odds,
                model_probability=excluded.model_probability,
                implied_probability=excluded.implied_probability,
                expected_value=excluded.expected_value,
                kelly_fraction=excluded.kelly_fraction,
                confidence_level=excluded.confidence_level,
                is_active=excluded.is_active,
                updated_at=excluded.updated_at",
            params![
                bet.match_id,
                bet.bet_type,
                bet.bookmaker,
                bet.bookmaker_odds,
                bet.model_probability,
                bet.implied_probability,
                bet.expected_value,
                bet.kelly_fraction,
                bet.confidence_level,
                bet.is_active,
                bet.updated_at,
            ],
        )?;
        Ok(())
    }

    /// All value bets, best expected value first
    pub fn list_value_bets(&self, limit: i64) -> Result<Vec<ValueBet>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, match_id, bet_type, bookmaker, bookmaker_odds, model_probability,
                    implied_probability, expected_value, kelly_fraction, confidence_level,
                    is_active, updated_at
             FROM value_bets ORDER BY expected_value DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(ValueBet {
                    id: row.get(0)?,
                    match_id: row.get(1)?,
                    bet_type: row.get(2)?,
                    bookmaker: row.get(3)?,
                    bookmaker_odds: row.get(4)?,
                    model_probability: row.get(5)?,
                    implied_probability: row.get(6)?,
                    expected_value: row.get(7)?,
                    kelly_fraction: row.get(8)?,
                    confidence_level: row.get(9)?,
                    is_active: row.get(10)?,
                    updated_at: row.get(11)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Feature experiments ───────────────────────────────────────────────────

    pub fn insert_experiment(&self, exp: &FeatureExperiment) -> Result<i64> {
        let base = serde_json::to_string(&exp.base_features)?;
        let generated = serde_json::to_string(&exp.generated_feature)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO feature_experiments (
                experiment_name, feature_type, feature_expression, base_features,
                generated_feature, test_start_date, test_end_date, sample_size,
                control_accuracy, test_accuracy, improvement_delta, p_value,
                statistical_significance, is_active, is_approved, created_at, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            params![
                exp.experiment_name,
                exp.feature_type,
                exp.feature_expression,
                base,
                generated,
                exp.test_start_date,
                exp.test_end_date,
                exp.sample_size,
                exp.control_accuracy,
                exp.test_accuracy,
                exp.improvement_delta,
                exp.p_value,
                exp.statistical_significance,
                exp.is_active,
                exp.is_approved,
                exp.created_at,
                exp.updated_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Persist the lifecycle fields of an existing experiment
    pub fn update_experiment(&self, exp: &FeatureExperiment) -> Result<()> {
        let id = exp
            .id
            .ok_or_else(|| anyhow!("cannot update an experiment without an id"))?;
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feature_experiments SET
                test_end_date=?1, sample_size=?2, control_accuracy=?3, test_accuracy=?4,
                improvement_delta=?5, p_value=?6, statistical_significance=?7,
                is_active=?8, is_approved=?9, updated_at=?10
             WHERE id=?11",
            params![
                exp.test_end_date,
                exp.sample_size,
                exp.control_accuracy,
                exp.test_accuracy,
                exp.improvement_delta,
                exp.p_value,
                exp.statistical_significance,
                exp.is_active,
                exp.is_approved,
                exp.updated_at,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn get_experiment(&self, id: i64) -> Result<Option<FeatureExperiment>> {
        let conn = self.conn()?;
        let exp = conn
            .query_row(
                &format!("SELECT {} FROM feature_experiments WHERE id=?1", EXPERIMENT_COLUMNS),
                params![id],
                map_experiment,
            )
            .optional()?;
        Ok(exp)
    }

    /// Newest first
    pub fn list_experiments(&self, active_only: bool) -> Result<Vec<FeatureExperiment>> {
        let conn = self.conn()?;
        let sql = if active_only {
            format!(
                "SELECT {} FROM feature_experiments WHERE is_active=1 ORDER BY created_at DESC, id DESC",
                EXPERIMENT_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM feature_experiments ORDER BY created_at DESC, id DESC",
                EXPERIMENT_COLUMNS
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], map_experiment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

impl ToSql for Outcome {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Outcome {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse::<Outcome>()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for VoteSource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for VoteSource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse::<VoteSource>()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

fn parse_json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_model_vote(row: &rusqlite::Row) -> rusqlite::Result<ModelVote> {
    Ok(ModelVote {
        match_id: row.get(0)?,
        source: row.get(1)?,
        predicted_outcome: row.get(2)?,
        confidence: row.get(3)?,
        created_at: row.get(4)?,
    })
}

const PREDICTION_COLUMNS: &str = "id, match_id, predicted_outcome, confidence_score,
    ensemble_breakdown, model_version, blocked_reason, actual_outcome, was_correct,
    calibration_error, overconfidence_flag, evaluated_at, created_at, updated_at";

fn map_prediction(row: &rusqlite::Row) -> rusqlite::Result<Prediction> {
    let breakdown: Option<String> = row.get(4)?;
    Ok(Prediction {
        id: row.get(0)?,
        match_id: row.get(1)?,
        predicted_outcome: row.get(2)?,
        confidence_score: row.get(3)?,
        ensemble_breakdown: breakdown
            .as_deref()
            .map(|raw| parse_json_column(4, raw))
            .transpose()?,
        model_version: row.get(5)?,
        blocked_reason: row.get(6)?,
        actual_outcome: row.get(7)?,
        was_correct: row.get(8)?,
        calibration_error: row.get(9)?,
        overconfidence_flag: row.get(10)?,
        evaluated_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

const FRESHNESS_COLUMNS: &str = "id, table_name, record_id, data_type, last_updated,
    decay_rate, freshness_score, is_stale, stale_threshold_days, updated_at";

fn map_freshness(row: &rusqlite::Row) -> rusqlite::Result<InformationFreshness> {
    Ok(InformationFreshness {
        id: row.get(0)?,
        table_name: row.get(1)?,
        record_id: row.get(2)?,
        data_type: row.get(3)?,
        last_updated: row.get(4)?,
        decay_rate: row.get(5)?,
        freshness_score: row.get(6)?,
        is_stale: row.get(7)?,
        stale_threshold_days: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const EXPERIMENT_COLUMNS: &str = "id, experiment_name, feature_type, feature_expression,
    base_features, generated_feature, test_start_date, test_end_date, sample_size,
    control_accuracy, test_accuracy, improvement_delta, p_value, statistical_significance,
    is_active, is_approved, created_at, updated_at";

fn map_experiment(row: &rusqlite::Row) -> rusqlite::Result<FeatureExperiment> {
    let base: String = row.get(4)?;
    let generated: String = row.get(5)?;
    Ok(FeatureExperiment {
        id: row.get(0)?,
        experiment_name: row.get(1)?,
        feature_type: row.get(2)?,
        feature_expression: row.get(3)?,
        base_features: parse_json_column(4, &base)?,
        generated_feature: parse_json_column(5, &generated)?,
        test_start_date: row.get(6)?,
        test_end_date: row.get(7)?,
        sample_size: row.get(8)?,
        control_accuracy: row.get(9)?,
        test_accuracy: row.get(10)?,
        improvement_delta: row.get(11)?,
        p_value: row.get(12)?,
        statistical_significance: row.get(13)?,
        is_active: row.get(14)?,
        is_approved: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS model_votes (
    match_id          TEXT    NOT NULL,
    source            TEXT    NOT NULL,
    predicted_outcome TEXT    NOT NULL,
    confidence        REAL    NOT NULL,
    created_at        TEXT    NOT NULL,
    PRIMARY KEY (match_id, source)
);

CREATE TABLE IF NOT EXISTS predictions (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id            TEXT    NOT NULL UNIQUE,
    predicted_outcome   TEXT    NOT NULL,
    confidence_score    REAL    NOT NULL,
    ensemble_breakdown  TEXT,
    model_version       TEXT,
    blocked_reason      TEXT,
    actual_outcome      TEXT,
    was_correct         INTEGER,
    calibration_error   REAL,
    overconfidence_flag INTEGER,
    evaluated_at        TEXT,
    created_at          TEXT    NOT NULL,
    updated_at          TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS ensemble_runs (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id         TEXT    NOT NULL,
    breakdown        TEXT    NOT NULL,
    model_weights    TEXT    NOT NULL,
    confidence_score REAL    NOT NULL,
    created_at       TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS user_predictions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id          TEXT    NOT NULL,
    user_id           TEXT    NOT NULL,
    predicted_outcome TEXT    NOT NULL,
    confidence_score  REAL    NOT NULL,
    reasoning         TEXT,
    created_at        TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS crowd_wisdom (
    match_id                  TEXT    PRIMARY KEY,
    total_predictions         INTEGER NOT NULL DEFAULT 0,
    home_win_predictions      INTEGER NOT NULL DEFAULT 0,
    draw_predictions          INTEGER NOT NULL DEFAULT 0,
    away_win_predictions      INTEGER NOT NULL DEFAULT 0,
    consensus_prediction      TEXT,
    consensus_confidence      REAL    NOT NULL DEFAULT 0,
    average_confidence        REAL    NOT NULL DEFAULT 0,
    model_vs_crowd_divergence REAL,
    last_calculated_at        TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS information_freshness (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name           TEXT    NOT NULL,
    record_id            TEXT    NOT NULL,
    data_type            TEXT    NOT NULL,
    last_updated         TEXT,
    decay_rate           REAL    NOT NULL,
    freshness_score      REAL,
    is_stale             INTEGER NOT NULL DEFAULT 0,
    stale_threshold_days REAL    NOT NULL,
    updated_at           TEXT    NOT NULL,
    UNIQUE (table_name, record_id)
);

CREATE TABLE IF NOT EXISTS market_odds (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id      TEXT    NOT NULL,
    bookmaker     TEXT    NOT NULL,
    api_source    TEXT    NOT NULL,
    home_win_odds REAL    NOT NULL,
    draw_odds     REAL    NOT NULL,
    away_win_odds REAL    NOT NULL,
    last_updated  TEXT    NOT NULL,
    UNIQUE (match_id, bookmaker)
);

CREATE TABLE IF NOT EXISTS value_bets (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id            TEXT    NOT NULL,
    bet_type            TEXT    NOT NULL,
    bookmaker           TEXT    NOT NULL,
    bookmaker_odds      REAL    NOT NULL,
    model_probability   REAL    NOT NULL,
    implied_probability REAL    NOT NULL,
    expected_value      REAL    NOT NULL,
    kelly_fraction      REAL    NOT NULL,
    confidence_level    TEXT    NOT NULL,
    is_active           INTEGER NOT NULL DEFAULT 1,
    updated_at          TEXT    NOT NULL,
    UNIQUE (match_id, bet_type, bookmaker)
);

CREATE TABLE IF NOT EXISTS feature_experiments (
    id                       INTEGER PRIMARY KEY AUTOINCREMENT,
    experiment_name          TEXT    NOT NULL,
    feature_type             TEXT    NOT NULL,
    feature_expression       TEXT    NOT NULL,
    base_features            TEXT    NOT NULL DEFAULT '{}',
    generated_feature        TEXT    NOT NULL DEFAULT '{}',
    test_start_date          TEXT    NOT NULL,
    test_end_date            TEXT,
    sample_size              INTEGER NOT NULL DEFAULT 0,
    control_accuracy         REAL,
    test_accuracy            REAL,
    improvement_delta        REAL,
    p_value                  REAL,
    statistical_significance INTEGER NOT NULL DEFAULT 0,
    is_active                INTEGER NOT NULL DEFAULT 1,
    is_approved              INTEGER NOT NULL DEFAULT 0,
    created_at               TEXT    NOT NULL,
    updated_at               TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_user_predictions_match ON user_predictions(match_id);
CREATE INDEX IF NOT EXISTS idx_ensemble_runs_match ON ensemble_runs(match_id);
CREATE INDEX IF NOT EXISTS idx_freshness_stale ON information_freshness(is_stale, freshness_score);
CREATE INDEX IF NOT EXISTS idx_value_bets_ev ON value_bets(expected_value);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn db() -> Database {
        Database::open(":memory:").unwrap()
    }

    fn prediction(match_id: &str, outcome: Outcome, confidence: f64) -> Prediction {
        let now = Utc::now();
        Prediction {
            id: None,
            match_id: match_id.into(),
            predicted_outcome: outcome,
            confidence_score: confidence,
            ensemble_breakdown: None,
            model_version: Some("v-test".into()),
            blocked_reason: None,
            actual_outcome: None,
            was_correct: None,
            calibration_error: None,
            overconfidence_flag: None,
            evaluated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn prediction_upsert_replaces_until_evaluated() {
        let db = db();
        assert!(db.upsert_prediction(&prediction("m1", Outcome::Home, 0.6)).unwrap());
        assert!(db.upsert_prediction(&prediction("m1", Outcome::Away, 0.7)).unwrap());
        let p = db.get_prediction("m1").unwrap().unwrap();
        assert_eq!(p.predicted_outcome, Outcome::Away);

        let mut evaluated = p.clone();
        evaluated.actual_outcome = Some(Outcome::Away);
        evaluated.was_correct = Some(true);
        evaluated.evaluated_at = Some(Utc::now());
        assert!(db.save_evaluation(&evaluated).unwrap());
        assert!(!db.save_evaluation(&evaluated).unwrap());

        assert!(!db.upsert_prediction(&prediction("m1", Outcome::Draw, 0.9)).unwrap());
        let p = db.get_prediction("m1").unwrap().unwrap();
        assert_eq!(p.predicted_outcome, Outcome::Away);
        assert_eq!(p.was_correct, Some(true));
    }

    #[test]
    fn identical_prediction_is_not_rewritten() {
        let db = db();
        let first = prediction("m1", Outcome::Home, 0.6);
        assert!(db.upsert_prediction(&first).unwrap());

        let mut again = first.clone();
        again.updated_at = first.updated_at + Duration::minutes(5);
        assert!(!db.upsert_prediction(&again).unwrap());
        let stored = db.get_prediction("m1").unwrap().unwrap();
        assert_eq!(stored.updated_at, first.updated_at);
    }

    #[test]
    fn pending_matches_only_include_newer_votes() {
        let db = db();
        let t0 = Utc::now();
        let mut vote = ModelVote {
            match_id: "m1".into(),
            source: VoteSource::FullTime,
            predicted_outcome: Outcome::Home,
            confidence: 0.8,
            created_at: t0,
        };
        db.upsert_model_vote(&vote).unwrap();
        assert_eq!(db.list_pending_vote_matches().unwrap(), vec!["m1".to_string()]);

        let mut p = prediction("m1", Outcome::Home, 1.0);
        p.updated_at = t0 + Duration::seconds(1);
        db.upsert_prediction(&p).unwrap();
        assert!(db.list_pending_vote_matches().unwrap().is_empty());

        vote.created_at = t0 + Duration::seconds(2);
        db.upsert_model_vote(&vote).unwrap();
        assert_eq!(db.list_pending_vote_matches().unwrap(), vec!["m1".to_string()]);
    }

    #[test]
    fn model_votes_upsert_by_source() {
        let db = db();
        let mut vote = ModelVote {
            match_id: "m1".into(),
            source: VoteSource::FullTime,
            predicted_outcome: Outcome::Home,
            confidence: 0.8,
            created_at: Utc::now(),
        };
        db.upsert_model_vote(&vote).unwrap();
        vote.predicted_outcome = Outcome::Draw;
        db.upsert_model_vote(&vote).unwrap();
        let votes = db.list_votes_for_match("m1").unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].predicted_outcome, Outcome::Draw);
        assert_eq!(db.list_pending_vote_matches().unwrap(), vec!["m1".to_string()]);
    }

    #[test]
    fn touch_resets_freshness_but_keeps_decay_parameters() {
        let db = db();
        let t0 = Utc::now() - Duration::days(3);
        db.touch_freshness("market_odds", "m1:bet365", "odds", 0.2, 2.0, t0)
            .unwrap();
        let row = db.get_freshness("market_odds", "m1:bet365").unwrap().unwrap();
        assert!(db
            .update_freshness_score(row.id.unwrap(), row.last_updated, Some(0.4), true, Utc::now())
            .unwrap());
        assert_eq!(db.list_stale_freshness(10).unwrap().len(), 1);

        db.touch_freshness("market_odds", "m1:bet365", "odds", 0.9, 9.0, Utc::now())
            .unwrap();
        let row = db.get_freshness("market_odds", "m1:bet365").unwrap().unwrap();
        assert_eq!(row.decay_rate, 0.2);
        assert_eq!(row.freshness_score, Some(1.0));
        assert!(!row.is_stale);
    }

    #[test]
    fn score_update_skipped_after_concurrent_touch() {
        let db = db();
        let t0 = Utc::now() - Duration::days(3);
        db.touch_freshness("market_odds", "r", "odds", 0.2, 2.0, t0).unwrap();
        let row = db.get_freshness("market_odds", "r").unwrap().unwrap();
        db.touch_freshness("market_odds", "r", "odds", 0.2, 2.0, Utc::now()).unwrap();
        assert!(!db
            .update_freshness_score(row.id.unwrap(), row.last_updated, Some(0.1), true, Utc::now())
            .unwrap());
    }

    #[test]
    fn experiments_round_trip_json_columns() {
        let db = db();
        let now = Utc::now();
        let exp = FeatureExperiment {
            id: None,
            experiment_name: "form_x_rest".into(),
            feature_type: "interaction".into(),
            feature_expression: "home_form * rest_days".into(),
            base_features: serde_json::json!({"a": "home_form", "b": "rest_days"}),
            generated_feature: serde_json::json!({}),
            test_start_date: now,
            test_end_date: None,
            sample_size: 0,
            control_accuracy: None,
            test_accuracy: None,
            improvement_delta: None,
            p_value: None,
            statistical_significance: false,
            is_active: true,
            is_approved: false,
            created_at: now,
            updated_at: now,
        };
        let id = db.insert_experiment(&exp).unwrap();
        let loaded = db.get_experiment(id).unwrap().unwrap();
        assert_eq!(loaded.base_features["a"], "home_form");
        assert_eq!(db.list_experiments(true).unwrap().len(), 1);
        assert!(db.get_experiment(id + 1).unwrap().is_none());
    }
}
