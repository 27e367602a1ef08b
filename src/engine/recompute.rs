use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::models::{CrowdWisdom, MarketOdds, Prediction, UserPrediction, ValueBet};
use crate::db::Database;

use super::crowd::{self, UserSubmission};
use super::ensemble::{self, EnsembleWeights, Vote};
use super::error::{check_confidence, check_odds, EngineError};
use super::evaluation;
use super::freshness::{self, FreshnessParams};
use super::outcome::{model_probabilities, Outcome, OutcomeScores};
use super::value_bet::{self, ConfidenceThresholds};

/// `information_freshness.table_name` for bookmaker odds rows.
pub const MARKET_ODDS_TABLE: &str = "market_odds";

/// Tunables for the periodic recompute jobs.
#[derive(Debug, Clone)]
pub struct RecomputeSettings {
    pub weights: EnsembleWeights,
    pub conflict_threshold: f64,
    pub model_version: String,
    pub confidence_thresholds: ConfidenceThresholds,
    pub overconfidence_threshold: f64,
    pub default_decay_rate: f64,
    pub default_stale_threshold_days: f64,
}

impl RecomputeSettings {
    pub fn from_config(config: &Config) -> Self {
        RecomputeSettings {
            weights: config.weights(),
            conflict_threshold: config.conflict_threshold,
            model_version: config.model_version.clone(),
            confidence_thresholds: ConfidenceThresholds {
                medium: config.ev_medium_threshold,
                high: config.ev_high_threshold,
            },
            overconfidence_threshold: config.overconfidence_threshold,
            default_decay_rate: config.default_decay_rate,
            default_stale_threshold_days: config.default_stale_threshold_days,
        }
    }
}

impl Default for RecomputeSettings {
    fn default() -> Self {
        RecomputeSettings {
            weights: EnsembleWeights::default(),
            conflict_threshold: super::conflict::DEFAULT_CONFLICT_THRESHOLD,
            model_version: "ensemble-v1".into(),
            confidence_thresholds: ConfidenceThresholds::default(),
            overconfidence_threshold: evaluation::DEFAULT_OVERCONFIDENCE_THRESHOLD,
            default_decay_rate: 0.1,
            default_stale_threshold_days: 7.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FreshnessSummary {
    pub scored: usize,
    pub stale: usize,
    /// Rows without `last_updated`
    pub unknown: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub predictions_written: usize,
    pub predictions_skipped: usize,
    pub freshness: FreshnessSummary,
    pub value_bets_written: usize,
    pub crowds_written: usize,
}

/// What `Recomputer::recompute_prediction` did for a match.
#[derive(Debug, Clone)]
pub enum PredictionUpdate {
    /// A new or changed prediction was stored and an ensemble run recorded.
    Written(Prediction),
    /// The stored prediction already matches the current votes.
    Unchanged(Prediction),
    /// Nothing to store: votes are insufficient or the match is evaluated.
    Skipped,
}

impl PredictionUpdate {
    pub fn prediction(self) -> Option<Prediction> {
        match self {
            PredictionUpdate::Written(p) | PredictionUpdate::Unchanged(p) => Some(p),
            PredictionUpdate::Skipped => None,
        }
    }
}

/// Runs the scoring engine against the record store.
///
/// Each method reads one entity's inputs, computes a complete replacement
/// record with the pure functions in `engine`, and writes it with a single
/// upsert. Records for different matches are independent.
#[derive(Clone)]
pub struct Recomputer {
    settings: RecomputeSettings,
    db: Database,
}

impl Recomputer {
    pub fn new(settings: RecomputeSettings, db: Database) -> Self {
        Recomputer { settings, db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// One scheduler tick: predictions, freshness, value bets, crowds.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let (predictions_written, predictions_skipped) = self.recompute_predictions(now)?;
        let freshness = self.refresh_freshness(now)?;
        let value_bets_written = self.recompute_value_bets(now)?;
        let crowds_written = self.recompute_all_crowds(now)?;
        let summary = TickSummary {
            predictions_written,
            predictions_skipped,
            freshness,
            value_bets_written,
            crowds_written,
        };
        info!(
            "Recompute tick: {} prediction(s) written, {} skipped, {} freshness row(s) scored ({} stale), {} value bet(s), {} crowd aggregate(s)",
            summary.predictions_written,
            summary.predictions_skipped,
            summary.freshness.scored,
            summary.freshness.stale,
            summary.value_bets_written,
            summary.crowds_written
        );
        Ok(summary)
    }

    // ── Ensemble predictions ─────────────────────────────────────────────────

    /// Aggregate the stored votes for a match into its prediction.
    ///
    /// Writes nothing when the votes are insufficient, the prediction has
    /// already been evaluated, or the result equals what is stored.
    pub fn recompute_prediction(
        &self,
        match_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PredictionUpdate> {
        let existing = self.db.get_prediction(match_id)?;
        if existing.as_ref().is_some_and(|p| p.evaluated_at.is_some()) {
            debug!("Prediction for match {} already evaluated; left untouched", match_id);
            return Ok(PredictionUpdate::Skipped);
        }

        let votes: Vec<Vote> = self
            .db
            .list_votes_for_match(match_id)?
            .into_iter()
            .map(|v| Vote {
                source: v.source,
                prediction: v.predicted_outcome,
                confidence: v.confidence,
            })
            .collect();

        let breakdown = match ensemble::aggregate(
            &votes,
            &self.settings.weights,
            self.settings.conflict_threshold,
        ) {
            Ok(b) => b,
            Err(EngineError::InsufficientVotes(reason)) => {
                warn!("No prediction for match {}: {}", match_id, reason);
                return Ok(PredictionUpdate::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        let blocked_reason = breakdown.conflict_margin.map(|margin| {
            format!(
                "ensemble conflict: top outcomes within {:.4} (threshold {:.2} of total)",
                margin, self.settings.conflict_threshold
            )
        });

        let prediction = Prediction {
            id: None,
            match_id: match_id.to_string(),
            predicted_outcome: breakdown.winner,
            confidence_score: breakdown.final_confidence,
            ensemble_breakdown: Some(breakdown.clone()),
            model_version: Some(self.settings.model_version.clone()),
            blocked_reason,
            actual_outcome: None,
            was_correct: None,
            calibration_error: None,
            overconfidence_flag: None,
            evaluated_at: None,
            created_at: existing.as_ref().map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };

        if !self.db.upsert_prediction(&prediction)? {
            // Either identical content or evaluated since the read above.
            return Ok(match self.db.get_prediction(match_id)? {
                Some(stored) if stored.evaluated_at.is_none() => PredictionUpdate::Unchanged(stored),
                _ => PredictionUpdate::Skipped,
            });
        }
        self.db.insert_ensemble_run(match_id, &breakdown, now)?;
        if breakdown.conflict_detected {
            info!(
                "Match {}: {} at {:.3} with ensemble conflict",
                match_id, breakdown.winner, breakdown.final_confidence
            );
        }
        Ok(PredictionUpdate::Written(prediction))
    }

    /// Returns `(written, skipped)`. Unchanged predictions count as skipped.
    pub fn recompute_predictions(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let mut written = 0;
        let mut skipped = 0;
        for match_id in self.db.list_pending_vote_matches()? {
            match self.recompute_prediction(&match_id, now) {
                Ok(PredictionUpdate::Written(_)) => written += 1,
                Ok(_) => skipped += 1,
                Err(e) => {
                    warn!("Prediction recompute failed for match {}: {}", match_id, e);
                    skipped += 1;
                }
            }
        }
        Ok((written, skipped))
    }

    /// Attach the final result to a match's prediction.
    pub fn resolve_match(
        &self,
        match_id: &str,
        actual: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Option<Prediction>> {
        let Some(mut prediction) = self.db.get_prediction(match_id)? else {
            return Ok(None);
        };
        if prediction.evaluated_at.is_some() {
            return Err(EngineError::InvalidTransition {
                from: "evaluated".into(),
                to: "re-evaluated".into(),
            }
            .into());
        }
        let eval = evaluation::evaluate(
            prediction.predicted_outcome,
            prediction.confidence_score,
            actual,
            self.settings.overconfidence_threshold,
        )?;
        prediction.actual_outcome = Some(actual);
        prediction.was_correct = Some(eval.was_correct);
        prediction.calibration_error = Some(eval.calibration_error);
        prediction.overconfidence_flag = Some(eval.overconfidence_flag);
        prediction.evaluated_at = Some(now);
        prediction.updated_at = now;

        if !self.db.save_evaluation(&prediction)? {
            return Err(anyhow!("prediction for match {} was evaluated concurrently", match_id));
        }
        info!(
            "Match {} resolved {}: predicted {} ({})",
            match_id,
            actual,
            prediction.predicted_outcome,
            if eval.was_correct { "correct" } else { "wrong" }
        );
        if eval.overconfidence_flag {
            warn!(
                "Overconfident miss on match {} at confidence {:.3}",
                match_id, prediction.confidence_score
            );
        }
        Ok(Some(prediction))
    }

    /// Per-outcome model probabilities for a match, if it has a prediction.
    fn model_probabilities_for(&self, match_id: &str) -> Result<Option<OutcomeScores>> {
        Ok(self.db.get_prediction(match_id)?.map(|p| {
            model_probabilities(
                p.predicted_outcome,
                p.confidence_score,
                p.ensemble_breakdown.as_ref().map(|b| &b.scores),
            )
        }))
    }

    // ── Crowd wisdom ─────────────────────────────────────────────────────────

    pub fn recompute_crowd(&self, match_id: &str, now: DateTime<Utc>) -> Result<CrowdWisdom> {
        let submissions: Vec<UserSubmission> = self
            .db
            .list_user_predictions(match_id)?
            .into_iter()
            .map(|u| UserSubmission {
                id: u.id.map(|id| format!("{:020}", id)).unwrap_or_default(),
                predicted_outcome: u.predicted_outcome,
                confidence: u.confidence_score,
                created_at: u.created_at,
            })
            .collect();
        let model = self.model_probabilities_for(match_id)?;
        let consensus = crowd::consolidate(&submissions, model.as_ref())?;

        let cw = CrowdWisdom {
            match_id: match_id.to_string(),
            total_predictions: consensus.total_predictions,
            home_win_predictions: consensus.home_win_predictions,
            draw_predictions: consensus.draw_predictions,
            away_win_predictions: consensus.away_win_predictions,
            consensus_prediction: consensus.consensus_prediction,
            consensus_confidence: consensus.consensus_confidence,
            average_confidence: consensus.average_confidence,
            model_vs_crowd_divergence: consensus.model_vs_crowd_divergence,
            last_calculated_at: now,
        };
        self.db.upsert_crowd_wisdom(&cw)?;
        Ok(cw)
    }

    pub fn recompute_all_crowds(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut written = 0;
        for match_id in self.db.list_user_prediction_matches()? {
            match self.recompute_crowd(&match_id, now) {
                Ok(_) => written += 1,
                Err(e) => warn!("Crowd recompute failed for match {}: {}", match_id, e),
            }
        }
        Ok(written)
    }

    /// Validate and store a user prediction, then refresh that match's crowd.
    pub fn submit_user_prediction(&self, up: &UserPrediction) -> Result<CrowdWisdom> {
        check_confidence(up.confidence_score)?;
        self.db.insert_user_prediction(up)?;
        self.recompute_crowd(&up.match_id, up.created_at)
    }

    // ── Freshness ────────────────────────────────────────────────────────────

    /// Rescore every tracked record.
    ///
    /// The stored score never rises while `last_updated` is unchanged, so a
    /// clock step backwards cannot make old data look fresher.
    pub fn refresh_freshness(&self, now: DateTime<Utc>) -> Result<FreshnessSummary> {
        let mut summary = FreshnessSummary::default();
        for row in self.db.list_freshness()? {
            let Some(id) = row.id else { continue };
            let params = FreshnessParams {
                decay_rate: row.decay_rate,
                stale_threshold_days: row.stale_threshold_days,
            };
            let (score, is_stale) = match freshness::score(
                &row.table_name,
                &row.record_id,
                row.last_updated,
                params,
                now,
            ) {
                Ok(reading) => {
                    let score = match row.freshness_score {
                        Some(prev) => reading.freshness_score.min(prev),
                        None => reading.freshness_score,
                    };
                    summary.scored += 1;
                    if reading.is_stale {
                        summary.stale += 1;
                    }
                    (Some(score), reading.is_stale)
                }
                Err(EngineError::MissingFreshnessData { .. }) => {
                    summary.unknown += 1;
                    (None, false)
                }
                Err(e) => {
                    warn!(
                        "Freshness for {}/{} not scored: {}",
                        row.table_name, row.record_id, e
                    );
                    continue;
                }
            };
            if !self
                .db
                .update_freshness_score(id, row.last_updated, score, is_stale, now)?
            {
                debug!(
                    "{}/{} was touched during the tick; keeping the new timestamp",
                    row.table_name, row.record_id
                );
            }
        }
        Ok(summary)
    }

    // ── Market odds & value bets ─────────────────────────────────────────────

    /// Store bookmaker odds and mark them fresh.
    pub fn record_market_odds(&self, odds: &MarketOdds) -> Result<()> {
        for o in Outcome::ALL {
            check_odds(odds.odds_for(o))?;
        }
        self.db.upsert_market_odds(odds)?;
        self.db.touch_freshness(
            MARKET_ODDS_TABLE,
            &odds.record_id(),
            "odds",
            self.settings.default_decay_rate,
            self.settings.default_stale_threshold_days,
            odds.last_updated,
        )?;
        Ok(())
    }

    /// Price every (match, outcome, bookmaker) that has both odds and a
    /// prediction. Bets on stale odds are written inactive.
    pub fn recompute_value_bets(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut written = 0;
        for odds in self.db.list_market_odds()? {
            let Some(probs) = self.model_probabilities_for(&odds.match_id)? else {
                continue;
            };
            let is_active = match self.db.get_freshness(MARKET_ODDS_TABLE, &odds.record_id())? {
                Some(f) => !f.is_stale,
                None => true,
            };

            for outcome in Outcome::ALL {
                let eval = match value_bet::evaluate(
                    probs.get(outcome),
                    odds.odds_for(outcome),
                    self.settings.confidence_thresholds,
                ) {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(
                            "Skipping {} {} @ {}: {}",
                            odds.match_id, outcome, odds.bookmaker, e
                        );
                        continue;
                    }
                };
                let bet = ValueBet {
                    id: None,
                    match_id: odds.match_id.clone(),
                    bet_type: outcome.as_str().to_string(),
                    bookmaker: odds.bookmaker.clone(),
                    bookmaker_odds: eval.bookmaker_odds,
                    model_probability: eval.model_probability,
                    implied_probability: eval.implied_probability,
                    expected_value: eval.expected_value,
                    kelly_fraction: eval.kelly_fraction,
                    confidence_level: eval.confidence_level.as_str().to_string(),
                    is_active,
                    updated_at: now,
                };
                self.db.upsert_value_bet(&bet)?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Bets worth showing: active and strictly above `min_expected_value`.
    pub fn surfaced_value_bets(&self, min_expected_value: f64, limit: usize) -> Result<Vec<ValueBet>> {
        let bets = self
            .db
            .list_value_bets(i64::MAX)?
            .into_iter()
            .filter(|b| value_bet::is_surfaced(b.expected_value, b.is_active, min_expected_value))
            .take(limit)
            .collect();
        Ok(bets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ModelVote;
    use crate::engine::ensemble::VoteSource;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn setup() -> Recomputer {
        let db = Database::open(":memory:").unwrap();
        Recomputer::new(RecomputeSettings::default(), db)
    }

    fn add_vote(r: &Recomputer, match_id: &str, source: VoteSource, o: Outcome, c: f64) {
        r.db()
            .upsert_model_vote(&ModelVote {
                match_id: match_id.into(),
                source,
                predicted_outcome: o,
                confidence: c,
                created_at: Utc::now(),
            })
            .unwrap();
    }

    fn add_reference_votes(r: &Recomputer, match_id: &str) {
        add_vote(r, match_id, VoteSource::FullTime, Outcome::Home, 0.8);
        add_vote(r, match_id, VoteSource::HalfTime, Outcome::Home, 0.6);
        add_vote(r, match_id, VoteSource::Pattern, Outcome::Draw, 0.9);
    }

    fn odds(match_id: &str, home: f64, draw: f64, away: f64, at: DateTime<Utc>) -> MarketOdds {
        MarketOdds {
            id: None,
            match_id: match_id.into(),
            bookmaker: "pinnacle".into(),
            api_source: "odds-api".into(),
            home_win_odds: home,
            draw_odds: draw,
            away_win_odds: away,
            last_updated: at,
        }
    }

    fn user(match_id: &str, user_id: &str, o: Outcome, c: f64, at: DateTime<Utc>) -> UserPrediction {
        UserPrediction {
            id: None,
            match_id: match_id.into(),
            user_id: user_id.into(),
            predicted_outcome: o,
            confidence_score: c,
            reasoning: None,
            created_at: at,
        }
    }

    #[test]
    fn prediction_written_from_votes() {
        let r = setup();
        add_reference_votes(&r, "m1");
        let p = r.recompute_prediction("m1", Utc::now()).unwrap().prediction().unwrap();
        assert_eq!(p.predicted_outcome, Outcome::Home);
        assert_relative_eq!(p.confidence_score, 0.58 / 0.76, epsilon = 1e-9);
        assert!(p.blocked_reason.is_none());

        let stored = r.db().get_prediction("m1").unwrap().unwrap();
        let b = stored.ensemble_breakdown.unwrap();
        assert_relative_eq!(b.scores.home, 0.58, epsilon = 1e-9);
        assert_eq!(r.db().list_ensemble_runs("m1", 10).unwrap().len(), 1);
    }

    #[test]
    fn insufficient_votes_write_nothing() {
        let r = setup();
        add_vote(&r, "m2", VoteSource::FullTime, Outcome::Away, 0.0);
        assert!(r.recompute_prediction("m2", Utc::now()).unwrap().prediction().is_none());
        assert!(r.db().get_prediction("m2").unwrap().is_none());
        assert_eq!(r.recompute_predictions(Utc::now()).unwrap(), (0, 1));
    }

    #[test]
    fn evaluated_prediction_is_frozen() {
        let r = setup();
        add_reference_votes(&r, "m1");
        r.recompute_prediction("m1", Utc::now()).unwrap();
        let resolved = r.resolve_match("m1", Outcome::Draw, Utc::now()).unwrap().unwrap();
        assert_eq!(resolved.was_correct, Some(false));
        assert_eq!(resolved.overconfidence_flag, Some(true));

        add_vote(&r, "m1", VoteSource::FullTime, Outcome::Draw, 0.99);
        assert!(matches!(
            r.recompute_prediction("m1", Utc::now()).unwrap(),
            PredictionUpdate::Skipped
        ));
        assert!(r.resolve_match("m1", Outcome::Home, Utc::now()).is_err());
        assert!(r.db().list_pending_vote_matches().unwrap().is_empty());
    }

    #[test]
    fn idle_ticks_leave_prediction_untouched() {
        let r = setup();
        let t0 = Utc::now();
        add_vote(&r, "m1", VoteSource::FullTime, Outcome::Home, 0.8);
        add_vote(&r, "m1", VoteSource::Pattern, Outcome::Draw, 0.9);

        let first_tick = t0 + Duration::seconds(1);
        assert_eq!(r.recompute_predictions(first_tick).unwrap(), (1, 0));
        for minute in 1..=10 {
            let (written, _) = r
                .recompute_predictions(first_tick + Duration::minutes(minute))
                .unwrap();
            assert_eq!(written, 0);
        }
        assert!(matches!(
            r.recompute_prediction("m1", first_tick + Duration::minutes(11))
                .unwrap(),
            PredictionUpdate::Unchanged(_)
        ));

        assert_eq!(r.db().list_ensemble_runs("m1", 100).unwrap().len(), 1);
        let stored = r.db().get_prediction("m1").unwrap().unwrap();
        assert_eq!(stored.updated_at, first_tick);
    }

    #[test]
    fn changed_vote_is_picked_up_by_next_tick() {
        let r = setup();
        let t0 = Utc::now();
        add_vote(&r, "m1", VoteSource::FullTime, Outcome::Home, 0.8);
        r.recompute_predictions(t0 + Duration::seconds(1)).unwrap();

        r.db()
            .upsert_model_vote(&ModelVote {
                match_id: "m1".into(),
                source: VoteSource::FullTime,
                predicted_outcome: Outcome::Away,
                confidence: 0.7,
                created_at: t0 + Duration::seconds(2),
            })
            .unwrap();
        assert_eq!(r.recompute_predictions(t0 + Duration::seconds(3)).unwrap(), (1, 0));
        let stored = r.db().get_prediction("m1").unwrap().unwrap();
        assert_eq!(stored.predicted_outcome, Outcome::Away);
        assert_eq!(r.db().list_ensemble_runs("m1", 100).unwrap().len(), 2);
    }

    #[test]
    fn resolve_unknown_match_is_none() {
        let r = setup();
        assert!(r.resolve_match("nope", Outcome::Home, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn crowd_recompute_is_idempotent() {
        let r = setup();
        add_reference_votes(&r, "m1");
        r.recompute_prediction("m1", Utc::now()).unwrap();
        let t = Utc::now();
        r.submit_user_prediction(&user("m1", "u1", Outcome::Home, 0.7, t)).unwrap();
        r.submit_user_prediction(&user("m1", "u2", Outcome::Away, 0.9, t + Duration::seconds(1)))
            .unwrap();
        let cw = r
            .submit_user_prediction(&user("m1", "u3", Outcome::Home, 0.6, t + Duration::seconds(2)))
            .unwrap();
        assert_eq!(cw.consensus_prediction, Some(Outcome::Home));
        assert_relative_eq!(cw.consensus_confidence, 2.0 / 3.0, epsilon = 1e-12);
        let divergence = cw.model_vs_crowd_divergence.unwrap();
        assert_relative_eq!(divergence, (0.58 / 0.76 - 2.0 / 3.0f64).abs(), epsilon = 1e-9);

        let again = r.recompute_crowd("m1", t).unwrap();
        assert_eq!(again.average_confidence.to_bits(), cw.average_confidence.to_bits());
        assert_eq!(
            again.model_vs_crowd_divergence.map(f64::to_bits),
            cw.model_vs_crowd_divergence.map(f64::to_bits)
        );
    }

    #[test]
    fn bad_user_confidence_is_rejected_before_storage() {
        let r = setup();
        assert!(r
            .submit_user_prediction(&user("m1", "u1", Outcome::Home, 1.3, Utc::now()))
            .is_err());
        assert!(r.db().list_user_predictions("m1").unwrap().is_empty());
    }

    #[test]
    fn freshness_tick_scores_and_never_increases() {
        let r = setup();
        let now = Utc::now();
        r.db()
            .touch_freshness("market_odds", "m1:pinnacle", "odds", 0.1, 7.0, now - Duration::days(10))
            .unwrap();

        let summary = r.refresh_freshness(now).unwrap();
        assert_eq!(summary, FreshnessSummary { scored: 1, stale: 1, unknown: 0 });
        let row = r.db().get_freshness("market_odds", "m1:pinnacle").unwrap().unwrap();
        assert_relative_eq!(row.freshness_score.unwrap(), (-1.0f64).exp(), epsilon = 1e-6);
        assert!(row.is_stale);

        // clock stepped back: score must not recover
        r.refresh_freshness(now - Duration::days(5)).unwrap();
        let row = r.db().get_freshness("market_odds", "m1:pinnacle").unwrap().unwrap();
        assert_relative_eq!(row.freshness_score.unwrap(), (-1.0f64).exp(), epsilon = 1e-6);
    }

    #[test]
    fn freshness_without_timestamp_is_unknown() {
        let r = setup();
        let now = Utc::now();
        r.db()
            .register_freshness(&crate::db::models::InformationFreshness {
                id: None,
                table_name: "lineups".into(),
                record_id: "m7".into(),
                data_type: "lineup".into(),
                last_updated: None,
                decay_rate: 0.3,
                freshness_score: None,
                is_stale: false,
                stale_threshold_days: 2.0,
                updated_at: now,
            })
            .unwrap();
        let summary = r.refresh_freshness(now).unwrap();
        assert_eq!(summary.unknown, 1);
        let row = r.db().get_freshness("lineups", "m7").unwrap().unwrap();
        assert_eq!(row.freshness_score, None);
        assert!(!row.is_stale);
    }

    #[test]
    fn value_bets_priced_and_surfaced() {
        let r = setup();
        add_reference_votes(&r, "m1");
        let now = Utc::now();
        r.recompute_prediction("m1", now).unwrap();
        // model P(HOME) = 0.58 / 0.76 ≈ 0.763
        r.record_market_odds(&odds("m1", 1.6, 4.0, 6.0, now)).unwrap();

        assert_eq!(r.recompute_value_bets(now).unwrap(), 3);
        let surfaced = r.surfaced_value_bets(0.05, 10).unwrap();
        assert_eq!(surfaced.len(), 1);
        let home = &surfaced[0];
        assert_eq!(home.bet_type, "HOME");
        assert_relative_eq!(home.expected_value, 0.58 / 0.76 * 1.6 - 1.0, epsilon = 1e-9);
        assert!(home.kelly_fraction > 0.0 && home.kelly_fraction <= 1.0);
        assert_eq!(home.confidence_level, "high");
    }

    #[test]
    fn stale_odds_deactivate_bets() {
        let r = setup();
        add_reference_votes(&r, "m1");
        let now = Utc::now();
        r.recompute_prediction("m1", now).unwrap();
        r.record_market_odds(&odds("m1", 1.6, 4.0, 6.0, now - Duration::days(30)))
            .unwrap();
        r.refresh_freshness(now).unwrap();
        r.recompute_value_bets(now).unwrap();

        assert!(r.surfaced_value_bets(0.05, 10).unwrap().is_empty());
        assert!(r.db().list_value_bets(10).unwrap().iter().all(|b| !b.is_active));
    }

    #[test]
    fn invalid_odds_rejected_at_the_boundary() {
        let r = setup();
        let err = r
            .record_market_odds(&odds("m1", 1.0, 3.0, 4.0, Utc::now()))
            .unwrap_err();
        assert_eq!(err.downcast_ref::<EngineError>(), Some(&EngineError::InvalidOdds(1.0)));
        assert!(r.db().list_market_odds().unwrap().is_empty());
    }

    #[test]
    fn full_tick() {
        let r = setup();
        add_reference_votes(&r, "m1");
        let now = Utc::now();
        r.record_market_odds(&odds("m1", 1.6, 4.0, 6.0, now)).unwrap();
        r.db()
            .insert_user_prediction(&user("m1", "u1", Outcome::Draw, 0.5, now))
            .unwrap();
        let s = r.tick(now).unwrap();
        assert_eq!(s.predictions_written, 1);
        assert_eq!(s.freshness.scored, 1);
        assert_eq!(s.value_bets_written, 3);
        assert_eq!(s.crowds_written, 1);
    }
}
