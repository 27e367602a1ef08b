//! Freshness scoring for aging data.
//!
//! A tracked record loses confidence exponentially with age:
//!
//!   freshness = exp(−decay_rate · age_days)
//!
//! where `decay_rate` is a fraction per day. A record is stale once its age
//! strictly exceeds `stale_threshold_days`. Scheduling of the recompute tick
//! lives in `engine::recompute`; this module only answers "how fresh is it
//! right now".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

/// Score above which a non-stale record is reported as fresh.
pub const FRESH_SCORE_CUTOFF: f64 = 0.7;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessParams {
    /// Fraction of confidence lost per day (e.g. 0.1 = 10%/day).
    pub decay_rate: f64,
    pub stale_threshold_days: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FreshnessReading {
    pub age_days: f64,
    pub freshness_score: f64,
    pub is_stale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessStatus {
    Fresh,
    Aging,
    Stale,
    /// No `last_updated` on the record.
    Unknown,
}

/// Fractional days between `last_updated` and `now`. Negative when the
/// record claims to be from the future.
pub fn age_days(last_updated: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - last_updated).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY
}

/// Decay-adjusted score for a record of the given age, clamped to [0, 1].
/// Ages at or below zero score exactly 1.0.
pub fn decay_score(decay_rate: f64, age_days: f64) -> f64 {
    if age_days <= 0.0 {
        return 1.0;
    }
    (-decay_rate * age_days).exp().clamp(0.0, 1.0)
}

/// Score a record. `last_updated = None` is reported as
/// `MissingFreshnessData` so callers can treat it as "no data", never as stale.
pub fn score(
    table_name: &str,
    record_id: &str,
    last_updated: Option<DateTime<Utc>>,
    params: FreshnessParams,
    now: DateTime<Utc>,
) -> EngineResult<FreshnessReading> {
    let last_updated = last_updated.ok_or_else(|| EngineError::MissingFreshnessData {
        table_name: table_name.to_string(),
        record_id: record_id.to_string(),
    })?;
    if !params.decay_rate.is_finite() || params.decay_rate < 0.0 {
        return Err(EngineError::InvalidDecayRate(params.decay_rate));
    }

    let age = age_days(last_updated, now);
    Ok(FreshnessReading {
        age_days: age.max(0.0),
        freshness_score: decay_score(params.decay_rate, age),
        is_stale: age > params.stale_threshold_days,
    })
}

/// Label shown next to a freshness row.
pub fn status(score: Option<f64>, is_stale: bool) -> FreshnessStatus {
    match score {
        None => FreshnessStatus::Unknown,
        Some(_) if is_stale => FreshnessStatus::Stale,
        Some(s) if s > FRESH_SCORE_CUTOFF => FreshnessStatus::Fresh,
        Some(_) => FreshnessStatus::Aging,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn params(rate: f64, threshold: f64) -> FreshnessParams {
        FreshnessParams {
            decay_rate: rate,
            stale_threshold_days: threshold,
        }
    }

    #[test]
    fn ten_days_at_ten_percent_is_one_over_e() {
        let now = Utc::now();
        let r = score("market_odds", "o1", Some(now - Duration::days(10)), params(0.1, 30.0), now)
            .unwrap();
        assert_relative_eq!(r.freshness_score, (-1.0f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(r.freshness_score, 0.3679, epsilon = 1e-4);
        assert!(!r.is_stale);
    }

    #[test]
    fn zero_age_scores_exactly_one() {
        let now = Utc::now();
        let r = score("market_odds", "o1", Some(now), params(0.1, 7.0), now).unwrap();
        assert_eq!(r.freshness_score, 1.0);
    }

    #[test]
    fn future_timestamp_scores_one() {
        let now = Utc::now();
        let r = score("t", "r", Some(now + Duration::hours(3)), params(0.5, 1.0), now).unwrap();
        assert_eq!(r.freshness_score, 1.0);
        assert_eq!(r.age_days, 0.0);
        assert!(!r.is_stale);
    }

    #[test]
    fn missing_last_updated_is_an_error_not_stale() {
        let err = score("predictions", "p9", None, params(0.1, 7.0), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            EngineError::MissingFreshnessData {
                table_name: "predictions".into(),
                record_id: "p9".into()
            }
        );
    }

    #[test]
    fn staleness_uses_strict_inequality() {
        let now = Utc::now();
        let at = score("t", "r", Some(now - Duration::days(7)), params(0.1, 7.0), now).unwrap();
        assert!(!at.is_stale);
        let past = score(
            "t",
            "r",
            Some(now - Duration::days(7) - Duration::minutes(1)),
            params(0.1, 7.0),
            now,
        )
        .unwrap();
        assert!(past.is_stale);
    }

    #[test]
    fn score_is_non_increasing_in_age() {
        let mut prev = 1.0;
        for day in 0..60 {
            let s = decay_score(0.15, day as f64 * 0.5);
            assert!(s <= prev);
            assert!((0.0..=1.0).contains(&s));
            prev = s;
        }
    }

    #[test]
    fn negative_decay_rate_is_rejected() {
        let now = Utc::now();
        assert!(score("t", "r", Some(now - Duration::days(1)), params(-0.1, 7.0), now).is_err());
    }

    #[test]
    fn status_labels() {
        assert_eq!(status(None, false), FreshnessStatus::Unknown);
        assert_eq!(status(Some(0.9), true), FreshnessStatus::Stale);
        assert_eq!(status(Some(0.9), false), FreshnessStatus::Fresh);
        assert_eq!(status(Some(0.7), false), FreshnessStatus::Aging);
    }
}
