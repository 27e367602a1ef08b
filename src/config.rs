use clap::Parser;

use crate::engine::ensemble::EnsembleWeights;

/// Ensemble prediction, crowd-wisdom and value-bet scoring service
#[derive(Parser, Debug, Clone)]
#[command(name = "matchday-ensemble", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "matchday.db")]
    pub database_path: String,

    /// Admin API listen address
    #[arg(long, env = "DASHBOARD_ADDR", default_value = "0.0.0.0:8080")]
    pub dashboard_addr: String,

    /// Version tag written on every prediction
    #[arg(long, env = "MODEL_VERSION", default_value = "ensemble-v1")]
    pub model_version: String,

    /// Ensemble weight of the full-time model
    #[arg(long, env = "WEIGHT_FULL_TIME", default_value = "0.5")]
    pub weight_full_time: f64,

    /// Ensemble weight of the half-time model
    #[arg(long, env = "WEIGHT_HALF_TIME", default_value = "0.3")]
    pub weight_half_time: f64,

    /// Ensemble weight of the pattern-detection model
    #[arg(long, env = "WEIGHT_PATTERN", default_value = "0.2")]
    pub weight_pattern: f64,

    /// Conflict margin as a fraction of total score mass
    #[arg(long, env = "CONFLICT_THRESHOLD", default_value = "0.05")]
    pub conflict_threshold: f64,

    /// Default minimum expected value for a surfaced value bet
    #[arg(long, env = "MIN_EXPECTED_VALUE", default_value = "0.05")]
    pub min_expected_value: f64,

    /// Expected value at which a bet is rated "medium"
    #[arg(long, env = "EV_MEDIUM_THRESHOLD", default_value = "0.05")]
    pub ev_medium_threshold: f64,

    /// Expected value at which a bet is rated "high"
    #[arg(long, env = "EV_HIGH_THRESHOLD", default_value = "0.15")]
    pub ev_high_threshold: f64,

    /// Confidence at or above which a wrong prediction is flagged overconfident
    #[arg(long, env = "OVERCONFIDENCE_THRESHOLD", default_value = "0.75")]
    pub overconfidence_threshold: f64,

    /// Significance level for feature experiments
    #[arg(long, env = "SIGNIFICANCE_ALPHA", default_value = "0.05")]
    pub significance_alpha: f64,

    /// Decay rate (fraction per day) for newly tracked records
    #[arg(long, env = "DEFAULT_DECAY_RATE", default_value = "0.1")]
    pub default_decay_rate: f64,

    /// Age in days after which newly tracked records are stale
    #[arg(long, env = "DEFAULT_STALE_THRESHOLD_DAYS", default_value = "7")]
    pub default_stale_threshold_days: f64,

    /// Freshness / prediction / value-bet recompute interval in seconds
    #[arg(long, env = "FRESHNESS_INTERVAL_SECS", default_value = "60")]
    pub freshness_interval_secs: u64,

    /// Crowd-wisdom refresh interval in seconds
    #[arg(long, env = "CROWD_INTERVAL_SECS", default_value = "30")]
    pub crowd_interval_secs: u64,

    /// Run a single recompute tick and exit
    #[arg(long, env = "ONCE", default_value = "false")]
    pub once: bool,
}

impl Config {
    pub fn weights(&self) -> EnsembleWeights {
        EnsembleWeights {
            ft: self.weight_full_time,
            ht: self.weight_half_time,
            pt: self.weight_pattern,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.weights().validate()?;
        if !(0.0..=1.0).contains(&self.conflict_threshold) {
            anyhow::bail!("conflict_threshold must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.overconfidence_threshold) {
            anyhow::bail!("overconfidence_threshold must be between 0.0 and 1.0");
        }
        if !(0.0..1.0).contains(&self.significance_alpha) || self.significance_alpha == 0.0 {
            anyhow::bail!("significance_alpha must be in (0.0, 1.0)");
        }
        if self.ev_medium_threshold > self.ev_high_threshold {
            anyhow::bail!("ev_medium_threshold must not exceed ev_high_threshold");
        }
        if !self.default_decay_rate.is_finite() || self.default_decay_rate < 0.0 {
            anyhow::bail!("default_decay_rate must be non-negative");
        }
        if self.default_stale_threshold_days <= 0.0 {
            anyhow::bail!("default_stale_threshold_days must be positive");
        }
        if self.freshness_interval_secs == 0 || self.crowd_interval_secs == 0 {
            anyhow::bail!("recompute intervals must be at least one second");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["matchday-ensemble"];
        argv.extend_from_slice(args);
        Config::parse_from(argv)
    }

    #[test]
    fn defaults_are_valid() {
        let c = parse(&[]);
        c.validate().unwrap();
        assert_eq!(c.weights(), EnsembleWeights::default());
        assert_eq!(c.min_expected_value, 0.05);
    }

    #[test]
    fn weights_must_sum_to_one() {
        let c = parse(&["--weight-full-time", "0.6"]);
        assert!(c.validate().is_err());
        let c = parse(&[
            "--weight-full-time",
            "0.6",
            "--weight-half-time",
            "0.2",
            "--weight-pattern",
            "0.2",
        ]);
        c.validate().unwrap();
    }

    #[test]
    fn inverted_ev_buckets_are_rejected() {
        let c = parse(&["--ev-medium-threshold", "0.2", "--ev-high-threshold", "0.1"]);
        assert!(c.validate().is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let c = parse(&["--crowd-interval-secs", "0"]);
        assert!(c.validate().is_err());
    }
}
