use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{check_probability, EngineError, EngineResult};
use crate::db::models::FeatureExperiment;

/// Lifecycle of a feature experiment:
///
///   Running → Completed → Approved
///      └──────────┴──────→ Rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Running,
    Completed,
    Approved,
    Rejected,
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExperimentStatus::Running => "running",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Approved => "approved",
            ExperimentStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Measured results that close an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub sample_size: i64,
    pub control_accuracy: f64,
    pub test_accuracy: f64,
    pub p_value: f64,
}

/// Status derived from the stored flags, in precedence order.
pub fn status(exp: &FeatureExperiment) -> ExperimentStatus {
    if exp.is_approved {
        ExperimentStatus::Approved
    } else if !exp.is_active {
        ExperimentStatus::Rejected
    } else if exp.test_end_date.is_some() {
        ExperimentStatus::Completed
    } else {
        ExperimentStatus::Running
    }
}

fn transition_error(from: ExperimentStatus, to: ExperimentStatus) -> EngineError {
    EngineError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// Running → Completed. Significance is `p_value < alpha`.
pub fn complete(
    exp: &mut FeatureExperiment,
    results: ExperimentResults,
    alpha: f64,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    let current = status(exp);
    if current != ExperimentStatus::Running {
        return Err(transition_error(current, ExperimentStatus::Completed));
    }
    check_probability(results.control_accuracy)?;
    check_probability(results.test_accuracy)?;
    check_probability(results.p_value)?;

    exp.test_end_date = Some(now);
    exp.sample_size = results.sample_size.max(0);
    exp.control_accuracy = Some(results.control_accuracy);
    exp.test_accuracy = Some(results.test_accuracy);
    exp.improvement_delta = Some(results.test_accuracy - results.control_accuracy);
    exp.p_value = Some(results.p_value);
    exp.statistical_significance = results.p_value < alpha;
    exp.updated_at = now;
    Ok(())
}

/// Completed → Approved. Only significant, positive improvements qualify.
pub fn approve(exp: &mut FeatureExperiment, now: DateTime<Utc>) -> EngineResult<()> {
    let current = status(exp);
    if current != ExperimentStatus::Completed {
        return Err(transition_error(current, ExperimentStatus::Approved));
    }
    let improved = exp.improvement_delta.map(|d| d > 0.0).unwrap_or(false);
    if !exp.statistical_significance || !improved {
        return Err(EngineError::InvalidTransition {
            from: format!("{} (not a significant improvement)", current),
            to: ExperimentStatus::Approved.to_string(),
        });
    }
    exp.is_approved = true;
    exp.updated_at = now;
    Ok(())
}

/// Running | Completed → Rejected.
pub fn reject(exp: &mut FeatureExperiment, now: DateTime<Utc>) -> EngineResult<()> {
    let current = status(exp);
    match current {
        ExperimentStatus::Running | ExperimentStatus::Completed => {
            exp.is_active = false;
            exp.updated_at = now;
            Ok(())
        }
        _ => Err(transition_error(current, ExperimentStatus::Rejected)),
    }
}
