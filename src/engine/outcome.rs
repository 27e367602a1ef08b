use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::EngineError;

/// Full-time match result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    /// Canonical order; also the last-resort tie-break order.
    pub const ALL: [Outcome; 3] = [Outcome::Home, Outcome::Draw, Outcome::Away];

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Home => "HOME",
            Outcome::Draw => "DRAW",
            Outcome::Away => "AWAY",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Outcome::Home => 0,
            Outcome::Draw => 1,
            Outcome::Away => 2,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = EngineError;

    /// Accepts the canonical upper-case names plus the spellings the
    /// prediction tables have historically carried ("home_win", "X", ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "home" | "home_win" | "1" => Ok(Outcome::Home),
            "draw" | "x" => Ok(Outcome::Draw),
            "away" | "away_win" | "2" => Ok(Outcome::Away),
            _ => Err(EngineError::UnknownOutcome(s.to_string())),
        }
    }
}

/// A probability (or score) per outcome, indexed by `Outcome::index`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OutcomeScores {
    #[serde(rename = "HOME")]
    pub home: f64,
    #[serde(rename = "DRAW")]
    pub draw: f64,
    #[serde(rename = "AWAY")]
    pub away: f64,
}

impl OutcomeScores {
    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }

    pub fn add(&mut self, outcome: Outcome, value: f64) {
        match outcome {
            Outcome::Home => self.home += value,
            Outcome::Draw => self.draw += value,
            Outcome::Away => self.away += value,
        }
    }

    pub fn total(&self) -> f64 {
        self.home + self.draw + self.away
    }

    /// Scores rescaled to sum to 1. `None` when the total mass is zero.
    pub fn normalized(&self) -> Option<OutcomeScores> {
        let total = self.total();
        if total <= 0.0 || !total.is_finite() {
            return None;
        }
        Some(OutcomeScores {
            home: self.home / total,
            draw: self.draw / total,
            away: self.away / total,
        })
    }

    /// Outcomes sorted by score, highest first. Equal scores keep canonical order.
    pub fn ranked(&self) -> [(Outcome, f64); 3] {
        let mut ranked = Outcome::ALL.map(|o| (o, self.get(o)));
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// Model probability for each outcome of a match.
///
/// With an ensemble breakdown the normalised scores are used directly.
/// Otherwise the predicted outcome carries `confidence` and the remaining
/// mass is split evenly between the other two outcomes.
pub fn model_probabilities(
    predicted: Outcome,
    confidence: f64,
    ensemble_scores: Option<&OutcomeScores>,
) -> OutcomeScores {
    if let Some(p) = ensemble_scores.and_then(|s| s.normalized()) {
        return p;
    }
    let c = confidence.clamp(0.0, 1.0);
    let rest = (1.0 - c) / 2.0;
    let mut probs = OutcomeScores {
        home: rest,
        draw: rest,
        away: rest,
    };
    match predicted {
        Outcome::Home => probs.home = c,
        Outcome::Draw => probs.draw = c,
        Outcome::Away => probs.away = c,
    }
    probs
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parses_common_spellings() {
        assert_eq!("HOME".parse::<Outcome>(), Ok(Outcome::Home));
        assert_eq!("home_win".parse::<Outcome>(), Ok(Outcome::Home));
        assert_eq!(" x ".parse::<Outcome>(), Ok(Outcome::Draw));
        assert_eq!("Away".parse::<Outcome>(), Ok(Outcome::Away));
        assert!("over_2_5".parse::<Outcome>().is_err());
    }

    #[test]
    fn scores_serialize_with_uppercase_keys() {
        let s = OutcomeScores {
            home: 0.5,
            draw: 0.25,
            away: 0.0,
        };
        let json = serde_json::to_value(s).unwrap();
        assert_eq!(json["HOME"], 0.5);
        assert_eq!(json["DRAW"], 0.25);
        assert_eq!(json["AWAY"], 0.0);
    }

    #[test]
    fn ranked_keeps_canonical_order_on_ties() {
        let s = OutcomeScores {
            home: 0.2,
            draw: 0.4,
            away: 0.4,
        };
        let r = s.ranked();
        assert_eq!(r[0].0, Outcome::Draw);
        assert_eq!(r[1].0, Outcome::Away);
        assert_eq!(r[2].0, Outcome::Home);
    }

    #[test]
    fn normalized_none_on_zero_mass() {
        assert!(OutcomeScores::default().normalized().is_none());
    }

    #[test]
    fn model_probabilities_from_confidence_only() {
        let p = model_probabilities(Outcome::Away, 0.6, None);
        assert_relative_eq!(p.away, 0.6, epsilon = 1e-12);
        assert_relative_eq!(p.home, 0.2, epsilon = 1e-12);
        assert_relative_eq!(p.draw, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn model_probabilities_prefers_ensemble_scores() {
        let scores = OutcomeScores {
            home: 0.58,
            draw: 0.18,
            away: 0.0,
        };
        let p = model_probabilities(Outcome::Home, 0.9, Some(&scores));
        assert_relative_eq!(p.home, 0.58 / 0.76, epsilon = 1e-12);
        assert_relative_eq!(p.total(), 1.0, epsilon = 1e-12);
    }
}
