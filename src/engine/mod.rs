pub mod conflict;
pub mod crowd;
pub mod ensemble;
pub mod error;
pub mod evaluation;
pub mod experiment;
pub mod freshness;
pub mod outcome;
pub mod recompute;
pub mod value_bet;

pub use error::EngineError;
pub use recompute::{RecomputeSettings, Recomputer};
