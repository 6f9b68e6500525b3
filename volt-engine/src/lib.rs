//! Core trading orchestrator: per-user batch loops driving round-trip OTO
//! orders until the exchange-reported volume reaches each strategy's
//! target.

use thiserror::Error;

use volt_core::StrategyId;

mod batch;
mod credentials;
mod executor;
mod status;
mod stop;
mod tracker;
mod trade;

pub use batch::BatchEnd;
pub use credentials::{CredentialsStore, MemoryCredentialsStore};
pub use executor::{EngineConfig, StrategyEngine, AUTH_REFRESH_HINT};
pub use status::{StatusBoard, StrategyProgress, UserRecord};
pub use stop::StopToken;
pub use tracker::{OrderTracker, WaitOutcome};
pub use trade::{TradeError, TradeOutcome};

/// Errors surfaced by the engine control interface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("strategy {0} is disabled")]
    Disabled(StrategyId),
    #[error("strategy {0} has no users configured")]
    NoUsers(StrategyId),
}
