//! Utilities for standing up a mock Alpha exchange that exercises the
//! orchestrator end-to-end.

pub mod exchange;
pub mod rest;
pub mod scenario;
pub mod state;
pub mod ws;

pub use exchange::MockAlphaExchange;
pub use scenario::{Scenario, ScenarioAction, ScenarioManager, ScenarioTrigger};
pub use state::{MockAccountConfig, MockAlphaConfig, MockAlphaState, PlacedOto};
