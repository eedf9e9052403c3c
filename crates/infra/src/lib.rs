//! Infrastructure layer: ledger store, dispatch, read models, jobs, config,
//! external ports, and the engine that sequences the domain aggregates.

pub mod bank;
pub mod command_dispatcher;
pub mod config;
pub mod engine;
pub mod event_store;
pub mod jobs;
pub mod projections;
pub mod read_model;
pub mod tickets;

#[cfg(test)]
mod integration_tests;

pub use engine::{DailyPassReport, Engine, EngineError, EngineResult, ReserveRequest, RiskOutcome};
