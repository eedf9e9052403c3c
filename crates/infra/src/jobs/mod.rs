//! Periodic jobs and their single-flight guards.
//!
//! - `retry`: bounded backoff policy (also used for optimistic-concurrency retries)
//! - `lease`: idempotency keys so a scope (one obligation-day, one seller-cutoff)
//!   runs at most once
//! - `scheduler`: background thread that drives the daily pass

pub mod lease;
pub mod retry;
pub mod scheduler;

pub use lease::{InMemoryLeaseStore, LeaseError, LeaseOutcome, LeaseStore};
pub use retry::RetryPolicy;
pub use scheduler::{FnJob, PeriodicJob, SchedulerHandle, spawn_periodic};
