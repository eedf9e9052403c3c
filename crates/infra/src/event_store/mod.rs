//! Append-only ledger store boundary.
//!
//! Every credit, repayment and settlement movement is an event in a
//! tenant-scoped stream. Balances are folds over those streams; nothing here
//! stores a mutable balance.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
