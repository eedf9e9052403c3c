//! `osas-core`: domain foundation building blocks for the trade-credit engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;
pub mod reference;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult, RejectionCode};
pub use id::{
    AgentId, AggregateId, BatchId, BuyerId, CreditAccountId, DisputeId, EmiPlanId, InvoiceId,
    ObligationId, OrderId, RecoveryCaseId, ReservationId, SellerId, TenantId, UserId,
};
pub use money::{BuyerKind, Money, Rate};
pub use reference::LedgerReference;
