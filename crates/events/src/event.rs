use chrono::{DateTime, Utc};

/// A ledger fact.
///
/// Events are immutable and append-only. Balances everywhere in the engine are
/// folds over them, so an event type is never edited in place: a schema change
/// bumps `version()`.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "credit.account.reserved").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
