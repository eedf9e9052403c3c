//! Decide/evolve contract shared by every ledger-backed entity.

use crate::error::{DomainError, DomainResult};

/// Identity and revision of a ledger-backed entity.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events folded into this state (the stream revision).
    fn version(&self) -> u64;
}

/// Revision a writer expects the stream to be at when appending.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    Any,
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            return Ok(());
        }
        Err(DomainError::conflict(format!(
            "stream moved underneath the writer (expected {self:?}, found {actual})"
        )))
    }
}

/// Pure decision logic over folded state.
///
/// `handle` never mutates; `apply` never fails. Balances exposed by an
/// implementation are derived from the events applied so far, so replaying
/// the same stream always yields the same state.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    /// An empty result means the command was an idempotent no-op.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Decide and fold in one step, without persistence.
    fn execute(&mut self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>
    where
        Self: Sized,
    {
        let events = self.handle(command)?;
        for event in &events {
            self.apply(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_every_revision() {
        assert!(ExpectedVersion::Any.check(0).is_ok());
        assert!(ExpectedVersion::Any.check(42).is_ok());
    }

    #[test]
    fn exact_mismatch_is_a_conflict() {
        assert!(ExpectedVersion::Exact(3).check(3).is_ok());
        let err = ExpectedVersion::Exact(2).check(3).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }
}
