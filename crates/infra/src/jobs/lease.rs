//! Single-flight leases for periodic work.
//!
//! A lease key names one unit of scheduled work, e.g.
//! `penalty:{obligation}:{date}` or `settlement:{seller}:{cutoff}`. Whoever
//! acquires the key runs the work; everyone else is told to skip. A completed
//! key stays completed so the same scope never runs twice.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;

use osas_core::TenantId;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease store unavailable: {0}")]
    Storage(String),
}

/// Result of trying to acquire a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// Caller owns the key and must `complete` or `release` it.
    Acquired,
    /// Another invocation is running this scope right now.
    InFlight { since: DateTime<Utc> },
    /// This scope already ran to completion.
    AlreadyDone { at: DateTime<Utc> },
}

impl LeaseOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LeaseOutcome::Acquired)
    }
}

pub trait LeaseStore: Send + Sync {
    fn try_acquire(
        &self,
        tenant_id: TenantId,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome, LeaseError>;

    /// Mark the scope as done; later acquisitions report `AlreadyDone`.
    fn complete(&self, tenant_id: TenantId, key: &str, now: DateTime<Utc>)
    -> Result<(), LeaseError>;

    /// Drop a held lease without completing it (the work failed and may be retried).
    fn release(&self, tenant_id: TenantId, key: &str) -> Result<(), LeaseError>;
}

impl<L> LeaseStore for std::sync::Arc<L>
where
    L: LeaseStore + ?Sized,
{
    fn try_acquire(
        &self,
        tenant_id: TenantId,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome, LeaseError> {
        (**self).try_acquire(tenant_id, key, now)
    }

    fn complete(
        &self,
        tenant_id: TenantId,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LeaseError> {
        (**self).complete(tenant_id, key, now)
    }

    fn release(&self, tenant_id: TenantId, key: &str) -> Result<(), LeaseError> {
        (**self).release(tenant_id, key)
    }
}

#[derive(Debug, Clone, Copy)]
enum LeaseState {
    Held(DateTime<Utc>),
    Done(DateTime<Utc>),
}

#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<(TenantId, String), LeaseState>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn try_acquire(
        &self,
        tenant_id: TenantId,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome, LeaseError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| LeaseError::Storage("lock poisoned".to_string()))?;
        let slot = (tenant_id, key.to_string());
        match leases.get(&slot) {
            Some(LeaseState::Held(since)) => Ok(LeaseOutcome::InFlight { since: *since }),
            Some(LeaseState::Done(at)) => Ok(LeaseOutcome::AlreadyDone { at: *at }),
            None => {
                leases.insert(slot, LeaseState::Held(now));
                Ok(LeaseOutcome::Acquired)
            }
        }
    }

    fn complete(
        &self,
        tenant_id: TenantId,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LeaseError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| LeaseError::Storage("lock poisoned".to_string()))?;
        leases.insert((tenant_id, key.to_string()), LeaseState::Done(now));
        Ok(())
    }

    fn release(&self, tenant_id: TenantId, key: &str) -> Result<(), LeaseError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| LeaseError::Storage("lock poisoned".to_string()))?;
        if let Some(LeaseState::Held(_)) = leases.get(&(tenant_id, key.to_string())) {
            leases.remove(&(tenant_id, key.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_while_held_is_in_flight() {
        let store = InMemoryLeaseStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();

        assert_eq!(store.try_acquire(tenant, "k", now).unwrap(), LeaseOutcome::Acquired);
        assert!(matches!(
            store.try_acquire(tenant, "k", now).unwrap(),
            LeaseOutcome::InFlight { .. }
        ));
    }

    #[test]
    fn completed_scope_never_runs_again() {
        let store = InMemoryLeaseStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();

        store.try_acquire(tenant, "penalty:x:2026-01-01", now).unwrap();
        store.complete(tenant, "penalty:x:2026-01-01", now).unwrap();
        store.release(tenant, "penalty:x:2026-01-01").unwrap();

        assert!(matches!(
            store.try_acquire(tenant, "penalty:x:2026-01-01", now).unwrap(),
            LeaseOutcome::AlreadyDone { .. }
        ));
    }

    #[test]
    fn released_lease_can_be_retried() {
        let store = InMemoryLeaseStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();

        store.try_acquire(tenant, "k", now).unwrap();
        store.release(tenant, "k").unwrap();
        assert!(store.try_acquire(tenant, "k", now).unwrap().is_acquired());
    }

    #[test]
    fn leases_are_tenant_scoped() {
        let store = InMemoryLeaseStore::new();
        let now = Utc::now();
        store.try_acquire(TenantId::new(), "k", now).unwrap();
        assert!(store.try_acquire(TenantId::new(), "k", now).unwrap().is_acquired());
    }
}
