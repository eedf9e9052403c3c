//! Projection implementations (read model builders).
//!
//! Projections consume committed ledger events and build query-side indexes.
//! All projections are:
//! - **Rebuildable**: reconstructed from `EventStore::load_all`
//! - **Tenant-isolated**: data is partitioned by tenant
//! - **Idempotent**: a per-stream cursor drops events at or below the last
//!   applied sequence number
//!
//! Read models never feed a write decision. Commands always rehydrate the
//! aggregate from its stream; projections only answer "which streams exist"
//! and serve GET endpoints.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use osas_core::TenantId;
use osas_events::{EventEnvelope, StreamKey};

use crate::event_store::{EventStore, EventStoreError, StoredEvent};

pub mod directory;
pub mod risk_profiles;

pub use directory::{
    AccountEntry, BatchEntry, EmiPlanEntry, LedgerDirectory, ObligationEntry, RecoveryEntry,
    ReservationEntry,
};
pub use risk_profiles::{RiskHistoryEntry, RiskProfile, RiskProfiles};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

/// Last applied sequence number per stream.
#[derive(Debug, Default)]
pub(crate) struct StreamCursors {
    positions: HashMap<StreamKey, u64>,
    tenants: BTreeSet<TenantId>,
}

impl StreamCursors {
    /// `Ok(false)` when the event was already applied.
    pub(crate) fn admit<E>(&self, envelope: &EventEnvelope<E>) -> Result<bool, ProjectionError> {
        let last = self.positions.get(&envelope.stream()).copied().unwrap_or(0);
        let found = envelope.sequence_number();
        if found <= last {
            return Ok(false);
        }
        if !envelope.follows(last) {
            return Err(ProjectionError::NonMonotonicSequence { last, found });
        }
        Ok(true)
    }

    pub(crate) fn advance<E>(&mut self, envelope: &EventEnvelope<E>) {
        self.positions.insert(envelope.stream(), envelope.sequence_number());
        self.tenants.insert(envelope.tenant_id());
    }

    pub(crate) fn clear_tenant(&mut self, tenant_id: TenantId) {
        self.positions.retain(|k, _| k.tenant_id != tenant_id);
        self.tenants.remove(&tenant_id);
    }

    pub(crate) fn tenants(&self) -> Vec<TenantId> {
        self.tenants.iter().copied().collect()
    }
}

/// A read model fed by committed ledger events.
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply one committed event. Must be idempotent per `(stream, sequence)`.
    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError>;

    fn clear_tenant(&self, tenant_id: TenantId);
}

/// Decode a payload, checking it belongs to the envelope's tenant.
///
/// Payloads are externally tagged event enums; every variant body carries
/// `tenant_id`.
pub(crate) fn decode<T>(envelope: &EventEnvelope<JsonValue>) -> Result<T, ProjectionError>
where
    T: serde::de::DeserializeOwned,
{
    let payload = envelope.payload();
    let tenant = payload
        .as_object()
        .and_then(|o| o.values().next())
        .and_then(|body| body.get("tenant_id"))
        .and_then(|t| serde_json::from_value::<TenantId>(t.clone()).ok());
    if tenant != Some(envelope.tenant_id()) {
        return Err(ProjectionError::TenantIsolation(format!(
            "payload tenant differs from envelope tenant on {}",
            envelope.aggregate_id()
        )));
    }
    serde_json::from_value(payload.clone()).map_err(|e| ProjectionError::Deserialize(e.to_string()))
}

/// Every read model of the engine, fed from the same committed events.
#[derive(Debug, Default)]
pub struct ReadModels {
    directory: LedgerDirectory,
    risk_profiles: RiskProfiles,
}

impl ReadModels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directory(&self) -> &LedgerDirectory {
        &self.directory
    }

    pub fn risk_profiles(&self) -> &RiskProfiles {
        &self.risk_profiles
    }

    fn projections(&self) -> [&dyn Projection; 2] {
        [&self.directory, &self.risk_profiles]
    }

    /// Project freshly committed events.
    ///
    /// A concurrent writer may commit a later sequence on the same stream and
    /// project it first; on a gap the missing tail is replayed from the store.
    pub fn project<S: EventStore>(
        &self,
        store: &S,
        committed: &[StoredEvent],
    ) -> Result<(), ProjectionError> {
        for stored in committed {
            let envelope = stored.to_envelope();
            for projection in self.projections() {
                match projection.apply_envelope(&envelope) {
                    Err(ProjectionError::NonMonotonicSequence { last, found }) => {
                        debug!(
                            projection = projection.name(),
                            aggregate_id = %stored.aggregate_id,
                            last,
                            found,
                            "projection behind stream; catching up"
                        );
                        let stream = store.load_stream(stored.tenant_id, stored.aggregate_id)?;
                        for missed in stream.iter().filter(|e| e.sequence_number > last) {
                            projection.apply_envelope(&missed.to_envelope())?;
                        }
                    }
                    other => other?,
                }
            }
        }
        Ok(())
    }

    /// Drop every read model and replay the whole ledger.
    pub fn rebuild<S: EventStore>(&self, store: &S) -> Result<usize, ProjectionError> {
        let all = store.load_all()?;
        let tenants: BTreeSet<TenantId> = all.iter().map(|e| e.tenant_id).collect();
        for projection in self.projections() {
            for tenant_id in &tenants {
                projection.clear_tenant(*tenant_id);
            }
        }
        for stored in &all {
            let envelope = stored.to_envelope();
            for projection in self.projections() {
                projection.apply_envelope(&envelope)?;
            }
        }
        Ok(all.len())
    }
}
