use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use osas_core::{AggregateId, ExpectedVersion, TenantId};
use osas_events::{EventEnvelope, StreamKey};

/// A serialized domain event waiting for its stream position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    pub fn from_typed<E>(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: osas_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::InvalidAppend(format!("cannot serialize {}: {e}", event.event_type())))?;

        Ok(Self {
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }

    pub fn stream(&self) -> StreamKey {
        StreamKey {
            tenant_id: self.tenant_id,
            aggregate_id: self.aggregate_id,
        }
    }

    /// Stamp the position assigned by the store.
    pub(crate) fn commit(self, sequence_number: u64) -> StoredEvent {
        StoredEvent {
            event_id: self.event_id,
            tenant_id: self.tenant_id,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            sequence_number,
            event_type: self.event_type,
            event_version: self.event_version,
            occurred_at: self.occurred_at,
            payload: self.payload,
        }
    }
}

/// A ledger entry. `sequence_number` is 1-based and gap-free per stream and
/// never changes once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub sequence_number: u64,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream(&self) -> StreamKey {
        StreamKey {
            tenant_id: self.tenant_id,
            aggregate_id: self.aggregate_id,
        }
    }

    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.tenant_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.event_type.clone(),
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// Infrastructure failures of the ledger. Business rejections never get here.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("ledger backend failure: {0}")]
    Backend(String),
}

/// Append-only ledger, partitioned by [`StreamKey`].
///
/// An append writes one stream atomically or nothing at all. `load_stream`
/// of an unknown stream is empty; `load_all` yields every entry in commit
/// order and is what read models rebuild from.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(tenant_id, aggregate_id)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_all()
    }
}

/// Stream and aggregate type shared by every event of an append batch.
#[derive(Debug, Clone)]
pub(crate) struct BatchTarget {
    pub(crate) stream: StreamKey,
    pub(crate) aggregate_type: String,
}

impl BatchTarget {
    /// Checks the batch against the stream's current head before writing.
    pub(crate) fn check_head(
        &self,
        existing_type: Option<&str>,
        expected: ExpectedVersion,
        current: u64,
    ) -> Result<(), EventStoreError> {
        if let Some(existing) = existing_type
            && existing != self.aggregate_type
        {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "stream holds '{existing}', batch is '{}'",
                self.aggregate_type
            )));
        }
        if !expected.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected:?}, found {current}"
            )));
        }
        Ok(())
    }
}

/// `None` for an empty batch; otherwise the single stream it targets.
pub(crate) fn validate_batch(events: &[UncommittedEvent]) -> Result<Option<BatchTarget>, EventStoreError> {
    let Some(first) = events.first() else {
        return Ok(None);
    };

    for (idx, e) in events.iter().enumerate().skip(1) {
        if e.tenant_id != first.tenant_id {
            return Err(EventStoreError::TenantIsolation(format!(
                "batch mixes tenants at index {idx}"
            )));
        }
        if e.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch mixes streams at index {idx}"
            )));
        }
        if e.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch mixes aggregate types at index {idx}"
            )));
        }
    }
    Ok(Some(BatchTarget {
        stream: first.stream(),
        aggregate_type: first.aggregate_type.clone(),
    }))
}
