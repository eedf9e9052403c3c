use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use osas_core::{AggregateId, TenantId};

/// Identifies one ledger stream. Sequence numbers are scoped to it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
}

/// A committed ledger event as published to subscribers.
///
/// `sequence_number` is 1-based and gap-free per [`StreamKey`]; consumers
/// compare it against their own cursor to drop redeliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    aggregate_type: String,
    sequence_number: u64,
    event_type: String,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    pub fn stream(&self) -> StreamKey {
        StreamKey {
            tenant_id: self.tenant_id,
            aggregate_id: self.aggregate_id,
        }
    }

    /// True when this event directly follows `last` in its stream.
    pub fn follows(&self, last: u64) -> bool {
        self.sequence_number == last + 1
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(seq: u64) -> EventEnvelope<u8> {
        EventEnvelope::new(
            Uuid::now_v7(),
            TenantId::new(),
            AggregateId::new(),
            "credit.account",
            seq,
            "credit.reserved",
            Utc::now(),
            0,
        )
    }

    #[test]
    fn follows_only_the_immediately_preceding_position() {
        let e = envelope(3);
        assert!(e.follows(2));
        assert!(!e.follows(3));
        assert!(!e.follows(1));
    }

    #[test]
    fn stream_key_carries_tenant_and_aggregate() {
        let e = envelope(1);
        let key = e.stream();
        assert_eq!(key.tenant_id, e.tenant_id());
        assert_eq!(key.aggregate_id, e.aggregate_id());
    }
}
