use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use osas_core::{AggregateId, ExpectedVersion, TenantId};
use osas_events::StreamKey;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, validate_batch};

#[derive(Debug, Default)]
struct Ledger {
    streams: HashMap<StreamKey, Vec<StoredEvent>>,
    /// Every entry in commit order.
    log: Vec<StoredEvent>,
}

/// Process-local ledger for tests and single-node runs.
///
/// One write lock covers both the stream and the commit log, so an append is
/// all-or-nothing.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    ledger: RwLock<Ledger>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Ledger>, EventStoreError> {
        self.ledger
            .read()
            .map_err(|_| EventStoreError::Backend("ledger lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Ledger>, EventStoreError> {
        self.ledger
            .write()
            .map_err(|_| EventStoreError::Backend("ledger lock poisoned".to_string()))
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(target) = validate_batch(&events)? else {
            return Ok(vec![]);
        };

        let mut ledger = self.write()?;
        let Ledger { streams, log } = &mut *ledger;

        let stream = streams.entry(target.stream).or_default();
        let current = stream.last().map_or(0, |e| e.sequence_number);
        target.check_head(
            stream.first().map(|e| e.aggregate_type.as_str()),
            expected_version,
            current,
        )?;

        let committed: Vec<StoredEvent> = events
            .into_iter()
            .zip(current + 1..)
            .map(|(e, seq)| e.commit(seq))
            .collect();
        stream.extend(committed.iter().cloned());
        log.extend(committed.iter().cloned());
        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };
        Ok(self.read()?.streams.get(&key).cloned().unwrap_or_default())
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        Ok(self.read()?.log.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn event(tenant_id: TenantId, aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "credit.account.opened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({}),
        }
    }

    #[test]
    fn append_assigns_gap_free_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let agg = AggregateId::new();

        let first = store
            .append(
                vec![event(tenant, agg, "credit.account"), event(tenant, agg, "credit.account")],
                ExpectedVersion::Exact(0),
            )
            .unwrap();
        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1, 2]);

        let second = store
            .append(vec![event(tenant, agg, "credit.account")], ExpectedVersion::Exact(2))
            .unwrap();
        assert_eq!(second[0].sequence_number, 3);
        assert_eq!(store.load_stream(tenant, agg).unwrap().len(), 3);
    }

    #[test]
    fn stale_expected_version_is_a_concurrency_error() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let agg = AggregateId::new();
        store
            .append(vec![event(tenant, agg, "credit.account")], ExpectedVersion::Exact(0))
            .unwrap();

        let err = store
            .append(vec![event(tenant, agg, "credit.account")], ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn streams_are_tenant_scoped() {
        let store = InMemoryEventStore::new();
        let agg = AggregateId::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        store
            .append(vec![event(t1, agg, "credit.account")], ExpectedVersion::Exact(0))
            .unwrap();

        assert!(store.load_stream(t2, agg).unwrap().is_empty());
    }

    #[test]
    fn mixed_tenant_batch_is_rejected() {
        let store = InMemoryEventStore::new();
        let agg = AggregateId::new();
        let err = store
            .append(
                vec![
                    event(TenantId::new(), agg, "credit.account"),
                    event(TenantId::new(), agg, "credit.account"),
                ],
                ExpectedVersion::Any,
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::TenantIsolation(_)));
    }

    #[test]
    fn aggregate_type_is_stable_per_stream() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let agg = AggregateId::new();
        store
            .append(vec![event(tenant, agg, "credit.account")], ExpectedVersion::Exact(0))
            .unwrap();

        let err = store
            .append(vec![event(tenant, agg, "repayment.obligation")], ExpectedVersion::Exact(1))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn load_all_preserves_global_commit_order() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store.append(vec![event(tenant, a, "x")], ExpectedVersion::Exact(0)).unwrap();
        store.append(vec![event(tenant, b, "y")], ExpectedVersion::Exact(0)).unwrap();
        store.append(vec![event(tenant, a, "x")], ExpectedVersion::Exact(1)).unwrap();

        let all = store.load_all().unwrap();
        let order: Vec<_> = all.iter().map(|e| (e.aggregate_id, e.sequence_number)).collect();
        assert_eq!(order, vec![(a, 1), (b, 1), (a, 2)]);
    }
}
