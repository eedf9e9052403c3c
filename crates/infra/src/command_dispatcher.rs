//! Command execution pipeline for event-sourced ledger aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load stream from the ledger store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate (fold history)
//!   ↓
//! 3. Handle command (pure decision, produces events)
//!   ↓
//! 4. Append with ExpectedVersion::Exact(loaded version)
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! Step 4 is the per-aggregate serialization point. A concurrent writer makes
//! the append fail with `Concurrency`; `dispatch` then reloads and re-decides
//! under the configured `RetryPolicy`, and surfaces `StaleVersion` once the
//! retries run out. Business rejections are never retried.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use osas_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, RejectionCode, TenantId};
use osas_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::jobs::RetryPolicy;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// A business rule rejected the command.
    #[error("{code} ({entity_id})")]
    Rejected {
        code: RejectionCode,
        entity_id: String,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Domain-level conflict (not a storage race).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    /// Single optimistic append lost a race. Retried internally.
    #[error("optimistic concurrency failure: {0}")]
    Concurrency(String),

    /// Retries exhausted on a contended stream.
    #[error("stale version on {aggregate_id} after {attempts} attempts")]
    StaleVersion {
        aggregate_id: AggregateId,
        attempts: u32,
    },

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Stored payload no longer decodes into the aggregate's event type.
    #[error("failed to decode stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append; the events are durable.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl DispatchError {
    /// Stable rejection code, if this failure has one.
    pub fn code(&self) -> Option<RejectionCode> {
        match self {
            DispatchError::Rejected { code, .. } => Some(*code),
            DispatchError::StaleVersion { .. } => Some(RejectionCode::StaleVersion),
            _ => None,
        }
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::Rejected { code, entity_id } => {
                DispatchError::Rejected { code, entity_id }
            }
        }
    }
}

/// Result of a successful dispatch.
#[derive(Debug)]
pub struct Dispatched<A: Aggregate> {
    /// Typed events decided by this command (empty for an idempotent no-op).
    pub events: Vec<A::Event>,
    /// The same events as committed to the store.
    pub committed: Vec<StoredEvent>,
    /// Aggregate state after the new events were applied.
    pub state: A,
}

impl<A: Aggregate> Dispatched<A> {
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run on the in-memory pair and
/// production swaps in Postgres without touching domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    retry: RetryPolicy,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate an aggregate without deciding anything.
    ///
    /// The returned state is a snapshot; never make a write decision from it
    /// outside `dispatch`.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Typed events of one stream, oldest first.
    pub fn history<E>(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> Result<Vec<E>, DispatchError>
    where
        E: DeserializeOwned,
    {
        let stored = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &stored)?;
        stored.iter().map(decode_payload).collect()
    }

    /// Dispatch a command, retrying lost optimistic races.
    ///
    /// Each attempt reloads the stream, so the decision is always taken
    /// against the latest committed state.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl Fn(TenantId, AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: osas_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 0u32;
        loop {
            match self.dispatch_once(tenant_id, aggregate_id, aggregate_type, &command, &make_aggregate)
            {
                Err(DispatchError::Concurrency(msg)) => {
                    if !self.retry.should_retry(attempt) {
                        return Err(DispatchError::StaleVersion {
                            aggregate_id,
                            attempts: attempt + 1,
                        });
                    }
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(
                        %aggregate_id,
                        aggregate_type,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %msg,
                        "optimistic append lost a race; retrying"
                    );
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }

    fn dispatch_once<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: &impl Fn(TenantId, AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: osas_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (tenant-scoped)
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide
        let decided = aggregate.handle(command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                events: vec![],
                committed: vec![],
                state: aggregate,
            });
        }

        // 4) Persist (append-only, optimistic)
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type,
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for ev in &decided {
            aggregate.apply(ev);
        }

        // 5) Publish (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(Dispatched {
            events: decided,
            committed,
            state: aggregate,
        })
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce tenant isolation even if a backend returns cross-tenant rows.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = decode_payload(stored)?;
        aggregate.apply(&ev);
    }
    Ok(())
}

fn decode_payload<E: DeserializeOwned>(stored: &StoredEvent) -> Result<E, DispatchError> {
    serde_json::from_value(stored.payload.clone()).map_err(|e| DispatchError::Deserialize(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use osas_core::{
        AggregateRoot, BuyerId, BuyerKind, CreditAccountId, Money, OrderId, ReservationId, SellerId,
    };
    use osas_credit::{
        AGGREGATE_TYPE, CreditAccount, CreditAccountCommand, CreditAccountEvent, OpenAccount, ReserveCredit,
    };
    use osas_events::InMemoryEventBus;

    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        )
        .with_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
    }

    fn make(_: TenantId, id: AggregateId) -> CreditAccount {
        CreditAccount::empty(CreditAccountId::new(id))
    }

    fn open(d: &Dispatcher, tenant: TenantId, account: CreditAccountId, limit: u64) {
        d.dispatch(
            tenant,
            account.aggregate_id(),
            AGGREGATE_TYPE,
            CreditAccountCommand::OpenAccount(OpenAccount {
                tenant_id: tenant,
                account_id: account,
                owner: BuyerId::new(),
                buyer_kind: BuyerKind::Retailer,
                credit_limit: Money::new(limit),
                occurred_at: chrono::Utc::now(),
            }),
            make,
        )
        .unwrap();
    }

    fn reserve(tenant: TenantId, account: CreditAccountId, amount: u64) -> CreditAccountCommand {
        CreditAccountCommand::ReserveCredit(ReserveCredit {
            tenant_id: tenant,
            account_id: account,
            reservation_id: ReservationId::new(),
            order_id: OrderId::new(),
            seller_id: SellerId::new(),
            amount: Money::new(amount),
            occurred_at: chrono::Utc::now(),
        })
    }

    #[test]
    fn dispatch_appends_publishes_and_returns_new_state() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let tenant = TenantId::new();
        let account = CreditAccountId::generate();
        open(&d, tenant, account, 1_000);

        let out = d
            .dispatch(tenant, account.aggregate_id(), AGGREGATE_TYPE, reserve(tenant, account, 400), make)
            .unwrap();

        assert_eq!(out.committed.len(), 1);
        assert_eq!(out.committed[0].sequence_number, 2);
        assert_eq!(out.state.credit_available(), Money::new(600));
        assert_eq!(sub.drain().len(), 2);
    }

    #[test]
    fn business_rejection_is_not_retried_and_not_persisted() {
        let d = dispatcher();
        let tenant = TenantId::new();
        let account = CreditAccountId::generate();
        open(&d, tenant, account, 100);

        let err = d
            .dispatch(tenant, account.aggregate_id(), AGGREGATE_TYPE, reserve(tenant, account, 500), make)
            .unwrap_err();

        assert_eq!(err.code(), Some(RejectionCode::InsufficientCredit));
        assert_eq!(d.store().load_stream(tenant, account.aggregate_id()).unwrap().len(), 1);
    }

    #[test]
    fn load_rehydrates_without_writing() {
        let d = dispatcher();
        let tenant = TenantId::new();
        let account = CreditAccountId::generate();
        open(&d, tenant, account, 750);

        let state = d.load(tenant, account.aggregate_id(), make).unwrap();
        assert_eq!(state.credit_limit(), Money::new(750));
        assert_eq!(state.version(), 1);
    }

    #[test]
    fn history_decodes_events_in_stream_order() {
        let d = dispatcher();
        let tenant = TenantId::new();
        let account = CreditAccountId::generate();
        open(&d, tenant, account, 900);
        d.dispatch(tenant, account.aggregate_id(), AGGREGATE_TYPE, reserve(tenant, account, 300), make)
            .unwrap();

        let events: Vec<CreditAccountEvent> = d.history(tenant, account.aggregate_id()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], CreditAccountEvent::AccountOpened(_)));
        assert!(matches!(events[1], CreditAccountEvent::CreditReserved(_)));
    }

    #[test]
    fn cross_tenant_load_sees_an_empty_stream() {
        let d = dispatcher();
        let account = CreditAccountId::generate();
        open(&d, TenantId::new(), account, 750);

        let state = d.load(TenantId::new(), account.aggregate_id(), make).unwrap();
        assert!(!state.is_created());
    }
}
