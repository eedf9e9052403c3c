//! Trade-credit engine: orchestration across the ledger aggregates.
//!
//! Each aggregate decides alone; the engine sequences the hand-offs the
//! domain crates cannot see (a verified delivery commits a reservation, opens
//! an obligation and makes a settlement line eligible; a payment restores
//! account credit and re-scores the buyer). Every step is one dispatch against
//! one stream, so a step is atomic and every step is safe to repeat.
//!
//! Committed events are projected into the read models synchronously after
//! each dispatch. Decisions never read projections: they rehydrate from the
//! ledger store.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use osas_core::{
    Aggregate, AggregateId, CreditAccountId, DomainError, EmiPlanId, ObligationId, OrderId,
    RecoveryCaseId, SellerId, TenantId,
};
use osas_credit::{CreditAccount, CreditAccountCommand};
use osas_delivery::{DeliveryVerification, DeliveryVerificationCommand};
use osas_events::{EventBus, EventEnvelope};
use osas_recovery::{RecoveryCase, RecoveryCaseCommand};
use osas_repayment::{EmiPlan, EmiPlanCommand, ObligationCommand, RepaymentObligation};
use osas_settlement::{SellerSettlement, SellerSettlementCommand};

use crate::bank::{BankTransferGateway, InMemoryBankGateway};
use crate::command_dispatcher::{CommandDispatcher, Dispatched};
use crate::config::EngineConfig;
use crate::event_store::EventStore;
use crate::jobs::{InMemoryLeaseStore, LeaseOutcome, LeaseStore};
use crate::projections::ReadModels;
use crate::tickets::{InMemorySupportTickets, SupportTicketStore};

mod credit;
mod daily;
mod delivery;
mod error;
mod recovery;
mod repayment;
mod risk;
mod settlement;

pub use credit::ReserveRequest;
pub use daily::DailyPassReport;
pub use error::EngineError;
pub use risk::RiskOutcome;

pub type EngineResult<T> = Result<T, EngineError>;

pub struct Engine<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    read_models: ReadModels,
    leases: Arc<dyn LeaseStore>,
    bank: Arc<dyn BankTransferGateway>,
    tickets: Arc<dyn SupportTicketStore>,
    config: EngineConfig,
}

impl<S, B> Engine<S, B> {
    /// Engine with in-process leases, bank gateway and ticket store.
    pub fn new(store: S, bus: B, config: EngineConfig) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus).with_retry(config.retry.clone()),
            read_models: ReadModels::new(),
            leases: Arc::new(InMemoryLeaseStore::new()),
            bank: Arc::new(InMemoryBankGateway::new()),
            tickets: Arc::new(InMemorySupportTickets::new()),
            config,
        }
    }

    pub fn with_leases(mut self, leases: Arc<dyn LeaseStore>) -> Self {
        self.leases = leases;
        self
    }

    pub fn with_bank_gateway(mut self, bank: Arc<dyn BankTransferGateway>) -> Self {
        self.bank = bank;
        self
    }

    pub fn with_support_tickets(mut self, tickets: Arc<dyn SupportTicketStore>) -> Self {
        self.tickets = tickets;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn read_models(&self) -> &ReadModels {
        &self.read_models
    }

    pub fn tickets(&self) -> &dyn SupportTicketStore {
        self.tickets.as_ref()
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }
}

fn today(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

/// Outcome of running a unit of work under a single-flight key.
#[derive(Debug)]
pub(crate) enum Leased<T> {
    Ran(T),
    AlreadyDone,
    InFlight,
}

impl<S, B> Engine<S, B> {
    /// Run `work` at most once per `(tenant, key)`.
    ///
    /// A failed run releases the key so a later invocation may retry it.
    pub(crate) fn with_lease<T>(
        &self,
        tenant_id: TenantId,
        key: &str,
        now: DateTime<Utc>,
        work: impl FnOnce() -> EngineResult<T>,
    ) -> EngineResult<Leased<T>> {
        match self.leases.try_acquire(tenant_id, key, now)? {
            LeaseOutcome::Acquired => {}
            LeaseOutcome::AlreadyDone { at } => {
                debug!(%tenant_id, key, done_at = %at, "scope already ran");
                return Ok(Leased::AlreadyDone);
            }
            LeaseOutcome::InFlight { since } => {
                debug!(%tenant_id, key, since = %since, "scope is running elsewhere");
                return Ok(Leased::InFlight);
            }
        }
        match work() {
            Ok(value) => {
                self.leases.complete(tenant_id, key, now)?;
                Ok(Leased::Ran(value))
            }
            Err(e) => {
                if let Err(release_err) = self.leases.release(tenant_id, key) {
                    warn!(%tenant_id, key, error = %release_err, "failed to release lease");
                }
                Err(e)
            }
        }
    }
}

impl<S, B> Engine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Replay the whole ledger into fresh read models (startup, repair).
    pub fn rebuild_read_models(&self) -> EngineResult<usize> {
        Ok(self.read_models.rebuild(self.dispatcher.store())?)
    }

    fn run<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make: impl Fn(AggregateId) -> A,
    ) -> EngineResult<Dispatched<A>>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: osas_events::Event + Serialize + DeserializeOwned,
    {
        let dispatched = self.dispatcher.dispatch(
            tenant_id,
            aggregate_id,
            aggregate_type,
            command,
            |_, id| make(id),
        )?;
        if let Err(e) = self
            .read_models
            .project(self.dispatcher.store(), &dispatched.committed)
        {
            // The append is durable; a rebuild brings the read side back.
            warn!(%aggregate_id, aggregate_type, error = %e, "read model projection failed");
        }
        Ok(dispatched)
    }

    fn run_account(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        command: CreditAccountCommand,
    ) -> EngineResult<Dispatched<CreditAccount>> {
        self.run(tenant_id, account_id.0, osas_credit::AGGREGATE_TYPE, command, |id| {
            CreditAccount::empty(CreditAccountId(id))
        })
    }

    fn run_delivery(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        command: DeliveryVerificationCommand,
    ) -> EngineResult<Dispatched<DeliveryVerification>> {
        self.run(
            tenant_id,
            order_id.delivery_stream(),
            osas_delivery::AGGREGATE_TYPE,
            command,
            DeliveryVerification::empty,
        )
    }

    fn run_obligation(
        &self,
        tenant_id: TenantId,
        obligation_id: ObligationId,
        command: ObligationCommand,
    ) -> EngineResult<Dispatched<RepaymentObligation>> {
        self.run(
            tenant_id,
            obligation_id.0,
            osas_repayment::OBLIGATION_AGGREGATE_TYPE,
            command,
            |id| RepaymentObligation::empty(ObligationId(id)),
        )
    }

    fn run_emi_plan(
        &self,
        tenant_id: TenantId,
        plan_id: EmiPlanId,
        command: EmiPlanCommand,
    ) -> EngineResult<Dispatched<EmiPlan>> {
        self.run(
            tenant_id,
            plan_id.0,
            osas_repayment::EMI_PLAN_AGGREGATE_TYPE,
            command,
            |id| EmiPlan::empty(EmiPlanId(id)),
        )
    }

    fn run_seller(
        &self,
        tenant_id: TenantId,
        seller_id: SellerId,
        command: SellerSettlementCommand,
    ) -> EngineResult<Dispatched<SellerSettlement>> {
        self.run(
            tenant_id,
            seller_id.settlement_stream(),
            osas_settlement::AGGREGATE_TYPE,
            command,
            SellerSettlement::empty,
        )
    }

    fn run_case(
        &self,
        tenant_id: TenantId,
        case_id: RecoveryCaseId,
        command: RecoveryCaseCommand,
    ) -> EngineResult<Dispatched<RecoveryCase>> {
        self.run(tenant_id, case_id.0, osas_recovery::AGGREGATE_TYPE, command, |id| {
            RecoveryCase::empty(RecoveryCaseId(id))
        })
    }

    pub fn account(&self, tenant_id: TenantId, account_id: CreditAccountId) -> EngineResult<CreditAccount> {
        let account = self
            .dispatcher
            .load(tenant_id, account_id.0, |_, id| CreditAccount::empty(CreditAccountId(id)))?;
        if !account.is_created() {
            return Err(EngineError::unknown("credit account", account_id));
        }
        Ok(account)
    }

    pub fn delivery(&self, tenant_id: TenantId, order_id: OrderId) -> EngineResult<DeliveryVerification> {
        let delivery = self.dispatcher.load(tenant_id, order_id.delivery_stream(), |_, id| {
            DeliveryVerification::empty(id)
        })?;
        if !delivery.is_created() {
            return Err(EngineError::unknown("delivery", order_id));
        }
        Ok(delivery)
    }

    pub fn obligation(
        &self,
        tenant_id: TenantId,
        obligation_id: ObligationId,
    ) -> EngineResult<RepaymentObligation> {
        let obligation = self.dispatcher.load(tenant_id, obligation_id.0, |_, id| {
            RepaymentObligation::empty(ObligationId(id))
        })?;
        if !obligation.is_created() {
            return Err(EngineError::unknown("obligation", obligation_id));
        }
        Ok(obligation)
    }

    pub fn emi_plan(&self, tenant_id: TenantId, plan_id: EmiPlanId) -> EngineResult<EmiPlan> {
        let plan = self
            .dispatcher
            .load(tenant_id, plan_id.0, |_, id| EmiPlan::empty(EmiPlanId(id)))?;
        if !plan.is_created() {
            return Err(EngineError::unknown("emi plan", plan_id));
        }
        Ok(plan)
    }

    pub fn seller(&self, tenant_id: TenantId, seller_id: SellerId) -> EngineResult<SellerSettlement> {
        let seller = self
            .dispatcher
            .load(tenant_id, seller_id.settlement_stream(), |_, id| SellerSettlement::empty(id))?;
        if !seller.is_created() {
            return Err(EngineError::unknown("seller", seller_id));
        }
        Ok(seller)
    }

    /// `Ok(None)` when no case was ever opened.
    pub fn recovery_case(
        &self,
        tenant_id: TenantId,
        case_id: RecoveryCaseId,
    ) -> EngineResult<Option<RecoveryCase>> {
        let case = self
            .dispatcher
            .load(tenant_id, case_id.0, |_, id| RecoveryCase::empty(RecoveryCaseId(id)))?;
        Ok(case.is_created().then_some(case))
    }
}
