//! Ledger directory: which streams exist per tenant and how they relate.
//!
//! Jobs walk it to find work (open reservations, active obligations, open
//! recovery cases, sellers with unbatched lines) and the API uses it to
//! resolve ids that do not name a stream on their own (a batch lives in its
//! seller's stream).

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use osas_core::{
    BatchId, BuyerId, BuyerKind, CreditAccountId, EmiPlanId, Money, ObligationId, OrderId,
    RecoveryCaseId, ReservationId, SellerId, TenantId,
};
use osas_credit::{CreditAccountEvent, ReservationState};
use osas_events::EventEnvelope;
use osas_recovery::RecoveryCaseEvent;
use osas_repayment::{EmiPlanEvent, ObligationEvent};
use osas_settlement::SellerSettlementEvent;

use super::{Projection, ProjectionError, StreamCursors, decode};
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountEntry {
    pub account_id: CreditAccountId,
    pub owner: BuyerId,
    pub buyer_kind: BuyerKind,
    pub frozen: bool,
    pub open_reservations: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationEntry {
    pub reservation_id: ReservationId,
    pub account_id: CreditAccountId,
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub amount: Money,
    pub state: ReservationState,
    pub obligation_id: Option<ObligationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObligationEntry {
    pub obligation_id: ObligationId,
    pub account_id: CreditAccountId,
    pub buyer_id: BuyerId,
    pub order_id: OrderId,
    pub due_date: NaiveDate,
    pub overdue: bool,
    /// False once paid, converted to EMI or written off.
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmiPlanEntry {
    pub plan_id: EmiPlanId,
    pub account_id: CreditAccountId,
    pub obligations: Vec<ObligationId>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchEntry {
    pub batch_id: BatchId,
    pub seller_id: SellerId,
    pub cutoff: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryEntry {
    pub case_id: RecoveryCaseId,
    pub obligation_id: ObligationId,
    pub account_id: CreditAccountId,
    pub resolved: bool,
}

#[derive(Debug, Default)]
pub struct LedgerDirectory {
    cursors: Mutex<StreamCursors>,
    accounts: InMemoryTenantStore<CreditAccountId, AccountEntry>,
    reservations: InMemoryTenantStore<ReservationId, ReservationEntry>,
    obligations: InMemoryTenantStore<ObligationId, ObligationEntry>,
    emi_plans: InMemoryTenantStore<EmiPlanId, EmiPlanEntry>,
    batches: InMemoryTenantStore<BatchId, BatchEntry>,
    /// Unbatched eligible line count per seller.
    sellers: InMemoryTenantStore<SellerId, (SellerId, u32)>,
    recovery_cases: InMemoryTenantStore<RecoveryCaseId, RecoveryEntry>,
}

impl LedgerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tenants that have at least one projected event.
    pub fn tenants(&self) -> Vec<TenantId> {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tenants()
    }

    pub fn account(&self, tenant_id: TenantId, account_id: CreditAccountId) -> Option<AccountEntry> {
        self.accounts.get(tenant_id, &account_id)
    }

    pub fn accounts(&self, tenant_id: TenantId) -> Vec<AccountEntry> {
        self.accounts.list(tenant_id)
    }

    pub fn reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
    ) -> Option<ReservationEntry> {
        self.reservations.get(tenant_id, &reservation_id)
    }

    pub fn obligation(
        &self,
        tenant_id: TenantId,
        obligation_id: ObligationId,
    ) -> Option<ObligationEntry> {
        self.obligations.get(tenant_id, &obligation_id)
    }

    /// Every obligation, closed ones included.
    pub fn obligations(&self, tenant_id: TenantId) -> Vec<ObligationEntry> {
        self.obligations.list(tenant_id)
    }

    pub fn active_obligations(&self, tenant_id: TenantId) -> Vec<ObligationEntry> {
        let mut out: Vec<_> = self
            .obligations
            .list(tenant_id)
            .into_iter()
            .filter(|o| o.active)
            .collect();
        out.sort_by_key(|o| (o.due_date, o.obligation_id));
        out
    }

    pub fn emi_plans(&self, tenant_id: TenantId) -> Vec<EmiPlanEntry> {
        self.emi_plans.list(tenant_id)
    }

    pub fn active_emi_plans(&self, tenant_id: TenantId) -> Vec<EmiPlanEntry> {
        self.emi_plans
            .list(tenant_id)
            .into_iter()
            .filter(|p| p.active)
            .collect()
    }

    pub fn batch(&self, tenant_id: TenantId, batch_id: BatchId) -> Option<BatchEntry> {
        self.batches.get(tenant_id, &batch_id)
    }

    /// Sellers holding eligible lines not yet allocated to a batch.
    pub fn sellers_with_unbatched_lines(&self, tenant_id: TenantId) -> Vec<SellerId> {
        let mut out: Vec<_> = self
            .sellers
            .list(tenant_id)
            .into_iter()
            .filter(|(_, unbatched)| *unbatched > 0)
            .map(|(seller_id, _)| seller_id)
            .collect();
        out.sort();
        out
    }

    pub fn open_recovery_cases(&self, tenant_id: TenantId) -> Vec<RecoveryEntry> {
        self.recovery_cases
            .list(tenant_id)
            .into_iter()
            .filter(|c| !c.resolved)
            .collect()
    }

    fn apply_credit(&self, tenant_id: TenantId, event: CreditAccountEvent) {
        match event {
            CreditAccountEvent::AccountOpened(e) => {
                self.accounts.upsert(
                    tenant_id,
                    e.account_id,
                    AccountEntry {
                        account_id: e.account_id,
                        owner: e.owner,
                        buyer_kind: e.buyer_kind,
                        frozen: false,
                        open_reservations: 0,
                    },
                );
            }
            CreditAccountEvent::CreditReserved(e) => {
                self.accounts.modify(tenant_id, &e.account_id, |a| a.open_reservations += 1);
                self.reservations.upsert(
                    tenant_id,
                    e.reservation_id,
                    ReservationEntry {
                        reservation_id: e.reservation_id,
                        account_id: e.account_id,
                        order_id: e.order_id,
                        seller_id: e.seller_id,
                        amount: e.amount,
                        state: ReservationState::Reserved,
                        obligation_id: None,
                    },
                );
            }
            CreditAccountEvent::ReservationCommitted(e) => {
                self.close_reservation(tenant_id, e.account_id, e.reservation_id, ReservationState::Committed);
                self.reservations.modify(tenant_id, &e.reservation_id, |r| {
                    r.obligation_id = Some(e.obligation_id)
                });
            }
            CreditAccountEvent::ReservationReleased(e) => {
                self.close_reservation(tenant_id, e.account_id, e.reservation_id, ReservationState::Released);
            }
            CreditAccountEvent::ReservationExpired(e) => {
                self.close_reservation(tenant_id, e.account_id, e.reservation_id, ReservationState::Expired);
            }
            CreditAccountEvent::AccountFrozen(e) => {
                self.accounts.modify(tenant_id, &e.account_id, |a| a.frozen = true);
            }
            CreditAccountEvent::AccountUnfrozen(e) => {
                self.accounts.modify(tenant_id, &e.account_id, |a| a.frozen = false);
            }
            CreditAccountEvent::CreditRestored(_)
            | CreditAccountEvent::LimitAdjusted(_)
            | CreditAccountEvent::RiskLevelUpdated(_) => {}
        }
    }

    fn close_reservation(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        reservation_id: ReservationId,
        state: ReservationState,
    ) {
        self.accounts.modify(tenant_id, &account_id, |a| {
            a.open_reservations = a.open_reservations.saturating_sub(1)
        });
        self.reservations.modify(tenant_id, &reservation_id, |r| r.state = state);
    }

    fn apply_obligation(&self, tenant_id: TenantId, event: ObligationEvent) {
        match event {
            ObligationEvent::ObligationOpened(e) => {
                self.obligations.upsert(
                    tenant_id,
                    e.obligation_id,
                    ObligationEntry {
                        obligation_id: e.obligation_id,
                        account_id: e.account_id,
                        buyer_id: e.buyer_id,
                        order_id: e.order_id,
                        due_date: e.due_date,
                        overdue: false,
                        active: true,
                    },
                );
            }
            ObligationEvent::PaymentRecorded(e) => {
                if e.outstanding_after.is_zero() {
                    self.obligations.modify(tenant_id, &e.obligation_id, |o| o.active = false);
                }
            }
            ObligationEvent::BecameOverdue(e) => {
                self.obligations.modify(tenant_id, &e.obligation_id, |o| o.overdue = true);
            }
            ObligationEvent::DueDateExtended(e) => {
                self.obligations.modify(tenant_id, &e.obligation_id, |o| {
                    o.due_date = e.new_due_date;
                    o.overdue = false;
                });
            }
            ObligationEvent::TransferredToEmi(e) => {
                self.obligations.modify(tenant_id, &e.obligation_id, |o| o.active = false);
            }
            ObligationEvent::ObligationWrittenOff(e) => {
                self.obligations.modify(tenant_id, &e.obligation_id, |o| o.active = false);
            }
            ObligationEvent::PenaltyAccrued(_) => {}
        }
    }

    fn apply_emi(&self, tenant_id: TenantId, event: EmiPlanEvent) {
        match event {
            EmiPlanEvent::EmiPlanCreated(e) => {
                self.emi_plans.upsert(
                    tenant_id,
                    e.plan_id,
                    EmiPlanEntry {
                        plan_id: e.plan_id,
                        account_id: e.account_id,
                        obligations: e.obligations,
                        active: true,
                    },
                );
            }
            EmiPlanEvent::PlanCompleted(e) => {
                self.emi_plans.modify(tenant_id, &e.plan_id, |p| p.active = false);
            }
            EmiPlanEvent::PlanDefaulted(e) => {
                self.emi_plans.modify(tenant_id, &e.plan_id, |p| p.active = false);
            }
            EmiPlanEvent::InstallmentPaid(_) | EmiPlanEvent::InstallmentsOverdue(_) => {}
        }
    }

    fn apply_settlement(&self, tenant_id: TenantId, event: SellerSettlementEvent) {
        match event {
            SellerSettlementEvent::LineBecameEligible(e) => {
                let (_, unbatched) = self
                    .sellers
                    .get(tenant_id, &e.seller_id)
                    .unwrap_or((e.seller_id, 0));
                self.sellers.upsert(tenant_id, e.seller_id, (e.seller_id, unbatched + 1));
            }
            SellerSettlementEvent::BatchGenerated(e) => {
                let allocated = u32::try_from(e.lines.len()).unwrap_or(u32::MAX);
                self.sellers.modify(tenant_id, &e.seller_id, |(_, unbatched)| {
                    *unbatched = unbatched.saturating_sub(allocated)
                });
                self.batches.upsert(
                    tenant_id,
                    e.batch_id,
                    BatchEntry {
                        batch_id: e.batch_id,
                        seller_id: e.seller_id,
                        cutoff: e.cutoff,
                    },
                );
            }
            SellerSettlementEvent::BatchAbandoned(e) => {
                let released = u32::try_from(e.released_orders.len()).unwrap_or(u32::MAX);
                self.sellers.modify(tenant_id, &e.seller_id, |(_, unbatched)| {
                    *unbatched += released
                });
            }
            _ => {}
        }
    }

    fn apply_recovery(&self, tenant_id: TenantId, event: RecoveryCaseEvent) {
        match event {
            RecoveryCaseEvent::CaseOpened(e) => {
                self.recovery_cases.upsert(
                    tenant_id,
                    e.case_id,
                    RecoveryEntry {
                        case_id: e.case_id,
                        obligation_id: e.obligation_id,
                        account_id: e.account_id,
                        resolved: false,
                    },
                );
            }
            RecoveryCaseEvent::CaseResolved(e) => {
                self.recovery_cases.modify(tenant_id, &e.case_id, |c| c.resolved = true);
            }
            _ => {}
        }
    }
}

impl Projection for LedgerDirectory {
    fn name(&self) -> &'static str {
        "ledger_directory"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        if !cursors.admit(envelope)? {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        match envelope.aggregate_type() {
            osas_credit::AGGREGATE_TYPE => self.apply_credit(tenant_id, decode(envelope)?),
            osas_repayment::OBLIGATION_AGGREGATE_TYPE => {
                self.apply_obligation(tenant_id, decode(envelope)?)
            }
            osas_repayment::EMI_PLAN_AGGREGATE_TYPE => self.apply_emi(tenant_id, decode(envelope)?),
            osas_settlement::AGGREGATE_TYPE => self.apply_settlement(tenant_id, decode(envelope)?),
            osas_recovery::AGGREGATE_TYPE => self.apply_recovery(tenant_id, decode(envelope)?),
            _ => {}
        }

        cursors.advance(envelope);
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        self.accounts.clear_tenant(tenant_id);
        self.reservations.clear_tenant(tenant_id);
        self.obligations.clear_tenant(tenant_id);
        self.emi_plans.clear_tenant(tenant_id);
        self.batches.clear_tenant(tenant_id);
        self.sellers.clear_tenant(tenant_id);
        self.recovery_cases.clear_tenant(tenant_id);
        cursors.clear_tenant(tenant_id);
    }
}
