//! Buyer risk profiles.
//!
//! Accumulates the raw history the scorer needs (settled repayments, open
//! overdue obligations, delivery disputes and returns) and keeps an
//! append-only history of every risk level recorded on the account.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use osas_core::{BuyerId, CreditAccountId, ObligationId, OrderId, TenantId};
use osas_credit::CreditAccountEvent;
use osas_delivery::{DeliveryStatus, DeliveryVerificationEvent};
use osas_events::EventEnvelope;
use osas_repayment::ObligationEvent;
use osas_risk::{BuyerActivity, RepaymentRecord, RiskLevel};

use super::{Projection, ProjectionError, StreamCursors, decode};
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskHistoryEntry {
    pub risk_level: RiskLevel,
    pub risk_score: u8,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskProfile {
    pub account_id: CreditAccountId,
    pub buyer_id: Option<BuyerId>,
    pub repayments: Vec<RepaymentRecord>,
    pub dispute_count: u32,
    pub orders_delivered: u32,
    pub orders_returned: u32,
    pub history: Vec<RiskHistoryEntry>,
}

impl RiskProfile {
    fn new(account_id: CreditAccountId) -> Self {
        Self {
            account_id,
            buyer_id: None,
            repayments: Vec::new(),
            dispute_count: 0,
            orders_delivered: 0,
            orders_returned: 0,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> Option<&RiskHistoryEntry> {
        self.history.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TrackedObligation {
    account_id: CreditAccountId,
    due_date: NaiveDate,
    overdue: bool,
    open: bool,
}

#[derive(Debug, Default)]
pub struct RiskProfiles {
    cursors: Mutex<StreamCursors>,
    profiles: InMemoryTenantStore<CreditAccountId, RiskProfile>,
    obligations: InMemoryTenantStore<ObligationId, TrackedObligation>,
    orders: InMemoryTenantStore<OrderId, CreditAccountId>,
}

impl RiskProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tenant_id: TenantId, account_id: CreditAccountId) -> Option<RiskProfile> {
        self.profiles.get(tenant_id, &account_id)
    }

    /// Scorer input for `account_id` as of `today`.
    ///
    /// `utilization_peak_bps` is owned by the account stream and left at zero.
    pub fn activity(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        today: NaiveDate,
    ) -> BuyerActivity {
        let profile = self
            .profiles
            .get(tenant_id, &account_id)
            .unwrap_or_else(|| RiskProfile::new(account_id));

        let open_overdue_days = self
            .obligations
            .list(tenant_id)
            .into_iter()
            .filter(|o| o.account_id == account_id && o.open && o.overdue)
            .map(|o| u32::try_from((today - o.due_date).num_days().max(0)).unwrap_or(u32::MAX))
            .collect();

        BuyerActivity {
            repayments: profile.repayments,
            open_overdue_days,
            dispute_count: profile.dispute_count,
            orders_delivered: profile.orders_delivered,
            orders_returned: profile.orders_returned,
            utilization_peak_bps: 0,
        }
    }

    fn with_profile(&self, tenant_id: TenantId, account_id: CreditAccountId, f: impl FnOnce(&mut RiskProfile)) {
        self.profiles
            .modify_or_insert(tenant_id, account_id, || RiskProfile::new(account_id), f);
    }

    fn with_obligation(
        &self,
        tenant_id: TenantId,
        obligation_id: ObligationId,
        f: impl FnOnce(&mut TrackedObligation),
    ) -> Option<TrackedObligation> {
        self.obligations.modify(tenant_id, &obligation_id, f)
    }

    fn apply_credit(&self, tenant_id: TenantId, event: CreditAccountEvent) {
        match event {
            CreditAccountEvent::AccountOpened(e) => {
                self.with_profile(tenant_id, e.account_id, |p| p.buyer_id = Some(e.owner));
            }
            CreditAccountEvent::RiskLevelUpdated(e) => {
                self.with_profile(tenant_id, e.account_id, |p| {
                    p.history.push(RiskHistoryEntry {
                        risk_level: e.risk_level,
                        risk_score: e.risk_score,
                        recorded_at: e.occurred_at,
                    })
                });
            }
            _ => {}
        }
    }

    fn apply_obligation(&self, tenant_id: TenantId, event: ObligationEvent) {
        match event {
            ObligationEvent::ObligationOpened(e) => {
                self.obligations.upsert(
                    tenant_id,
                    e.obligation_id,
                    TrackedObligation {
                        account_id: e.account_id,
                        due_date: e.due_date,
                        overdue: false,
                        open: true,
                    },
                );
            }
            ObligationEvent::BecameOverdue(e) => {
                self.with_obligation(tenant_id, e.obligation_id, |o| o.overdue = true);
            }
            ObligationEvent::DueDateExtended(e) => {
                self.with_obligation(tenant_id, e.obligation_id, |o| {
                    o.due_date = e.new_due_date;
                    o.overdue = false;
                });
            }
            ObligationEvent::PaymentRecorded(e) if e.outstanding_after.is_zero() => {
                let settled_on = e.occurred_at.date_naive();
                if let Some(tracked) = self.with_obligation(tenant_id, e.obligation_id, |o| o.open = false) {
                    self.with_profile(tenant_id, tracked.account_id, |p| {
                        p.repayments.push(RepaymentRecord {
                            due_date: tracked.due_date,
                            settled_on,
                        })
                    });
                }
            }
            ObligationEvent::TransferredToEmi(e) => {
                self.with_obligation(tenant_id, e.obligation_id, |o| o.open = false);
            }
            ObligationEvent::ObligationWrittenOff(e) => {
                self.with_obligation(tenant_id, e.obligation_id, |o| o.open = false);
            }
            _ => {}
        }
    }

    fn apply_delivery(&self, tenant_id: TenantId, event: DeliveryVerificationEvent) {
        match event {
            DeliveryVerificationEvent::DeliveryRegistered(e) => {
                self.orders.upsert(tenant_id, e.order_id, e.account_id);
            }
            DeliveryVerificationEvent::DeliveryVerified(e) => {
                self.with_profile(tenant_id, e.account_id, |p| p.orders_delivered += 1);
            }
            DeliveryVerificationEvent::DeliveryStatusRecorded(e)
                if e.delivery_status == DeliveryStatus::Returned =>
            {
                if let Some(account_id) = self.orders.get(tenant_id, &e.order_id) {
                    self.with_profile(tenant_id, account_id, |p| p.orders_returned += 1);
                }
            }
            DeliveryVerificationEvent::DeliveryExceptionRaised(e) => {
                if let Some(account_id) = self.orders.get(tenant_id, &e.order_id) {
                    self.with_profile(tenant_id, account_id, |p| p.dispute_count += 1);
                }
            }
            _ => {}
        }
    }
}

impl Projection for RiskProfiles {
    fn name(&self) -> &'static str {
        "risk_profiles"
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
            osas_delivery::AGGREGATE_TYPE => self.apply_delivery(tenant_id, decode(envelope)?),
            _ => {}
        }

        cursors.advance(envelope);
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        self.profiles.clear_tenant(tenant_id);
        self.obligations.clear_tenant(tenant_id);
        self.orders.clear_tenant(tenant_id);
        cursors.clear_tenant(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use osas_core::{BuyerKind, Money, ReservationId, SellerId};
    use osas_repayment::{BecameOverdue, ObligationOpened, PaymentMethod, PaymentRecorded};
    use uuid::Uuid;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    fn envelope(
        tenant_id: TenantId,
        obligation_id: ObligationId,
        seq: u64,
        event: &ObligationEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            obligation_id.0,
            osas_repayment::OBLIGATION_AGGREGATE_TYPE,
            seq,
            "test",
            at(1),
            serde_json::to_value(event).unwrap(),
        )
    }

    fn opened(
        tenant_id: TenantId,
        obligation_id: ObligationId,
        account_id: CreditAccountId,
        due: NaiveDate,
    ) -> ObligationEvent {
        ObligationEvent::ObligationOpened(ObligationOpened {
            tenant_id,
            obligation_id,
            account_id,
            buyer_id: BuyerId::new(),
            buyer_kind: BuyerKind::Designer,
            seller_id: SellerId::new(),
            order_id: OrderId::new(),
            reservation_id: ReservationId::new(),
            amount: Money::new(10_000),
            due_date: due,
            occurred_at: at(1),
        })
    }

    #[test]
    fn open_overdue_obligation_counts_running_delay() {
        let profiles = RiskProfiles::new();
        let tenant = TenantId::new();
        let account = CreditAccountId::generate();
        let obligation = ObligationId::generate();
        let due = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();

        profiles
            .apply_envelope(&envelope(tenant, obligation, 1, &opened(tenant, obligation, account, due)))
            .unwrap();
        let overdue = ObligationEvent::BecameOverdue(BecameOverdue {
            tenant_id: tenant,
            obligation_id: obligation,
            account_id: account,
            buyer_id: BuyerId::new(),
            days_overdue: 1,
            occurred_at: at(2),
        });
        profiles.apply_envelope(&envelope(tenant, obligation, 2, &overdue)).unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        assert_eq!(profiles.activity(tenant, account, today).open_overdue_days, vec![10]);
    }

    #[test]
    fn settled_obligation_becomes_repayment_record() {
        let profiles = RiskProfiles::new();
        let tenant = TenantId::new();
        let account = CreditAccountId::generate();
        let obligation = ObligationId::generate();
        let due = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();

        profiles
            .apply_envelope(&envelope(tenant, obligation, 1, &opened(tenant, obligation, account, due)))
            .unwrap();
        let paid = ObligationEvent::PaymentRecorded(PaymentRecorded {
            tenant_id: tenant,
            obligation_id: obligation,
            account_id: account,
            payment_id: Uuid::now_v7(),
            amount: Money::new(10_000),
            method: PaymentMethod::Upi,
            penalty_component: Money::ZERO,
            principal_component: Money::new(10_000),
            outstanding_after: Money::ZERO,
            occurred_at: at(8),
        });
        profiles.apply_envelope(&envelope(tenant, obligation, 2, &paid)).unwrap();

        let activity = profiles.activity(tenant, account, NaiveDate::from_ymd_opt(2026, 3, 20).unwrap());
        assert!(activity.open_overdue_days.is_empty());
        assert_eq!(activity.repayments.len(), 1);
        assert_eq!(activity.repayments[0].delay_days(), 3);
    }
}
