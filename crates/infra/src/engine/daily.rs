use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use osas_core::TenantId;
use osas_events::{EventBus, EventEnvelope};

use super::{Engine, EngineError, Leased, today};
use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;

/// Counters for one tenant's daily pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DailyPassReport {
    pub reservations_expired: usize,
    pub penalties_accrued: usize,
    pub obligations_converted: usize,
    pub emi_plans_marked: usize,
    pub emi_plans_defaulted: usize,
    pub promises_checked: usize,
    /// Credit restorations re-applied from repayment history.
    pub restorations_repaired: usize,
    pub batches_generated: usize,
    pub risk_recomputed: usize,
    pub failures: usize,
}

impl DailyPassReport {
    fn absorb(&mut self, other: &DailyPassReport) {
        self.reservations_expired += other.reservations_expired;
        self.penalties_accrued += other.penalties_accrued;
        self.obligations_converted += other.obligations_converted;
        self.emi_plans_marked += other.emi_plans_marked;
        self.emi_plans_defaulted += other.emi_plans_defaulted;
        self.promises_checked += other.promises_checked;
        self.restorations_repaired += other.restorations_repaired;
        self.batches_generated += other.batches_generated;
        self.risk_recomputed += other.risk_recomputed;
        self.failures += other.failures;
    }
}

impl<S, B> Engine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Periodic pass over one tenant.
    ///
    /// Every item runs under its own single-flight key (`penalty:{id}:{day}`,
    /// `settlement:{seller}:{cutoff}`, ...), so overlapping or repeated
    /// invocations on the same day do the work once. A failing item is
    /// logged and counted; the pass carries on.
    pub fn run_daily_pass(&self, tenant_id: TenantId, now: DateTime<Utc>) -> DailyPassReport {
        let today = today(now);
        let day = today.format("%Y-%m-%d").to_string();
        let mut report = DailyPassReport::default();
        let directory = self.read_models.directory();

        match self.sweep_expired_reservations(tenant_id, now) {
            Ok(n) => report.reservations_expired = n,
            Err(e) => {
                warn!(%tenant_id, error = %e, "reservation sweep failed");
                report.failures += 1;
            }
        }

        for entry in directory.active_obligations(tenant_id) {
            if entry.due_date >= today {
                // Sorted by due date; the rest are not due yet.
                break;
            }
            let key = format!("penalty:{}:{day}", entry.obligation_id);
            match self.with_lease(tenant_id, &key, now, || {
                self.accrue_obligation(tenant_id, entry.obligation_id, now)
            }) {
                Ok(Leased::Ran((wrote, converted))) => {
                    report.penalties_accrued += usize::from(wrote);
                    report.obligations_converted += usize::from(converted);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%tenant_id, obligation_id = %entry.obligation_id, error = %e, "penalty accrual failed");
                    report.failures += 1;
                }
            }
        }

        for plan in directory.active_emi_plans(tenant_id) {
            let key = format!("emi-overdue:{}:{day}", plan.plan_id);
            match self.with_lease(tenant_id, &key, now, || {
                self.mark_plan_overdue(tenant_id, plan.plan_id, now)
            }) {
                Ok(Leased::Ran(defaulted)) => {
                    report.emi_plans_marked += 1;
                    report.emi_plans_defaulted += usize::from(defaulted);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%tenant_id, plan_id = %plan.plan_id, error = %e, "emi overdue check failed");
                    report.failures += 1;
                }
            }
        }

        for case in directory.open_recovery_cases(tenant_id) {
            let key = format!("promise:{}:{day}", case.case_id);
            match self.with_lease(tenant_id, &key, now, || {
                self.check_promise(tenant_id, case.case_id, now)
            }) {
                Ok(Leased::Ran(changed)) => report.promises_checked += usize::from(changed),
                Ok(_) => {}
                Err(e) => {
                    warn!(%tenant_id, case_id = %case.case_id, error = %e, "promise check failed");
                    report.failures += 1;
                }
            }
        }

        match self.with_lease(tenant_id, &format!("repair:{day}"), now, || {
            Ok(self.repair_follow_ups(tenant_id, now))
        }) {
            Ok(Leased::Ran((repaired, failed))) => {
                report.restorations_repaired += repaired;
                report.failures += failed;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(%tenant_id, error = %e, "repayment repair failed");
                report.failures += 1;
            }
        }

        for seller_id in directory.sellers_with_unbatched_lines(tenant_id) {
            match self.generate_batch(tenant_id, seller_id, now, now) {
                Ok(_) => report.batches_generated += 1,
                Err(e) if is_nothing_to_settle(&e) => {
                    debug!(%tenant_id, %seller_id, "no lines before cutoff");
                }
                Err(e) => {
                    warn!(%tenant_id, %seller_id, error = %e, "settlement generation failed");
                    report.failures += 1;
                }
            }
        }

        for account in directory.accounts(tenant_id) {
            let key = format!("risk:{}:{day}", account.account_id);
            match self.with_lease(tenant_id, &key, now, || {
                self.recompute_risk(tenant_id, account.account_id, now)
            }) {
                Ok(Leased::Ran(_)) => report.risk_recomputed += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(%tenant_id, account_id = %account.account_id, error = %e, "risk recompute failed");
                    report.failures += 1;
                }
            }
        }

        info!(%tenant_id, %today, ?report, "daily pass finished");
        report
    }

    /// Walk every obligation and EMI plan and re-issue lost follow-ups.
    ///
    /// Returns `(repaired, failed)`.
    fn repair_follow_ups(&self, tenant_id: TenantId, now: DateTime<Utc>) -> (usize, usize) {
        let directory = self.read_models.directory();
        let mut repaired = 0;
        let mut failed = 0;
        for entry in directory.obligations(tenant_id) {
            match self.repair_obligation(tenant_id, entry.obligation_id, now) {
                Ok(n) => repaired += n,
                Err(e) => {
                    warn!(%tenant_id, obligation_id = %entry.obligation_id, error = %e, "obligation repair failed");
                    failed += 1;
                }
            }
        }
        for plan in directory.emi_plans(tenant_id) {
            match self.repair_emi_plan(tenant_id, plan.plan_id, now) {
                Ok(n) => repaired += n,
                Err(e) => {
                    warn!(%tenant_id, plan_id = %plan.plan_id, error = %e, "emi plan repair failed");
                    failed += 1;
                }
            }
        }
        (repaired, failed)
    }

    /// Daily pass over every tenant seen in the ledger.
    pub fn run_daily_pass_all(&self, now: DateTime<Utc>) -> DailyPassReport {
        let mut total = DailyPassReport::default();
        for tenant_id in self.read_models.directory().tenants() {
            total.absorb(&self.run_daily_pass(tenant_id, now));
        }
        total
    }
}

fn is_nothing_to_settle(e: &EngineError) -> bool {
    matches!(e, EngineError::Dispatch(DispatchError::Validation(_)))
}
