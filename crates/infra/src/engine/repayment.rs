use std::collections::BTreeSet;

use chrono::{DateTime, Months, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

use osas_core::{
    CreditAccountId, EmiPlanId, LedgerReference, Money, ObligationId, RejectionCode, TenantId,
    UserId,
};
use osas_credit::{CreditAccountCommand, RestoreCredit};
use osas_events::{EventBus, EventEnvelope};
use osas_repayment::{
    AccruePenalty, ConvertToEmi, CreateEmiPlan, EmiPlan, EmiPlanCommand, EmiPlanEvent,
    MarkOverdueInstallments, ObligationCommand, ObligationEvent, ObligationStatus, PayInstallment,
    PaymentMethod, RecordPayment, RepaymentObligation, RequestSkip, WriteOff, build_schedule,
};

use super::{Engine, EngineError, EngineResult, today};
use crate::event_store::EventStore;

impl<S, B> Engine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Record a buyer payment and return its principal to the credit line.
    ///
    /// Penalty is settled first. A repeated `payment_id` records nothing new
    /// but re-issues any follow-up the first attempt did not finish.
    pub fn pay(
        &self,
        tenant_id: TenantId,
        obligation_id: ObligationId,
        payment_id: Uuid,
        amount: Money,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> EngineResult<RepaymentObligation> {
        let dispatched = self
            .run_obligation(
                tenant_id,
                obligation_id,
                ObligationCommand::RecordPayment(RecordPayment {
                    tenant_id,
                    obligation_id,
                    payment_id,
                    amount,
                    method,
                    occurred_at: now,
                }),
            )
            .inspect_err(|e| {
                if e.code().is_some() {
                    warn!(%tenant_id, %obligation_id, amount = amount.minor(), error = %e, "payment rejected");
                }
            })?;

        if dispatched.is_noop() {
            self.repair_obligation(tenant_id, obligation_id, now)?;
        }
        let obligation = dispatched.state;
        for event in &dispatched.events {
            let ObligationEvent::PaymentRecorded(e) = event else {
                continue;
            };
            info!(
                %tenant_id,
                %obligation_id,
                amount = e.amount.minor(),
                principal = e.principal_component.minor(),
                penalty = e.penalty_component.minor(),
                outstanding_after = e.outstanding_after.minor(),
                "payment recorded"
            );
            if !e.principal_component.is_zero() {
                let reference = obligation
                    .order_id()
                    .map(LedgerReference::Order)
                    .ok_or_else(|| EngineError::unknown("obligation", obligation_id))?;
                self.restore_credit(
                    tenant_id,
                    e.account_id,
                    e.payment_id,
                    e.principal_component,
                    reference,
                    now,
                )?;
            }
        }

        self.sync_recovery(tenant_id, &obligation, now)?;
        if !dispatched.events.is_empty() && obligation.status() == ObligationStatus::Paid {
            self.rescore_after(tenant_id, obligation.account_id(), now);
        }
        Ok(obligation)
    }

    /// Push the due date out by the configured extension.
    pub fn request_skip(
        &self,
        tenant_id: TenantId,
        obligation_id: ObligationId,
        now: DateTime<Utc>,
    ) -> EngineResult<RepaymentObligation> {
        let policy = &self.config.repayment;
        let dispatched = self
            .run_obligation(
                tenant_id,
                obligation_id,
                ObligationCommand::RequestSkip(RequestSkip {
                    tenant_id,
                    obligation_id,
                    max_skips: policy.max_skips_allowed,
                    extension_days: policy.skip_extension_days,
                    occurred_at: now,
                }),
            )
            .inspect_err(|e| {
                if e.is_rejection(RejectionCode::SkipLimitExceeded) {
                    warn!(%tenant_id, %obligation_id, "skip limit exceeded");
                }
            })?;
        let obligation = dispatched.state;
        info!(%tenant_id, %obligation_id, due_date = ?obligation.due_date(), skips = obligation.skip_count(), "due date extended");
        self.sync_recovery(tenant_id, &obligation, now)?;
        Ok(obligation)
    }

    /// Move one or more obligations of the same account into a new EMI plan.
    pub fn convert_to_emi(
        &self,
        tenant_id: TenantId,
        obligation_ids: &[ObligationId],
        tenure_months: Option<u32>,
        now: DateTime<Utc>,
    ) -> EngineResult<EmiPlan> {
        let ids: Vec<ObligationId> = {
            let mut seen = BTreeSet::new();
            obligation_ids.iter().copied().filter(|id| seen.insert(*id)).collect()
        };
        let Some(first) = ids.first().copied() else {
            return Err(EngineError::Validation("emi conversion needs at least one obligation".to_string()));
        };
        let policy = &self.config.repayment;
        let tenure_months = tenure_months.unwrap_or(policy.emi_default_tenure_months);
        if !policy.allows_tenure(tenure_months) {
            return Err(EngineError::Validation(format!(
                "tenure_months must be between 1 and {}",
                policy.emi_max_tenure_months
            )));
        }

        // Validate the whole set before any balance moves.
        let mut account: Option<CreditAccountId> = None;
        let mut buyer = None;
        let mut expected_principal = Money::ZERO;
        for id in &ids {
            let obligation = self.obligation(tenant_id, *id)?;
            match obligation.status() {
                ObligationStatus::EmiConverted => {
                    return Err(EngineError::rejected(RejectionCode::AlreadyConverted, id));
                }
                ObligationStatus::Paid | ObligationStatus::WrittenOff => {
                    return Err(EngineError::rejected(RejectionCode::InvalidState, id));
                }
                _ => {}
            }
            if account.is_some() && account != obligation.account_id() {
                return Err(EngineError::Validation(
                    "obligations in one emi plan must share a credit account".to_string(),
                ));
            }
            account = obligation.account_id();
            buyer = obligation.buyer_id();
            expected_principal = expected_principal
                .checked_add(obligation.outstanding())
                .map_err(|e| EngineError::Validation(e.to_string()))?;
        }
        let (Some(account_id), Some(buyer_id)) = (account, buyer) else {
            return Err(EngineError::unknown("obligation", first));
        };

        // The plan must be creatable before any obligation hands over its balance.
        let first_due_date = today(now)
            .checked_add_months(Months::new(1))
            .ok_or_else(|| EngineError::Validation("first due date out of range".to_string()))?;
        build_schedule(expected_principal, tenure_months, policy.emi_monthly_interest(), first_due_date)
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        let plan_id = EmiPlanId::generate();
        let mut converted = Vec::with_capacity(ids.len());
        let mut principal = Money::ZERO;
        let mut drawn_credit = Money::ZERO;
        for id in &ids {
            let result = self.run_obligation(
                tenant_id,
                *id,
                ObligationCommand::ConvertToEmi(ConvertToEmi {
                    tenant_id,
                    obligation_id: *id,
                    emi_plan_id: plan_id,
                    occurred_at: now,
                }),
            );
            match result {
                Ok(dispatched) => {
                    for event in &dispatched.events {
                        if let ObligationEvent::TransferredToEmi(e) = event {
                            principal = principal.checked_add(e.amount).map_err(|e| EngineError::Validation(e.to_string()))?;
                            drawn_credit = drawn_credit
                                .checked_add(e.principal_component)
                                .map_err(|e| EngineError::Validation(e.to_string()))?;
                        }
                    }
                    converted.push(*id);
                }
                Err(e) if converted.is_empty() => return Err(e),
                // Earlier obligations already moved into this plan; it must still be created.
                Err(e) => {
                    warn!(%tenant_id, obligation_id = %id, %plan_id, error = %e, "obligation left out of emi plan");
                }
            }
        }

        let dispatched = self.run_emi_plan(
            tenant_id,
            plan_id,
            EmiPlanCommand::CreateEmiPlan(CreateEmiPlan {
                tenant_id,
                plan_id,
                account_id,
                buyer_id,
                obligations: converted.clone(),
                principal,
                drawn_credit,
                tenure_months,
                monthly_interest: policy.emi_monthly_interest(),
                first_due_date,
                occurred_at: now,
            }),
        )?;
        info!(
            %tenant_id,
            %plan_id,
            %account_id,
            obligations = converted.len(),
            principal = principal.minor(),
            tenure_months,
            "emi plan created"
        );

        for id in &converted {
            let obligation = self.obligation(tenant_id, *id)?;
            self.sync_recovery(tenant_id, &obligation, now)?;
        }
        Ok(dispatched.state)
    }

    /// Pay an installment (the earliest open one when `installment_number` is `None`).
    pub fn pay_installment(
        &self,
        tenant_id: TenantId,
        plan_id: EmiPlanId,
        payment_id: Uuid,
        installment_number: Option<u32>,
        amount: Money,
        now: DateTime<Utc>,
    ) -> EngineResult<EmiPlan> {
        let dispatched = self.run_emi_plan(
            tenant_id,
            plan_id,
            EmiPlanCommand::PayInstallment(PayInstallment {
                tenant_id,
                plan_id,
                payment_id,
                installment_number,
                amount,
                occurred_at: now,
            }),
        )?;
        if dispatched.is_noop() {
            self.repair_emi_plan(tenant_id, plan_id, now)?;
        }
        for event in &dispatched.events {
            match event {
                EmiPlanEvent::InstallmentPaid(e) => {
                    info!(
                        %tenant_id,
                        %plan_id,
                        installment = e.installment_number,
                        amount = e.amount.minor(),
                        settled = e.installment_settled,
                        "emi installment paid"
                    );
                    if !e.credit_restored.is_zero() {
                        self.restore_credit(
                            tenant_id,
                            e.account_id,
                            e.payment_id,
                            e.credit_restored,
                            LedgerReference::EmiPlan(plan_id),
                            now,
                        )?;
                    }
                }
                EmiPlanEvent::PlanCompleted(_) => {
                    info!(%tenant_id, %plan_id, "emi plan completed");
                    self.rescore_after(tenant_id, dispatched.state.account_id(), now);
                }
                _ => {}
            }
        }
        Ok(dispatched.state)
    }

    /// Write off the remaining balance; the recovery case resolves on the decision.
    pub fn write_off(
        &self,
        tenant_id: TenantId,
        obligation_id: ObligationId,
        reason: &str,
        approved_by: UserId,
        now: DateTime<Utc>,
    ) -> EngineResult<RepaymentObligation> {
        let dispatched = self.run_obligation(
            tenant_id,
            obligation_id,
            ObligationCommand::WriteOff(WriteOff {
                tenant_id,
                obligation_id,
                reason: reason.to_string(),
                approved_by,
                occurred_at: now,
            }),
        )?;
        if dispatched.is_noop() {
            self.repair_obligation(tenant_id, obligation_id, now)?;
        }
        let obligation = dispatched.state;
        for event in &dispatched.events {
            let ObligationEvent::ObligationWrittenOff(e) = event else {
                continue;
            };
            warn!(%tenant_id, %obligation_id, amount = e.amount.minor(), %approved_by, "obligation written off");
            if !e.principal_component.is_zero() {
                let reference = obligation
                    .order_id()
                    .map(LedgerReference::Order)
                    .ok_or_else(|| EngineError::unknown("obligation", obligation_id))?;
                self.restore_credit(
                    tenant_id,
                    e.account_id,
                    *obligation_id.0.as_uuid(),
                    e.principal_component,
                    reference,
                    now,
                )?;
            }
        }

        self.record_case_write_off(tenant_id, &obligation, approved_by, reason, now)?;
        self.sync_recovery(tenant_id, &obligation, now)?;
        if !dispatched.events.is_empty() {
            self.rescore_after(tenant_id, obligation.account_id(), now);
        }
        Ok(obligation)
    }

    /// Accrue one day of penalty (with catch-up) and escalate into recovery.
    ///
    /// Returns whether any event was written and whether the obligation was
    /// auto-converted to EMI.
    pub(crate) fn accrue_obligation(
        &self,
        tenant_id: TenantId,
        obligation_id: ObligationId,
        now: DateTime<Utc>,
    ) -> EngineResult<(bool, bool)> {
        let policy = &self.config.repayment;
        let today = today(now);
        let dispatched = self.run_obligation(
            tenant_id,
            obligation_id,
            ObligationCommand::AccruePenalty(AccruePenalty {
                tenant_id,
                obligation_id,
                today,
                penalty_rate: policy.penalty_rate(),
                cap_days: policy.penalty_cap_days,
                occurred_at: now,
            }),
        )?;
        let obligation = dispatched.state;
        let became_overdue = dispatched
            .events
            .iter()
            .any(|e| matches!(e, ObligationEvent::BecameOverdue(_)));
        if became_overdue {
            warn!(%tenant_id, %obligation_id, days_overdue = obligation.days_overdue(today), "obligation overdue");
        }

        let opens_case = self
            .config
            .recovery
            .bucket_thresholds_days
            .first()
            .is_some_and(|first| obligation.days_overdue(today) >= *first);
        if obligation.status() == ObligationStatus::Overdue && opens_case {
            self.open_recovery_case(tenant_id, &obligation, now)?;
        }
        self.sync_recovery(tenant_id, &obligation, now)?;
        if became_overdue {
            self.rescore_after(tenant_id, obligation.account_id(), now);
        }

        let auto_convert = policy
            .emi_auto_trigger_days
            .is_some_and(|days| obligation.status().is_active() && obligation.days_overdue(today) >= days);
        if auto_convert {
            let plan = self.convert_to_emi(tenant_id, &[obligation_id], None, now)?;
            info!(%tenant_id, %obligation_id, plan_id = %plan.id_typed(), "overdue obligation auto-converted to emi");
        }
        Ok((!dispatched.events.is_empty(), auto_convert))
    }

    /// Flag missed installments; returns whether the plan defaulted.
    pub(crate) fn mark_plan_overdue(
        &self,
        tenant_id: TenantId,
        plan_id: EmiPlanId,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let dispatched = self.run_emi_plan(
            tenant_id,
            plan_id,
            EmiPlanCommand::MarkOverdueInstallments(MarkOverdueInstallments {
                tenant_id,
                plan_id,
                today: today(now),
                default_after_missed: self.config.repayment.emi_default_after_missed,
                occurred_at: now,
            }),
        )?;
        let mut defaulted = false;
        for event in &dispatched.events {
            match event {
                EmiPlanEvent::InstallmentsOverdue(e) => {
                    warn!(%tenant_id, %plan_id, installments = ?e.installment_numbers, "emi installments overdue");
                }
                EmiPlanEvent::PlanDefaulted(e) => {
                    warn!(
                        %tenant_id,
                        %plan_id,
                        account_id = %e.account_id,
                        missed = e.missed_installments,
                        outstanding = e.outstanding.minor(),
                        "emi plan defaulted"
                    );
                    defaulted = true;
                    self.rescore_after(tenant_id, Some(e.account_id), now);
                }
                _ => {}
            }
        }
        Ok(defaulted)
    }

    /// Returns whether the restoration was new.
    fn restore_credit(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        restoration_id: Uuid,
        amount: Money,
        reference: LedgerReference,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let dispatched = self.run_account(
            tenant_id,
            account_id,
            CreditAccountCommand::RestoreCredit(RestoreCredit {
                tenant_id,
                account_id,
                restoration_id,
                amount,
                reference,
                occurred_at: now,
            }),
        )?;
        Ok(!dispatched.is_noop())
    }

    /// Re-derive the credit an obligation's history owes back to its account
    /// and resolve its recovery case once it is closed.
    ///
    /// Restorations are keyed by payment (by obligation for a write-off), so
    /// only the missing ones are written. Returns how many were missing.
    pub(crate) fn repair_obligation(
        &self,
        tenant_id: TenantId,
        obligation_id: ObligationId,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let obligation = self.obligation(tenant_id, obligation_id)?;
        let reference = obligation
            .order_id()
            .map(LedgerReference::Order)
            .ok_or_else(|| EngineError::unknown("obligation", obligation_id))?;
        let history: Vec<ObligationEvent> = self.dispatcher.history(tenant_id, obligation_id.0)?;

        let mut repaired = 0;
        for event in &history {
            let (account_id, restoration_id, amount) = match event {
                ObligationEvent::PaymentRecorded(e) => (e.account_id, e.payment_id, e.principal_component),
                ObligationEvent::ObligationWrittenOff(e) => {
                    (e.account_id, *obligation_id.0.as_uuid(), e.principal_component)
                }
                _ => continue,
            };
            if amount.is_zero() {
                continue;
            }
            if self.restore_credit(tenant_id, account_id, restoration_id, amount, reference, now)? {
                warn!(%tenant_id, %obligation_id, %restoration_id, amount = amount.minor(), "missing credit restoration re-applied");
                repaired += 1;
            }
        }

        if !obligation.status().is_active() {
            self.sync_recovery(tenant_id, &obligation, now)?;
        }
        Ok(repaired)
    }

    /// EMI counterpart of `repair_obligation`.
    pub(crate) fn repair_emi_plan(
        &self,
        tenant_id: TenantId,
        plan_id: EmiPlanId,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let history: Vec<EmiPlanEvent> = self.dispatcher.history(tenant_id, plan_id.0)?;
        let mut repaired = 0;
        for event in &history {
            let EmiPlanEvent::InstallmentPaid(e) = event else {
                continue;
            };
            if e.credit_restored.is_zero() {
                continue;
            }
            let restored = self.restore_credit(
                tenant_id,
                e.account_id,
                e.payment_id,
                e.credit_restored,
                LedgerReference::EmiPlan(plan_id),
                now,
            )?;
            if restored {
                warn!(%tenant_id, %plan_id, payment_id = %e.payment_id, amount = e.credit_restored.minor(), "missing credit restoration re-applied");
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    /// Re-score after an obligation state change; the change itself already stands.
    fn rescore_after(&self, tenant_id: TenantId, account_id: Option<CreditAccountId>, now: DateTime<Utc>) {
        let Some(account_id) = account_id else {
            return;
        };
        if let Err(e) = self.recompute_risk(tenant_id, account_id, now) {
            warn!(%tenant_id, %account_id, error = %e, "risk recompute failed");
        }
    }
}
