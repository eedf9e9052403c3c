use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use osas_core::{AgentId, Money, RecoveryCaseId, TenantId, UserId};
use osas_events::{EventBus, EventEnvelope};
use osas_recovery::{
    AssignAgent, CheckPromise, Escalate, OpenCase, RecordContact, RecordPromise, RecordWriteOff,
    RecoveryCase, RecoveryCaseCommand, RecoveryCaseEvent, Resolution, Resolve, UpdateExposure,
};
use osas_repayment::{ObligationStatus, RepaymentObligation};

use super::{Engine, EngineError, EngineResult, today};
use crate::event_store::EventStore;

impl<S, B> Engine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn assign_agent(
        &self,
        tenant_id: TenantId,
        case_id: RecoveryCaseId,
        agent_id: AgentId,
        now: DateTime<Utc>,
    ) -> EngineResult<RecoveryCase> {
        let case = self.case_action(
            tenant_id,
            case_id,
            RecoveryCaseCommand::AssignAgent(AssignAgent {
                tenant_id,
                case_id,
                agent_id,
                occurred_at: now,
            }),
        )?;
        info!(%tenant_id, %case_id, %agent_id, "recovery agent assigned");
        Ok(case)
    }

    pub fn record_contact(
        &self,
        tenant_id: TenantId,
        case_id: RecoveryCaseId,
        agent_id: AgentId,
        note: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RecoveryCase> {
        self.case_action(
            tenant_id,
            case_id,
            RecoveryCaseCommand::RecordContact(RecordContact {
                tenant_id,
                case_id,
                agent_id,
                note: note.to_string(),
                occurred_at: now,
            }),
        )
    }

    pub fn record_promise(
        &self,
        tenant_id: TenantId,
        case_id: RecoveryCaseId,
        promised_date: NaiveDate,
        amount: Money,
        now: DateTime<Utc>,
    ) -> EngineResult<RecoveryCase> {
        let case = self.case_action(
            tenant_id,
            case_id,
            RecoveryCaseCommand::RecordPromise(RecordPromise {
                tenant_id,
                case_id,
                promised_date,
                amount,
                occurred_at: now,
            }),
        )?;
        info!(%tenant_id, %case_id, %promised_date, amount = amount.minor(), "promise to pay recorded");
        Ok(case)
    }

    pub fn escalate(
        &self,
        tenant_id: TenantId,
        case_id: RecoveryCaseId,
        escalated_to: AgentId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RecoveryCase> {
        let case = self.case_action(
            tenant_id,
            case_id,
            RecoveryCaseCommand::Escalate(Escalate {
                tenant_id,
                case_id,
                escalated_to,
                reason: reason.to_string(),
                occurred_at: now,
            }),
        )?;
        warn!(%tenant_id, %case_id, %escalated_to, reason, "recovery case escalated");
        Ok(case)
    }

    /// Refresh exposure from the obligation, then judge an expired promise.
    pub(crate) fn check_promise(
        &self,
        tenant_id: TenantId,
        case_id: RecoveryCaseId,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let obligation_id = self
            .recovery_case(tenant_id, case_id)?
            .and_then(|case| case.obligation_id())
            .ok_or_else(|| EngineError::unknown("recovery case", case_id))?;
        let obligation = self.obligation(tenant_id, obligation_id)?;
        self.sync_recovery(tenant_id, &obligation, now)?;
        let dispatched = self.run_case(
            tenant_id,
            case_id,
            RecoveryCaseCommand::CheckPromise(CheckPromise {
                tenant_id,
                case_id,
                today: today(now),
                occurred_at: now,
            }),
        )?;
        for event in &dispatched.events {
            match event {
                RecoveryCaseEvent::PromiseKept(_) => info!(%tenant_id, %case_id, "promise kept"),
                RecoveryCaseEvent::PromiseBroken(e) => {
                    warn!(%tenant_id, %case_id, promised_date = %e.promised_date, follow_up = e.follow_up, "promise broken")
                }
                _ => {}
            }
        }
        Ok(!dispatched.events.is_empty())
    }

    pub(crate) fn open_recovery_case(
        &self,
        tenant_id: TenantId,
        obligation: &RepaymentObligation,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let obligation_id = obligation.id_typed();
        let (Some(account_id), Some(buyer_id)) = (obligation.account_id(), obligation.buyer_id()) else {
            return Err(EngineError::unknown("obligation", obligation_id));
        };
        let case_id = obligation_id.recovery_case();
        let dispatched = self.run_case(
            tenant_id,
            case_id,
            RecoveryCaseCommand::OpenCase(OpenCase {
                tenant_id,
                case_id,
                obligation_id,
                account_id,
                buyer_id,
                outstanding: obligation.outstanding(),
                days_overdue: obligation.days_overdue(today(now)),
                bucket_thresholds: self.config.recovery.bucket_thresholds_days.clone(),
                occurred_at: now,
            }),
        )?;
        if !dispatched.is_noop() {
            info!(%tenant_id, %case_id, %obligation_id, outstanding = obligation.outstanding().minor(), "recovery case opened");
        }
        Ok(())
    }

    pub(crate) fn record_case_write_off(
        &self,
        tenant_id: TenantId,
        obligation: &RepaymentObligation,
        approved_by: UserId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let case_id = obligation.id_typed().recovery_case();
        match self.recovery_case(tenant_id, case_id)? {
            Some(case) if !case.is_resolved() => {
                self.run_case(
                    tenant_id,
                    case_id,
                    RecoveryCaseCommand::RecordWriteOff(RecordWriteOff {
                        tenant_id,
                        case_id,
                        approved_by,
                        reason: reason.to_string(),
                        occurred_at: now,
                    }),
                )?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Mirror an obligation's balance into its recovery case and resolve the
    /// case once the obligation is closed.
    pub(crate) fn sync_recovery(
        &self,
        tenant_id: TenantId,
        obligation: &RepaymentObligation,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let case_id = obligation.id_typed().recovery_case();
        let Some(case) = self.recovery_case(tenant_id, case_id)? else {
            return Ok(());
        };
        if case.is_resolved() {
            return Ok(());
        }

        self.run_case(
            tenant_id,
            case_id,
            RecoveryCaseCommand::UpdateExposure(UpdateExposure {
                tenant_id,
                case_id,
                outstanding: obligation.outstanding(),
                days_overdue: obligation.days_overdue(today(now)),
                bucket_thresholds: self.config.recovery.bucket_thresholds_days.clone(),
                occurred_at: now,
            }),
        )?;

        let resolution = match obligation.status() {
            ObligationStatus::Paid => Resolution::Repaid,
            ObligationStatus::EmiConverted => Resolution::ConvertedToEmi,
            ObligationStatus::WrittenOff => Resolution::WrittenOff,
            _ => return Ok(()),
        };
        self.run_case(
            tenant_id,
            case_id,
            RecoveryCaseCommand::Resolve(Resolve {
                tenant_id,
                case_id,
                resolution,
                occurred_at: now,
            }),
        )?;
        info!(%tenant_id, %case_id, ?resolution, "recovery case resolved");
        Ok(())
    }

    fn case_action(
        &self,
        tenant_id: TenantId,
        case_id: RecoveryCaseId,
        command: RecoveryCaseCommand,
    ) -> EngineResult<RecoveryCase> {
        Ok(self.run_case(tenant_id, case_id, command)?.state)
    }
}
