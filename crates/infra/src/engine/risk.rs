use chrono::{DateTime, Days, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::info;

use osas_core::{CreditAccountId, Money, TenantId};
use osas_credit::{AdjustLimit, Approver, CreditAccountCommand, UpdateRiskLevel};
use osas_events::{EventBus, EventEnvelope};
use osas_risk::{RiskLevel, recommend_limit, score};

use super::{Engine, EngineResult, today};
use crate::event_store::EventStore;
use crate::projections::RiskHistoryEntry;

/// Result of one scoring run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskOutcome {
    pub account_id: CreditAccountId,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub previous_level: RiskLevel,
    /// Advisory; only applied automatically when it lowers the limit.
    pub recommended_limit: Option<Money>,
    pub credit_limit: Money,
    /// Assessments recorded so far, oldest first.
    pub history: Vec<RiskHistoryEntry>,
}

impl<S, B> Engine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Score the buyer behind `account_id` and record the assessment.
    ///
    /// A worse level may lower the limit (`Approver::System`, clamped at
    /// exposure). Increases always go through `adjust_limit`.
    pub fn recompute_risk(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        now: DateTime<Utc>,
    ) -> EngineResult<RiskOutcome> {
        let account = self.account(tenant_id, account_id)?;
        let today = today(now);
        let policy = &self.config.risk;

        let mut activity = self
            .read_models
            .risk_profiles()
            .activity(tenant_id, account_id, today);
        activity.utilization_peak_bps = account.utilization_peak_bps();
        let window_start = today
            .checked_sub_days(Days::new(u64::from(policy.window_days)))
            .unwrap_or(today);
        let assessment = score(&activity.inputs(window_start), policy);

        let previous_level = account.risk_level();
        let mut state = self
            .run_account(
                tenant_id,
                account_id,
                CreditAccountCommand::UpdateRiskLevel(UpdateRiskLevel {
                    tenant_id,
                    account_id,
                    risk_level: assessment.level,
                    risk_score: assessment.score,
                    occurred_at: now,
                }),
            )?
            .state;
        if assessment.level != previous_level {
            info!(
                %tenant_id,
                %account_id,
                score = assessment.score,
                level = ?assessment.level,
                previous = ?previous_level,
                "risk level changed"
            );
        }

        let recommended_limit = recommend_limit(state.credit_limit(), assessment.level, policy);
        if let Some(limit) = recommended_limit
            && self.config.credit.auto_decrease_limits
            && assessment.level > previous_level
        {
            state = self
                .run_account(
                    tenant_id,
                    account_id,
                    CreditAccountCommand::AdjustLimit(AdjustLimit {
                        tenant_id,
                        account_id,
                        new_limit: limit,
                        reason: format!("risk level {:?}", assessment.level),
                        approver: Approver::System,
                        occurred_at: now,
                    }),
                )?
                .state;
            info!(%tenant_id, %account_id, new_limit = state.credit_limit().minor(), "credit limit lowered by risk policy");
        }

        Ok(RiskOutcome {
            account_id,
            risk_score: assessment.score,
            risk_level: assessment.level,
            previous_level,
            recommended_limit,
            credit_limit: state.credit_limit(),
            history: self.risk_history(tenant_id, account_id),
        })
    }

    /// Current assessment without scoring again.
    pub fn risk_view(&self, tenant_id: TenantId, account_id: CreditAccountId) -> EngineResult<RiskOutcome> {
        let account = self.account(tenant_id, account_id)?;
        let level = account.risk_level();
        Ok(RiskOutcome {
            account_id,
            risk_score: account.risk_score(),
            risk_level: level,
            previous_level: level,
            recommended_limit: recommend_limit(account.credit_limit(), level, &self.config.risk),
            credit_limit: account.credit_limit(),
            history: self.risk_history(tenant_id, account_id),
        })
    }

    fn risk_history(&self, tenant_id: TenantId, account_id: CreditAccountId) -> Vec<RiskHistoryEntry> {
        self.read_models
            .risk_profiles()
            .get(tenant_id, account_id)
            .map(|p| p.history)
            .unwrap_or_default()
    }
}
