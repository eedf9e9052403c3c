//! Request bodies and JSON views.
//!
//! Aggregates keep their state private; views are built from accessors.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use osas_core::{
    AgentId, BatchId, BuyerId, BuyerKind, CreditAccountId, EmiPlanId, LedgerReference, Money,
    ObligationId, OrderId, RecoveryCaseId, ReservationId, SellerId, UserId,
};
use osas_credit::{CreditAccount, Reservation};
use osas_delivery::{AdminOverride, DeliveryStatus, DeliveryVerification, ExceptionResolution, VerificationStatus};
use osas_recovery::{ContactRecord, Escalation, OverdueBucket, Promise, RecoveryCase, RecoveryStatus, Resolution};
use osas_repayment::{
    EmiInstallment, EmiPlan, EmiPlanStatus, ObligationStatus, ObligationTransaction, PaymentMethod,
    RepaymentObligation, SkipRecord,
};
use osas_risk::RiskLevel;
use osas_settlement::{AppliedAdjustment, BankOutcome, BatchFailure, BatchLine, BatchState, SettlementBatch};

// ---- credit ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccountRequest {
    #[serde(default)]
    pub account_id: Option<CreditAccountId>,
    pub owner_id: BuyerId,
    pub buyer_kind: BuyerKind,
    pub credit_limit: Money,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub account_id: CreditAccountId,
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub amount: Money,
    /// Seller policy: delivered orders need no proof of delivery.
    #[serde(default)]
    pub auto_approve_pod: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub reservation_id: ReservationId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub reservation_id: ReservationId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FreezeRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustLimitRequest {
    pub new_limit: Money,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub account_id: CreditAccountId,
    pub owner_id: Option<BuyerId>,
    pub buyer_kind: BuyerKind,
    pub credit_limit: Money,
    pub credit_used: Money,
    pub held: Money,
    pub credit_available: Money,
    pub frozen: bool,
    pub frozen_reason: Option<String>,
    pub risk_level: RiskLevel,
    pub risk_score: u8,
    pub reservations: Vec<Reservation>,
}

impl From<&CreditAccount> for AccountView {
    fn from(a: &CreditAccount) -> Self {
        Self {
            account_id: a.id_typed(),
            owner_id: a.owner(),
            buyer_kind: a.buyer_kind(),
            credit_limit: a.credit_limit(),
            credit_used: a.credit_used(),
            held: a.held(),
            credit_available: a.credit_available(),
            frozen: a.is_frozen(),
            frozen_reason: a.frozen_reason().map(str::to_string),
            risk_level: a.risk_level(),
            risk_score: a.risk_score(),
            reservations: a.reservations().cloned().collect(),
        }
    }
}

// ---- delivery ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyDeliveryRequest {
    pub order_id: OrderId,
    #[serde(default)]
    pub pod_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatusRequest {
    pub order_id: OrderId,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub pod_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaiseExceptionRequest {
    pub order_id: OrderId,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveExceptionRequest {
    pub order_id: OrderId,
    pub resolution: ExceptionResolution,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryView {
    pub order_id: Option<OrderId>,
    pub seller_id: Option<SellerId>,
    pub account_id: Option<CreditAccountId>,
    pub amount: Money,
    pub delivery_status: DeliveryStatus,
    pub status: VerificationStatus,
    pub pod_ref: Option<String>,
    pub exception_reason: Option<String>,
    pub admin_override: Option<AdminOverride>,
    pub payment_eligible: bool,
}

impl From<&DeliveryVerification> for DeliveryView {
    fn from(d: &DeliveryVerification) -> Self {
        Self {
            order_id: d.order_id(),
            seller_id: d.seller_id(),
            account_id: d.account_id(),
            amount: d.amount(),
            delivery_status: d.delivery_status(),
            status: d.status(),
            pod_ref: d.pod_ref().map(str::to_string),
            exception_reason: d.exception_reason().map(str::to_string),
            admin_override: d.admin_override().cloned(),
            payment_eligible: d.payment_eligible(),
        }
    }
}

// ---- repayment ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRequest {
    pub obligation_id: ObligationId,
    pub amount: Money,
    pub method: PaymentMethod,
    /// Idempotency key; a retry with the same id is a no-op.
    #[serde(default)]
    pub payment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipRequest {
    pub obligation_id: ObligationId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertEmiRequest {
    #[serde(default)]
    pub obligation_id: Option<ObligationId>,
    #[serde(default)]
    pub obligation_ids: Vec<ObligationId>,
    #[serde(default)]
    pub tenure_months: Option<u32>,
}

impl ConvertEmiRequest {
    /// Single id and list forms combined, first occurrence wins.
    pub fn obligations(&self) -> Vec<ObligationId> {
        let mut out: Vec<ObligationId> = Vec::new();
        for id in self.obligation_id.iter().chain(self.obligation_ids.iter()) {
            if !out.contains(id) {
                out.push(*id);
            }
        }
        out
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayInstallmentRequest {
    pub plan_id: EmiPlanId,
    #[serde(default)]
    pub installment_number: Option<u32>,
    pub amount: Money,
    #[serde(default)]
    pub payment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOffRequest {
    pub obligation_id: ObligationId,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObligationView {
    pub obligation_id: ObligationId,
    pub account_id: Option<CreditAccountId>,
    pub buyer_id: Option<BuyerId>,
    pub order_id: Option<OrderId>,
    pub seller_id: Option<SellerId>,
    pub status: ObligationStatus,
    pub original_amount: Money,
    pub penalty_amount: Money,
    pub paid_amount: Money,
    pub outstanding: Money,
    pub due_date: Option<NaiveDate>,
    pub skip_count: u32,
    pub skips: Vec<SkipRecord>,
    pub emi_plan_id: Option<EmiPlanId>,
    pub transactions: Vec<ObligationTransaction>,
}

impl From<&RepaymentObligation> for ObligationView {
    fn from(o: &RepaymentObligation) -> Self {
        Self {
            obligation_id: o.id_typed(),
            account_id: o.account_id(),
            buyer_id: o.buyer_id(),
            order_id: o.order_id(),
            seller_id: o.seller_id(),
            status: o.status(),
            original_amount: o.original_amount(),
            penalty_amount: o.penalty_amount(),
            paid_amount: o.paid_amount(),
            outstanding: o.outstanding(),
            due_date: o.due_date(),
            skip_count: o.skip_count(),
            skips: o.skips().to_vec(),
            emi_plan_id: o.emi_plan_id(),
            transactions: o.transactions().to_vec(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmiPlanView {
    pub plan_id: EmiPlanId,
    pub account_id: Option<CreditAccountId>,
    pub obligations: Vec<ObligationId>,
    pub principal: Money,
    pub tenure_months: u32,
    pub monthly_interest_bps: u32,
    pub status: EmiPlanStatus,
    pub outstanding: Money,
    pub installments: Vec<EmiInstallment>,
}

impl From<&EmiPlan> for EmiPlanView {
    fn from(p: &EmiPlan) -> Self {
        Self {
            plan_id: p.id_typed(),
            account_id: p.account_id(),
            obligations: p.obligations().to_vec(),
            principal: p.principal(),
            tenure_months: p.tenure_months(),
            monthly_interest_bps: p.monthly_interest().bps(),
            status: p.status(),
            outstanding: p.outstanding(),
            installments: p.installments().to_vec(),
        }
    }
}

// ---- settlement ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBatchRequest {
    pub seller_id: SellerId,
    /// Defaults to now.
    #[serde(default)]
    pub cutoff: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBatchRequest {
    pub batch_id: BatchId,
    /// Must match the caller when present.
    #[serde(default)]
    pub approver_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub batch_id: BatchId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailBatchRequest {
    pub batch_id: BatchId,
    pub reason: String,
    #[serde(default)]
    pub retryable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbandonBatchRequest {
    pub batch_id: BatchId,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub batch_id: BatchId,
    pub bank_reference: String,
    pub outcome: BankOutcome,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentRequest {
    pub seller_id: SellerId,
    #[serde(default)]
    pub adjustment_id: Option<Uuid>,
    pub amount: Money,
    pub reason: String,
    pub reference: LedgerReference,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchView {
    pub batch_id: BatchId,
    pub cutoff: DateTime<Utc>,
    pub state: BatchState,
    pub lines: Vec<BatchLine>,
    pub fee_rate_bps: u32,
    pub adjustments: Vec<AppliedAdjustment>,
    pub gross_amount: Money,
    pub fee_amount: Money,
    pub adjustment_amount: Money,
    pub net_amount: Money,
    /// Stored totals agree with a recomputation from the lines.
    pub netting_consistent: bool,
    pub approved_by: Option<UserId>,
    pub bank_reference: Option<String>,
    pub failure: Option<BatchFailure>,
    pub attempts: u32,
    pub generated_at: DateTime<Utc>,
}

impl From<&SettlementBatch> for BatchView {
    fn from(b: &SettlementBatch) -> Self {
        Self {
            batch_id: b.batch_id,
            cutoff: b.cutoff,
            state: b.state,
            lines: b.lines.clone(),
            fee_rate_bps: b.fee_rate.bps(),
            adjustments: b.adjustments.clone(),
            gross_amount: b.gross_amount,
            fee_amount: b.fee_amount,
            adjustment_amount: b.adjustment_amount,
            net_amount: b.net_amount,
            netting_consistent: b.netting_matches(),
            approved_by: b.approved_by,
            bank_reference: b.bank_reference.clone(),
            failure: b.failure.clone(),
            attempts: b.attempts,
            generated_at: b.generated_at,
        }
    }
}

// ---- recovery ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignAgentRequest {
    pub agent_id: AgentId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRequest {
    pub agent_id: AgentId,
    pub note: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromiseRequest {
    pub promised_date: NaiveDate,
    pub amount: Money,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalateRequest {
    pub escalated_to: AgentId,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryCaseView {
    pub case_id: RecoveryCaseId,
    pub obligation_id: Option<ObligationId>,
    pub account_id: Option<CreditAccountId>,
    pub buyer_id: Option<BuyerId>,
    pub status: RecoveryStatus,
    pub outstanding: Money,
    pub days_overdue: u32,
    pub bucket: Option<OverdueBucket>,
    pub agent_id: Option<AgentId>,
    pub promise: Option<Promise>,
    pub follow_ups: u32,
    pub escalation: Option<Escalation>,
    pub contacts: Vec<ContactRecord>,
    pub resolution: Option<Resolution>,
}

impl From<&RecoveryCase> for RecoveryCaseView {
    fn from(c: &RecoveryCase) -> Self {
        Self {
            case_id: c.id_typed(),
            obligation_id: c.obligation_id(),
            account_id: c.account_id(),
            buyer_id: c.buyer_id(),
            status: c.status(),
            outstanding: c.outstanding(),
            days_overdue: c.days_overdue(),
            bucket: c.bucket(),
            agent_id: c.agent(),
            promise: c.promise().cloned(),
            follow_ups: c.follow_ups(),
            escalation: c.escalation().cloned(),
            contacts: c.contacts().to_vec(),
            resolution: c.resolution(),
        }
    }
}

// ---- admin ----

#[derive(Debug, Default, Deserialize)]
pub struct DailyPassRequest {
    /// Clock override for catch-up runs; defaults to now.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}
