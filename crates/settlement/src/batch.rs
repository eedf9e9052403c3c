use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use osas_core::{BatchId, LedgerReference, Money, OrderId, Rate, UserId};

use crate::netting::{self, Netting};

/// `Generated -> Approved -> SentToBank -> Completed | Failed -> (Approved on retry)`.
///
/// Before generation a line sits in the seller's open pool; `Abandoned` hands
/// a failed batch's lines back to that pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Generated,
    Approved,
    SentToBank,
    Completed,
    Failed,
    Abandoned,
}

impl BatchState {
    /// Batches that still own their lines.
    pub fn holds_lines(&self) -> bool {
        !matches!(self, BatchState::Abandoned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLine {
    pub order_id: OrderId,
    pub amount: Money,
    pub eligible_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAdjustment {
    pub adjustment_id: Uuid,
    /// Amount still to be deducted.
    pub amount: Money,
    pub reason: String,
    pub reference: LedgerReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedAdjustment {
    pub adjustment_id: Uuid,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub reason: String,
    pub retryable: bool,
    /// The bank never answered; a late callback may still complete the batch.
    pub timed_out: bool,
}

/// Result reported by the bank for a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BankOutcome {
    Completed { amount: Money },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementBatch {
    pub batch_id: BatchId,
    pub cutoff: DateTime<Utc>,
    pub lines: Vec<BatchLine>,
    pub fee_rate: Rate,
    pub adjustments: Vec<AppliedAdjustment>,
    pub gross_amount: Money,
    pub fee_amount: Money,
    pub adjustment_amount: Money,
    pub net_amount: Money,
    pub state: BatchState,
    pub approved_by: Option<UserId>,
    pub bank_reference: Option<String>,
    pub failure: Option<BatchFailure>,
    pub attempts: u32,
    pub generated_at: DateTime<Utc>,
}

impl SettlementBatch {
    /// Re-derive the netting from line data alone.
    pub fn recompute(&self) -> Netting {
        netting::compute_net(&self.lines, self.fee_rate, &self.adjustments)
    }

    pub fn netting_matches(&self) -> bool {
        let n = self.recompute();
        n.gross == self.gross_amount
            && n.fee == self.fee_amount
            && n.adjustments == self.adjustment_amount
            && n.net == self.net_amount
    }
}
