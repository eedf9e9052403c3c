//! Seller settlement domain module (event-sourced).
//!
//! One `SellerSettlement` stream per seller holds the pool of payment-eligible
//! lines, pending prior-period adjustments, and every batch generated from
//! them. Keeping allocation inside one stream serializes batch generation per
//! seller, so a line can never land in two live batches.

pub mod batch;
pub mod netting;
pub mod seller;

pub use batch::{
    AppliedAdjustment, BankOutcome, BatchFailure, BatchLine, BatchState, PendingAdjustment,
    SettlementBatch,
};
pub use netting::{Netting, allocate_adjustments, compute_net, line_fee};
pub use seller::{
    AbandonBatch, AdjustmentRecorded, ApproveBatch, BatchAbandoned, BatchApproved,
    BatchCompleted, BatchFailed, BatchGenerated, BatchRetried, BatchSentToBank, GenerateBatch,
    LineBecameEligible, MarkBatchFailed, ReconcileBatch, RecordAdjustment, RegisterEligibleLine,
    RetryBatch, SellerSettlement, SellerSettlementCommand, SellerSettlementEvent, SendToBank,
};

/// Stream type of seller settlement streams in the ledger store.
pub const AGGREGATE_TYPE: &str = "settlement.seller";
