use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use osas_core::{
    Aggregate, AggregateId, AggregateRoot, BatchId, DomainError, DomainResult, LedgerReference,
    Money, OrderId, Rate, RejectionCode, SellerId, TenantId, UserId,
};
use osas_events::Event;

use crate::batch::{
    AppliedAdjustment, BankOutcome, BatchFailure, BatchLine, BatchState, PendingAdjustment,
    SettlementBatch,
};
use crate::netting::{allocate_adjustments, compute_net};

#[derive(Debug, Clone, PartialEq, Eq)]
struct PoolLine {
    line: BatchLine,
    batch_id: Option<BatchId>,
}

/// Aggregate root: SellerSettlement (one stream per seller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerSettlement {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    seller_id: Option<SellerId>,
    lines: BTreeMap<OrderId, PoolLine>,
    adjustments: Vec<PendingAdjustment>,
    adjustment_ids: BTreeSet<Uuid>,
    batches: BTreeMap<BatchId, SettlementBatch>,
    version: u64,
    created: bool,
}

impl SellerSettlement {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            seller_id: None,
            lines: BTreeMap::new(),
            adjustments: Vec::new(),
            adjustment_ids: BTreeSet::new(),
            batches: BTreeMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn for_seller(seller_id: SellerId) -> Self {
        Self::empty(seller_id.settlement_stream())
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn seller_id(&self) -> Option<SellerId> {
        self.seller_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn batch(&self, batch_id: BatchId) -> Option<&SettlementBatch> {
        self.batches.get(&batch_id)
    }

    pub fn batches(&self) -> impl Iterator<Item = &SettlementBatch> {
        self.batches.values()
    }

    /// The live batch generated for `cutoff`, if any.
    pub fn batch_for_cutoff(&self, cutoff: DateTime<Utc>) -> Option<&SettlementBatch> {
        self.batches
            .values()
            .find(|b| b.cutoff == cutoff && b.state.holds_lines())
    }

    /// Lines not owned by any live batch, in eligibility order.
    pub fn unbatched_lines(&self) -> Vec<&BatchLine> {
        let mut out: Vec<&BatchLine> = self
            .lines
            .values()
            .filter(|l| l.batch_id.is_none())
            .map(|l| &l.line)
            .collect();
        out.sort_by_key(|l| (l.eligible_at, l.order_id));
        out
    }

    pub fn batch_of(&self, order_id: OrderId) -> Option<BatchId> {
        self.lines.get(&order_id).and_then(|l| l.batch_id)
    }

    /// Adjustments with their not-yet-deducted remainder, in recording order.
    pub fn pending_adjustments(&self) -> Vec<PendingAdjustment> {
        self.adjustments
            .iter()
            .filter_map(|adj| {
                let used: Money = self
                    .batches
                    .values()
                    .filter(|b| b.state.holds_lines())
                    .flat_map(|b| b.adjustments.iter())
                    .filter(|a| a.adjustment_id == adj.adjustment_id)
                    .map(|a| a.amount)
                    .sum();
                let remaining = adj.amount.saturating_sub(used);
                (!remaining.is_zero()).then(|| PendingAdjustment {
                    amount: remaining,
                    ..adj.clone()
                })
            })
            .collect()
    }
}

impl AggregateRoot for SellerSettlement {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterEligibleLine {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub order_id: OrderId,
    pub amount: Money,
    pub eligible_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Prior-period deduction (returns, disputes) taken from the next batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAdjustment {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub adjustment_id: Uuid,
    pub amount: Money,
    pub reason: String,
    pub reference: LedgerReference,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateBatch {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub cutoff: DateTime<Utc>,
    pub fee_rate: Rate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveBatch {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendToBank {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub bank_reference: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkBatchFailed {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub reason: String,
    pub retryable: bool,
    pub timed_out: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBatch {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileBatch {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub bank_reference: String,
    pub outcome: BankOutcome,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbandonBatch {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SellerSettlementCommand {
    RegisterEligibleLine(RegisterEligibleLine),
    RecordAdjustment(RecordAdjustment),
    GenerateBatch(GenerateBatch),
    ApproveBatch(ApproveBatch),
    SendToBank(SendToBank),
    MarkBatchFailed(MarkBatchFailed),
    RetryBatch(RetryBatch),
    ReconcileBatch(ReconcileBatch),
    AbandonBatch(AbandonBatch),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineBecameEligible {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub order_id: OrderId,
    pub amount: Money,
    pub eligible_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRecorded {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub adjustment_id: Uuid,
    pub amount: Money,
    pub reason: String,
    pub reference: LedgerReference,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchGenerated {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub cutoff: DateTime<Utc>,
    pub lines: Vec<BatchLine>,
    pub fee_rate: Rate,
    pub adjustments: Vec<AppliedAdjustment>,
    pub gross_amount: Money,
    pub fee_amount: Money,
    pub adjustment_amount: Money,
    pub net_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchApproved {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Transfer is in flight; the gateway call happens after this is durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSentToBank {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub bank_reference: String,
    pub net_amount: Money,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailed {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub reason: String,
    pub retryable: bool,
    pub timed_out: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRetried {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCompleted {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub bank_reference: String,
    pub net_amount: Money,
    /// Callback arrived after the batch had been marked failed or re-approved.
    pub late_callback: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAbandoned {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub batch_id: BatchId,
    pub reason: String,
    pub released_orders: Vec<OrderId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SellerSettlementEvent {
    LineBecameEligible(LineBecameEligible),
    AdjustmentRecorded(AdjustmentRecorded),
    BatchGenerated(BatchGenerated),
    BatchApproved(BatchApproved),
    BatchSentToBank(BatchSentToBank),
    BatchFailed(BatchFailed),
    BatchRetried(BatchRetried),
    BatchCompleted(BatchCompleted),
    BatchAbandoned(BatchAbandoned),
}

impl SellerSettlementEvent {
    /// Batch the event concerns, if any.
    pub fn batch_id(&self) -> Option<BatchId> {
        match self {
            SellerSettlementEvent::LineBecameEligible(_)
            | SellerSettlementEvent::AdjustmentRecorded(_) => None,
            SellerSettlementEvent::BatchGenerated(e) => Some(e.batch_id),
            SellerSettlementEvent::BatchApproved(e) => Some(e.batch_id),
            SellerSettlementEvent::BatchSentToBank(e) => Some(e.batch_id),
            SellerSettlementEvent::BatchFailed(e) => Some(e.batch_id),
            SellerSettlementEvent::BatchRetried(e) => Some(e.batch_id),
            SellerSettlementEvent::BatchCompleted(e) => Some(e.batch_id),
            SellerSettlementEvent::BatchAbandoned(e) => Some(e.batch_id),
        }
    }
}

impl Event for SellerSettlementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SellerSettlementEvent::LineBecameEligible(_) => "settlement.seller.line_eligible",
            SellerSettlementEvent::AdjustmentRecorded(_) => "settlement.seller.adjustment_recorded",
            SellerSettlementEvent::BatchGenerated(_) => "settlement.batch.generated",
            SellerSettlementEvent::BatchApproved(_) => "settlement.batch.approved",
            SellerSettlementEvent::BatchSentToBank(_) => "settlement.batch.sent_to_bank",
            SellerSettlementEvent::BatchFailed(_) => "settlement.batch.failed",
            SellerSettlementEvent::BatchRetried(_) => "settlement.batch.retried",
            SellerSettlementEvent::BatchCompleted(_) => "settlement.batch.completed",
            SellerSettlementEvent::BatchAbandoned(_) => "settlement.batch.abandoned",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SellerSettlementEvent::LineBecameEligible(e) => e.occurred_at,
            SellerSettlementEvent::AdjustmentRecorded(e) => e.occurred_at,
            SellerSettlementEvent::BatchGenerated(e) => e.occurred_at,
            SellerSettlementEvent::BatchApproved(e) => e.occurred_at,
            SellerSettlementEvent::BatchSentToBank(e) => e.occurred_at,
            SellerSettlementEvent::BatchFailed(e) => e.occurred_at,
            SellerSettlementEvent::BatchRetried(e) => e.occurred_at,
            SellerSettlementEvent::BatchCompleted(e) => e.occurred_at,
            SellerSettlementEvent::BatchAbandoned(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SellerSettlement {
    type Command = SellerSettlementCommand;
    type Event = SellerSettlementEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SellerSettlementEvent::LineBecameEligible(e) => {
                self.touch(e.tenant_id, e.seller_id);
                self.lines.insert(
                    e.order_id,
                    PoolLine {
                        line: BatchLine {
                            order_id: e.order_id,
                            amount: e.amount,
                            eligible_at: e.eligible_at,
                        },
                        batch_id: None,
                    },
                );
            }
            SellerSettlementEvent::AdjustmentRecorded(e) => {
                self.touch(e.tenant_id, e.seller_id);
                self.adjustment_ids.insert(e.adjustment_id);
                self.adjustments.push(PendingAdjustment {
                    adjustment_id: e.adjustment_id,
                    amount: e.amount,
                    reason: e.reason.clone(),
                    reference: e.reference,
                });
            }
            SellerSettlementEvent::BatchGenerated(e) => {
                for line in &e.lines {
                    if let Some(pool) = self.lines.get_mut(&line.order_id) {
                        pool.batch_id = Some(e.batch_id);
                    }
                }
                self.batches.insert(
                    e.batch_id,
                    SettlementBatch {
                        batch_id: e.batch_id,
                        cutoff: e.cutoff,
                        lines: e.lines.clone(),
                        fee_rate: e.fee_rate,
                        adjustments: e.adjustments.clone(),
                        gross_amount: e.gross_amount,
                        fee_amount: e.fee_amount,
                        adjustment_amount: e.adjustment_amount,
                        net_amount: e.net_amount,
                        state: BatchState::Generated,
                        approved_by: None,
                        bank_reference: None,
                        failure: None,
                        attempts: 0,
                        generated_at: e.occurred_at,
                    },
                );
            }
            SellerSettlementEvent::BatchApproved(e) => {
                if let Some(b) = self.batches.get_mut(&e.batch_id) {
                    b.state = BatchState::Approved;
                    b.approved_by = Some(e.approved_by);
                }
            }
            SellerSettlementEvent::BatchSentToBank(e) => {
                if let Some(b) = self.batches.get_mut(&e.batch_id) {
                    b.state = BatchState::SentToBank;
                    b.bank_reference = Some(e.bank_reference.clone());
                    b.attempts = e.attempt;
                    b.failure = None;
                }
            }
            SellerSettlementEvent::BatchFailed(e) => {
                if let Some(b) = self.batches.get_mut(&e.batch_id) {
                    b.state = BatchState::Failed;
                    b.failure = Some(BatchFailure {
                        reason: e.reason.clone(),
                        retryable: e.retryable,
                        timed_out: e.timed_out,
                    });
                }
            }
            SellerSettlementEvent::BatchRetried(e) => {
                if let Some(b) = self.batches.get_mut(&e.batch_id) {
                    b.state = BatchState::Approved;
                    b.approved_by = Some(e.approved_by);
                }
            }
            SellerSettlementEvent::BatchCompleted(e) => {
                if let Some(b) = self.batches.get_mut(&e.batch_id) {
                    b.state = BatchState::Completed;
                    b.failure = None;
                }
            }
            SellerSettlementEvent::BatchAbandoned(e) => {
                if let Some(b) = self.batches.get_mut(&e.batch_id) {
                    b.state = BatchState::Abandoned;
                }
                for order_id in &e.released_orders {
                    if let Some(pool) = self.lines.get_mut(order_id) {
                        pool.batch_id = None;
                    }
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SellerSettlementCommand::RegisterEligibleLine(cmd) => self.handle_register(cmd),
            SellerSettlementCommand::RecordAdjustment(cmd) => self.handle_adjustment(cmd),
            SellerSettlementCommand::GenerateBatch(cmd) => self.handle_generate(cmd),
            SellerSettlementCommand::ApproveBatch(cmd) => self.handle_approve(cmd),
            SellerSettlementCommand::SendToBank(cmd) => self.handle_send(cmd),
            SellerSettlementCommand::MarkBatchFailed(cmd) => self.handle_failed(cmd),
            SellerSettlementCommand::RetryBatch(cmd) => self.handle_retry(cmd),
            SellerSettlementCommand::ReconcileBatch(cmd) => self.handle_reconcile(cmd),
            SellerSettlementCommand::AbandonBatch(cmd) => self.handle_abandon(cmd),
        }
    }
}

impl SellerSettlement {
    fn touch(&mut self, tenant_id: TenantId, seller_id: SellerId) {
        if !self.created {
            self.id = seller_id.settlement_stream();
            self.tenant_id = Some(tenant_id);
            self.seller_id = Some(seller_id);
            self.created = true;
        }
    }

    fn ensure_seller(&self, tenant_id: TenantId, seller_id: SellerId) -> DomainResult<()> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.seller_id != Some(seller_id) {
            return Err(DomainError::invariant("seller_id mismatch"));
        }
        Ok(())
    }

    fn existing_batch(
        &self,
        tenant_id: TenantId,
        seller_id: SellerId,
        batch_id: BatchId,
    ) -> DomainResult<&SettlementBatch> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_seller(tenant_id, seller_id)?;
        self.batches.get(&batch_id).ok_or_else(DomainError::not_found)
    }

    fn handle_register(&self, cmd: &RegisterEligibleLine) -> DomainResult<Vec<SellerSettlementEvent>> {
        self.ensure_seller(cmd.tenant_id, cmd.seller_id)?;
        if self.lines.contains_key(&cmd.order_id) {
            return Ok(vec![]);
        }
        if cmd.amount.is_zero() {
            return Err(DomainError::validation("line amount must be positive"));
        }
        Ok(vec![SellerSettlementEvent::LineBecameEligible(LineBecameEligible {
            tenant_id: cmd.tenant_id,
            seller_id: cmd.seller_id,
            order_id: cmd.order_id,
            amount: cmd.amount,
            eligible_at: cmd.eligible_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjustment(&self, cmd: &RecordAdjustment) -> DomainResult<Vec<SellerSettlementEvent>> {
        self.ensure_seller(cmd.tenant_id, cmd.seller_id)?;
        if self.adjustment_ids.contains(&cmd.adjustment_id) {
            return Ok(vec![]);
        }
        if cmd.amount.is_zero() {
            return Err(DomainError::validation("adjustment amount must be positive"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("adjustment reason is required"));
        }
        Ok(vec![SellerSettlementEvent::AdjustmentRecorded(AdjustmentRecorded {
            tenant_id: cmd.tenant_id,
            seller_id: cmd.seller_id,
            adjustment_id: cmd.adjustment_id,
            amount: cmd.amount,
            reason: cmd.reason.clone(),
            reference: cmd.reference,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_generate(&self, cmd: &GenerateBatch) -> DomainResult<Vec<SellerSettlementEvent>> {
        self.ensure_seller(cmd.tenant_id, cmd.seller_id)?;
        if self.batches.contains_key(&cmd.batch_id) || self.batch_for_cutoff(cmd.cutoff).is_some() {
            return Ok(vec![]);
        }

        let lines: Vec<BatchLine> = self
            .unbatched_lines()
            .into_iter()
            .filter(|l| l.eligible_at <= cmd.cutoff)
            .cloned()
            .collect();
        if lines.is_empty() {
            return Err(DomainError::validation("no payment-eligible lines at cutoff"));
        }

        let before = compute_net(&lines, cmd.fee_rate, &[]);
        let adjustments = allocate_adjustments(&self.pending_adjustments(), before.net);
        let netting = compute_net(&lines, cmd.fee_rate, &adjustments);

        Ok(vec![SellerSettlementEvent::BatchGenerated(BatchGenerated {
            tenant_id: cmd.tenant_id,
            seller_id: cmd.seller_id,
            batch_id: cmd.batch_id,
            cutoff: cmd.cutoff,
            lines,
            fee_rate: cmd.fee_rate,
            adjustments,
            gross_amount: netting.gross,
            fee_amount: netting.fee,
            adjustment_amount: netting.adjustments,
            net_amount: netting.net,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveBatch) -> DomainResult<Vec<SellerSettlementEvent>> {
        let batch = self.existing_batch(cmd.tenant_id, cmd.seller_id, cmd.batch_id)?;
        match batch.state {
            BatchState::Generated => {}
            BatchState::Approved => return Ok(vec![]),
            _ => return Err(DomainError::rejected(RejectionCode::InvalidState, cmd.batch_id)),
        }
        Ok(vec![SellerSettlementEvent::BatchApproved(BatchApproved {
            tenant_id: cmd.tenant_id,
            seller_id: cmd.seller_id,
            batch_id: cmd.batch_id,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_send(&self, cmd: &SendToBank) -> DomainResult<Vec<SellerSettlementEvent>> {
        let batch = self.existing_batch(cmd.tenant_id, cmd.seller_id, cmd.batch_id)?;
        match batch.state {
            BatchState::Approved => {}
            BatchState::SentToBank if batch.bank_reference.as_deref() == Some(cmd.bank_reference.as_str()) => {
                return Ok(vec![]);
            }
            _ => return Err(DomainError::rejected(RejectionCode::InvalidState, cmd.batch_id)),
        }
        if cmd.bank_reference.trim().is_empty() {
            return Err(DomainError::validation("bank_reference is required"));
        }
        Ok(vec![SellerSettlementEvent::BatchSentToBank(BatchSentToBank {
            tenant_id: cmd.tenant_id,
            seller_id: cmd.seller_id,
            batch_id: cmd.batch_id,
            bank_reference: cmd.bank_reference.clone(),
            net_amount: batch.net_amount,
            attempt: batch.attempts + 1,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_failed(&self, cmd: &MarkBatchFailed) -> DomainResult<Vec<SellerSettlementEvent>> {
        let batch = self.existing_batch(cmd.tenant_id, cmd.seller_id, cmd.batch_id)?;
        match batch.state {
            BatchState::SentToBank => {}
            BatchState::Failed => return Ok(vec![]),
            _ => return Err(DomainError::rejected(RejectionCode::InvalidState, cmd.batch_id)),
        }
        Ok(vec![SellerSettlementEvent::BatchFailed(BatchFailed {
            tenant_id: cmd.tenant_id,
            seller_id: cmd.seller_id,
            batch_id: cmd.batch_id,
            reason: cmd.reason.clone(),
            retryable: cmd.retryable,
            timed_out: cmd.timed_out,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_retry(&self, cmd: &RetryBatch) -> DomainResult<Vec<SellerSettlementEvent>> {
        let batch = self.existing_batch(cmd.tenant_id, cmd.seller_id, cmd.batch_id)?;
        let retryable = batch.failure.as_ref().is_some_and(|f| f.retryable);
        if batch.state != BatchState::Failed || !retryable {
            return Err(DomainError::rejected(RejectionCode::InvalidState, cmd.batch_id));
        }
        Ok(vec![SellerSettlementEvent::BatchRetried(BatchRetried {
            tenant_id: cmd.tenant_id,
            seller_id: cmd.seller_id,
            batch_id: cmd.batch_id,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reconcile(&self, cmd: &ReconcileBatch) -> DomainResult<Vec<SellerSettlementEvent>> {
        let batch = self.existing_batch(cmd.tenant_id, cmd.seller_id, cmd.batch_id)?;
        let mismatch = || DomainError::rejected(RejectionCode::BankReconciliationMismatch, cmd.batch_id);

        // A callback can only answer for a transfer we actually sent.
        let Some(sent_reference) = batch.bank_reference.as_deref() else {
            return Err(DomainError::rejected(RejectionCode::InvalidState, cmd.batch_id));
        };
        if sent_reference != cmd.bank_reference {
            return Err(mismatch());
        }

        let timed_out = batch.failure.as_ref().is_some_and(|f| f.timed_out);
        match (&cmd.outcome, batch.state) {
            (BankOutcome::Completed { amount }, _) if *amount != batch.net_amount => Err(mismatch()),
            (BankOutcome::Completed { .. }, BatchState::Completed) => Ok(vec![]),
            (BankOutcome::Completed { .. }, BatchState::SentToBank) => {
                Ok(vec![self.completed(cmd, batch, false)])
            }
            (BankOutcome::Completed { .. }, BatchState::Failed) if timed_out => {
                Ok(vec![self.completed(cmd, batch, true)])
            }
            (BankOutcome::Completed { .. }, BatchState::Approved) if batch.attempts > 0 => {
                Ok(vec![self.completed(cmd, batch, true)])
            }
            (BankOutcome::Completed { .. }, _) => Err(mismatch()),
            (BankOutcome::Failed { .. }, BatchState::Failed) => Ok(vec![]),
            (BankOutcome::Failed { reason }, BatchState::SentToBank) => {
                Ok(vec![SellerSettlementEvent::BatchFailed(BatchFailed {
                    tenant_id: cmd.tenant_id,
                    seller_id: cmd.seller_id,
                    batch_id: cmd.batch_id,
                    reason: reason.clone(),
                    retryable: true,
                    timed_out: false,
                    occurred_at: cmd.occurred_at,
                })])
            }
            (BankOutcome::Failed { .. }, BatchState::Completed) => Err(mismatch()),
            (BankOutcome::Failed { .. }, _) => {
                Err(DomainError::rejected(RejectionCode::InvalidState, cmd.batch_id))
            }
        }
    }

    fn completed(&self, cmd: &ReconcileBatch, batch: &SettlementBatch, late_callback: bool) -> SellerSettlementEvent {
        SellerSettlementEvent::BatchCompleted(BatchCompleted {
            tenant_id: cmd.tenant_id,
            seller_id: cmd.seller_id,
            batch_id: cmd.batch_id,
            bank_reference: cmd.bank_reference.clone(),
            net_amount: batch.net_amount,
            late_callback,
            occurred_at: cmd.occurred_at,
        })
    }

    fn handle_abandon(&self, cmd: &AbandonBatch) -> DomainResult<Vec<SellerSettlementEvent>> {
        let batch = self.existing_batch(cmd.tenant_id, cmd.seller_id, cmd.batch_id)?;
        match batch.state {
            BatchState::Failed => {}
            BatchState::Abandoned => return Ok(vec![]),
            _ => return Err(DomainError::rejected(RejectionCode::InvalidState, cmd.batch_id)),
        }
        Ok(vec![SellerSettlementEvent::BatchAbandoned(BatchAbandoned {
            tenant_id: cmd.tenant_id,
            seller_id: cmd.seller_id,
            batch_id: cmd.batch_id,
            reason: cmd.reason.clone(),
            released_orders: batch.lines.iter().map(|l| l.order_id).collect(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct Fixture {
        seller: SellerSettlement,
        tenant_id: TenantId,
        seller_id: SellerId,
        t0: DateTime<Utc>,
    }

    impl Fixture {
        fn new() -> Self {
            let seller_id = SellerId::new();
            Self {
                seller: SellerSettlement::for_seller(seller_id),
                tenant_id: TenantId::new(),
                seller_id,
                t0: Utc::now(),
            }
        }

        fn run(&mut self, cmd: SellerSettlementCommand) -> DomainResult<Vec<SellerSettlementEvent>> {
            self.seller.execute(&cmd)
        }

        fn eligible(&mut self, amount: u64, at: DateTime<Utc>) -> OrderId {
            let order_id = OrderId::new();
            self.run(SellerSettlementCommand::RegisterEligibleLine(RegisterEligibleLine {
                tenant_id: self.tenant_id,
                seller_id: self.seller_id,
                order_id,
                amount: Money::new(amount),
                eligible_at: at,
                occurred_at: at,
            }))
            .unwrap();
            order_id
        }

        fn generate(&mut self, cutoff: DateTime<Utc>) -> DomainResult<BatchId> {
            let batch_id = BatchId::new();
            self.run(SellerSettlementCommand::GenerateBatch(GenerateBatch {
                tenant_id: self.tenant_id,
                seller_id: self.seller_id,
                batch_id,
                cutoff,
                fee_rate: Rate::from_bps(200),
                occurred_at: cutoff,
            }))?;
            Ok(self
                .seller
                .batch_for_cutoff(cutoff)
                .map(|b| b.batch_id)
                .unwrap_or(batch_id))
        }

        fn approve_and_send(&mut self, batch_id: BatchId, reference: &str) {
            self.run(SellerSettlementCommand::ApproveBatch(ApproveBatch {
                tenant_id: self.tenant_id,
                seller_id: self.seller_id,
                batch_id,
                approved_by: UserId::new(),
                occurred_at: self.t0,
            }))
            .unwrap();
            self.send(batch_id, reference).unwrap();
        }

        fn send(&mut self, batch_id: BatchId, reference: &str) -> DomainResult<Vec<SellerSettlementEvent>> {
            self.run(SellerSettlementCommand::SendToBank(SendToBank {
                tenant_id: self.tenant_id,
                seller_id: self.seller_id,
                batch_id,
                bank_reference: reference.to_string(),
                occurred_at: self.t0,
            }))
        }

        fn reconcile(&mut self, batch_id: BatchId, reference: &str, outcome: BankOutcome) -> DomainResult<Vec<SellerSettlementEvent>> {
            self.run(SellerSettlementCommand::ReconcileBatch(ReconcileBatch {
                tenant_id: self.tenant_id,
                seller_id: self.seller_id,
                batch_id,
                bank_reference: reference.to_string(),
                outcome,
                occurred_at: self.t0,
            }))
        }

        fn fail(&mut self, batch_id: BatchId, timed_out: bool) {
            self.run(SellerSettlementCommand::MarkBatchFailed(MarkBatchFailed {
                tenant_id: self.tenant_id,
                seller_id: self.seller_id,
                batch_id,
                reason: "bank timeout".to_string(),
                retryable: true,
                timed_out,
                occurred_at: self.t0,
            }))
            .unwrap();
        }

        fn net(&self, batch_id: BatchId) -> Money {
            self.seller.batch(batch_id).unwrap().net_amount
        }
    }

    #[test]
    fn cutoff_excludes_lines_eligible_after_it() {
        let mut f = Fixture::new();
        let t = f.t0;
        let early = f.eligible(10_000, t);
        let late = f.eligible(5_000, t + Duration::seconds(1));

        let first = f.generate(t).unwrap();
        assert_eq!(f.seller.batch_of(early), Some(first));
        assert_eq!(f.seller.batch_of(late), None);

        let second = f.generate(t + Duration::seconds(1)).unwrap();
        assert_ne!(first, second);
        assert_eq!(f.seller.batch_of(late), Some(second));
    }

    #[test]
    fn regenerating_the_same_cutoff_returns_the_existing_batch() {
        let mut f = Fixture::new();
        let t = f.t0;
        f.eligible(10_000, t);
        let first = f.generate(t).unwrap();
        let version = f.seller.version();
        let again = f.generate(t).unwrap();
        assert_eq!(first, again);
        assert_eq!(f.seller.version(), version);
    }

    #[test]
    fn generate_without_lines_is_rejected() {
        let mut f = Fixture::new();
        let t = f.t0;
        assert!(f.generate(t).is_err());
    }

    #[test]
    fn adjustments_are_deducted_and_carried_forward() {
        let mut f = Fixture::new();
        let t = f.t0;
        f.run(SellerSettlementCommand::RecordAdjustment(RecordAdjustment {
            tenant_id: f.tenant_id,
            seller_id: f.seller_id,
            adjustment_id: Uuid::now_v7(),
            amount: Money::new(12_000),
            reason: "returned goods".to_string(),
            reference: LedgerReference::Order(OrderId::new()),
            occurred_at: t,
        }))
        .unwrap();

        f.eligible(10_000, t);
        let batch_id = f.generate(t).unwrap();
        // gross 10,000, fee 200, room 9,800 fully consumed
        assert_eq!(f.net(batch_id), Money::ZERO);
        assert_eq!(f.seller.pending_adjustments()[0].amount, Money::new(2_200));
        assert!(f.seller.batch(batch_id).unwrap().netting_matches());
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut f = Fixture::new();
        let t = f.t0;
        f.eligible(10_000, t);
        let batch_id = f.generate(t).unwrap();
        f.approve_and_send(batch_id, "BANK-1");

        let net = f.net(batch_id);
        f.reconcile(batch_id, "BANK-1", BankOutcome::Completed { amount: net }).unwrap();
        assert_eq!(f.seller.batch(batch_id).unwrap().state, BatchState::Completed);

        // Duplicate webhook is a no-op.
        assert!(f
            .reconcile(batch_id, "BANK-1", BankOutcome::Completed { amount: net })
            .unwrap()
            .is_empty());
    }

    #[test]
    fn send_requires_approval() {
        let mut f = Fixture::new();
        let t = f.t0;
        f.eligible(10_000, t);
        let batch_id = f.generate(t).unwrap();
        let err = f.send(batch_id, "BANK-1").unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::InvalidState));
    }

    #[test]
    fn amount_or_reference_mismatch_never_changes_state() {
        let mut f = Fixture::new();
        let t = f.t0;
        f.eligible(10_000, t);
        let batch_id = f.generate(t).unwrap();
        f.approve_and_send(batch_id, "BANK-1");

        let err = f
            .reconcile(batch_id, "BANK-1", BankOutcome::Completed { amount: Money::new(1) })
            .unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::BankReconciliationMismatch));

        let net = f.net(batch_id);
        let err = f
            .reconcile(batch_id, "BANK-X", BankOutcome::Completed { amount: net })
            .unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::BankReconciliationMismatch));
        assert_eq!(f.seller.batch(batch_id).unwrap().state, BatchState::SentToBank);
    }

    #[test]
    fn late_callback_completes_a_timed_out_batch() {
        let mut f = Fixture::new();
        let t = f.t0;
        f.eligible(10_000, t);
        let batch_id = f.generate(t).unwrap();
        f.approve_and_send(batch_id, "BANK-1");
        f.fail(batch_id, true);

        let net = f.net(batch_id);
        let events = f
            .reconcile(batch_id, "BANK-1", BankOutcome::Completed { amount: net })
            .unwrap();
        let SellerSettlementEvent::BatchCompleted(c) = &events[0] else {
            panic!("expected BatchCompleted");
        };
        assert!(c.late_callback);
    }

    #[test]
    fn failed_batch_retries_through_approved() {
        let mut f = Fixture::new();
        let t = f.t0;
        f.eligible(10_000, t);
        let batch_id = f.generate(t).unwrap();
        f.approve_and_send(batch_id, "BANK-1");
        f.reconcile(batch_id, "BANK-1", BankOutcome::Failed { reason: "account closed".to_string() })
            .unwrap();

        f.run(SellerSettlementCommand::RetryBatch(RetryBatch {
            tenant_id: f.tenant_id,
            seller_id: f.seller_id,
            batch_id,
            approved_by: UserId::new(),
            occurred_at: t,
        }))
        .unwrap();
        assert_eq!(f.seller.batch(batch_id).unwrap().state, BatchState::Approved);

        f.send(batch_id, "BANK-2").unwrap();
        assert_eq!(f.seller.batch(batch_id).unwrap().attempts, 2);
    }

    #[test]
    fn abandoning_a_failed_batch_returns_lines_to_the_pool() {
        let mut f = Fixture::new();
        let t = f.t0;
        let order = f.eligible(10_000, t);
        let batch_id = f.generate(t).unwrap();
        f.approve_and_send(batch_id, "BANK-1");
        f.fail(batch_id, false);

        f.run(SellerSettlementCommand::AbandonBatch(AbandonBatch {
            tenant_id: f.tenant_id,
            seller_id: f.seller_id,
            batch_id,
            reason: "bank details invalid".to_string(),
            occurred_at: t,
        }))
        .unwrap();

        assert_eq!(f.seller.batch_of(order), None);
        let next = f.generate(t + Duration::hours(1)).unwrap();
        assert_eq!(f.seller.batch_of(order), Some(next));
    }
}
