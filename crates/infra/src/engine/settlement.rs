use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use osas_core::{BatchId, LedgerReference, Money, RejectionCode, SellerId, TenantId, UserId};
use osas_events::{EventBus, EventEnvelope};
use osas_settlement::{
    AbandonBatch, ApproveBatch, BankOutcome, GenerateBatch, MarkBatchFailed, ReconcileBatch,
    RecordAdjustment, RetryBatch, SellerSettlement, SellerSettlementCommand,
    SellerSettlementEvent, SendToBank, SettlementBatch,
};

use super::{Engine, EngineError, EngineResult, Leased};
use crate::bank::TransferInstruction;
use crate::command_dispatcher::Dispatched;
use crate::event_store::EventStore;

impl<S, B> Engine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Snapshot the seller's eligible, unbatched lines as of `cutoff`.
    ///
    /// Single-flight per `(seller, cutoff)`; a repeat returns the batch
    /// already generated for that cutoff.
    pub fn generate_batch(
        &self,
        tenant_id: TenantId,
        seller_id: SellerId,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EngineResult<SettlementBatch> {
        let key = format!(
            "settlement:{seller_id}:{}",
            cutoff.to_rfc3339_opts(SecondsFormat::Micros, true)
        );
        let batch_id = BatchId::new();
        let outcome = self.with_lease(tenant_id, &key, now, || {
            self.run_seller(
                tenant_id,
                seller_id,
                SellerSettlementCommand::GenerateBatch(GenerateBatch {
                    tenant_id,
                    seller_id,
                    batch_id,
                    cutoff,
                    fee_rate: self.config.settlement.fee_rate(),
                    occurred_at: now,
                }),
            )
        })?;

        let seller = match outcome {
            Leased::Ran(dispatched) => {
                for event in &dispatched.events {
                    if let SellerSettlementEvent::BatchGenerated(e) = event {
                        info!(
                            %tenant_id,
                            %seller_id,
                            batch_id = %e.batch_id,
                            %cutoff,
                            lines = e.lines.len(),
                            gross = e.gross_amount.minor(),
                            fee = e.fee_amount.minor(),
                            adjustments = e.adjustment_amount.minor(),
                            net = e.net_amount.minor(),
                            "settlement batch generated"
                        );
                    }
                }
                dispatched.state
            }
            Leased::AlreadyDone => self.seller(tenant_id, seller_id)?,
            Leased::InFlight => return Err(EngineError::InFlight { key }),
        };
        seller
            .batch_for_cutoff(cutoff)
            .cloned()
            .ok_or_else(|| EngineError::unknown("settlement batch", format!("{seller_id}@{cutoff}")))
    }

    pub fn approve_batch(
        &self,
        tenant_id: TenantId,
        batch_id: BatchId,
        approved_by: UserId,
        now: DateTime<Utc>,
    ) -> EngineResult<SettlementBatch> {
        let seller_id = self.seller_of(tenant_id, batch_id)?;
        let dispatched = self.run_seller(
            tenant_id,
            seller_id,
            SellerSettlementCommand::ApproveBatch(ApproveBatch {
                tenant_id,
                seller_id,
                batch_id,
                approved_by,
                occurred_at: now,
            }),
        )?;
        info!(%tenant_id, %batch_id, %approved_by, "settlement batch approved");
        batch_in(dispatched, batch_id)
    }

    /// Record the transfer as in flight, then hand it to the bank gateway.
    ///
    /// The gateway is called after the append. A gateway error marks the
    /// batch failed (timeouts stay reconcilable by a late callback).
    pub fn send_to_bank(
        &self,
        tenant_id: TenantId,
        batch_id: BatchId,
        now: DateTime<Utc>,
    ) -> EngineResult<SettlementBatch> {
        let seller_id = self.seller_of(tenant_id, batch_id)?;
        let attempt = self
            .seller(tenant_id, seller_id)?
            .batch(batch_id)
            .map(|b| b.attempts + 1)
            .ok_or_else(|| EngineError::unknown("settlement batch", batch_id))?;
        let bank_reference = format!("OSAS-{}-{attempt}", batch_id.as_uuid().simple());

        let dispatched = self.run_seller(
            tenant_id,
            seller_id,
            SellerSettlementCommand::SendToBank(SendToBank {
                tenant_id,
                seller_id,
                batch_id,
                bank_reference: bank_reference.clone(),
                occurred_at: now,
            }),
        )?;
        let sent = !dispatched.is_noop();
        let batch = batch_in(dispatched, batch_id)?;
        if !sent {
            return Ok(batch);
        }

        let instruction = TransferInstruction {
            tenant_id,
            seller_id,
            batch_id,
            bank_reference: bank_reference.clone(),
            net_amount: batch.net_amount,
            attempt,
        };
        match self.bank.submit(&instruction) {
            Ok(()) => {
                info!(%tenant_id, %batch_id, bank_reference, attempt, net = batch.net_amount.minor(), "settlement batch sent to bank");
                Ok(batch)
            }
            Err(e) => {
                warn!(%tenant_id, %batch_id, bank_reference, attempt, error = %e, "bank submission failed");
                self.mark_batch_failed(
                    tenant_id,
                    batch_id,
                    &e.to_string(),
                    e.is_retryable(),
                    e.is_timeout(),
                    now,
                )
            }
        }
    }

    pub fn mark_batch_failed(
        &self,
        tenant_id: TenantId,
        batch_id: BatchId,
        reason: &str,
        retryable: bool,
        timed_out: bool,
        now: DateTime<Utc>,
    ) -> EngineResult<SettlementBatch> {
        let seller_id = self.seller_of(tenant_id, batch_id)?;
        let dispatched = self.run_seller(
            tenant_id,
            seller_id,
            SellerSettlementCommand::MarkBatchFailed(MarkBatchFailed {
                tenant_id,
                seller_id,
                batch_id,
                reason: reason.to_string(),
                retryable,
                timed_out,
                occurred_at: now,
            }),
        )?;
        warn!(%tenant_id, %batch_id, reason, retryable, timed_out, "settlement batch failed");
        batch_in(dispatched, batch_id)
    }

    /// Re-approve a retryable failed batch for another bank attempt.
    pub fn retry_batch(
        &self,
        tenant_id: TenantId,
        batch_id: BatchId,
        approved_by: UserId,
        now: DateTime<Utc>,
    ) -> EngineResult<SettlementBatch> {
        let seller_id = self.seller_of(tenant_id, batch_id)?;
        let dispatched = self.run_seller(
            tenant_id,
            seller_id,
            SellerSettlementCommand::RetryBatch(RetryBatch {
                tenant_id,
                seller_id,
                batch_id,
                approved_by,
                occurred_at: now,
            }),
        )?;
        info!(%tenant_id, %batch_id, %approved_by, "settlement batch retry approved");
        batch_in(dispatched, batch_id)
    }

    /// Give up on a failed batch; its lines return to the unbatched pool.
    pub fn abandon_batch(
        &self,
        tenant_id: TenantId,
        batch_id: BatchId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<SettlementBatch> {
        let seller_id = self.seller_of(tenant_id, batch_id)?;
        let dispatched = self.run_seller(
            tenant_id,
            seller_id,
            SellerSettlementCommand::AbandonBatch(AbandonBatch {
                tenant_id,
                seller_id,
                batch_id,
                reason: reason.to_string(),
                occurred_at: now,
            }),
        )?;
        for event in &dispatched.events {
            if let SellerSettlementEvent::BatchAbandoned(e) = event {
                warn!(%tenant_id, %batch_id, released = e.released_orders.len(), reason, "settlement batch abandoned");
            }
        }
        batch_in(dispatched, batch_id)
    }

    /// Bank callback (or polling result) for a transfer.
    ///
    /// A mismatch opens a support ticket and changes no balance.
    pub fn reconcile_batch(
        &self,
        tenant_id: TenantId,
        batch_id: BatchId,
        bank_reference: &str,
        outcome: BankOutcome,
        now: DateTime<Utc>,
    ) -> EngineResult<SettlementBatch> {
        let seller_id = self.seller_of(tenant_id, batch_id)?;
        let result = self.run_seller(
            tenant_id,
            seller_id,
            SellerSettlementCommand::ReconcileBatch(ReconcileBatch {
                tenant_id,
                seller_id,
                batch_id,
                bank_reference: bank_reference.to_string(),
                outcome: outcome.clone(),
                occurred_at: now,
            }),
        );
        let dispatched = match result {
            Ok(dispatched) => dispatched,
            Err(e) if e.is_rejection(RejectionCode::BankReconciliationMismatch) => {
                let ticket = self.tickets.open(
                    tenant_id,
                    RejectionCode::BankReconciliationMismatch,
                    batch_id.to_string(),
                    format!("seller {seller_id}: callback {bank_reference} reported {outcome:?}"),
                    now,
                );
                warn!(%tenant_id, %batch_id, bank_reference, ticket_id = %ticket.ticket_id, "bank reconciliation mismatch; ticket opened");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        for event in &dispatched.events {
            match event {
                SellerSettlementEvent::BatchCompleted(e) => {
                    info!(%tenant_id, %batch_id, net = e.net_amount.minor(), late_callback = e.late_callback, "settlement batch completed");
                }
                SellerSettlementEvent::BatchFailed(e) => {
                    warn!(%tenant_id, %batch_id, reason = %e.reason, "bank reported transfer failure");
                }
                _ => {}
            }
        }
        if dispatched.is_noop() {
            debug!(%tenant_id, %batch_id, bank_reference, "duplicate bank callback");
        }
        batch_in(dispatched, batch_id)
    }

    /// Prior-period deduction for the seller's next batch.
    pub fn record_adjustment(
        &self,
        tenant_id: TenantId,
        seller_id: SellerId,
        adjustment_id: Uuid,
        amount: Money,
        reason: &str,
        reference: LedgerReference,
        now: DateTime<Utc>,
    ) -> EngineResult<SellerSettlement> {
        let dispatched = self.run_seller(
            tenant_id,
            seller_id,
            SellerSettlementCommand::RecordAdjustment(RecordAdjustment {
                tenant_id,
                seller_id,
                adjustment_id,
                amount,
                reason: reason.to_string(),
                reference,
                occurred_at: now,
            }),
        )?;
        if !dispatched.is_noop() {
            info!(%tenant_id, %seller_id, %adjustment_id, amount = amount.minor(), %reference, "settlement adjustment recorded");
        }
        Ok(dispatched.state)
    }

    pub fn settlement_batch(&self, tenant_id: TenantId, batch_id: BatchId) -> EngineResult<SettlementBatch> {
        let seller_id = self.seller_of(tenant_id, batch_id)?;
        self.seller(tenant_id, seller_id)?
            .batch(batch_id)
            .cloned()
            .ok_or_else(|| EngineError::unknown("settlement batch", batch_id))
    }

    fn seller_of(&self, tenant_id: TenantId, batch_id: BatchId) -> EngineResult<SellerId> {
        self.read_models
            .directory()
            .batch(tenant_id, batch_id)
            .map(|b| b.seller_id)
            .ok_or_else(|| EngineError::unknown("settlement batch", batch_id))
    }
}

fn batch_in(dispatched: Dispatched<SellerSettlement>, batch_id: BatchId) -> EngineResult<SettlementBatch> {
    dispatched
        .state
        .batch(batch_id)
        .cloned()
        .ok_or_else(|| EngineError::unknown("settlement batch", batch_id))
}
