use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use osas_core::{Aggregate, OrderId, RejectionCode, TenantId, UserId};
use osas_credit::ReservationState;
use osas_delivery::{
    DeliveryStatus, DeliveryVerification, DeliveryVerificationCommand, DeliveryVerificationEvent,
    ExceptionResolution, RaiseException, RecordDeliveryStatus, ResolveException,
    VerificationStatus, VerifyDelivery,
};
use osas_events::{EventBus, EventEnvelope};
use osas_settlement::{RegisterEligibleLine, SellerSettlementCommand};

use super::{Engine, EngineError, EngineResult};
use crate::command_dispatcher::{DispatchError, Dispatched};
use crate::event_store::EventStore;

impl<S, B> Engine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Courier/admin status feed. A cancelled or returned order releases its hold.
    pub fn record_delivery_status(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        delivery_status: DeliveryStatus,
        pod_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<DeliveryVerification> {
        let dispatched = self.run_gate(
            tenant_id,
            order_id,
            now,
            DeliveryVerificationCommand::RecordDeliveryStatus(RecordDeliveryStatus {
                tenant_id,
                order_id,
                delivery_status,
                pod_ref,
                occurred_at: now,
            }),
        )?;
        self.follow_through(tenant_id, dispatched, now)
    }

    /// Run the gate for a delivered order.
    ///
    /// Re-verifying a resolved order changes nothing but repeats the
    /// downstream hand-off, which is idempotent.
    pub fn verify_delivery(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        pod_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<DeliveryVerification> {
        let dispatched = self
            .run_gate(
                tenant_id,
                order_id,
                now,
                DeliveryVerificationCommand::VerifyDelivery(VerifyDelivery {
                    tenant_id,
                    order_id,
                    pod_ref,
                    occurred_at: now,
                }),
            )
            .inspect_err(|e| {
                if e.is_rejection(RejectionCode::VerificationException) {
                    warn!(%tenant_id, %order_id, "verification blocked by open exception");
                }
            })?;
        self.follow_through(tenant_id, dispatched, now)
    }

    pub fn raise_delivery_exception(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<DeliveryVerification> {
        let dispatched = self.run_delivery(
            tenant_id,
            order_id,
            DeliveryVerificationCommand::RaiseException(RaiseException {
                tenant_id,
                order_id,
                reason: reason.to_string(),
                occurred_at: now,
            }),
        )?;
        self.follow_through(tenant_id, dispatched, now)
    }

    pub fn resolve_delivery_exception(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        resolved_by: UserId,
        resolution: ExceptionResolution,
        now: DateTime<Utc>,
    ) -> EngineResult<DeliveryVerification> {
        let dispatched = self.run_gate(
            tenant_id,
            order_id,
            now,
            DeliveryVerificationCommand::ResolveException(ResolveException {
                tenant_id,
                order_id,
                resolved_by,
                resolution,
                occurred_at: now,
            }),
        )?;
        self.follow_through(tenant_id, dispatched, now)
    }

    /// Dispatch a gate command only if the credit hold can follow its outcome.
    ///
    /// Verifying needs a hold that is still reserved or already committed;
    /// rejecting needs one that was never committed.
    fn run_gate(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        now: DateTime<Utc>,
        command: DeliveryVerificationCommand,
    ) -> EngineResult<Dispatched<DeliveryVerification>> {
        let gate = self.delivery(tenant_id, order_id)?;
        let preview = gate.handle(&command).map_err(DispatchError::from)?;
        let verifies = preview
            .iter()
            .any(|e| matches!(e, DeliveryVerificationEvent::DeliveryVerified(_)));
        let rejects = preview
            .iter()
            .any(|e| matches!(e, DeliveryVerificationEvent::DeliveryRejected(_)));

        if let (true, Some(account_id), Some(reservation_id)) =
            (verifies || rejects, gate.account_id(), gate.reservation_id())
        {
            let hold = self
                .account(tenant_id, account_id)?
                .reservation(reservation_id)
                .map(|r| r.state);
            match hold {
                None => return Err(EngineError::unknown("reservation", reservation_id)),
                Some(ReservationState::Released | ReservationState::Expired) if verifies => {
                    warn!(%tenant_id, %order_id, %reservation_id, "verification refused; credit hold already released");
                    self.close_gate(tenant_id, reservation_id, "credit hold released", now)?;
                    return Err(EngineError::rejected(RejectionCode::AlreadyReleased, reservation_id));
                }
                Some(ReservationState::Committed) if rejects => {
                    warn!(%tenant_id, %order_id, %reservation_id, "rejection refused; credit hold already committed");
                    return Err(EngineError::rejected(RejectionCode::AlreadyCommitted, reservation_id));
                }
                Some(_) => {}
            }
        }
        self.run_delivery(tenant_id, order_id, command)
    }

    /// Hand a resolved delivery to credit and settlement.
    fn follow_through(
        &self,
        tenant_id: TenantId,
        dispatched: Dispatched<DeliveryVerification>,
        now: DateTime<Utc>,
    ) -> EngineResult<DeliveryVerification> {
        let verified_at = dispatched.events.iter().find_map(|e| match e {
            DeliveryVerificationEvent::DeliveryVerified(v) => Some(v.occurred_at),
            _ => None,
        });
        for event in &dispatched.events {
            if let DeliveryVerificationEvent::DeliveryExceptionRaised(e) = event {
                warn!(%tenant_id, order_id = %e.order_id, reason = %e.reason, "delivery exception raised");
            }
        }

        let delivery = dispatched.state;
        let (Some(order_id), Some(seller_id), Some(account_id), Some(reservation_id)) = (
            delivery.order_id(),
            delivery.seller_id(),
            delivery.account_id(),
            delivery.reservation_id(),
        ) else {
            return Ok(delivery);
        };

        match delivery.status() {
            VerificationStatus::Verified if delivery.payment_eligible() => {
                let obligation_id =
                    self.commit_reservation(tenant_id, account_id, reservation_id, now, true)?;
                self.run_seller(
                    tenant_id,
                    seller_id,
                    SellerSettlementCommand::RegisterEligibleLine(RegisterEligibleLine {
                        tenant_id,
                        seller_id,
                        order_id,
                        amount: delivery.amount(),
                        eligible_at: verified_at.unwrap_or(now),
                        occurred_at: now,
                    }),
                )?;
                if verified_at.is_some() {
                    info!(%tenant_id, %order_id, %obligation_id, %seller_id, "delivery verified; order payment-eligible");
                }
            }
            VerificationStatus::Rejected => {
                match self.release_on_account(
                    tenant_id,
                    account_id,
                    reservation_id,
                    "delivery rejected",
                    now,
                ) {
                    Ok(_) => info!(%tenant_id, %order_id, "delivery rejected; hold released"),
                    Err(e) if e.is_rejection(RejectionCode::AlreadyReleased) => {}
                    Err(e) => return Err(e),
                }
            }
            _ => {}
        }
        Ok(delivery)
    }
}
