use chrono::{DateTime, Days, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use osas_core::{
    BuyerId, BuyerKind, CreditAccountId, Money, ObligationId, OrderId, RejectionCode,
    ReservationId, SellerId, TenantId, UserId,
};
use osas_credit::{
    AdjustLimit, Approver, CommitReservation, CreditAccount, CreditAccountCommand,
    CreditAccountEvent, ExpireReservations, FreezeAccount, OpenAccount, ReleaseReservation, ReserveCredit,
    UnfreezeAccount,
};
use osas_delivery::{CloseDelivery, DeliveryVerificationCommand, RegisterDelivery};
use osas_events::{EventBus, EventEnvelope};
use osas_repayment::{ObligationCommand, OpenObligation};

use super::{Engine, EngineError, EngineResult, Leased, today};
use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;

/// An order asking to draw on a buyer's credit line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub account_id: CreditAccountId,
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub amount: Money,
    /// Seller policy: a delivered order needs no proof of delivery.
    pub auto_approve_pod: bool,
}

impl<S, B> Engine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn open_account(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        owner: BuyerId,
        buyer_kind: BuyerKind,
        credit_limit: Money,
        now: DateTime<Utc>,
    ) -> EngineResult<CreditAccount> {
        let dispatched = self.run_account(
            tenant_id,
            account_id,
            CreditAccountCommand::OpenAccount(OpenAccount {
                tenant_id,
                account_id,
                owner,
                buyer_kind,
                credit_limit,
                occurred_at: now,
            }),
        )?;
        info!(%tenant_id, %account_id, %owner, limit = credit_limit.minor(), "credit account opened");
        Ok(dispatched.state)
    }

    /// Hold credit for an order and register it with the delivery gate.
    ///
    /// Both writes succeed or the hold is released again.
    pub fn reserve(
        &self,
        tenant_id: TenantId,
        request: ReserveRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<ReservationId> {
        let reservation_id = request.order_id.reservation();
        let account_id = request.account_id;
        let dispatched = self
            .run_account(
                tenant_id,
                account_id,
                CreditAccountCommand::ReserveCredit(ReserveCredit {
                    tenant_id,
                    account_id,
                    reservation_id,
                    order_id: request.order_id,
                    seller_id: request.seller_id,
                    amount: request.amount,
                    occurred_at: now,
                }),
            )
            .inspect_err(|e| {
                if e.code().is_some() {
                    warn!(%tenant_id, %account_id, order_id = %request.order_id, error = %e, "reservation rejected");
                }
            })?;

        let buyer_id = dispatched
            .state
            .owner()
            .ok_or_else(|| EngineError::unknown("credit account", account_id))?;

        let registered = self.run_delivery(
            tenant_id,
            request.order_id,
            DeliveryVerificationCommand::RegisterDelivery(RegisterDelivery {
                tenant_id,
                order_id: request.order_id,
                seller_id: request.seller_id,
                buyer_id,
                account_id,
                reservation_id,
                amount: request.amount,
                auto_approve_pod: request.auto_approve_pod,
                occurred_at: now,
            }),
        );
        if let Err(e) = registered {
            warn!(%tenant_id, %reservation_id, order_id = %request.order_id, error = %e, "delivery registration failed; releasing hold");
            self.release_on_account(
                tenant_id,
                account_id,
                reservation_id,
                "delivery registration failed",
                now,
            )?;
            return Err(e);
        }

        info!(
            %tenant_id,
            %account_id,
            %reservation_id,
            order_id = %request.order_id,
            amount = request.amount.minor(),
            available_after = dispatched.state.credit_available().minor(),
            "credit reserved"
        );
        Ok(reservation_id)
    }

    /// Convert a hold into a repayment obligation.
    ///
    /// A second commit of the same reservation is rejected with `already_committed`.
    pub fn commit(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> EngineResult<ObligationId> {
        let account_id = self.reservation_account(tenant_id, reservation_id)?;
        self.commit_reservation(tenant_id, account_id, reservation_id, now, false)
    }

    /// Return a hold to the credit line and close its delivery gate.
    pub fn release(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<CreditAccount> {
        let account_id = self.reservation_account(tenant_id, reservation_id)?;
        let account = self.release_on_account(tenant_id, account_id, reservation_id, reason, now)?;
        self.close_gate(tenant_id, reservation_id, reason, now)?;
        Ok(account)
    }

    pub fn freeze(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<CreditAccount> {
        let dispatched = self.run_account(
            tenant_id,
            account_id,
            CreditAccountCommand::FreezeAccount(FreezeAccount {
                tenant_id,
                account_id,
                reason: reason.to_string(),
                occurred_at: now,
            }),
        )?;
        if !dispatched.is_noop() {
            info!(%tenant_id, %account_id, reason, "credit account frozen");
        }
        Ok(dispatched.state)
    }

    pub fn unfreeze(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        now: DateTime<Utc>,
    ) -> EngineResult<CreditAccount> {
        let dispatched = self.run_account(
            tenant_id,
            account_id,
            CreditAccountCommand::UnfreezeAccount(UnfreezeAccount {
                tenant_id,
                account_id,
                occurred_at: now,
            }),
        )?;
        if !dispatched.is_noop() {
            info!(%tenant_id, %account_id, "credit account unfrozen");
        }
        Ok(dispatched.state)
    }

    /// Human-approved limit change (increase or decrease).
    pub fn adjust_limit(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        new_limit: Money,
        reason: &str,
        approved_by: UserId,
        now: DateTime<Utc>,
    ) -> EngineResult<CreditAccount> {
        let dispatched = self.run_account(
            tenant_id,
            account_id,
            CreditAccountCommand::AdjustLimit(AdjustLimit {
                tenant_id,
                account_id,
                new_limit,
                reason: reason.to_string(),
                approver: Approver::User(approved_by),
                occurred_at: now,
            }),
        )?;
        info!(%tenant_id, %account_id, new_limit = new_limit.minor(), %approved_by, "credit limit adjusted");
        Ok(dispatched.state)
    }

    /// Auto-release holds older than the configured TTL, once per tenant-hour.
    ///
    /// Returns the number of expired reservations (zero when the hour already ran).
    pub fn sweep_expired_reservations(
        &self,
        tenant_id: TenantId,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let key = format!("sweep:{}", now.format("%Y-%m-%d-%H"));
        let ttl_secs = self.config.credit.reservation_ttl_secs;
        let outcome = self.with_lease(tenant_id, &key, now, || {
            let mut expired = 0;
            for account in self.read_models.directory().accounts(tenant_id) {
                if account.open_reservations == 0 {
                    continue;
                }
                let result = self.run_account(
                    tenant_id,
                    account.account_id,
                    CreditAccountCommand::ExpireReservations(ExpireReservations {
                        tenant_id,
                        account_id: account.account_id,
                        ttl_secs,
                        occurred_at: now,
                    }),
                );
                match result {
                    Ok(dispatched) => {
                        for event in &dispatched.events {
                            let CreditAccountEvent::ReservationExpired(e) = event else {
                                continue;
                            };
                            expired += 1;
                            let closed =
                                self.close_gate(tenant_id, e.reservation_id, "credit hold expired", now);
                            if let Err(err) = closed {
                                warn!(%tenant_id, reservation_id = %e.reservation_id, error = %err, "delivery gate not closed after expiry");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(%tenant_id, account_id = %account.account_id, error = %e, "reservation sweep failed for account")
                    }
                }
            }
            Ok(expired)
        })?;
        let expired = match outcome {
            Leased::Ran(n) => n,
            Leased::AlreadyDone | Leased::InFlight => 0,
        };
        if expired > 0 {
            info!(%tenant_id, expired, "stale reservations released");
        }
        Ok(expired)
    }

    /// The account holding a reservation, read from the order's delivery record.
    fn reservation_account(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
    ) -> EngineResult<CreditAccountId> {
        let delivery = self
            .delivery(tenant_id, reservation_id.order())
            .map_err(|_| EngineError::unknown("reservation", reservation_id))?;
        if delivery.reservation_id() != Some(reservation_id) {
            return Err(EngineError::unknown("reservation", reservation_id));
        }
        delivery
            .account_id()
            .ok_or_else(|| EngineError::unknown("reservation", reservation_id))
    }

    /// Reject an unresolved delivery gate whose hold is gone.
    pub(crate) fn close_gate(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let order_id = reservation_id.order();
        let dispatched = self.run_delivery(
            tenant_id,
            order_id,
            DeliveryVerificationCommand::CloseDelivery(CloseDelivery {
                tenant_id,
                order_id,
                reason: reason.to_string(),
                occurred_at: now,
            }),
        );
        match dispatched {
            Ok(d) if !d.is_noop() => {
                info!(%tenant_id, %order_id, %reservation_id, reason, "delivery gate closed");
                Ok(())
            }
            Ok(_) => Ok(()),
            // Holds that never reached the gate have nothing to close.
            Err(EngineError::Dispatch(DispatchError::NotFound)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn release_on_account(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        reservation_id: ReservationId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<CreditAccount> {
        let dispatched = self.run_account(
            tenant_id,
            account_id,
            CreditAccountCommand::ReleaseReservation(ReleaseReservation {
                tenant_id,
                account_id,
                reservation_id,
                reason: reason.to_string(),
                occurred_at: now,
            }),
        )?;
        info!(%tenant_id, %account_id, %reservation_id, reason, "reservation released");
        Ok(dispatched.state)
    }

    /// Commit the hold and open its obligation.
    ///
    /// With `tolerate_committed`, an earlier commit is picked up and its
    /// obligation (re)opened, so a retried delivery hand-off completes.
    pub(crate) fn commit_reservation(
        &self,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
        tolerate_committed: bool,
    ) -> EngineResult<ObligationId> {
        let account = match self.run_account(
            tenant_id,
            account_id,
            CreditAccountCommand::CommitReservation(CommitReservation {
                tenant_id,
                account_id,
                reservation_id,
                obligation_id: ObligationId::generate(),
                occurred_at: now,
            }),
        ) {
            Ok(dispatched) => dispatched.state,
            Err(e) if tolerate_committed && e.is_rejection(RejectionCode::AlreadyCommitted) => {
                self.account(tenant_id, account_id)?
            }
            Err(e) => return Err(e),
        };

        let reservation = account
            .reservation(reservation_id)
            .ok_or_else(|| EngineError::unknown("reservation", reservation_id))?;
        let obligation_id = reservation
            .obligation_id
            .ok_or_else(|| EngineError::Validation(format!("reservation {reservation_id} has no obligation")))?;
        let buyer_id = account
            .owner()
            .ok_or_else(|| EngineError::unknown("credit account", account_id))?;
        let due_date = today(now)
            .checked_add_days(Days::new(u64::from(self.config.credit.credit_terms_days)))
            .ok_or_else(|| EngineError::Validation("due date out of range".to_string()))?;

        self.run_obligation(
            tenant_id,
            obligation_id,
            ObligationCommand::OpenObligation(OpenObligation {
                tenant_id,
                obligation_id,
                account_id,
                buyer_id,
                buyer_kind: account.buyer_kind(),
                seller_id: reservation.seller_id,
                order_id: reservation.order_id,
                reservation_id,
                amount: reservation.amount,
                due_date,
                occurred_at: now,
            }),
        )?;
        info!(
            %tenant_id,
            %account_id,
            %reservation_id,
            %obligation_id,
            amount = reservation.amount.minor(),
            %due_date,
            "reservation committed"
        );
        Ok(obligation_id)
    }
}
