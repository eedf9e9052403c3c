use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use osas_core::{
    Aggregate, AggregateId, AggregateRoot, BuyerId, CreditAccountId, DomainError, Money, OrderId,
    RejectionCode, ReservationId, SellerId, TenantId, UserId,
};
use osas_events::Event;

/// Carrier-reported status of the shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Dispatched,
    InTransit,
    Delivered,
    Cancelled,
    Returned,
}

impl DeliveryStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, DeliveryStatus::Cancelled | DeliveryStatus::Returned)
    }
}

/// Gate state: `Pending -> Verified | Rejected | Exception`, with `Exception`
/// resolved manually to `Verified` or `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
    Exception,
}

impl VerificationStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, VerificationStatus::Verified | VerificationStatus::Rejected)
    }
}

/// Explicit admin decision allowing eligibility without proof of delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminOverride {
    pub by: UserId,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExceptionResolution {
    Verify { note: String },
    Reject { reason: String },
}

/// Aggregate root: DeliveryVerification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryVerification {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    order_id: Option<OrderId>,
    seller_id: Option<SellerId>,
    buyer_id: Option<BuyerId>,
    account_id: Option<CreditAccountId>,
    reservation_id: Option<ReservationId>,
    amount: Money,
    auto_approve_pod: bool,
    delivery_status: DeliveryStatus,
    pod_ref: Option<String>,
    status: VerificationStatus,
    exception_reason: Option<String>,
    admin_override: Option<AdminOverride>,
    auto_approved: bool,
    version: u64,
    created: bool,
}

impl DeliveryVerification {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            order_id: None,
            seller_id: None,
            buyer_id: None,
            account_id: None,
            reservation_id: None,
            amount: Money::ZERO,
            auto_approve_pod: false,
            delivery_status: DeliveryStatus::Pending,
            pod_ref: None,
            status: VerificationStatus::Pending,
            exception_reason: None,
            admin_override: None,
            auto_approved: false,
            version: 0,
            created: false,
        }
    }

    pub fn for_order(order_id: OrderId) -> Self {
        Self::empty(order_id.delivery_stream())
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn seller_id(&self) -> Option<SellerId> {
        self.seller_id
    }

    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    pub fn account_id(&self) -> Option<CreditAccountId> {
        self.account_id
    }

    pub fn reservation_id(&self) -> Option<ReservationId> {
        self.reservation_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn delivery_status(&self) -> DeliveryStatus {
        self.delivery_status
    }

    pub fn pod_ref(&self) -> Option<&str> {
        self.pod_ref.as_deref()
    }

    pub fn status(&self) -> VerificationStatus {
        self.status
    }

    pub fn exception_reason(&self) -> Option<&str> {
        self.exception_reason.as_deref()
    }

    pub fn admin_override(&self) -> Option<&AdminOverride> {
        self.admin_override.as_ref()
    }

    /// Verified, backed by a POD, the seller's auto-approve policy, or an admin override.
    pub fn payment_eligible(&self) -> bool {
        self.status == VerificationStatus::Verified
            && (self.pod_ref.is_some() || self.auto_approved || self.admin_override.is_some())
    }
}

impl AggregateRoot for DeliveryVerification {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDelivery {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub buyer_id: BuyerId,
    pub account_id: CreditAccountId,
    pub reservation_id: ReservationId,
    pub amount: Money,
    /// Seller policy: treat a delivered status as sufficient without POD.
    pub auto_approve_pod: bool,
    pub occurred_at: DateTime<Utc>,
}

/// At-least-once status feed from logistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDeliveryStatus {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub delivery_status: DeliveryStatus,
    pub pod_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyDelivery {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub pod_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaiseException {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveException {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub resolved_by: UserId,
    pub resolution: ExceptionResolution,
    pub occurred_at: DateTime<Utc>,
}

/// The credit hold behind the order ended outside the gate (released or
/// expired); an unresolved gate is rejected so it can never verify later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseDelivery {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryVerificationCommand {
    RegisterDelivery(RegisterDelivery),
    RecordDeliveryStatus(RecordDeliveryStatus),
    VerifyDelivery(VerifyDelivery),
    RaiseException(RaiseException),
    ResolveException(ResolveException),
    CloseDelivery(CloseDelivery),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRegistered {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub buyer_id: BuyerId,
    pub account_id: CreditAccountId,
    pub reservation_id: ReservationId,
    pub amount: Money,
    pub auto_approve_pod: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatusRecorded {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub delivery_status: DeliveryStatus,
    pub pod_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// The order became payment-eligible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryVerified {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub buyer_id: BuyerId,
    pub account_id: CreditAccountId,
    pub reservation_id: ReservationId,
    pub amount: Money,
    pub pod_ref: Option<String>,
    pub auto_approved: bool,
    pub admin_override: Option<AdminOverride>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRejected {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub account_id: CreditAccountId,
    pub reservation_id: ReservationId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryExceptionRaised {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryVerificationEvent {
    DeliveryRegistered(DeliveryRegistered),
    DeliveryStatusRecorded(DeliveryStatusRecorded),
    DeliveryVerified(DeliveryVerified),
    DeliveryRejected(DeliveryRejected),
    DeliveryExceptionRaised(DeliveryExceptionRaised),
}

impl Event for DeliveryVerificationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DeliveryVerificationEvent::DeliveryRegistered(_) => "delivery.verification.registered",
            DeliveryVerificationEvent::DeliveryStatusRecorded(_) => "delivery.verification.status_recorded",
            DeliveryVerificationEvent::DeliveryVerified(_) => "delivery.verification.verified",
            DeliveryVerificationEvent::DeliveryRejected(_) => "delivery.verification.rejected",
            DeliveryVerificationEvent::DeliveryExceptionRaised(_) => "delivery.verification.exception_raised",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DeliveryVerificationEvent::DeliveryRegistered(e) => e.occurred_at,
            DeliveryVerificationEvent::DeliveryStatusRecorded(e) => e.occurred_at,
            DeliveryVerificationEvent::DeliveryVerified(e) => e.occurred_at,
            DeliveryVerificationEvent::DeliveryRejected(e) => e.occurred_at,
            DeliveryVerificationEvent::DeliveryExceptionRaised(e) => e.occurred_at,
        }
    }
}

impl Aggregate for DeliveryVerification {
    type Command = DeliveryVerificationCommand;
    type Event = DeliveryVerificationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DeliveryVerificationEvent::DeliveryRegistered(e) => {
                self.id = e.order_id.delivery_stream();
                self.tenant_id = Some(e.tenant_id);
                self.order_id = Some(e.order_id);
                self.seller_id = Some(e.seller_id);
                self.buyer_id = Some(e.buyer_id);
                self.account_id = Some(e.account_id);
                self.reservation_id = Some(e.reservation_id);
                self.amount = e.amount;
                self.auto_approve_pod = e.auto_approve_pod;
                self.created = true;
            }
            DeliveryVerificationEvent::DeliveryStatusRecorded(e) => {
                self.delivery_status = e.delivery_status;
                if e.pod_ref.is_some() {
                    self.pod_ref = e.pod_ref.clone();
                }
            }
            DeliveryVerificationEvent::DeliveryVerified(e) => {
                self.status = VerificationStatus::Verified;
                if e.pod_ref.is_some() {
                    self.pod_ref = e.pod_ref.clone();
                }
                self.auto_approved = e.auto_approved;
                self.admin_override = e.admin_override.clone();
            }
            DeliveryVerificationEvent::DeliveryRejected(_) => {
                self.status = VerificationStatus::Rejected;
            }
            DeliveryVerificationEvent::DeliveryExceptionRaised(e) => {
                self.status = VerificationStatus::Exception;
                self.exception_reason = Some(e.reason.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DeliveryVerificationCommand::RegisterDelivery(cmd) => self.handle_register(cmd),
            DeliveryVerificationCommand::RecordDeliveryStatus(cmd) => self.handle_status(cmd),
            DeliveryVerificationCommand::VerifyDelivery(cmd) => self.handle_verify(cmd),
            DeliveryVerificationCommand::RaiseException(cmd) => self.handle_raise(cmd),
            DeliveryVerificationCommand::ResolveException(cmd) => self.handle_resolve(cmd),
            DeliveryVerificationCommand::CloseDelivery(cmd) => self.handle_close(cmd),
        }
    }
}

/// Registration fields, present once `created`.
struct Registered {
    seller_id: SellerId,
    buyer_id: BuyerId,
    account_id: CreditAccountId,
    reservation_id: ReservationId,
}

impl DeliveryVerification {
    fn ensure_order(&self, tenant_id: TenantId, order_id: OrderId) -> Result<Registered, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.order_id != Some(order_id) {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        match (self.seller_id, self.buyer_id, self.account_id, self.reservation_id) {
            (Some(seller_id), Some(buyer_id), Some(account_id), Some(reservation_id)) => Ok(Registered {
                seller_id,
                buyer_id,
                account_id,
                reservation_id,
            }),
            _ => Err(DomainError::invariant("delivery registration incomplete")),
        }
    }

    fn rejected(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        reg: &Registered,
        reason: String,
        at: DateTime<Utc>,
    ) -> DeliveryVerificationEvent {
        DeliveryVerificationEvent::DeliveryRejected(DeliveryRejected {
            tenant_id,
            order_id,
            account_id: reg.account_id,
            reservation_id: reg.reservation_id,
            reason,
            occurred_at: at,
        })
    }

    fn handle_register(&self, cmd: &RegisterDelivery) -> Result<Vec<DeliveryVerificationEvent>, DomainError> {
        if self.created {
            if self.order_id == Some(cmd.order_id) && self.reservation_id == Some(cmd.reservation_id) {
                return Ok(vec![]);
            }
            return Err(DomainError::conflict("delivery already registered for order"));
        }
        if cmd.amount.is_zero() {
            return Err(DomainError::validation("order amount must be positive"));
        }
        Ok(vec![DeliveryVerificationEvent::DeliveryRegistered(DeliveryRegistered {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            seller_id: cmd.seller_id,
            buyer_id: cmd.buyer_id,
            account_id: cmd.account_id,
            reservation_id: cmd.reservation_id,
            amount: cmd.amount,
            auto_approve_pod: cmd.auto_approve_pod,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_status(&self, cmd: &RecordDeliveryStatus) -> Result<Vec<DeliveryVerificationEvent>, DomainError> {
        let reg = self.ensure_order(cmd.tenant_id, cmd.order_id)?;
        if self.status.is_resolved() {
            return Ok(vec![]);
        }
        let pod_unchanged = cmd.pod_ref.is_none() || cmd.pod_ref == self.pod_ref;
        if cmd.delivery_status == self.delivery_status && pod_unchanged {
            return Ok(vec![]);
        }

        let mut events = vec![DeliveryVerificationEvent::DeliveryStatusRecorded(DeliveryStatusRecorded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            delivery_status: cmd.delivery_status,
            pod_ref: cmd.pod_ref.clone(),
            occurred_at: cmd.occurred_at,
        })];

        if cmd.delivery_status.is_failed() {
            events.push(self.rejected(
                cmd.tenant_id,
                cmd.order_id,
                &reg,
                format!("order {:?} before delivery", cmd.delivery_status).to_lowercase(),
                cmd.occurred_at,
            ));
        }
        Ok(events)
    }

    fn handle_verify(&self, cmd: &VerifyDelivery) -> Result<Vec<DeliveryVerificationEvent>, DomainError> {
        let reg = self.ensure_order(cmd.tenant_id, cmd.order_id)?;

        match self.status {
            VerificationStatus::Verified | VerificationStatus::Rejected => return Ok(vec![]),
            VerificationStatus::Exception => {
                return Err(DomainError::rejected(
                    RejectionCode::VerificationException,
                    cmd.order_id,
                ));
            }
            VerificationStatus::Pending => {}
        }

        if self.delivery_status.is_failed() {
            return Ok(vec![self.rejected(
                cmd.tenant_id,
                cmd.order_id,
                &reg,
                "delivery failed".to_string(),
                cmd.occurred_at,
            )]);
        }
        if self.delivery_status != DeliveryStatus::Delivered {
            return Err(DomainError::rejected(RejectionCode::InvalidState, cmd.order_id));
        }

        let pod_ref = cmd
            .pod_ref
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.pod_ref.clone());

        if pod_ref.is_none() && !self.auto_approve_pod {
            return Ok(vec![DeliveryVerificationEvent::DeliveryExceptionRaised(
                DeliveryExceptionRaised {
                    tenant_id: cmd.tenant_id,
                    order_id: cmd.order_id,
                    reason: "proof of delivery missing".to_string(),
                    occurred_at: cmd.occurred_at,
                },
            )]);
        }

        Ok(vec![DeliveryVerificationEvent::DeliveryVerified(DeliveryVerified {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            seller_id: reg.seller_id,
            buyer_id: reg.buyer_id,
            account_id: reg.account_id,
            reservation_id: reg.reservation_id,
            amount: self.amount,
            auto_approved: pod_ref.is_none(),
            pod_ref,
            admin_override: None,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_raise(&self, cmd: &RaiseException) -> Result<Vec<DeliveryVerificationEvent>, DomainError> {
        self.ensure_order(cmd.tenant_id, cmd.order_id)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("exception reason is required"));
        }
        if self.status != VerificationStatus::Pending {
            return Ok(vec![]);
        }
        Ok(vec![DeliveryVerificationEvent::DeliveryExceptionRaised(DeliveryExceptionRaised {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resolve(&self, cmd: &ResolveException) -> Result<Vec<DeliveryVerificationEvent>, DomainError> {
        let reg = self.ensure_order(cmd.tenant_id, cmd.order_id)?;
        match self.status {
            VerificationStatus::Exception => {}
            VerificationStatus::Verified | VerificationStatus::Rejected => return Ok(vec![]),
            VerificationStatus::Pending => {
                return Err(DomainError::rejected(RejectionCode::InvalidState, cmd.order_id));
            }
        }

        let event = match &cmd.resolution {
            ExceptionResolution::Verify { note } => {
                if note.trim().is_empty() {
                    return Err(DomainError::validation("override note is required"));
                }
                DeliveryVerificationEvent::DeliveryVerified(DeliveryVerified {
                    tenant_id: cmd.tenant_id,
                    order_id: cmd.order_id,
                    seller_id: reg.seller_id,
                    buyer_id: reg.buyer_id,
                    account_id: reg.account_id,
                    reservation_id: reg.reservation_id,
                    amount: self.amount,
                    pod_ref: self.pod_ref.clone(),
                    auto_approved: false,
                    admin_override: Some(AdminOverride {
                        by: cmd.resolved_by,
                        note: note.clone(),
                    }),
                    occurred_at: cmd.occurred_at,
                })
            }
            ExceptionResolution::Reject { reason } => {
                self.rejected(cmd.tenant_id, cmd.order_id, &reg, reason.clone(), cmd.occurred_at)
            }
        };
        Ok(vec![event])
    }

    fn handle_close(&self, cmd: &CloseDelivery) -> Result<Vec<DeliveryVerificationEvent>, DomainError> {
        let reg = self.ensure_order(cmd.tenant_id, cmd.order_id)?;
        if self.status.is_resolved() {
            return Ok(vec![]);
        }
        Ok(vec![self.rejected(cmd.tenant_id, cmd.order_id, &reg, cmd.reason.clone(), cmd.occurred_at)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    struct Fixture {
        gate: DeliveryVerification,
        tenant_id: TenantId,
        order_id: OrderId,
    }

    impl Fixture {
        fn new(auto_approve_pod: bool) -> Self {
            let tenant_id = TenantId::new();
            let order_id = OrderId::new();
            let mut f = Self {
                gate: DeliveryVerification::for_order(order_id),
                tenant_id,
                order_id,
            };
            f.run(DeliveryVerificationCommand::RegisterDelivery(RegisterDelivery {
                tenant_id,
                order_id,
                seller_id: SellerId::new(),
                buyer_id: BuyerId::new(),
                account_id: CreditAccountId::generate(),
                reservation_id: ReservationId::new(),
                amount: Money::new(12_500),
                auto_approve_pod,
                occurred_at: now(),
            }))
            .unwrap();
            f
        }

        fn run(&mut self, cmd: DeliveryVerificationCommand) -> Result<Vec<DeliveryVerificationEvent>, DomainError> {
            self.gate.execute(&cmd)
        }

        fn status(&mut self, status: DeliveryStatus, pod: Option<&str>) -> Vec<DeliveryVerificationEvent> {
            self.run(DeliveryVerificationCommand::RecordDeliveryStatus(RecordDeliveryStatus {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                delivery_status: status,
                pod_ref: pod.map(str::to_string),
                occurred_at: now(),
            }))
            .unwrap()
        }

        fn verify(&mut self, pod: Option<&str>) -> Result<Vec<DeliveryVerificationEvent>, DomainError> {
            self.run(DeliveryVerificationCommand::VerifyDelivery(VerifyDelivery {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                pod_ref: pod.map(str::to_string),
                occurred_at: now(),
            }))
        }
    }

    #[test]
    fn delivered_with_pod_becomes_payment_eligible() {
        let mut f = Fixture::new(false);
        f.status(DeliveryStatus::Delivered, None);
        let events = f.verify(Some("pod-001")).unwrap();

        assert!(matches!(events[0], DeliveryVerificationEvent::DeliveryVerified(_)));
        assert_eq!(f.gate.status(), VerificationStatus::Verified);
        assert!(f.gate.payment_eligible());
        assert_eq!(f.gate.pod_ref(), Some("pod-001"));
    }

    #[test]
    fn missing_pod_without_auto_approve_goes_to_exception() {
        let mut f = Fixture::new(false);
        f.status(DeliveryStatus::Delivered, None);
        f.verify(None).unwrap();

        assert_eq!(f.gate.status(), VerificationStatus::Exception);
        assert!(!f.gate.payment_eligible());

        let err = f.verify(None).unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::VerificationException));
    }

    #[test]
    fn auto_approve_policy_verifies_without_pod() {
        let mut f = Fixture::new(true);
        f.status(DeliveryStatus::Delivered, None);
        f.verify(None).unwrap();
        assert!(f.gate.payment_eligible());
    }

    #[test]
    fn verify_before_delivery_keeps_gate_pending() {
        let mut f = Fixture::new(false);
        f.status(DeliveryStatus::InTransit, None);
        let err = f.verify(Some("pod")).unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::InvalidState));
        assert_eq!(f.gate.status(), VerificationStatus::Pending);
    }

    #[test]
    fn cancellation_rejects_the_gate() {
        let mut f = Fixture::new(false);
        let events = f.status(DeliveryStatus::Cancelled, None);
        assert_eq!(events.len(), 2);
        assert_eq!(f.gate.status(), VerificationStatus::Rejected);
    }

    #[test]
    fn closed_gate_never_verifies_later() {
        let mut f = Fixture::new(false);
        let close = DeliveryVerificationCommand::CloseDelivery(CloseDelivery {
            tenant_id: f.tenant_id,
            order_id: f.order_id,
            reason: "credit hold released".to_string(),
            occurred_at: now(),
        });
        let events = f.run(close.clone()).unwrap();
        assert!(matches!(events[0], DeliveryVerificationEvent::DeliveryRejected(_)));
        assert!(f.run(close).unwrap().is_empty());

        assert!(f.status(DeliveryStatus::Delivered, Some("pod-1")).is_empty());
        assert!(f.verify(Some("pod-1")).unwrap().is_empty());
        assert_eq!(f.gate.status(), VerificationStatus::Rejected);
        assert!(!f.gate.payment_eligible());
    }

    #[test]
    fn reprocessing_after_resolution_is_a_no_op() {
        let mut f = Fixture::new(false);
        f.status(DeliveryStatus::Delivered, Some("pod-9"));
        f.verify(None).unwrap();
        let version = f.gate.version();

        assert!(f.verify(Some("pod-9")).unwrap().is_empty());
        assert!(f.status(DeliveryStatus::Returned, None).is_empty());
        assert_eq!(f.gate.version(), version);
        assert_eq!(f.gate.status(), VerificationStatus::Verified);
    }

    #[test]
    fn admin_override_resolves_exception_to_verified() {
        let mut f = Fixture::new(false);
        f.status(DeliveryStatus::Delivered, None);
        f.verify(None).unwrap();

        let admin = UserId::new();
        f.run(DeliveryVerificationCommand::ResolveException(ResolveException {
            tenant_id: f.tenant_id,
            order_id: f.order_id,
            resolved_by: admin,
            resolution: ExceptionResolution::Verify {
                note: "buyer confirmed receipt by phone".to_string(),
            },
            occurred_at: now(),
        }))
        .unwrap();

        assert!(f.gate.payment_eligible());
        assert_eq!(f.gate.admin_override().map(|o| o.by), Some(admin));
    }

    #[test]
    fn resolving_pending_gate_is_invalid() {
        let mut f = Fixture::new(false);
        let err = f
            .run(DeliveryVerificationCommand::ResolveException(ResolveException {
                tenant_id: f.tenant_id,
                order_id: f.order_id,
                resolved_by: UserId::new(),
                resolution: ExceptionResolution::Reject {
                    reason: "damaged".to_string(),
                },
                occurred_at: now(),
            }))
            .unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::InvalidState));
    }
}
