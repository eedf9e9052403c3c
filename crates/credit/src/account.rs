use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use osas_core::{
    Aggregate, AggregateRoot, BuyerId, BuyerKind, CreditAccountId, DomainError, LedgerReference,
    Money, ObligationId, OrderId, RejectionCode, ReservationId, SellerId, TenantId, UserId,
};
use osas_events::Event;
use osas_risk::RiskLevel;

use crate::reservation::{Reservation, ReservationState};

/// Who signed off a limit change. Automated decisions may only decrease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum Approver {
    User(UserId),
    System,
}

/// Aggregate root: CreditAccount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditAccount {
    id: CreditAccountId,
    tenant_id: Option<TenantId>,
    owner: Option<BuyerId>,
    buyer_kind: BuyerKind,
    credit_limit: Money,
    /// Committed, unrepaid drawings.
    credit_used: Money,
    /// Sum of `Reserved` holds.
    held: Money,
    frozen_reason: Option<String>,
    risk_level: RiskLevel,
    risk_score: u8,
    utilization_peak_bps: u32,
    reservations: BTreeMap<ReservationId, Reservation>,
    restorations: BTreeSet<Uuid>,
    version: u64,
    created: bool,
}

impl CreditAccount {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CreditAccountId) -> Self {
        Self {
            id,
            tenant_id: None,
            owner: None,
            buyer_kind: BuyerKind::Retailer,
            credit_limit: Money::ZERO,
            credit_used: Money::ZERO,
            held: Money::ZERO,
            frozen_reason: None,
            risk_level: RiskLevel::Low,
            risk_score: 0,
            utilization_peak_bps: 0,
            reservations: BTreeMap::new(),
            restorations: BTreeSet::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CreditAccountId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn owner(&self) -> Option<BuyerId> {
        self.owner
    }

    pub fn buyer_kind(&self) -> BuyerKind {
        self.buyer_kind
    }

    pub fn credit_limit(&self) -> Money {
        self.credit_limit
    }

    pub fn credit_used(&self) -> Money {
        self.credit_used
    }

    pub fn held(&self) -> Money {
        self.held
    }

    /// `limit − used − held`, never negative.
    pub fn credit_available(&self) -> Money {
        self.credit_limit
            .saturating_sub(self.credit_used.saturating_add(self.held))
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_reason.is_some()
    }

    pub fn frozen_reason(&self) -> Option<&str> {
        self.frozen_reason.as_deref()
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn risk_score(&self) -> u8 {
        self.risk_score
    }

    pub fn utilization_peak_bps(&self) -> u32 {
        self.utilization_peak_bps
    }

    pub fn reservation(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.get(&id)
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    fn utilization_bps(&self) -> u32 {
        if self.credit_limit.is_zero() {
            return 0;
        }
        let exposure = u128::from(self.credit_used.saturating_add(self.held).minor());
        let bps = exposure * 10_000 / u128::from(self.credit_limit.minor());
        u32::try_from(bps).unwrap_or(u32::MAX)
    }
}

impl AggregateRoot for CreditAccount {
    type Id = CreditAccountId;

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
pub struct OpenAccount {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub owner: BuyerId,
    pub buyer_kind: BuyerKind,
    pub credit_limit: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveCredit {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Converts a hold into a drawing; the obligation id is chosen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReservation {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub reservation_id: ReservationId,
    pub obligation_id: ObligationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReservation {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub reservation_id: ReservationId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireReservations {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub ttl_secs: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Returns drawn credit after a repayment or write-off.
///
/// `restoration_id` makes the command idempotent across redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreCredit {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub restoration_id: Uuid,
    pub amount: Money,
    pub reference: LedgerReference,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeAccount {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnfreezeAccount {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustLimit {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub new_limit: Money,
    pub reason: String,
    pub approver: Approver,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRiskLevel {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub risk_level: RiskLevel,
    pub risk_score: u8,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditAccountCommand {
    OpenAccount(OpenAccount),
    ReserveCredit(ReserveCredit),
    CommitReservation(CommitReservation),
    ReleaseReservation(ReleaseReservation),
    ExpireReservations(ExpireReservations),
    RestoreCredit(RestoreCredit),
    FreezeAccount(FreezeAccount),
    UnfreezeAccount(UnfreezeAccount),
    AdjustLimit(AdjustLimit),
    UpdateRiskLevel(UpdateRiskLevel),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub owner: BuyerId,
    pub buyer_kind: BuyerKind,
    pub credit_limit: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditReserved {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub amount: Money,
    pub available_after: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCommitted {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub obligation_id: ObligationId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReleased {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub reservation_id: ReservationId,
    pub amount: Money,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationExpired {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub reservation_id: ReservationId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRestored {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub restoration_id: Uuid,
    pub amount: Money,
    pub reference: LedgerReference,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFrozen {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUnfrozen {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitAdjusted {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub previous_limit: Money,
    pub new_limit: Money,
    pub reason: String,
    pub approver: Approver,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskLevelUpdated {
    pub tenant_id: TenantId,
    pub account_id: CreditAccountId,
    pub risk_level: RiskLevel,
    pub risk_score: u8,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditAccountEvent {
    AccountOpened(AccountOpened),
    CreditReserved(CreditReserved),
    ReservationCommitted(ReservationCommitted),
    ReservationReleased(ReservationReleased),
    ReservationExpired(ReservationExpired),
    CreditRestored(CreditRestored),
    AccountFrozen(AccountFrozen),
    AccountUnfrozen(AccountUnfrozen),
    LimitAdjusted(LimitAdjusted),
    RiskLevelUpdated(RiskLevelUpdated),
}

impl CreditAccountEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            CreditAccountEvent::AccountOpened(e) => e.tenant_id,
            CreditAccountEvent::CreditReserved(e) => e.tenant_id,
            CreditAccountEvent::ReservationCommitted(e) => e.tenant_id,
            CreditAccountEvent::ReservationReleased(e) => e.tenant_id,
            CreditAccountEvent::ReservationExpired(e) => e.tenant_id,
            CreditAccountEvent::CreditRestored(e) => e.tenant_id,
            CreditAccountEvent::AccountFrozen(e) => e.tenant_id,
            CreditAccountEvent::AccountUnfrozen(e) => e.tenant_id,
            CreditAccountEvent::LimitAdjusted(e) => e.tenant_id,
            CreditAccountEvent::RiskLevelUpdated(e) => e.tenant_id,
        }
    }

    pub fn account_id(&self) -> CreditAccountId {
        match self {
            CreditAccountEvent::AccountOpened(e) => e.account_id,
            CreditAccountEvent::CreditReserved(e) => e.account_id,
            CreditAccountEvent::ReservationCommitted(e) => e.account_id,
            CreditAccountEvent::ReservationReleased(e) => e.account_id,
            CreditAccountEvent::ReservationExpired(e) => e.account_id,
            CreditAccountEvent::CreditRestored(e) => e.account_id,
            CreditAccountEvent::AccountFrozen(e) => e.account_id,
            CreditAccountEvent::AccountUnfrozen(e) => e.account_id,
            CreditAccountEvent::LimitAdjusted(e) => e.account_id,
            CreditAccountEvent::RiskLevelUpdated(e) => e.account_id,
        }
    }
}

impl Event for CreditAccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CreditAccountEvent::AccountOpened(_) => "credit.account.opened",
            CreditAccountEvent::CreditReserved(_) => "credit.account.reserved",
            CreditAccountEvent::ReservationCommitted(_) => "credit.account.reservation_committed",
            CreditAccountEvent::ReservationReleased(_) => "credit.account.reservation_released",
            CreditAccountEvent::ReservationExpired(_) => "credit.account.reservation_expired",
            CreditAccountEvent::CreditRestored(_) => "credit.account.restored",
            CreditAccountEvent::AccountFrozen(_) => "credit.account.frozen",
            CreditAccountEvent::AccountUnfrozen(_) => "credit.account.unfrozen",
            CreditAccountEvent::LimitAdjusted(_) => "credit.account.limit_adjusted",
            CreditAccountEvent::RiskLevelUpdated(_) => "credit.account.risk_level_updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CreditAccountEvent::AccountOpened(e) => e.occurred_at,
            CreditAccountEvent::CreditReserved(e) => e.occurred_at,
            CreditAccountEvent::ReservationCommitted(e) => e.occurred_at,
            CreditAccountEvent::ReservationReleased(e) => e.occurred_at,
            CreditAccountEvent::ReservationExpired(e) => e.occurred_at,
            CreditAccountEvent::CreditRestored(e) => e.occurred_at,
            CreditAccountEvent::AccountFrozen(e) => e.occurred_at,
            CreditAccountEvent::AccountUnfrozen(e) => e.occurred_at,
            CreditAccountEvent::LimitAdjusted(e) => e.occurred_at,
            CreditAccountEvent::RiskLevelUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CreditAccount {
    type Command = CreditAccountCommand;
    type Event = CreditAccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CreditAccountEvent::AccountOpened(e) => {
                self.id = e.account_id;
                self.tenant_id = Some(e.tenant_id);
                self.owner = Some(e.owner);
                self.buyer_kind = e.buyer_kind;
                self.credit_limit = e.credit_limit;
                self.created = true;
            }
            CreditAccountEvent::CreditReserved(e) => {
                self.held = self.held.saturating_add(e.amount);
                self.reservations.insert(
                    e.reservation_id,
                    Reservation {
                        reservation_id: e.reservation_id,
                        order_id: e.order_id,
                        seller_id: e.seller_id,
                        amount: e.amount,
                        state: ReservationState::Reserved,
                        reserved_at: e.occurred_at,
                        obligation_id: None,
                    },
                );
                self.utilization_peak_bps = self.utilization_peak_bps.max(self.utilization_bps());
            }
            CreditAccountEvent::ReservationCommitted(e) => {
                if let Some(r) = self.reservations.get_mut(&e.reservation_id) {
                    r.state = ReservationState::Committed;
                    r.obligation_id = Some(e.obligation_id);
                }
                self.held = self.held.saturating_sub(e.amount);
                self.credit_used = self.credit_used.saturating_add(e.amount);
            }
            CreditAccountEvent::ReservationReleased(e) => {
                if let Some(r) = self.reservations.get_mut(&e.reservation_id) {
                    r.state = ReservationState::Released;
                }
                self.held = self.held.saturating_sub(e.amount);
            }
            CreditAccountEvent::ReservationExpired(e) => {
                if let Some(r) = self.reservations.get_mut(&e.reservation_id) {
                    r.state = ReservationState::Expired;
                }
                self.held = self.held.saturating_sub(e.amount);
            }
            CreditAccountEvent::CreditRestored(e) => {
                self.credit_used = self.credit_used.saturating_sub(e.amount);
                self.restorations.insert(e.restoration_id);
            }
            CreditAccountEvent::AccountFrozen(e) => {
                self.frozen_reason = Some(e.reason.clone());
            }
            CreditAccountEvent::AccountUnfrozen(_) => {
                self.frozen_reason = None;
            }
            CreditAccountEvent::LimitAdjusted(e) => {
                self.credit_limit = e.new_limit;
            }
            CreditAccountEvent::RiskLevelUpdated(e) => {
                self.risk_level = e.risk_level;
                self.risk_score = e.risk_score;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CreditAccountCommand::OpenAccount(cmd) => self.handle_open(cmd),
            CreditAccountCommand::ReserveCredit(cmd) => self.handle_reserve(cmd),
            CreditAccountCommand::CommitReservation(cmd) => self.handle_commit(cmd),
            CreditAccountCommand::ReleaseReservation(cmd) => self.handle_release(cmd),
            CreditAccountCommand::ExpireReservations(cmd) => self.handle_expire(cmd),
            CreditAccountCommand::RestoreCredit(cmd) => self.handle_restore(cmd),
            CreditAccountCommand::FreezeAccount(cmd) => self.handle_freeze(cmd),
            CreditAccountCommand::UnfreezeAccount(cmd) => self.handle_unfreeze(cmd),
            CreditAccountCommand::AdjustLimit(cmd) => self.handle_adjust_limit(cmd),
            CreditAccountCommand::UpdateRiskLevel(cmd) => self.handle_update_risk(cmd),
        }
    }
}

impl CreditAccount {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_account(&self, tenant_id: TenantId, account_id: CreditAccountId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        if self.id != account_id {
            return Err(DomainError::invariant("account_id mismatch"));
        }
        Ok(())
    }

    fn reservation_or_not_found(&self, id: ReservationId) -> Result<&Reservation, DomainError> {
        self.reservations.get(&id).ok_or_else(DomainError::not_found)
    }

    fn handle_open(&self, cmd: &OpenAccount) -> Result<Vec<CreditAccountEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("credit account already exists"));
        }
        Ok(vec![CreditAccountEvent::AccountOpened(AccountOpened {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            owner: cmd.owner,
            buyer_kind: cmd.buyer_kind,
            credit_limit: cmd.credit_limit,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveCredit) -> Result<Vec<CreditAccountEvent>, DomainError> {
        self.ensure_account(cmd.tenant_id, cmd.account_id)?;

        if cmd.amount.is_zero() {
            return Err(DomainError::validation("reservation amount must be positive"));
        }
        if self.reservations.contains_key(&cmd.reservation_id) {
            return Err(DomainError::conflict("reservation already exists"));
        }
        if self.is_frozen() {
            return Err(DomainError::rejected(RejectionCode::AccountFrozen, self.id));
        }
        if cmd.amount > self.credit_available() {
            return Err(DomainError::rejected(RejectionCode::InsufficientCredit, self.id));
        }

        let available_after = self.credit_available().checked_sub(cmd.amount)?;
        Ok(vec![CreditAccountEvent::CreditReserved(CreditReserved {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            reservation_id: cmd.reservation_id,
            order_id: cmd.order_id,
            seller_id: cmd.seller_id,
            amount: cmd.amount,
            available_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_commit(&self, cmd: &CommitReservation) -> Result<Vec<CreditAccountEvent>, DomainError> {
        self.ensure_account(cmd.tenant_id, cmd.account_id)?;
        let r = self.reservation_or_not_found(cmd.reservation_id)?;

        match r.state {
            ReservationState::Reserved => {}
            ReservationState::Committed => {
                return Err(DomainError::rejected(
                    RejectionCode::AlreadyCommitted,
                    cmd.reservation_id,
                ));
            }
            ReservationState::Released | ReservationState::Expired => {
                return Err(DomainError::rejected(
                    RejectionCode::AlreadyReleased,
                    cmd.reservation_id,
                ));
            }
        }

        Ok(vec![CreditAccountEvent::ReservationCommitted(ReservationCommitted {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            reservation_id: cmd.reservation_id,
            order_id: r.order_id,
            seller_id: r.seller_id,
            obligation_id: cmd.obligation_id,
            amount: r.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseReservation) -> Result<Vec<CreditAccountEvent>, DomainError> {
        self.ensure_account(cmd.tenant_id, cmd.account_id)?;
        let r = self.reservation_or_not_found(cmd.reservation_id)?;

        match r.state {
            ReservationState::Reserved => {}
            ReservationState::Released | ReservationState::Expired => {
                return Err(DomainError::rejected(
                    RejectionCode::AlreadyReleased,
                    cmd.reservation_id,
                ));
            }
            ReservationState::Committed => {
                return Err(DomainError::rejected(
                    RejectionCode::AlreadyCommitted,
                    cmd.reservation_id,
                ));
            }
        }

        Ok(vec![CreditAccountEvent::ReservationReleased(ReservationReleased {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            reservation_id: cmd.reservation_id,
            amount: r.amount,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(&self, cmd: &ExpireReservations) -> Result<Vec<CreditAccountEvent>, DomainError> {
        self.ensure_account(cmd.tenant_id, cmd.account_id)?;
        if cmd.ttl_secs <= 0 {
            return Err(DomainError::validation("reservation ttl must be positive"));
        }
        let ttl = chrono::Duration::seconds(cmd.ttl_secs);

        Ok(self
            .reservations
            .values()
            .filter(|r| r.is_stale(cmd.occurred_at, ttl))
            .map(|r| {
                CreditAccountEvent::ReservationExpired(ReservationExpired {
                    tenant_id: cmd.tenant_id,
                    account_id: cmd.account_id,
                    reservation_id: r.reservation_id,
                    amount: r.amount,
                    occurred_at: cmd.occurred_at,
                })
            })
            .collect())
    }

    fn handle_restore(&self, cmd: &RestoreCredit) -> Result<Vec<CreditAccountEvent>, DomainError> {
        self.ensure_account(cmd.tenant_id, cmd.account_id)?;
        if self.restorations.contains(&cmd.restoration_id) {
            return Ok(vec![]);
        }
        if cmd.amount.is_zero() {
            return Err(DomainError::validation("restored amount must be positive"));
        }
        if cmd.amount > self.credit_used {
            return Err(DomainError::invariant("cannot restore more credit than is drawn"));
        }

        Ok(vec![CreditAccountEvent::CreditRestored(CreditRestored {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            restoration_id: cmd.restoration_id,
            amount: cmd.amount,
            reference: cmd.reference,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_freeze(&self, cmd: &FreezeAccount) -> Result<Vec<CreditAccountEvent>, DomainError> {
        self.ensure_account(cmd.tenant_id, cmd.account_id)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("freeze reason is required"));
        }
        if self.frozen_reason.as_deref() == Some(cmd.reason.as_str()) {
            return Ok(vec![]);
        }
        Ok(vec![CreditAccountEvent::AccountFrozen(AccountFrozen {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_unfreeze(&self, cmd: &UnfreezeAccount) -> Result<Vec<CreditAccountEvent>, DomainError> {
        self.ensure_account(cmd.tenant_id, cmd.account_id)?;
        if !self.is_frozen() {
            return Ok(vec![]);
        }
        Ok(vec![CreditAccountEvent::AccountUnfrozen(AccountUnfrozen {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust_limit(&self, cmd: &AdjustLimit) -> Result<Vec<CreditAccountEvent>, DomainError> {
        self.ensure_account(cmd.tenant_id, cmd.account_id)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("limit change reason is required"));
        }

        let exposure = self.credit_used.saturating_add(self.held);
        let new_limit = match cmd.approver {
            Approver::System => {
                if cmd.new_limit > self.credit_limit {
                    return Err(DomainError::rejected(
                        RejectionCode::LimitIncreaseRequiresApproval,
                        self.id,
                    ));
                }
                // Automated decreases stop at current exposure.
                cmd.new_limit.max(exposure)
            }
            Approver::User(_) => {
                if cmd.new_limit < exposure {
                    return Err(DomainError::validation(
                        "new limit is below current exposure (used + held)",
                    ));
                }
                cmd.new_limit
            }
        };

        if new_limit == self.credit_limit {
            return Ok(vec![]);
        }

        Ok(vec![CreditAccountEvent::LimitAdjusted(LimitAdjusted {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            previous_limit: self.credit_limit,
            new_limit,
            reason: cmd.reason.clone(),
            approver: cmd.approver,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_risk(&self, cmd: &UpdateRiskLevel) -> Result<Vec<CreditAccountEvent>, DomainError> {
        self.ensure_account(cmd.tenant_id, cmd.account_id)?;
        if cmd.risk_score > 100 {
            return Err(DomainError::validation("risk score must be within 0..=100"));
        }
        if self.risk_level == cmd.risk_level && self.risk_score == cmd.risk_score {
            return Ok(vec![]);
        }
        Ok(vec![CreditAccountEvent::RiskLevelUpdated(RiskLevelUpdated {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            risk_level: cmd.risk_level,
            risk_score: cmd.risk_score,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osas_core::AggregateId;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn run(account: &mut CreditAccount, cmd: CreditAccountCommand) -> Result<Vec<CreditAccountEvent>, DomainError> {
        account.execute(&cmd)
    }

    fn open(limit: u64) -> (CreditAccount, TenantId) {
        let tenant_id = TenantId::new();
        let account_id = CreditAccountId::new(AggregateId::new());
        let mut account = CreditAccount::empty(account_id);
        run(
            &mut account,
            CreditAccountCommand::OpenAccount(OpenAccount {
                tenant_id,
                account_id,
                owner: BuyerId::new(),
                buyer_kind: BuyerKind::Designer,
                credit_limit: Money::new(limit),
                occurred_at: now(),
            }),
        )
        .unwrap();
        (account, tenant_id)
    }

    fn reserve_cmd(account: &CreditAccount, tenant_id: TenantId, amount: u64) -> (ReservationId, CreditAccountCommand) {
        let reservation_id = ReservationId::new();
        (
            reservation_id,
            CreditAccountCommand::ReserveCredit(ReserveCredit {
                tenant_id,
                account_id: account.id_typed(),
                reservation_id,
                order_id: OrderId::new(),
                seller_id: SellerId::new(),
                amount: Money::new(amount),
                occurred_at: now(),
            }),
        )
    }

    fn release_cmd(account: &CreditAccount, tenant_id: TenantId, reservation_id: ReservationId) -> CreditAccountCommand {
        CreditAccountCommand::ReleaseReservation(ReleaseReservation {
            tenant_id,
            account_id: account.id_typed(),
            reservation_id,
            reason: "order cancelled".to_string(),
            occurred_at: now(),
        })
    }

    fn commit_cmd(account: &CreditAccount, tenant_id: TenantId, reservation_id: ReservationId) -> CreditAccountCommand {
        CreditAccountCommand::CommitReservation(CommitReservation {
            tenant_id,
            account_id: account.id_typed(),
            reservation_id,
            obligation_id: ObligationId::generate(),
            occurred_at: now(),
        })
    }

    #[test]
    fn reserve_then_overdraw_then_release_restores_available() {
        let (mut account, tenant_id) = open(100_000);

        let (first, cmd) = reserve_cmd(&account, tenant_id, 60_000);
        run(&mut account, cmd).unwrap();
        assert_eq!(account.credit_available(), Money::new(40_000));

        let (_, cmd) = reserve_cmd(&account, tenant_id, 50_000);
        let err = run(&mut account, cmd).unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::InsufficientCredit));

        { let cmd = release_cmd(&account, tenant_id, first); run(&mut account, cmd) }.unwrap();
        assert_eq!(account.credit_available(), Money::new(100_000));
        assert_eq!(account.held(), Money::ZERO);
    }

    #[test]
    fn second_release_is_already_released() {
        let (mut account, tenant_id) = open(10_000);
        let (rid, cmd) = reserve_cmd(&account, tenant_id, 1_000);
        run(&mut account, cmd).unwrap();
        { let cmd = release_cmd(&account, tenant_id, rid); run(&mut account, cmd) }.unwrap();

        let err = { let cmd = release_cmd(&account, tenant_id, rid); run(&mut account, cmd) }.unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::AlreadyReleased));
        assert_eq!(account.credit_available(), Money::new(10_000));
    }

    #[test]
    fn double_commit_fails_cleanly_without_double_draw() {
        let (mut account, tenant_id) = open(10_000);
        let (rid, cmd) = reserve_cmd(&account, tenant_id, 4_000);
        run(&mut account, cmd).unwrap();

        { let cmd = commit_cmd(&account, tenant_id, rid); run(&mut account, cmd) }.unwrap();
        let version = account.version();
        let err = { let cmd = commit_cmd(&account, tenant_id, rid); run(&mut account, cmd) }.unwrap_err();

        assert_eq!(err.code(), Some(RejectionCode::AlreadyCommitted));
        assert_eq!(account.version(), version);
        assert_eq!(account.credit_used(), Money::new(4_000));
        assert_eq!(account.held(), Money::ZERO);
        assert_eq!(account.credit_available(), Money::new(6_000));
    }

    #[test]
    fn committed_reservation_cannot_be_released() {
        let (mut account, tenant_id) = open(10_000);
        let (rid, cmd) = reserve_cmd(&account, tenant_id, 4_000);
        run(&mut account, cmd).unwrap();
        { let cmd = commit_cmd(&account, tenant_id, rid); run(&mut account, cmd) }.unwrap();

        let err = { let cmd = release_cmd(&account, tenant_id, rid); run(&mut account, cmd) }.unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::AlreadyCommitted));
    }

    #[test]
    fn frozen_account_rejects_reservations() {
        let (mut account, tenant_id) = open(10_000);
        let account_id = account.id_typed();
        run(
            &mut account,
            CreditAccountCommand::FreezeAccount(FreezeAccount {
                tenant_id,
                account_id: account_id,
                reason: "kyc review".to_string(),
                occurred_at: now(),
            }),
        )
        .unwrap();

        let (_, cmd) = reserve_cmd(&account, tenant_id, 1);
        let err = run(&mut account, cmd).unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::AccountFrozen));

        let account_id = account.id_typed();
        run(
            &mut account,
            CreditAccountCommand::UnfreezeAccount(UnfreezeAccount {
                tenant_id,
                account_id: account_id,
                occurred_at: now(),
            }),
        )
        .unwrap();
        let (_, cmd) = reserve_cmd(&account, tenant_id, 1);
        assert!(run(&mut account, cmd).is_ok());
    }

    #[test]
    fn stale_reservations_expire_and_fresh_ones_stay() {
        let (mut account, tenant_id) = open(10_000);
        let (old, cmd) = reserve_cmd(&account, tenant_id, 3_000);
        run(&mut account, cmd).unwrap();

        let later = now() + chrono::Duration::hours(73);
        let account_id = account.id_typed();
        let events = run(
            &mut account,
            CreditAccountCommand::ExpireReservations(ExpireReservations {
                tenant_id,
                account_id: account_id,
                ttl_secs: 72 * 3600,
                occurred_at: later,
            }),
        )
        .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(account.reservation(old).unwrap().state, ReservationState::Expired);
        assert_eq!(account.credit_available(), Money::new(10_000));

        let err = { let cmd = release_cmd(&account, tenant_id, old); run(&mut account, cmd) }.unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::AlreadyReleased));
    }

    #[test]
    fn restoring_credit_is_idempotent_per_restoration_id() {
        let (mut account, tenant_id) = open(10_000);
        let (rid, cmd) = reserve_cmd(&account, tenant_id, 5_000);
        run(&mut account, cmd).unwrap();
        { let cmd = commit_cmd(&account, tenant_id, rid); run(&mut account, cmd) }.unwrap();

        let restore = CreditAccountCommand::RestoreCredit(RestoreCredit {
            tenant_id,
            account_id: account.id_typed(),
            restoration_id: Uuid::now_v7(),
            amount: Money::new(2_000),
            reference: LedgerReference::Order(OrderId::new()),
            occurred_at: now(),
        });
        assert_eq!(run(&mut account, restore.clone()).unwrap().len(), 1);
        assert!(run(&mut account, restore).unwrap().is_empty());
        assert_eq!(account.credit_used(), Money::new(3_000));
    }

    #[test]
    fn system_approver_cannot_raise_limit() {
        let (mut account, tenant_id) = open(10_000);
        let adjust = |limit: u64, approver| {
            CreditAccountCommand::AdjustLimit(AdjustLimit {
                tenant_id,
                account_id: account.id_typed(),
                new_limit: Money::new(limit),
                reason: "risk recalculation".to_string(),
                approver,
                occurred_at: now(),
            })
        };

        let err = account.handle(&adjust(20_000, Approver::System)).unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::LimitIncreaseRequiresApproval));

        let raise = adjust(20_000, Approver::User(UserId::new()));
        let lower = adjust(5_000, Approver::System);
        run(&mut account, raise).unwrap();
        assert_eq!(account.credit_limit(), Money::new(20_000));
        run(&mut account, lower).unwrap();
        assert_eq!(account.credit_limit(), Money::new(5_000));
    }

    #[test]
    fn automated_decrease_stops_at_exposure() {
        let (mut account, tenant_id) = open(10_000);
        let (_, cmd) = reserve_cmd(&account, tenant_id, 8_000);
        run(&mut account, cmd).unwrap();

        let account_id = account.id_typed();
        run(
            &mut account,
            CreditAccountCommand::AdjustLimit(AdjustLimit {
                tenant_id,
                account_id: account_id,
                new_limit: Money::new(5_000),
                reason: "critical risk".to_string(),
                approver: Approver::System,
                occurred_at: now(),
            }),
        )
        .unwrap();

        assert_eq!(account.credit_limit(), Money::new(8_000));
        assert_eq!(account.credit_available(), Money::ZERO);
    }

    #[test]
    fn peak_utilization_is_tracked() {
        let (mut account, tenant_id) = open(10_000);
        let (rid, cmd) = reserve_cmd(&account, tenant_id, 9_000);
        run(&mut account, cmd).unwrap();
        { let cmd = release_cmd(&account, tenant_id, rid); run(&mut account, cmd) }.unwrap();
        assert_eq!(account.utilization_peak_bps(), 9_000);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Whatever sequence of reserves is attempted, the successful ones fit
        /// the limit and `available + held == limit` holds throughout.
        #[test]
        fn reservations_never_overcommit(
            limit in 1u64..1_000_000,
            amounts in prop::collection::vec(1u64..400_000, 1..20),
        ) {
            let (mut account, tenant_id) = open(limit);
            let mut accepted = 0u64;

            for amount in amounts {
                let (_, cmd) = reserve_cmd(&account, tenant_id, amount);
                if run(&mut account, cmd).is_ok() {
                    accepted += amount;
                }
                prop_assert_eq!(
                    account.credit_available().minor() + account.held().minor(),
                    limit
                );
            }

            prop_assert!(accepted <= limit);
            prop_assert_eq!(account.held().minor(), accepted);
        }
    }
}
