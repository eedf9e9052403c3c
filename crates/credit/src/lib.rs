//! Credit account domain module (event-sourced).
//!
//! A `CreditAccount` is the single owner of a buyer's balance truth. Order
//! reservations live inside the account stream so every mutation of the
//! line is serialized by the stream version.

pub mod account;
pub mod reservation;

pub use account::{
    AccountFrozen, AccountOpened, AccountUnfrozen, AdjustLimit, Approver, CommitReservation,
    CreditAccount, CreditAccountCommand, CreditAccountEvent, CreditReserved, CreditRestored,
    ExpireReservations, FreezeAccount, LimitAdjusted, OpenAccount, ReleaseReservation,
    ReservationCommitted, ReservationExpired, ReservationReleased, ReserveCredit, RestoreCredit,
    RiskLevelUpdated, UnfreezeAccount, UpdateRiskLevel,
};
pub use reservation::{Reservation, ReservationState};

/// Stream type of credit accounts in the ledger store.
pub const AGGREGATE_TYPE: &str = "credit.account";
