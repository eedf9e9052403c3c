//! Repayment domain module (event-sourced).
//!
//! A `RepaymentObligation` is the ledger line a buyer owes for one committed
//! order. Its outstanding balance is a fold over an append-only transaction
//! list (payments, penalties, transfers into EMI, write-offs). An `EmiPlan`
//! takes over the balance of one or more obligations and schedules it into
//! monthly installments.

pub mod emi;
pub mod obligation;
pub mod policy;

pub use emi::{
    CreateEmiPlan, EmiInstallment, EmiPlan, EmiPlanCommand, EmiPlanCreated, EmiPlanEvent,
    EmiPlanStatus, InstallmentPaid, InstallmentStatus, InstallmentsOverdue,
    MarkOverdueInstallments, PayInstallment, PlanCompleted, PlanDefaulted, build_schedule,
};
pub use obligation::{
    AccruePenalty, ConvertToEmi, DueDateExtended, ObligationCommand, ObligationEvent,
    ObligationOpened, ObligationStatus, ObligationTransaction, ObligationWrittenOff,
    OpenObligation, PaymentMethod, PaymentRecorded, PenaltyAccrued, RecordPayment,
    RepaymentObligation, RequestSkip, SkipRecord, TransferredToEmi, BecameOverdue, WriteOff,
};
pub use policy::RepaymentPolicy;

/// Stream type of repayment obligations in the ledger store.
pub const OBLIGATION_AGGREGATE_TYPE: &str = "repayment.obligation";

/// Stream type of EMI plans in the ledger store.
pub const EMI_PLAN_AGGREGATE_TYPE: &str = "repayment.emi_plan";
