//! Recovery workflow domain module (event-sourced).
//!
//! One `RecoveryCase` per overdue obligation, keyed by the obligation id.

pub mod bucket;
pub mod case;

pub use bucket::OverdueBucket;
pub use case::{
    AgentAssigned, AssignAgent, CaseEscalated, CaseOpened, CaseResolved, CheckPromise,
    ContactRecord, ContactRecorded, Escalate, Escalation, ExposureUpdated, OpenCase, Promise,
    PromiseBroken, PromiseKept, PromiseRecorded, RecordContact, RecordPromise, RecordWriteOff,
    RecoveryCase, RecoveryCaseCommand, RecoveryCaseEvent, RecoveryStatus, Resolution, Resolve,
    UpdateExposure, WriteOffRecorded,
};

/// Stream type of recovery cases in the ledger store.
pub const AGGREGATE_TYPE: &str = "recovery.case";
