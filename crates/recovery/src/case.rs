use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use osas_core::{
    AgentId, Aggregate, AggregateRoot, BuyerId, CreditAccountId, DomainError, DomainResult,
    Money, ObligationId, RecoveryCaseId, RejectionCode, TenantId, UserId,
};
use osas_events::Event;

use crate::bucket::OverdueBucket;

/// `Open -> Assigned -> Contacted -> {PromiseToPay, Escalated} -> Resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Open,
    Assigned,
    Contacted,
    PromiseToPay,
    Escalated,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Repaid,
    ConvertedToEmi,
    WrittenOff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promise {
    pub promised_date: NaiveDate,
    pub amount: Money,
    /// Outstanding when the promise was made; the promise is kept once it
    /// has dropped by `amount`.
    pub outstanding_at_promise: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub escalated_to: AgentId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub agent_id: AgentId,
    pub note: String,
    pub at: DateTime<Utc>,
}

/// Aggregate root: RecoveryCase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryCase {
    id: RecoveryCaseId,
    tenant_id: Option<TenantId>,
    obligation_id: Option<ObligationId>,
    account_id: Option<CreditAccountId>,
    buyer_id: Option<BuyerId>,
    outstanding: Money,
    days_overdue: u32,
    bucket: Option<OverdueBucket>,
    agent: Option<AgentId>,
    status: RecoveryStatus,
    promise: Option<Promise>,
    follow_ups: u32,
    escalation: Option<Escalation>,
    contacts: Vec<ContactRecord>,
    write_off_recorded: bool,
    resolution: Option<Resolution>,
    version: u64,
    created: bool,
}

impl RecoveryCase {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: RecoveryCaseId) -> Self {
        Self {
            id,
            tenant_id: None,
            obligation_id: None,
            account_id: None,
            buyer_id: None,
            outstanding: Money::ZERO,
            days_overdue: 0,
            bucket: None,
            agent: None,
            status: RecoveryStatus::Open,
            promise: None,
            follow_ups: 0,
            escalation: None,
            contacts: Vec::new(),
            write_off_recorded: false,
            resolution: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> RecoveryCaseId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn obligation_id(&self) -> Option<ObligationId> {
        self.obligation_id
    }

    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    pub fn account_id(&self) -> Option<CreditAccountId> {
        self.account_id
    }

    pub fn outstanding(&self) -> Money {
        self.outstanding
    }

    pub fn days_overdue(&self) -> u32 {
        self.days_overdue
    }

    pub fn bucket(&self) -> Option<OverdueBucket> {
        self.bucket
    }

    pub fn agent(&self) -> Option<AgentId> {
        self.agent
    }

    pub fn status(&self) -> RecoveryStatus {
        self.status
    }

    pub fn promise(&self) -> Option<&Promise> {
        self.promise.as_ref()
    }

    pub fn follow_ups(&self) -> u32 {
        self.follow_ups
    }

    pub fn escalation(&self) -> Option<&Escalation> {
        self.escalation.as_ref()
    }

    pub fn contacts(&self) -> &[ContactRecord] {
        &self.contacts
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn is_resolved(&self) -> bool {
        self.status == RecoveryStatus::Resolved
    }
}

impl AggregateRoot for RecoveryCase {
    type Id = RecoveryCaseId;

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
pub struct OpenCase {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub obligation_id: ObligationId,
    pub account_id: CreditAccountId,
    pub buyer_id: BuyerId,
    pub outstanding: Money,
    pub days_overdue: u32,
    pub bucket_thresholds: Vec<u32>,
    pub occurred_at: DateTime<Utc>,
}

/// Outstanding and days-overdue sync from the obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateExposure {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub outstanding: Money,
    pub days_overdue: u32,
    pub bucket_thresholds: Vec<u32>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignAgent {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub agent_id: AgentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordContact {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub agent_id: AgentId,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPromise {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub promised_date: NaiveDate,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Daily: a promise whose date has passed is either kept or broken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPromise {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub today: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalate {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub escalated_to: AgentId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordWriteOff {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub approved_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolve {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub resolution: Resolution,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryCaseCommand {
    OpenCase(OpenCase),
    UpdateExposure(UpdateExposure),
    AssignAgent(AssignAgent),
    RecordContact(RecordContact),
    RecordPromise(RecordPromise),
    CheckPromise(CheckPromise),
    Escalate(Escalate),
    RecordWriteOff(RecordWriteOff),
    Resolve(Resolve),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOpened {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub obligation_id: ObligationId,
    pub account_id: CreditAccountId,
    pub buyer_id: BuyerId,
    pub outstanding: Money,
    pub days_overdue: u32,
    pub bucket: Option<OverdueBucket>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureUpdated {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub outstanding: Money,
    pub days_overdue: u32,
    pub bucket: Option<OverdueBucket>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAssigned {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub agent_id: AgentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecorded {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub agent_id: AgentId,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromiseRecorded {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub promised_date: NaiveDate,
    pub amount: Money,
    pub outstanding_at_promise: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromiseKept {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromiseBroken {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub promised_date: NaiveDate,
    pub follow_up: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseEscalated {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub escalated_to: AgentId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOffRecorded {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub approved_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResolved {
    pub tenant_id: TenantId,
    pub case_id: RecoveryCaseId,
    pub resolution: Resolution,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryCaseEvent {
    CaseOpened(CaseOpened),
    ExposureUpdated(ExposureUpdated),
    AgentAssigned(AgentAssigned),
    ContactRecorded(ContactRecorded),
    PromiseRecorded(PromiseRecorded),
    PromiseKept(PromiseKept),
    PromiseBroken(PromiseBroken),
    CaseEscalated(CaseEscalated),
    WriteOffRecorded(WriteOffRecorded),
    CaseResolved(CaseResolved),
}

impl Event for RecoveryCaseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RecoveryCaseEvent::CaseOpened(_) => "recovery.case.opened",
            RecoveryCaseEvent::ExposureUpdated(_) => "recovery.case.exposure_updated",
            RecoveryCaseEvent::AgentAssigned(_) => "recovery.case.agent_assigned",
            RecoveryCaseEvent::ContactRecorded(_) => "recovery.case.contact_recorded",
            RecoveryCaseEvent::PromiseRecorded(_) => "recovery.case.promise_recorded",
            RecoveryCaseEvent::PromiseKept(_) => "recovery.case.promise_kept",
            RecoveryCaseEvent::PromiseBroken(_) => "recovery.case.promise_broken",
            RecoveryCaseEvent::CaseEscalated(_) => "recovery.case.escalated",
            RecoveryCaseEvent::WriteOffRecorded(_) => "recovery.case.write_off_recorded",
            RecoveryCaseEvent::CaseResolved(_) => "recovery.case.resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RecoveryCaseEvent::CaseOpened(e) => e.occurred_at,
            RecoveryCaseEvent::ExposureUpdated(e) => e.occurred_at,
            RecoveryCaseEvent::AgentAssigned(e) => e.occurred_at,
            RecoveryCaseEvent::ContactRecorded(e) => e.occurred_at,
            RecoveryCaseEvent::PromiseRecorded(e) => e.occurred_at,
            RecoveryCaseEvent::PromiseKept(e) => e.occurred_at,
            RecoveryCaseEvent::PromiseBroken(e) => e.occurred_at,
            RecoveryCaseEvent::CaseEscalated(e) => e.occurred_at,
            RecoveryCaseEvent::WriteOffRecorded(e) => e.occurred_at,
            RecoveryCaseEvent::CaseResolved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for RecoveryCase {
    type Command = RecoveryCaseCommand;
    type Event = RecoveryCaseEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RecoveryCaseEvent::CaseOpened(e) => {
                self.id = e.case_id;
                self.tenant_id = Some(e.tenant_id);
                self.obligation_id = Some(e.obligation_id);
                self.account_id = Some(e.account_id);
                self.buyer_id = Some(e.buyer_id);
                self.outstanding = e.outstanding;
                self.days_overdue = e.days_overdue;
                self.bucket = e.bucket;
                self.status = RecoveryStatus::Open;
                self.created = true;
            }
            RecoveryCaseEvent::ExposureUpdated(e) => {
                self.outstanding = e.outstanding;
                self.days_overdue = e.days_overdue;
                self.bucket = e.bucket;
            }
            RecoveryCaseEvent::AgentAssigned(e) => {
                self.agent = Some(e.agent_id);
                if self.status == RecoveryStatus::Open {
                    self.status = RecoveryStatus::Assigned;
                }
            }
            RecoveryCaseEvent::ContactRecorded(e) => {
                self.contacts.push(ContactRecord {
                    agent_id: e.agent_id,
                    note: e.note.clone(),
                    at: e.occurred_at,
                });
                if self.status == RecoveryStatus::Assigned {
                    self.status = RecoveryStatus::Contacted;
                }
            }
            RecoveryCaseEvent::PromiseRecorded(e) => {
                self.promise = Some(Promise {
                    promised_date: e.promised_date,
                    amount: e.amount,
                    outstanding_at_promise: e.outstanding_at_promise,
                });
                self.status = RecoveryStatus::PromiseToPay;
            }
            RecoveryCaseEvent::PromiseKept(_) => {
                self.promise = None;
                self.status = RecoveryStatus::Contacted;
            }
            RecoveryCaseEvent::PromiseBroken(e) => {
                self.promise = None;
                self.follow_ups = e.follow_up;
                self.status = RecoveryStatus::Contacted;
            }
            RecoveryCaseEvent::CaseEscalated(e) => {
                self.escalation = Some(Escalation {
                    escalated_to: e.escalated_to,
                    reason: e.reason.clone(),
                });
                self.agent = Some(e.escalated_to);
                self.promise = None;
                self.status = RecoveryStatus::Escalated;
            }
            RecoveryCaseEvent::WriteOffRecorded(_) => {
                self.write_off_recorded = true;
            }
            RecoveryCaseEvent::CaseResolved(e) => {
                self.resolution = Some(e.resolution);
                self.promise = None;
                self.status = RecoveryStatus::Resolved;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RecoveryCaseCommand::OpenCase(cmd) => self.handle_open(cmd),
            RecoveryCaseCommand::UpdateExposure(cmd) => self.handle_exposure(cmd),
            RecoveryCaseCommand::AssignAgent(cmd) => self.handle_assign(cmd),
            RecoveryCaseCommand::RecordContact(cmd) => self.handle_contact(cmd),
            RecoveryCaseCommand::RecordPromise(cmd) => self.handle_promise(cmd),
            RecoveryCaseCommand::CheckPromise(cmd) => self.handle_check_promise(cmd),
            RecoveryCaseCommand::Escalate(cmd) => self.handle_escalate(cmd),
            RecoveryCaseCommand::RecordWriteOff(cmd) => self.handle_write_off(cmd),
            RecoveryCaseCommand::Resolve(cmd) => self.handle_resolve(cmd),
        }
    }
}

impl RecoveryCase {
    fn ensure_case(&self, tenant_id: TenantId, case_id: RecoveryCaseId) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != case_id {
            return Err(DomainError::invariant("case_id mismatch"));
        }
        Ok(())
    }

    /// Active case, or a rejection naming it.
    fn ensure_active(&self, tenant_id: TenantId, case_id: RecoveryCaseId) -> DomainResult<()> {
        self.ensure_case(tenant_id, case_id)?;
        if self.is_resolved() {
            return Err(DomainError::rejected(RejectionCode::InvalidState, self.id));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenCase) -> DomainResult<Vec<RecoveryCaseEvent>> {
        if self.created {
            return Ok(vec![]);
        }
        Ok(vec![RecoveryCaseEvent::CaseOpened(CaseOpened {
            tenant_id: cmd.tenant_id,
            case_id: cmd.case_id,
            obligation_id: cmd.obligation_id,
            account_id: cmd.account_id,
            buyer_id: cmd.buyer_id,
            outstanding: cmd.outstanding,
            days_overdue: cmd.days_overdue,
            bucket: OverdueBucket::classify(cmd.days_overdue, &cmd.bucket_thresholds),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_exposure(&self, cmd: &UpdateExposure) -> DomainResult<Vec<RecoveryCaseEvent>> {
        self.ensure_case(cmd.tenant_id, cmd.case_id)?;
        if self.is_resolved() {
            return Ok(vec![]);
        }
        let bucket = OverdueBucket::classify(cmd.days_overdue, &cmd.bucket_thresholds);
        if cmd.outstanding == self.outstanding && cmd.days_overdue == self.days_overdue {
            return Ok(vec![]);
        }
        Ok(vec![RecoveryCaseEvent::ExposureUpdated(ExposureUpdated {
            tenant_id: cmd.tenant_id,
            case_id: cmd.case_id,
            outstanding: cmd.outstanding,
            days_overdue: cmd.days_overdue,
            bucket,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign(&self, cmd: &AssignAgent) -> DomainResult<Vec<RecoveryCaseEvent>> {
        self.ensure_active(cmd.tenant_id, cmd.case_id)?;
        if self.agent == Some(cmd.agent_id) {
            return Ok(vec![]);
        }
        Ok(vec![RecoveryCaseEvent::AgentAssigned(AgentAssigned {
            tenant_id: cmd.tenant_id,
            case_id: cmd.case_id,
            agent_id: cmd.agent_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_contact(&self, cmd: &RecordContact) -> DomainResult<Vec<RecoveryCaseEvent>> {
        self.ensure_active(cmd.tenant_id, cmd.case_id)?;
        if self.status == RecoveryStatus::Open {
            return Err(DomainError::rejected(RejectionCode::InvalidState, self.id));
        }
        if cmd.note.trim().is_empty() {
            return Err(DomainError::validation("contact note is required"));
        }
        Ok(vec![RecoveryCaseEvent::ContactRecorded(ContactRecorded {
            tenant_id: cmd.tenant_id,
            case_id: cmd.case_id,
            agent_id: cmd.agent_id,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_promise(&self, cmd: &RecordPromise) -> DomainResult<Vec<RecoveryCaseEvent>> {
        self.ensure_active(cmd.tenant_id, cmd.case_id)?;
        if self.status != RecoveryStatus::Contacted {
            return Err(DomainError::rejected(RejectionCode::InvalidState, self.id));
        }
        if cmd.amount.is_zero() || cmd.amount > self.outstanding {
            return Err(DomainError::validation(
                "promised amount must be positive and within outstanding",
            ));
        }
        Ok(vec![RecoveryCaseEvent::PromiseRecorded(PromiseRecorded {
            tenant_id: cmd.tenant_id,
            case_id: cmd.case_id,
            promised_date: cmd.promised_date,
            amount: cmd.amount,
            outstanding_at_promise: self.outstanding,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_check_promise(&self, cmd: &CheckPromise) -> DomainResult<Vec<RecoveryCaseEvent>> {
        self.ensure_case(cmd.tenant_id, cmd.case_id)?;
        let Some(promise) = self.promise.as_ref() else {
            return Ok(vec![]);
        };
        if self.status != RecoveryStatus::PromiseToPay || cmd.today <= promise.promised_date {
            return Ok(vec![]);
        }

        let repaid = promise.outstanding_at_promise.saturating_sub(self.outstanding);
        if repaid >= promise.amount {
            return Ok(vec![RecoveryCaseEvent::PromiseKept(PromiseKept {
                tenant_id: cmd.tenant_id,
                case_id: cmd.case_id,
                occurred_at: cmd.occurred_at,
            })]);
        }
        Ok(vec![RecoveryCaseEvent::PromiseBroken(PromiseBroken {
            tenant_id: cmd.tenant_id,
            case_id: cmd.case_id,
            promised_date: promise.promised_date,
            follow_up: self.follow_ups + 1,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_escalate(&self, cmd: &Escalate) -> DomainResult<Vec<RecoveryCaseEvent>> {
        self.ensure_active(cmd.tenant_id, cmd.case_id)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("escalation reason is required"));
        }
        Ok(vec![RecoveryCaseEvent::CaseEscalated(CaseEscalated {
            tenant_id: cmd.tenant_id,
            case_id: cmd.case_id,
            escalated_to: cmd.escalated_to,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_write_off(&self, cmd: &RecordWriteOff) -> DomainResult<Vec<RecoveryCaseEvent>> {
        self.ensure_active(cmd.tenant_id, cmd.case_id)?;
        if self.write_off_recorded {
            return Ok(vec![]);
        }
        Ok(vec![RecoveryCaseEvent::WriteOffRecorded(WriteOffRecorded {
            tenant_id: cmd.tenant_id,
            case_id: cmd.case_id,
            approved_by: cmd.approved_by,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resolve(&self, cmd: &Resolve) -> DomainResult<Vec<RecoveryCaseEvent>> {
        self.ensure_case(cmd.tenant_id, cmd.case_id)?;
        if self.is_resolved() {
            return Ok(vec![]);
        }
        let allowed = match cmd.resolution {
            Resolution::Repaid | Resolution::ConvertedToEmi => self.outstanding.is_zero(),
            Resolution::WrittenOff => self.write_off_recorded,
        };
        if !allowed {
            return Err(DomainError::rejected(RejectionCode::InvalidState, self.id));
        }
        Ok(vec![RecoveryCaseEvent::CaseResolved(CaseResolved {
            tenant_id: cmd.tenant_id,
            case_id: cmd.case_id,
            resolution: cmd.resolution,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: [u32; 3] = [1, 8, 31];

    struct Fixture {
        case: RecoveryCase,
        tenant_id: TenantId,
        case_id: RecoveryCaseId,
        agent: AgentId,
    }

    impl Fixture {
        fn open(outstanding: u64, days: u32) -> Self {
            let tenant_id = TenantId::new();
            let obligation_id = ObligationId::generate();
            let case_id = obligation_id.recovery_case();
            let mut f = Self {
                case: RecoveryCase::empty(case_id),
                tenant_id,
                case_id,
                agent: AgentId::new(),
            };
            f.run(RecoveryCaseCommand::OpenCase(OpenCase {
                tenant_id,
                case_id,
                obligation_id,
                account_id: CreditAccountId::generate(),
                buyer_id: BuyerId::new(),
                outstanding: Money::new(outstanding),
                days_overdue: days,
                bucket_thresholds: THRESHOLDS.to_vec(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
            f
        }

        fn run(&mut self, cmd: RecoveryCaseCommand) -> DomainResult<Vec<RecoveryCaseEvent>> {
            self.case.execute(&cmd)
        }

        fn contacted(&mut self) {
            self.run(RecoveryCaseCommand::AssignAgent(AssignAgent {
                tenant_id: self.tenant_id,
                case_id: self.case_id,
                agent_id: self.agent,
                occurred_at: Utc::now(),
            }))
            .unwrap();
            self.run(RecoveryCaseCommand::RecordContact(RecordContact {
                tenant_id: self.tenant_id,
                case_id: self.case_id,
                agent_id: self.agent,
                note: "called buyer".to_string(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        }

        fn promise(&mut self, date: NaiveDate, amount: u64) {
            self.run(RecoveryCaseCommand::RecordPromise(RecordPromise {
                tenant_id: self.tenant_id,
                case_id: self.case_id,
                promised_date: date,
                amount: Money::new(amount),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        }

        fn exposure(&mut self, outstanding: u64, days: u32) {
            self.run(RecoveryCaseCommand::UpdateExposure(UpdateExposure {
                tenant_id: self.tenant_id,
                case_id: self.case_id,
                outstanding: Money::new(outstanding),
                days_overdue: days,
                bucket_thresholds: THRESHOLDS.to_vec(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        }

        fn check(&mut self, today: NaiveDate) -> Vec<RecoveryCaseEvent> {
            self.run(RecoveryCaseCommand::CheckPromise(CheckPromise {
                tenant_id: self.tenant_id,
                case_id: self.case_id,
                today,
                occurred_at: Utc::now(),
            }))
            .unwrap()
        }

        fn resolve(&mut self, resolution: Resolution) -> DomainResult<Vec<RecoveryCaseEvent>> {
            self.run(RecoveryCaseCommand::Resolve(Resolve {
                tenant_id: self.tenant_id,
                case_id: self.case_id,
                resolution,
                occurred_at: Utc::now(),
            }))
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn assign_then_contact_advances_status() {
        let mut f = Fixture::open(10_000, 3);
        assert_eq!(f.case.bucket().unwrap().to_string(), "1-7");
        f.contacted();
        assert_eq!(f.case.status(), RecoveryStatus::Contacted);
        assert_eq!(f.case.contacts().len(), 1);
    }

    #[test]
    fn bucket_moves_with_days_overdue() {
        let mut f = Fixture::open(10_000, 3);
        f.exposure(10_000, 12);
        assert_eq!(f.case.bucket().unwrap().to_string(), "8-30");
    }

    #[test]
    fn broken_promise_reverts_to_contacted_with_follow_up() {
        let mut f = Fixture::open(10_000, 3);
        f.contacted();
        f.promise(day(10), 4_000);
        assert_eq!(f.case.status(), RecoveryStatus::PromiseToPay);

        assert!(f.check(day(10)).is_empty());
        let events = f.check(day(11));
        assert!(matches!(events[0], RecoveryCaseEvent::PromiseBroken(_)));
        assert_eq!(f.case.status(), RecoveryStatus::Contacted);
        assert_eq!(f.case.follow_ups(), 1);
    }

    #[test]
    fn kept_promise_does_not_count_as_follow_up() {
        let mut f = Fixture::open(10_000, 3);
        f.contacted();
        f.promise(day(10), 4_000);
        f.exposure(6_000, 5);
        let events = f.check(day(11));
        assert!(matches!(events[0], RecoveryCaseEvent::PromiseKept(_)));
        assert_eq!(f.case.follow_ups(), 0);
    }

    #[test]
    fn escalation_needs_reason_and_works_from_open() {
        let mut f = Fixture::open(10_000, 40);
        let cmd = |reason: &str| {
            RecoveryCaseCommand::Escalate(Escalate {
                tenant_id: f.tenant_id,
                case_id: f.case_id,
                escalated_to: AgentId::new(),
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            })
        };
        let blank = cmd(" ");
        let real = cmd("unreachable for 30 days");
        assert!(f.run(blank).is_err());
        f.run(real).unwrap();
        assert_eq!(f.case.status(), RecoveryStatus::Escalated);
        assert!(f.case.escalation().is_some());
    }

    #[test]
    fn resolution_requires_zero_outstanding_or_write_off() {
        let mut f = Fixture::open(10_000, 3);
        let err = f.resolve(Resolution::Repaid).unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::InvalidState));
        assert!(f.resolve(Resolution::WrittenOff).is_err());

        f.run(RecoveryCaseCommand::RecordWriteOff(RecordWriteOff {
            tenant_id: f.tenant_id,
            case_id: f.case_id,
            approved_by: UserId::new(),
            reason: "uncollectable".to_string(),
            occurred_at: Utc::now(),
        }))
        .unwrap();
        f.resolve(Resolution::WrittenOff).unwrap();
        assert!(f.case.is_resolved());
        assert!(f.resolve(Resolution::WrittenOff).unwrap().is_empty());
    }

    #[test]
    fn repaid_case_resolves() {
        let mut f = Fixture::open(10_000, 3);
        f.exposure(0, 3);
        f.resolve(Resolution::Repaid).unwrap();
        assert_eq!(f.case.resolution(), Some(Resolution::Repaid));
    }
}
