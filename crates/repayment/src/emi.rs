use std::collections::BTreeSet;

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use osas_core::{
    Aggregate, AggregateRoot, BuyerId, CreditAccountId, DomainError, DomainResult, EmiPlanId,
    Money, ObligationId, Rate, RejectionCode, TenantId,
};
use osas_events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
    Defaulted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmiInstallment {
    /// 1-based position in the schedule.
    pub number: u32,
    pub due_date: NaiveDate,
    pub principal_component: Money,
    pub interest_component: Money,
    pub paid: Money,
    pub status: InstallmentStatus,
}

impl EmiInstallment {
    pub fn amount(&self) -> Money {
        self.principal_component.saturating_add(self.interest_component)
    }

    pub fn remaining(&self) -> Money {
        self.amount().saturating_sub(self.paid)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, InstallmentStatus::Pending | InstallmentStatus::Overdue)
    }

    /// Interest is settled before principal within an installment.
    fn allocate(&self, amount: Money) -> (Money, Money) {
        let interest_left = self.interest_component.saturating_sub(self.paid);
        let interest_part = amount.min(interest_left);
        (interest_part, amount.saturating_sub(interest_part))
    }
}

/// Flat-rate schedule: total interest is the floored monthly interest on the
/// full principal, times the tenure. Principal and interest are split equally; the last installment
/// absorbs both remainders. Installments fall due monthly from `first_due`.
pub fn build_schedule(
    principal: Money,
    tenure_months: u32,
    monthly_interest: Rate,
    first_due: NaiveDate,
) -> DomainResult<Vec<EmiInstallment>> {
    if principal.is_zero() {
        return Err(DomainError::validation("emi principal must be positive"));
    }
    if tenure_months == 0 {
        return Err(DomainError::validation("tenure_months must be positive"));
    }
    if first_due.checked_add_months(Months::new(tenure_months - 1)).is_none() {
        return Err(DomainError::validation("installment due date out of range"));
    }

    let total_interest = monthly_interest.of(principal).times(u64::from(tenure_months))?;
    let (principal_share, principal_rem) = principal.split(tenure_months)?;
    let (interest_share, interest_rem) = total_interest.split(tenure_months)?;

    let mut installments = Vec::with_capacity(tenure_months as usize);
    for n in 0..tenure_months {
        let last = n + 1 == tenure_months;
        let due_date = first_due
            .checked_add_months(Months::new(n))
            .ok_or_else(|| DomainError::validation("installment due date out of range"))?;
        let (p, i) = if last {
            (
                principal_share.checked_add(principal_rem)?,
                interest_share.checked_add(interest_rem)?,
            )
        } else {
            (principal_share, interest_share)
        };
        installments.push(EmiInstallment {
            number: n + 1,
            due_date,
            principal_component: p,
            interest_component: i,
            paid: Money::ZERO,
            status: InstallmentStatus::Pending,
        });
    }
    Ok(installments)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmiPlanStatus {
    Active,
    Completed,
    Defaulted,
}

/// Aggregate root: EmiPlan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmiPlan {
    id: EmiPlanId,
    tenant_id: Option<TenantId>,
    account_id: Option<CreditAccountId>,
    buyer_id: Option<BuyerId>,
    obligations: Vec<ObligationId>,
    principal: Money,
    /// Part of the principal that is still drawn on the credit line.
    drawn_credit: Money,
    credit_restored: Money,
    tenure_months: u32,
    monthly_interest: Rate,
    installments: Vec<EmiInstallment>,
    status: EmiPlanStatus,
    payment_ids: BTreeSet<Uuid>,
    version: u64,
    created: bool,
}

impl EmiPlan {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: EmiPlanId) -> Self {
        Self {
            id,
            tenant_id: None,
            account_id: None,
            buyer_id: None,
            obligations: Vec::new(),
            principal: Money::ZERO,
            drawn_credit: Money::ZERO,
            credit_restored: Money::ZERO,
            tenure_months: 0,
            monthly_interest: Rate::default(),
            installments: Vec::new(),
            status: EmiPlanStatus::Active,
            payment_ids: BTreeSet::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> EmiPlanId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn account_id(&self) -> Option<CreditAccountId> {
        self.account_id
    }

    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    pub fn obligations(&self) -> &[ObligationId] {
        &self.obligations
    }

    pub fn principal(&self) -> Money {
        self.principal
    }

    pub fn tenure_months(&self) -> u32 {
        self.tenure_months
    }

    pub fn monthly_interest(&self) -> Rate {
        self.monthly_interest
    }

    pub fn installments(&self) -> &[EmiInstallment] {
        &self.installments
    }

    pub fn status(&self) -> EmiPlanStatus {
        self.status
    }

    pub fn outstanding(&self) -> Money {
        self.installments
            .iter()
            .filter(|i| i.status != InstallmentStatus::Paid)
            .map(EmiInstallment::remaining)
            .sum()
    }

    fn installment_mut(&mut self, number: u32) -> Option<&mut EmiInstallment> {
        self.installments.iter_mut().find(|i| i.number == number)
    }
}

impl AggregateRoot for EmiPlan {
    type Id = EmiPlanId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEmiPlan {
    pub tenant_id: TenantId,
    pub plan_id: EmiPlanId,
    pub account_id: CreditAccountId,
    pub buyer_id: BuyerId,
    pub obligations: Vec<ObligationId>,
    /// Sum of the balances transferred from the obligations.
    pub principal: Money,
    /// Portion of `principal` still drawn on the credit line (excludes penalties).
    pub drawn_credit: Money,
    pub tenure_months: u32,
    pub monthly_interest: Rate,
    pub first_due_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Pays toward one installment; `None` targets the earliest open one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayInstallment {
    pub tenant_id: TenantId,
    pub plan_id: EmiPlanId,
    pub payment_id: Uuid,
    pub installment_number: Option<u32>,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkOverdueInstallments {
    pub tenant_id: TenantId,
    pub plan_id: EmiPlanId,
    pub today: NaiveDate,
    pub default_after_missed: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmiPlanCommand {
    CreateEmiPlan(CreateEmiPlan),
    PayInstallment(PayInstallment),
    MarkOverdueInstallments(MarkOverdueInstallments),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmiPlanCreated {
    pub tenant_id: TenantId,
    pub plan_id: EmiPlanId,
    pub account_id: CreditAccountId,
    pub buyer_id: BuyerId,
    pub obligations: Vec<ObligationId>,
    pub principal: Money,
    pub drawn_credit: Money,
    pub tenure_months: u32,
    pub monthly_interest: Rate,
    pub installments: Vec<EmiInstallment>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentPaid {
    pub tenant_id: TenantId,
    pub plan_id: EmiPlanId,
    pub account_id: CreditAccountId,
    pub payment_id: Uuid,
    pub installment_number: u32,
    pub amount: Money,
    pub interest_component: Money,
    pub principal_component: Money,
    /// Drawn credit returned to the account by this payment.
    pub credit_restored: Money,
    pub installment_settled: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentsOverdue {
    pub tenant_id: TenantId,
    pub plan_id: EmiPlanId,
    pub installment_numbers: Vec<u32>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCompleted {
    pub tenant_id: TenantId,
    pub plan_id: EmiPlanId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDefaulted {
    pub tenant_id: TenantId,
    pub plan_id: EmiPlanId,
    pub account_id: CreditAccountId,
    pub buyer_id: BuyerId,
    pub missed_installments: u32,
    pub outstanding: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmiPlanEvent {
    EmiPlanCreated(EmiPlanCreated),
    InstallmentPaid(InstallmentPaid),
    InstallmentsOverdue(InstallmentsOverdue),
    PlanCompleted(PlanCompleted),
    PlanDefaulted(PlanDefaulted),
}

impl Event for EmiPlanEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EmiPlanEvent::EmiPlanCreated(_) => "repayment.emi_plan.created",
            EmiPlanEvent::InstallmentPaid(_) => "repayment.emi_plan.installment_paid",
            EmiPlanEvent::InstallmentsOverdue(_) => "repayment.emi_plan.installments_overdue",
            EmiPlanEvent::PlanCompleted(_) => "repayment.emi_plan.completed",
            EmiPlanEvent::PlanDefaulted(_) => "repayment.emi_plan.defaulted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EmiPlanEvent::EmiPlanCreated(e) => e.occurred_at,
            EmiPlanEvent::InstallmentPaid(e) => e.occurred_at,
            EmiPlanEvent::InstallmentsOverdue(e) => e.occurred_at,
            EmiPlanEvent::PlanCompleted(e) => e.occurred_at,
            EmiPlanEvent::PlanDefaulted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for EmiPlan {
    type Command = EmiPlanCommand;
    type Event = EmiPlanEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            EmiPlanEvent::EmiPlanCreated(e) => {
                self.id = e.plan_id;
                self.tenant_id = Some(e.tenant_id);
                self.account_id = Some(e.account_id);
                self.buyer_id = Some(e.buyer_id);
                self.obligations = e.obligations.clone();
                self.principal = e.principal;
                self.drawn_credit = e.drawn_credit;
                self.tenure_months = e.tenure_months;
                self.monthly_interest = e.monthly_interest;
                self.installments = e.installments.clone();
                self.status = EmiPlanStatus::Active;
                self.created = true;
            }
            EmiPlanEvent::InstallmentPaid(e) => {
                self.payment_ids.insert(e.payment_id);
                self.credit_restored = self.credit_restored.saturating_add(e.credit_restored);
                if let Some(inst) = self.installment_mut(e.installment_number) {
                    inst.paid = inst.paid.saturating_add(e.amount);
                    if e.installment_settled {
                        inst.status = InstallmentStatus::Paid;
                    }
                }
            }
            EmiPlanEvent::InstallmentsOverdue(e) => {
                for number in &e.installment_numbers {
                    if let Some(inst) = self.installment_mut(*number) {
                        inst.status = InstallmentStatus::Overdue;
                    }
                }
            }
            EmiPlanEvent::PlanCompleted(_) => {
                self.status = EmiPlanStatus::Completed;
            }
            EmiPlanEvent::PlanDefaulted(_) => {
                self.status = EmiPlanStatus::Defaulted;
                for inst in self.installments.iter_mut().filter(|i| i.is_open()) {
                    inst.status = InstallmentStatus::Defaulted;
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            EmiPlanCommand::CreateEmiPlan(cmd) => self.handle_create(cmd),
            EmiPlanCommand::PayInstallment(cmd) => self.handle_pay(cmd),
            EmiPlanCommand::MarkOverdueInstallments(cmd) => self.handle_mark_overdue(cmd),
        }
    }
}

impl EmiPlan {
    fn ensure_plan(&self, tenant_id: TenantId, plan_id: EmiPlanId) -> DomainResult<(CreditAccountId, BuyerId)> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != plan_id {
            return Err(DomainError::invariant("plan_id mismatch"));
        }
        match (self.account_id, self.buyer_id) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(DomainError::invariant("plan not fully created")),
        }
    }

    fn handle_create(&self, cmd: &CreateEmiPlan) -> DomainResult<Vec<EmiPlanEvent>> {
        if self.created {
            if self.obligations == cmd.obligations {
                return Ok(vec![]);
            }
            return Err(DomainError::conflict("emi plan already exists"));
        }
        if cmd.obligations.is_empty() {
            return Err(DomainError::validation("emi plan needs at least one obligation"));
        }
        if cmd.drawn_credit > cmd.principal {
            return Err(DomainError::validation("drawn credit exceeds plan principal"));
        }
        let installments = build_schedule(
            cmd.principal,
            cmd.tenure_months,
            cmd.monthly_interest,
            cmd.first_due_date,
        )?;

        Ok(vec![EmiPlanEvent::EmiPlanCreated(EmiPlanCreated {
            tenant_id: cmd.tenant_id,
            plan_id: cmd.plan_id,
            account_id: cmd.account_id,
            buyer_id: cmd.buyer_id,
            obligations: cmd.obligations.clone(),
            principal: cmd.principal,
            drawn_credit: cmd.drawn_credit,
            tenure_months: cmd.tenure_months,
            monthly_interest: cmd.monthly_interest,
            installments,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_pay(&self, cmd: &PayInstallment) -> DomainResult<Vec<EmiPlanEvent>> {
        let (account_id, _) = self.ensure_plan(cmd.tenant_id, cmd.plan_id)?;
        if self.payment_ids.contains(&cmd.payment_id) {
            return Ok(vec![]);
        }
        if self.status != EmiPlanStatus::Active {
            return Err(DomainError::rejected(RejectionCode::InvalidState, self.id));
        }
        if cmd.amount.is_zero() {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let target = match cmd.installment_number {
            Some(n) => self
                .installments
                .iter()
                .find(|i| i.number == n)
                .ok_or_else(|| DomainError::validation(format!("no installment {n}")))?,
            None => self
                .installments
                .iter()
                .find(|i| i.is_open())
                .ok_or_else(|| DomainError::rejected(RejectionCode::InvalidState, self.id))?,
        };
        if !target.is_open() {
            return Err(DomainError::rejected(RejectionCode::InvalidState, self.id));
        }
        if cmd.amount > target.remaining() {
            return Err(DomainError::rejected(RejectionCode::OverpaymentRejected, self.id));
        }

        let (interest_component, principal_component) = target.allocate(cmd.amount);
        let credit_restored =
            principal_component.min(self.drawn_credit.saturating_sub(self.credit_restored));
        let installment_settled = cmd.amount == target.remaining();

        let mut events = vec![EmiPlanEvent::InstallmentPaid(InstallmentPaid {
            tenant_id: cmd.tenant_id,
            plan_id: self.id,
            account_id,
            payment_id: cmd.payment_id,
            installment_number: target.number,
            amount: cmd.amount,
            interest_component,
            principal_component,
            credit_restored,
            installment_settled,
            occurred_at: cmd.occurred_at,
        })];

        let others_open = self
            .installments
            .iter()
            .any(|i| i.number != target.number && i.is_open());
        if installment_settled && !others_open {
            events.push(EmiPlanEvent::PlanCompleted(PlanCompleted {
                tenant_id: cmd.tenant_id,
                plan_id: self.id,
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_mark_overdue(&self, cmd: &MarkOverdueInstallments) -> DomainResult<Vec<EmiPlanEvent>> {
        let (account_id, buyer_id) = self.ensure_plan(cmd.tenant_id, cmd.plan_id)?;
        if self.status != EmiPlanStatus::Active {
            return Ok(vec![]);
        }

        let newly: Vec<u32> = self
            .installments
            .iter()
            .filter(|i| i.status == InstallmentStatus::Pending && i.due_date < cmd.today)
            .map(|i| i.number)
            .collect();
        let already = self
            .installments
            .iter()
            .filter(|i| i.status == InstallmentStatus::Overdue)
            .count();
        let missed = u32::try_from(already + newly.len()).unwrap_or(u32::MAX);

        let mut events = Vec::new();
        if !newly.is_empty() {
            events.push(EmiPlanEvent::InstallmentsOverdue(InstallmentsOverdue {
                tenant_id: cmd.tenant_id,
                plan_id: self.id,
                installment_numbers: newly,
                occurred_at: cmd.occurred_at,
            }));
        }
        if cmd.default_after_missed > 0 && missed >= cmd.default_after_missed {
            events.push(EmiPlanEvent::PlanDefaulted(PlanDefaulted {
                tenant_id: cmd.tenant_id,
                plan_id: self.id,
                account_id,
                buyer_id,
                missed_installments: missed,
                outstanding: self.outstanding(),
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn run(plan: &mut EmiPlan, cmd: EmiPlanCommand) -> DomainResult<Vec<EmiPlanEvent>> {
        plan.execute(&cmd)
    }

    fn create(principal: u64, drawn: u64, tenure: u32) -> (EmiPlan, TenantId) {
        let tenant_id = TenantId::new();
        let plan_id = EmiPlanId::generate();
        let mut plan = EmiPlan::empty(plan_id);
        run(
            &mut plan,
            EmiPlanCommand::CreateEmiPlan(CreateEmiPlan {
                tenant_id,
                plan_id,
                account_id: CreditAccountId::generate(),
                buyer_id: BuyerId::new(),
                obligations: vec![ObligationId::generate()],
                principal: Money::new(principal),
                drawn_credit: Money::new(drawn),
                tenure_months: tenure,
                monthly_interest: Rate::from_bps(150),
                first_due_date: date(2024, 1, 31),
                occurred_at: now(),
            }),
        )
        .unwrap();
        (plan, tenant_id)
    }

    fn pay(plan: &mut EmiPlan, tenant_id: TenantId, amount: u64) -> DomainResult<Vec<EmiPlanEvent>> {
        let plan_id = plan.id_typed();
        run(
            plan,
            EmiPlanCommand::PayInstallment(PayInstallment {
                tenant_id,
                plan_id,
                payment_id: Uuid::now_v7(),
                installment_number: None,
                amount: Money::new(amount),
                occurred_at: now(),
            }),
        )
    }

    fn mark(plan: &mut EmiPlan, tenant_id: TenantId, today: NaiveDate) -> Vec<EmiPlanEvent> {
        let plan_id = plan.id_typed();
        run(
            plan,
            EmiPlanCommand::MarkOverdueInstallments(MarkOverdueInstallments {
                tenant_id,
                plan_id,
                today,
                default_after_missed: 2,
                occurred_at: now(),
            }),
        )
        .unwrap()
    }

    #[test]
    fn schedule_splits_principal_and_flat_interest() {
        let schedule =
            build_schedule(Money::new(10_000), 3, Rate::from_bps(150), date(2024, 1, 31)).unwrap();

        // 1.5% × 3 months of 10,000 = 450
        let principal: Money = schedule.iter().map(|i| i.principal_component).sum();
        let interest: Money = schedule.iter().map(|i| i.interest_component).sum();
        assert_eq!(principal, Money::new(10_000));
        assert_eq!(interest, Money::new(450));

        assert_eq!(schedule[0].principal_component, Money::new(3_333));
        assert_eq!(schedule[2].principal_component, Money::new(3_334));
        // Month-end due dates clamp to the shorter month.
        assert_eq!(schedule[1].due_date, date(2024, 2, 29));
        assert_eq!(schedule[2].due_date, date(2024, 3, 31));
    }

    #[test]
    fn zero_tenure_is_invalid() {
        assert!(build_schedule(Money::new(100), 0, Rate::from_bps(0), date(2024, 1, 1)).is_err());
    }

    #[test]
    fn tenure_past_the_calendar_is_rejected_up_front() {
        let err = build_schedule(Money::new(100), 4_000_000, Rate::from_bps(0), date(2024, 1, 1))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn paying_every_installment_completes_the_plan() {
        let (mut plan, tenant_id) = create(9_000, 9_000, 3);
        let amounts: Vec<u64> = plan.installments().iter().map(|i| i.amount().minor()).collect();

        let mut restored = Money::ZERO;
        for amount in amounts {
            for e in pay(&mut plan, tenant_id, amount).unwrap() {
                if let EmiPlanEvent::InstallmentPaid(p) = e {
                    restored = restored.saturating_add(p.credit_restored);
                }
            }
        }

        assert_eq!(plan.status(), EmiPlanStatus::Completed);
        assert!(plan.outstanding().is_zero());
        assert_eq!(restored, Money::new(9_000));
    }

    #[test]
    fn interest_is_paid_before_principal() {
        let (mut plan, tenant_id) = create(9_000, 9_000, 3);
        let events = pay(&mut plan, tenant_id, 200).unwrap();
        let EmiPlanEvent::InstallmentPaid(p) = &events[0] else {
            panic!("expected InstallmentPaid");
        };
        // interest per installment: 9,000 × 1.5% × 3 / 3 = 135
        assert_eq!(p.interest_component, Money::new(135));
        assert_eq!(p.principal_component, Money::new(65));
        assert!(!p.installment_settled);
    }

    #[test]
    fn penalty_part_of_principal_does_not_restore_credit() {
        let (mut plan, tenant_id) = create(1_050, 1_000, 1);
        let amount = plan.installments()[0].amount().minor();
        let events = pay(&mut plan, tenant_id, amount).unwrap();
        let EmiPlanEvent::InstallmentPaid(p) = &events[0] else {
            panic!("expected InstallmentPaid");
        };
        assert_eq!(p.principal_component, Money::new(1_050));
        assert_eq!(p.credit_restored, Money::new(1_000));
    }

    #[test]
    fn installment_overpayment_is_rejected() {
        let (mut plan, tenant_id) = create(9_000, 9_000, 3);
        let too_much = plan.installments()[0].amount().minor() + 1;
        let err = pay(&mut plan, tenant_id, too_much).unwrap_err();
        assert_eq!(err.code(), Some(RejectionCode::OverpaymentRejected));
    }

    #[test]
    fn missed_installments_default_the_plan() {
        let (mut plan, tenant_id) = create(9_000, 9_000, 3);
        mark(&mut plan, tenant_id, date(2024, 2, 1));
        assert_eq!(plan.installments()[0].status, InstallmentStatus::Overdue);
        assert_eq!(plan.status(), EmiPlanStatus::Active);

        let events = mark(&mut plan, tenant_id, date(2024, 3, 1));
        assert!(events.iter().any(|e| matches!(e, EmiPlanEvent::PlanDefaulted(_))));
        assert_eq!(plan.status(), EmiPlanStatus::Defaulted);
        assert!(plan
            .installments()
            .iter()
            .all(|i| i.status == InstallmentStatus::Defaulted));
        assert!(pay(&mut plan, tenant_id, 10).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn schedule_sums_match_principal_and_interest(
            principal in 1u64..10_000_000,
            tenure in 1u32..36,
            bps in 0u32..500,
        ) {
            let rate = Rate::from_bps(bps);
            let schedule = build_schedule(Money::new(principal), tenure, rate, date(2024, 1, 15)).unwrap();

            let p: u64 = schedule.iter().map(|i| i.principal_component.minor()).sum();
            let total: u64 = schedule.iter().map(|i| i.amount().minor()).sum();
            let expected_interest = rate.of(Money::new(principal)).minor() * u64::from(tenure);

            prop_assert_eq!(schedule.len(), tenure as usize);
            prop_assert_eq!(p, principal);
            prop_assert!(total >= principal);
            prop_assert_eq!(total, principal + expected_interest);
            prop_assert!(schedule.windows(2).all(|w| w[0].due_date < w[1].due_date));
        }
    }
}
