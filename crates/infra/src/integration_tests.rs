//! Integration tests for the full engine pipeline.
//!
//! Tests: Engine → CommandDispatcher → EventStore → ReadModels
//!
//! Verifies:
//! - Reserve / commit / release keep the credit line balanced
//! - Penalty accrual is simple, capped and once per day
//! - The delivery gate never verifies without proof or an override
//! - Settlement cutoffs freeze batch membership and netting re-derives
//! - Concurrent reservations never overcommit
//! - Recovery cases live in their own streams and follow their obligation
//! - The daily pass repairs credit restorations lost after a payment

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::Value as JsonValue;
    use uuid::Uuid;

    use osas_core::{
        BuyerId, BuyerKind, CreditAccountId, Money, ObligationId, OrderId, RejectionCode, SellerId,
        TenantId, UserId,
    };
    use osas_delivery::{DeliveryStatus, ExceptionResolution, VerificationStatus};
    use osas_events::{EventEnvelope, InMemoryEventBus};
    use osas_repayment::{
        EmiPlanStatus, OBLIGATION_AGGREGATE_TYPE, ObligationCommand, ObligationStatus, PaymentMethod,
        RecordPayment, RepaymentObligation,
    };
    use osas_settlement::{BankOutcome, BatchState, compute_net};

    use crate::bank::{GatewayError, InMemoryBankGateway};
    use crate::config::EngineConfig;
    use crate::engine::{Engine, EngineError, ReserveRequest};
    use crate::event_store::InMemoryEventStore;
    use crate::jobs::{InMemoryLeaseStore, LeaseStore, RetryPolicy};
    use crate::projections::Projection;
    use crate::tickets::InMemorySupportTickets;

    type TestEngine = Engine<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn engine_with(config: EngineConfig) -> TestEngine {
        Engine::new(InMemoryEventStore::new(), Arc::new(InMemoryEventBus::new()), config)
    }

    fn engine() -> TestEngine {
        engine_with(EngineConfig::default())
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn open(engine: &TestEngine, tenant_id: TenantId, limit: u64) -> CreditAccountId {
        let account_id = CreditAccountId::generate();
        engine
            .open_account(
                tenant_id,
                account_id,
                BuyerId::new(),
                BuyerKind::Retailer,
                Money::new(limit),
                at(1, 8),
            )
            .unwrap();
        account_id
    }

    fn request(account_id: CreditAccountId, seller_id: SellerId, amount: u64, auto_approve_pod: bool) -> ReserveRequest {
        ReserveRequest {
            account_id,
            order_id: OrderId::new(),
            seller_id,
            amount: Money::new(amount),
            auto_approve_pod,
        }
    }

    fn rejection(result: Result<impl std::fmt::Debug, EngineError>) -> RejectionCode {
        result.unwrap_err().code().expect("business rejection")
    }

    /// Reserve, mark delivered and verify with POD; returns the order.
    fn deliver(
        engine: &TestEngine,
        tenant_id: TenantId,
        account_id: CreditAccountId,
        seller_id: SellerId,
        amount: u64,
        verified_at: DateTime<Utc>,
    ) -> OrderId {
        let req = request(account_id, seller_id, amount, false);
        let order_id = req.order_id;
        engine.reserve(tenant_id, req, verified_at).unwrap();
        engine
            .record_delivery_status(tenant_id, order_id, DeliveryStatus::Delivered, None, verified_at)
            .unwrap();
        let delivery = engine
            .verify_delivery(tenant_id, order_id, Some(format!("pod-{order_id}")), verified_at)
            .unwrap();
        assert_eq!(delivery.status(), VerificationStatus::Verified);
        order_id
    }

    #[test]
    fn reserve_beyond_available_fails_and_release_restores() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let seller_id = SellerId::new();
        let account_id = open(&engine, tenant_id, 100_000);

        let first = engine
            .reserve(tenant_id, request(account_id, seller_id, 60_000, false), at(1, 9))
            .unwrap();
        let account = engine.account(tenant_id, account_id).unwrap();
        assert_eq!(account.credit_available(), Money::new(40_000));

        let second = engine.reserve(tenant_id, request(account_id, seller_id, 50_000, false), at(1, 9));
        assert_eq!(rejection(second), RejectionCode::InsufficientCredit);

        let account = engine.release(tenant_id, first, "order cancelled", at(1, 10)).unwrap();
        assert_eq!(account.credit_available(), Money::new(100_000));
        assert_eq!(account.held(), Money::ZERO);

        let again = engine.release(tenant_id, first, "order cancelled", at(1, 11));
        assert_eq!(rejection(again), RejectionCode::AlreadyReleased);
    }

    #[test]
    fn second_commit_fails_without_double_charging() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);

        let reservation_id = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 20_000, false), at(2, 9))
            .unwrap();
        let obligation_id = engine.commit(tenant_id, reservation_id, at(2, 10)).unwrap();

        let second = engine.commit(tenant_id, reservation_id, at(2, 11));
        assert_eq!(rejection(second), RejectionCode::AlreadyCommitted);

        let account = engine.account(tenant_id, account_id).unwrap();
        assert_eq!(account.credit_used(), Money::new(20_000));
        assert_eq!(account.held(), Money::ZERO);
        assert_eq!(account.credit_available(), Money::new(30_000));

        let obligation = engine.obligation(tenant_id, obligation_id).unwrap();
        assert_eq!(obligation.outstanding(), Money::new(20_000));
    }

    #[test]
    fn penalty_accrues_once_per_day_and_is_capped() {
        let mut config = EngineConfig::default();
        config.credit.credit_terms_days = 0;
        config.credit.auto_decrease_limits = false;
        let engine = engine_with(config);
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);

        let reservation_id = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 10_000, false), at(1, 9))
            .unwrap();
        let obligation_id = engine.commit(tenant_id, reservation_id, at(1, 10)).unwrap();

        for day in 2..=10 {
            engine.run_daily_pass(tenant_id, at(day, 2));
            let rerun = engine.run_daily_pass(tenant_id, at(day, 3));
            assert_eq!(rerun.penalties_accrued, 0, "day {day} accrued twice");
        }

        let obligation = engine.obligation(tenant_id, obligation_id).unwrap();
        assert_eq!(obligation.penalty_amount(), Money::new(500));
        assert_eq!(obligation.outstanding(), Money::new(10_500));
        assert_eq!(obligation.status(), ObligationStatus::Overdue);

        let case = engine
            .recovery_case(tenant_id, obligation_id.recovery_case())
            .unwrap()
            .expect("overdue obligation opens a recovery case");
        assert_eq!(case.outstanding(), Money::new(10_500));

        let paid = engine
            .pay(
                tenant_id,
                obligation_id,
                Uuid::now_v7(),
                Money::new(10_500),
                PaymentMethod::BankTransfer,
                at(11, 9),
            )
            .unwrap();
        assert_eq!(paid.status(), ObligationStatus::Paid);
        assert_eq!(engine.account(tenant_id, account_id).unwrap().credit_used(), Money::ZERO);

        let case = engine
            .recovery_case(tenant_id, obligation_id.recovery_case())
            .unwrap()
            .unwrap();
        assert!(case.is_resolved());
    }

    #[test]
    fn overpayment_is_rejected_and_duplicate_payment_is_ignored() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let reservation_id = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 8_000, false), at(1, 9))
            .unwrap();
        let obligation_id = engine.commit(tenant_id, reservation_id, at(1, 10)).unwrap();

        let over = engine.pay(
            tenant_id,
            obligation_id,
            Uuid::now_v7(),
            Money::new(8_001),
            PaymentMethod::Upi,
            at(2, 9),
        );
        assert_eq!(rejection(over), RejectionCode::OverpaymentRejected);

        let payment_id = Uuid::now_v7();
        for _ in 0..2 {
            engine
                .pay(tenant_id, obligation_id, payment_id, Money::new(3_000), PaymentMethod::Upi, at(2, 10))
                .unwrap();
        }
        let obligation = engine.obligation(tenant_id, obligation_id).unwrap();
        assert_eq!(obligation.outstanding(), Money::new(5_000));
        assert_eq!(obligation.status(), ObligationStatus::PartiallyPaid);
        assert_eq!(engine.account(tenant_id, account_id).unwrap().credit_used(), Money::new(5_000));
    }

    #[test]
    fn delivery_without_pod_stays_in_exception_until_override() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let req = request(account_id, SellerId::new(), 12_000, false);
        let order_id = req.order_id;
        engine.reserve(tenant_id, req, at(3, 9)).unwrap();

        engine
            .record_delivery_status(tenant_id, order_id, DeliveryStatus::Delivered, None, at(3, 12))
            .unwrap();
        let delivery = engine.verify_delivery(tenant_id, order_id, None, at(3, 13)).unwrap();
        assert_eq!(delivery.status(), VerificationStatus::Exception);
        assert!(!delivery.payment_eligible());

        let retry = engine.verify_delivery(tenant_id, order_id, None, at(3, 14));
        assert_eq!(rejection(retry), RejectionCode::VerificationException);

        // Still only a hold; nothing committed.
        let account = engine.account(tenant_id, account_id).unwrap();
        assert_eq!(account.held(), Money::new(12_000));
        assert_eq!(account.credit_used(), Money::ZERO);

        let delivery = engine
            .resolve_delivery_exception(
                tenant_id,
                order_id,
                UserId::new(),
                ExceptionResolution::Verify {
                    note: "buyer confirmed by phone".to_string(),
                },
                at(3, 15),
            )
            .unwrap();
        assert_eq!(delivery.status(), VerificationStatus::Verified);
        assert!(delivery.payment_eligible());

        let account = engine.account(tenant_id, account_id).unwrap();
        assert_eq!(account.held(), Money::ZERO);
        assert_eq!(account.credit_used(), Money::new(12_000));
    }

    #[test]
    fn returned_order_releases_hold() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let req = request(account_id, SellerId::new(), 7_000, true);
        let order_id = req.order_id;
        engine.reserve(tenant_id, req, at(4, 9)).unwrap();

        let delivery = engine
            .record_delivery_status(tenant_id, order_id, DeliveryStatus::Returned, None, at(5, 9))
            .unwrap();
        assert_eq!(delivery.status(), VerificationStatus::Rejected);
        let account = engine.account(tenant_id, account_id).unwrap();
        assert_eq!(account.credit_available(), Money::new(50_000));
    }

    #[test]
    fn emi_schedule_sums_to_principal_and_completion_restores_credit() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let reservation_id = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 10_000, false), at(1, 9))
            .unwrap();
        let obligation_id = engine.commit(tenant_id, reservation_id, at(1, 10)).unwrap();

        let plan = engine
            .convert_to_emi(tenant_id, &[obligation_id], Some(3), at(2, 9))
            .unwrap();
        let principal: Money = plan.installments().iter().map(|i| i.principal_component).sum();
        let total: Money = plan.installments().iter().map(|i| i.amount()).sum();
        assert_eq!(principal, plan.principal());
        assert_eq!(plan.principal(), Money::new(10_000));
        assert!(total >= principal);

        let again = engine.convert_to_emi(tenant_id, &[obligation_id], Some(3), at(2, 10));
        assert_eq!(rejection(again), RejectionCode::AlreadyConverted);

        let plan_id = plan.id_typed();
        for installment in plan.installments() {
            engine
                .pay_installment(tenant_id, plan_id, Uuid::now_v7(), None, installment.amount(), at(3, 9))
                .unwrap();
        }
        let plan = engine.emi_plan(tenant_id, plan_id).unwrap();
        assert_eq!(plan.status(), EmiPlanStatus::Completed);
        assert_eq!(engine.account(tenant_id, account_id).unwrap().credit_used(), Money::ZERO);
    }

    #[test]
    fn batch_cutoff_excludes_later_eligibility_and_net_rederives() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let seller_id = SellerId::new();
        let account_id = open(&engine, tenant_id, 100_000);

        let cutoff = at(6, 12);
        let early = deliver(&engine, tenant_id, account_id, seller_id, 10_000, cutoff);
        let late = deliver(
            &engine,
            tenant_id,
            account_id,
            seller_id,
            5_000,
            cutoff + chrono::Duration::seconds(1),
        );

        let batch = engine
            .generate_batch(tenant_id, seller_id, cutoff, at(6, 13))
            .unwrap();
        let orders: Vec<_> = batch.lines.iter().map(|l| l.order_id).collect();
        assert_eq!(orders, vec![early]);
        assert_eq!(batch.gross_amount, Money::new(10_000));
        assert_eq!(batch.fee_amount, Money::new(200));
        assert_eq!(batch.net_amount, Money::new(9_800));

        // Same cutoff again: single-flight returns the same batch.
        let repeat = engine
            .generate_batch(tenant_id, seller_id, cutoff, at(6, 14))
            .unwrap();
        assert_eq!(repeat.batch_id, batch.batch_id);

        let next = engine
            .generate_batch(tenant_id, seller_id, at(7, 12), at(7, 13))
            .unwrap();
        let orders: Vec<_> = next.lines.iter().map(|l| l.order_id).collect();
        assert_eq!(orders, vec![late]);

        engine.approve_batch(tenant_id, batch.batch_id, UserId::new(), at(7, 14)).unwrap();
        let sent = engine.send_to_bank(tenant_id, batch.batch_id, at(7, 15)).unwrap();
        assert_eq!(sent.state, BatchState::SentToBank);
        let reference = sent.bank_reference.clone().unwrap();

        let done = engine
            .reconcile_batch(
                tenant_id,
                batch.batch_id,
                &reference,
                BankOutcome::Completed {
                    amount: Money::new(9_800),
                },
                at(7, 16),
            )
            .unwrap();
        assert_eq!(done.state, BatchState::Completed);
        let netting = compute_net(&done.lines, done.fee_rate, &done.adjustments);
        assert_eq!(netting.net, done.net_amount);
    }

    #[test]
    fn reconciliation_mismatch_opens_ticket_and_changes_nothing() {
        let tickets = Arc::new(InMemorySupportTickets::new());
        let engine = engine().with_support_tickets(tickets.clone());
        let tenant_id = TenantId::new();
        let seller_id = SellerId::new();
        let account_id = open(&engine, tenant_id, 100_000);
        deliver(&engine, tenant_id, account_id, seller_id, 20_000, at(8, 9));

        let batch = engine.generate_batch(tenant_id, seller_id, at(8, 12), at(8, 12)).unwrap();
        engine.approve_batch(tenant_id, batch.batch_id, UserId::new(), at(8, 13)).unwrap();
        engine.send_to_bank(tenant_id, batch.batch_id, at(8, 14)).unwrap();

        let result = engine.reconcile_batch(
            tenant_id,
            batch.batch_id,
            "NOT-OUR-REFERENCE",
            BankOutcome::Completed {
                amount: batch.net_amount,
            },
            at(8, 15),
        );
        assert_eq!(rejection(result), RejectionCode::BankReconciliationMismatch);

        let opened = engine.tickets().list(tenant_id);
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].code, RejectionCode::BankReconciliationMismatch);
        assert_eq!(opened[0].entity_id, batch.batch_id.to_string());

        let batch = engine.settlement_batch(tenant_id, batch.batch_id).unwrap();
        assert_eq!(batch.state, BatchState::SentToBank);
    }

    #[test]
    fn late_callback_completes_timed_out_batch() {
        let bank = Arc::new(InMemoryBankGateway::new());
        let engine = engine().with_bank_gateway(bank.clone());
        let tenant_id = TenantId::new();
        let seller_id = SellerId::new();
        let account_id = open(&engine, tenant_id, 100_000);
        deliver(&engine, tenant_id, account_id, seller_id, 30_000, at(9, 9));

        let batch = engine.generate_batch(tenant_id, seller_id, at(9, 12), at(9, 12)).unwrap();
        engine.approve_batch(tenant_id, batch.batch_id, UserId::new(), at(9, 13)).unwrap();
        bank.fail_next(GatewayError::Timeout);
        let failed = engine.send_to_bank(tenant_id, batch.batch_id, at(9, 14)).unwrap();
        assert_eq!(failed.state, BatchState::Failed);
        assert!(failed.failure.as_ref().is_some_and(|f| f.timed_out));
        assert_eq!(bank.submitted().len(), 1);

        let reference = failed.bank_reference.clone().unwrap();
        let done = engine
            .reconcile_batch(
                tenant_id,
                batch.batch_id,
                &reference,
                BankOutcome::Completed {
                    amount: failed.net_amount,
                },
                at(10, 9),
            )
            .unwrap();
        assert_eq!(done.state, BatchState::Completed);
    }

    #[test]
    fn concurrent_reserves_never_overcommit() {
        let mut config = EngineConfig::default();
        config.retry = RetryPolicy::fixed(200, Duration::from_millis(1));
        let engine = engine_with(config);
        let tenant_id = TenantId::new();
        let seller_id = SellerId::new();
        let account_id = open(&engine, tenant_id, 100_000);

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..20)
                .map(|_| {
                    let engine = &engine;
                    s.spawn(move || {
                        engine.reserve(tenant_id, request(account_id, seller_id, 10_000, false), at(1, 9))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 10);
        for failure in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(failure.code(), Some(RejectionCode::InsufficientCredit));
        }

        let account = engine.account(tenant_id, account_id).unwrap();
        assert_eq!(account.held(), Money::new(100_000));
        assert_eq!(account.credit_available(), Money::ZERO);
    }

    #[test]
    fn tenants_do_not_see_each_other() {
        let engine = engine();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let account_id = open(&engine, tenant_a, 10_000);

        assert!(engine.account(tenant_a, account_id).is_ok());
        assert!(matches!(
            engine.account(tenant_b, account_id),
            Err(EngineError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn rebuild_reproduces_read_models() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 40_000);
        let reservation_id = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 4_000, false), at(1, 9))
            .unwrap();

        let before = engine.read_models().directory().reservation(tenant_id, reservation_id);
        let replayed = engine.rebuild_read_models().unwrap();
        assert!(replayed >= 2);
        assert_eq!(engine.read_models().directory().reservation(tenant_id, reservation_id), before);
        assert_eq!(engine.read_models().directory().accounts(tenant_id).len(), 1);
    }

    #[test]
    fn replicas_sharing_leases_run_the_daily_pass_once() {
        let mut config = EngineConfig::default();
        config.credit.credit_terms_days = 0;
        config.credit.auto_decrease_limits = false;
        let store = Arc::new(InMemoryEventStore::new());
        let leases: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
        let replica = |config: EngineConfig| {
            Engine::new(store.clone(), Arc::new(InMemoryEventBus::new()), config).with_leases(leases.clone())
        };
        let first = replica(config.clone());
        let second = replica(config);

        let tenant_id = TenantId::new();
        let account_id = CreditAccountId::generate();
        first
            .open_account(tenant_id, account_id, BuyerId::new(), BuyerKind::Designer, Money::new(50_000), at(1, 8))
            .unwrap();
        let reservation_id = first
            .reserve(tenant_id, request(account_id, SellerId::new(), 10_000, false), at(1, 9))
            .unwrap();
        let obligation_id = first.commit(tenant_id, reservation_id, at(1, 10)).unwrap();
        second.rebuild_read_models().unwrap();

        let report = first.run_daily_pass(tenant_id, at(4, 2));
        assert!(report.penalties_accrued > 0);
        let penalty = first.obligation(tenant_id, obligation_id).unwrap().penalty_amount();

        let report = second.run_daily_pass(tenant_id, at(4, 3));
        assert_eq!(report.penalties_accrued, 0);
        assert_eq!(second.obligation(tenant_id, obligation_id).unwrap().penalty_amount(), penalty);
    }

    #[test]
    fn recovery_case_tracks_payments_on_its_obligation() {
        let mut config = EngineConfig::default();
        config.credit.credit_terms_days = 0;
        config.credit.auto_decrease_limits = false;
        let engine = engine_with(config);
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let reservation_id = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 6_000, false), at(1, 9))
            .unwrap();
        let obligation_id = engine.commit(tenant_id, reservation_id, at(1, 10)).unwrap();

        engine.run_daily_pass(tenant_id, at(3, 2));
        let case_id = obligation_id.recovery_case();
        assert_ne!(case_id.0, obligation_id.0);
        let case = engine.recovery_case(tenant_id, case_id).unwrap().unwrap();
        assert_eq!(case.obligation_id(), Some(obligation_id));

        engine
            .pay(tenant_id, obligation_id, Uuid::now_v7(), Money::new(2_000), PaymentMethod::Upi, at(3, 9))
            .unwrap();
        let case = engine.recovery_case(tenant_id, case_id).unwrap().unwrap();
        assert!(!case.is_resolved());
        let outstanding = engine.obligation(tenant_id, obligation_id).unwrap().outstanding();
        assert_eq!(case.outstanding(), outstanding);

        engine
            .pay(tenant_id, obligation_id, Uuid::now_v7(), outstanding, PaymentMethod::Upi, at(3, 10))
            .unwrap();
        let case = engine.recovery_case(tenant_id, case_id).unwrap().unwrap();
        assert!(case.is_resolved());
        assert_eq!(engine.obligation(tenant_id, obligation_id).unwrap().status(), ObligationStatus::Paid);
    }

    #[test]
    fn recovery_case_waits_for_the_first_bucket_threshold() {
        let mut config = EngineConfig::default();
        config.credit.credit_terms_days = 0;
        config.credit.auto_decrease_limits = false;
        config.recovery.bucket_thresholds_days = vec![10, 20, 31];
        let engine = engine_with(config);
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let reservation_id = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 5_000, false), at(1, 9))
            .unwrap();
        let obligation_id = engine.commit(tenant_id, reservation_id, at(1, 10)).unwrap();

        engine.run_daily_pass(tenant_id, at(3, 2));
        let obligation = engine.obligation(tenant_id, obligation_id).unwrap();
        assert_eq!(obligation.status(), ObligationStatus::Overdue);
        assert!(engine.recovery_case(tenant_id, obligation_id.recovery_case()).unwrap().is_none());

        engine.run_daily_pass(tenant_id, at(11, 2));
        let case = engine
            .recovery_case(tenant_id, obligation_id.recovery_case())
            .unwrap()
            .expect("ten days overdue opens a case");
        assert_eq!(case.days_overdue(), 10);
    }

    #[test]
    fn failed_emi_conversion_leaves_obligation_untouched() {
        let mut config = EngineConfig::default();
        config.repayment.emi_max_tenure_months = u32::MAX;
        let engine = engine_with(config);
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let reservation_id = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 10_000, false), at(1, 9))
            .unwrap();
        let obligation_id = engine.commit(tenant_id, reservation_id, at(1, 10)).unwrap();

        let result = engine.convert_to_emi(tenant_id, &[obligation_id], Some(4_000_000), at(2, 9));
        assert!(matches!(result, Err(EngineError::Validation(_))));

        let obligation = engine.obligation(tenant_id, obligation_id).unwrap();
        assert_eq!(obligation.status(), ObligationStatus::Due);
        assert_eq!(obligation.outstanding(), Money::new(10_000));
        assert!(obligation.emi_plan_id().is_none());

        // A sane tenure still converts afterwards.
        let plan = engine.convert_to_emi(tenant_id, &[obligation_id], Some(6), at(2, 10)).unwrap();
        assert_eq!(plan.principal(), Money::new(10_000));
    }

    #[test]
    fn tenure_above_the_configured_maximum_is_refused() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let reservation_id = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 3_000, false), at(1, 9))
            .unwrap();
        let obligation_id = engine.commit(tenant_id, reservation_id, at(1, 10)).unwrap();

        let max = engine.config().repayment.emi_max_tenure_months;
        let result = engine.convert_to_emi(tenant_id, &[obligation_id], Some(max + 1), at(2, 9));
        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(engine.obligation(tenant_id, obligation_id).unwrap().status(), ObligationStatus::Due);
    }

    #[test]
    fn released_hold_closes_the_delivery_gate() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let seller_id = SellerId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let req = request(account_id, seller_id, 9_000, false);
        let order_id = req.order_id;
        let reservation_id = engine.reserve(tenant_id, req, at(2, 9)).unwrap();

        engine.release(tenant_id, reservation_id, "buyer cancelled", at(2, 10)).unwrap();
        assert_eq!(engine.delivery(tenant_id, order_id).unwrap().status(), VerificationStatus::Rejected);

        engine
            .record_delivery_status(tenant_id, order_id, DeliveryStatus::Delivered, Some("pod-7".to_string()), at(2, 11))
            .unwrap();
        let delivery = engine
            .verify_delivery(tenant_id, order_id, Some("pod-7".to_string()), at(2, 12))
            .unwrap();
        assert_eq!(delivery.status(), VerificationStatus::Rejected);
        assert!(!delivery.payment_eligible());

        let account = engine.account(tenant_id, account_id).unwrap();
        assert_eq!(account.credit_used(), Money::ZERO);
        assert_eq!(account.credit_available(), Money::new(50_000));
        assert!(engine.read_models().directory().sellers_with_unbatched_lines(tenant_id).is_empty());
    }

    #[test]
    fn committed_hold_refuses_a_late_cancellation() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let req = request(account_id, SellerId::new(), 4_000, false);
        let order_id = req.order_id;
        let reservation_id = engine.reserve(tenant_id, req, at(2, 9)).unwrap();
        engine.commit(tenant_id, reservation_id, at(2, 10)).unwrap();

        let cancel =
            engine.record_delivery_status(tenant_id, order_id, DeliveryStatus::Cancelled, None, at(2, 11));
        assert_eq!(rejection(cancel), RejectionCode::AlreadyCommitted);

        let delivery = engine.delivery(tenant_id, order_id).unwrap();
        assert_eq!(delivery.status(), VerificationStatus::Pending);
        assert_eq!(engine.account(tenant_id, account_id).unwrap().credit_used(), Money::new(4_000));
    }

    #[test]
    fn commit_and_release_do_not_depend_on_the_read_side() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let first = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 2_000, false), at(2, 9))
            .unwrap();
        let second = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 3_000, false), at(2, 9))
            .unwrap();

        // Drop every projection; decisions must still resolve the account.
        engine.read_models().directory().clear_tenant(tenant_id);
        engine.commit(tenant_id, first, at(2, 10)).unwrap();
        engine.release(tenant_id, second, "out of stock", at(2, 10)).unwrap();

        let account = engine.account(tenant_id, account_id).unwrap();
        assert_eq!(account.credit_used(), Money::new(2_000));
        assert_eq!(account.held(), Money::ZERO);
    }

    #[test]
    fn daily_pass_restores_credit_a_crashed_payment_left_behind() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let reservation_id = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 8_000, false), at(1, 9))
            .unwrap();
        let obligation_id = engine.commit(tenant_id, reservation_id, at(1, 10)).unwrap();

        // The payment lands on the obligation but nothing after it runs.
        let payment_id = Uuid::now_v7();
        engine
            .dispatcher()
            .dispatch(
                tenant_id,
                obligation_id.0,
                OBLIGATION_AGGREGATE_TYPE,
                ObligationCommand::RecordPayment(RecordPayment {
                    tenant_id,
                    obligation_id,
                    payment_id,
                    amount: Money::new(8_000),
                    method: PaymentMethod::BankTransfer,
                    occurred_at: at(2, 9),
                }),
                |_, id| RepaymentObligation::empty(ObligationId(id)),
            )
            .unwrap();
        assert_eq!(engine.account(tenant_id, account_id).unwrap().credit_used(), Money::new(8_000));

        let report = engine.run_daily_pass(tenant_id, at(3, 2));
        assert_eq!(report.restorations_repaired, 1);
        assert_eq!(engine.account(tenant_id, account_id).unwrap().credit_used(), Money::ZERO);

        // Retrying the payment afterwards changes nothing.
        engine
            .pay(tenant_id, obligation_id, payment_id, Money::new(8_000), PaymentMethod::BankTransfer, at(3, 9))
            .unwrap();
        let account = engine.account(tenant_id, account_id).unwrap();
        assert_eq!(account.credit_used(), Money::ZERO);
        assert_eq!(account.credit_available(), Money::new(50_000));
    }

    #[test]
    fn retried_payment_finishes_its_credit_restoration() {
        let engine = engine();
        let tenant_id = TenantId::new();
        let account_id = open(&engine, tenant_id, 50_000);
        let reservation_id = engine
            .reserve(tenant_id, request(account_id, SellerId::new(), 5_000, false), at(1, 9))
            .unwrap();
        let obligation_id = engine.commit(tenant_id, reservation_id, at(1, 10)).unwrap();

        let payment_id = Uuid::now_v7();
        engine
            .dispatcher()
            .dispatch(
                tenant_id,
                obligation_id.0,
                OBLIGATION_AGGREGATE_TYPE,
                ObligationCommand::RecordPayment(RecordPayment {
                    tenant_id,
                    obligation_id,
                    payment_id,
                    amount: Money::new(2_000),
                    method: PaymentMethod::Upi,
                    occurred_at: at(2, 9),
                }),
                |_, id| RepaymentObligation::empty(ObligationId(id)),
            )
            .unwrap();

        engine
            .pay(tenant_id, obligation_id, payment_id, Money::new(2_000), PaymentMethod::Upi, at(2, 10))
            .unwrap();
        assert_eq!(engine.account(tenant_id, account_id).unwrap().credit_used(), Money::new(3_000));
    }
}
