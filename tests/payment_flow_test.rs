//! End-to-end payment, settlement and ledger behaviour on in-memory stores.

mod common;

use bigdecimal::BigDecimal;
use chrono::Duration;
use common::{checkout_signature, dec, TestApp};
use ridepay_backend::database::payment_repository::PaymentStatus;
use ridepay_backend::database::wallet_repository::{TransactionFilter, TransactionType};
use ridepay_backend::services::payment_service::PaymentServiceError;
use ridepay_backend::services::wallet_ledger::LedgerError;
use uuid::Uuid;

#[tokio::test]
async fn test_paid_ride_credits_driver_net_of_commission() {
    let app = TestApp::new();
    let ride = app.book_ride("1000.00").await;

    let order = app
        .payments
        .create_payment(ride.booking_id, ride.passenger_id, &dec("1000.00"))
        .await
        .unwrap();
    let signature = checkout_signature(&order.gateway_order_id, "pay_001");

    let paid = app
        .payments
        .process_payment("pay_001", &order.gateway_order_id, &signature)
        .await
        .unwrap();
    assert_eq!(paid.status, PaymentStatus::Success);
    assert!(paid.settled_at.is_some());

    // A repeated confirmation returns the stored record and credits nothing.
    let again = app
        .payments
        .process_payment("pay_001", &order.gateway_order_id, &signature)
        .await
        .unwrap();
    assert_eq!(again.id, paid.id);

    let balance = app.ledger.balance(ride.driver_id).await.unwrap();
    assert_eq!(balance.balance, dec("900.00"));
    assert_eq!(balance.total_earnings, dec("900.00"));

    let history = app
        .ledger
        .transaction_history(ride.driver_id, &TransactionFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].transaction_type, TransactionType::Credit);
    assert_eq!(history[0].reference_id.as_deref(), Some("pay_001"));
    assert_eq!(
        history[0].description,
        "Ride earnings: Pune → Mumbai (1000.00 - 100.00 commission)"
    );
    assert!(app.ledger.transaction_exists("pay_001").await.unwrap());
    assert!(app.payments.has_successful_payment(ride.booking_id).await.unwrap());
}

#[tokio::test]
async fn test_forged_signature_fails_payment_and_leaves_wallet_untouched() {
    let app = TestApp::new();
    let ride = app.book_ride("1000.00").await;
    let order = app
        .payments
        .create_payment(ride.booking_id, ride.passenger_id, &dec("1000.00"))
        .await
        .unwrap();

    let err = app
        .payments
        .process_payment("pay_002", &order.gateway_order_id, "not-a-signature")
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentServiceError::SignatureVerificationFailed));

    let stored = app.payments.get_payment(order.payment_id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(
        stored.failure_reason.as_deref(),
        Some("Invalid payment signature")
    );
    assert!(!app.ledger.transaction_exists("pay_002").await.unwrap());

    // FAILED is terminal: a later valid confirmation cannot revive it.
    let signature = checkout_signature(&order.gateway_order_id, "pay_002");
    let err = app
        .payments
        .process_payment("pay_002", &order.gateway_order_id, &signature)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentServiceError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn test_concurrent_confirmations_credit_once() {
    let app = TestApp::new();
    let ride = app.book_ride("480.00").await;
    let order = app
        .payments
        .create_payment(ride.booking_id, ride.passenger_id, &dec("480.00"))
        .await
        .unwrap();
    let signature = checkout_signature(&order.gateway_order_id, "pay_race");

    let (a, b) = tokio::join!(
        app.payments
            .process_payment("pay_race", &order.gateway_order_id, &signature),
        app.payments
            .process_payment("pay_race", &order.gateway_order_id, &signature),
    );
    assert_eq!(a.unwrap().status, PaymentStatus::Success);
    assert_eq!(b.unwrap().status, PaymentStatus::Success);

    let summary = app.ledger.wallet_summary(ride.driver_id).await.unwrap();
    assert_eq!(summary.transaction_count, 1);
    assert_eq!(summary.balance.balance, dec("432.00"));
}

#[tokio::test]
async fn test_concurrent_postings_keep_balance_reconstructible() {
    let app = TestApp::new();
    let driver = Uuid::new_v4();
    app.ledger
        .credit(driver, &dec("500.00"), "Opening credit", Some("seed"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let ledger = app.ledger.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                ledger
                    .credit(driver, &dec("12.35"), "Ride earnings", Some(&format!("ride_{}", i)))
                    .await
                    .map(|_| ())
            } else {
                ledger
                    .withdraw(driver, &dec("40.00"), "Payout")
                    .await
                    .map(|_| ())
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let audit = app.ledger.audit_wallet(driver).await.unwrap();
    assert!(audit.consistent);
    assert_eq!(audit.transaction_count, 21);
    // 500 + 10 * 12.35 - 10 * 40
    assert_eq!(audit.cached_balance, dec("223.50"));

    let history = app
        .ledger
        .transaction_history(driver, &TransactionFilter::default())
        .await
        .unwrap();
    // Snapshots chain: each entry starts where the previous one ended.
    for pair in history.windows(2) {
        assert_eq!(pair[0].balance_before, pair[1].balance_after);
        assert!(pair[0].id > pair[1].id);
    }
}

#[tokio::test]
async fn test_withdrawals_never_overdraw() {
    let app = TestApp::new();
    let driver = Uuid::new_v4();
    app.ledger
        .credit(driver, &dec("100.00"), "Ride earnings", Some("only_ride"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let ledger = app.ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.withdraw(driver, &dec("30.00"), "Payout").await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientBalance { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(succeeded, 3);

    let balance = app.ledger.balance(driver).await.unwrap();
    assert_eq!(balance.balance, dec("10.00"));
    assert_eq!(balance.total_withdrawn, dec("90.00"));
    assert!(balance.balance >= BigDecimal::from(0));
}

#[tokio::test]
async fn test_commission_and_driver_share_add_up_to_fare() {
    let app = TestApp::with_commission("0.125");
    let driver = Uuid::new_v4();
    let fares = ["333.33", "0.01", "999.99", "47.50", "12.34"];

    let mut total = BigDecimal::from(0);
    for (i, fare) in fares.iter().enumerate() {
        let ride = app.book_ride_for(driver, fare).await;
        app.pay(&ride, fare, &format!("pay_split_{}", i)).await;
        total += dec(fare);

        let split = app.settlement.split(&dec(fare));
        assert_eq!(&split.commission + &split.driver_share, dec(fare));
        assert!(split.driver_share >= BigDecimal::from(0));
    }

    let expected: BigDecimal = fares
        .iter()
        .map(|f| app.settlement.split(&dec(f)).driver_share)
        .sum();
    let balance = app.ledger.balance(driver).await.unwrap();
    assert_eq!(balance.total_earnings, expected);
    assert!(balance.total_earnings < total);
}

#[tokio::test]
async fn test_abandoned_payments_expire_after_timeout() {
    let app = TestApp::new();
    let stale_ride = app.book_ride("200.00").await;
    let stale = app
        .payments
        .create_payment(stale_ride.booking_id, stale_ride.passenger_id, &dec("200.00"))
        .await
        .unwrap();

    app.clock.advance(Duration::hours(23));
    let fresh_ride = app.book_ride("150.00").await;
    let fresh = app
        .payments
        .create_payment(fresh_ride.booking_id, fresh_ride.passenger_id, &dec("150.00"))
        .await
        .unwrap();

    app.clock.advance(Duration::hours(2));
    let cleaned = app
        .payments
        .cleanup_stale_payments(Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(cleaned, 1);

    let expired = app.payments.get_payment(stale.payment_id).await.unwrap();
    assert_eq!(expired.status, PaymentStatus::Failed);
    assert_eq!(
        expired.failure_reason.as_deref(),
        Some("Payment timeout - automatically cancelled")
    );
    let still_open = app.payments.get_payment(fresh.payment_id).await.unwrap();
    assert_eq!(still_open.status, PaymentStatus::Created);

    // A second sweep finds nothing new.
    assert_eq!(
        app.payments
            .cleanup_stale_payments(Duration::hours(24))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_ledger_outage_is_recovered_by_reconciliation() {
    let app = TestApp::new();
    let ride = app.book_ride("700.00").await;

    app.wallet_store.set_unavailable(true);
    let payment_id = app.pay(&ride, "700.00", "pay_outage").await;

    // The passenger's payment stands even though the driver was not paid.
    let payment = app.payments.get_payment(payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert!(payment.settled_at.is_none());

    app.wallet_store.set_unavailable(false);
    app.clock.advance(Duration::minutes(10));
    let report = app
        .settlement
        .reconcile_unsettled(Duration::minutes(2), 100)
        .await
        .unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(report.failed, 0);

    let balance = app.ledger.balance(ride.driver_id).await.unwrap();
    assert_eq!(balance.balance, dec("630.00"));
    assert!(app
        .payments
        .get_payment(payment_id)
        .await
        .unwrap()
        .settled_at
        .is_some());

    // Nothing left to reconcile.
    let report = app
        .settlement
        .reconcile_unsettled(Duration::minutes(2), 100)
        .await
        .unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn test_refunds_claw_back_driver_share() {
    let app = TestApp::new();
    let ride = app.book_ride("1000.00").await;
    let payment_id = app.pay(&ride, "1000.00", "pay_refund").await;

    let partial = app
        .payments
        .refund_payment(payment_id, Some(dec("250.00")), Some("Late pickup"))
        .await
        .unwrap();
    assert_eq!(partial.payment.status, PaymentStatus::PartialRefund);
    assert_eq!(partial.clawback.unwrap().amount, dec("225.00"));

    let err = app
        .payments
        .refund_payment(payment_id, Some(dec("800.00")), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentServiceError::RefundExceedsRefundable { .. }));

    let rest = app
        .payments
        .refund_payment(payment_id, None, None)
        .await
        .unwrap();
    assert_eq!(rest.payment.status, PaymentStatus::Refunded);
    assert_eq!(rest.payment.refunded_amount, dec("1000.00"));

    let balance = app.ledger.balance(ride.driver_id).await.unwrap();
    assert_eq!(balance.balance, dec("0.00"));
    assert!(app.ledger.audit_wallet(ride.driver_id).await.unwrap().consistent);
    assert!(!app.payments.has_successful_payment(ride.booking_id).await.unwrap());
}

#[tokio::test]
async fn test_user_payment_totals() {
    let app = TestApp::new();
    let first = app.book_ride("120.00").await;
    app.pay(&first, "120.00", "pay_t1").await;

    let payments = app.payments.payments_for_user(first.passenger_id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(
        app.payments.total_paid_by_user(first.passenger_id).await.unwrap(),
        dec("120.00")
    );
    assert_eq!(
        app.payments.total_paid_by_user(Uuid::new_v4()).await.unwrap(),
        BigDecimal::from(0)
    );
}

#[tokio::test]
async fn test_worker_cycles_sweep_and_reconcile() {
    use ridepay_backend::workers::{
        PaymentCleanupConfig, PaymentCleanupWorker, SettlementReconciler,
        SettlementReconcilerConfig,
    };
    use std::time::Duration as StdDuration;

    let app = TestApp::new();
    let abandoned = app.book_ride("90.00").await;
    app.payments
        .create_payment(abandoned.booking_id, abandoned.passenger_id, &dec("90.00"))
        .await
        .unwrap();

    let ride = app.book_ride("200.00").await;
    app.wallet_store.set_unavailable(true);
    app.pay(&ride, "200.00", "pay_worker").await;
    app.wallet_store.set_unavailable(false);

    app.clock.advance(Duration::hours(2));

    let cleanup = PaymentCleanupWorker::new(
        app.payments.clone(),
        PaymentCleanupConfig {
            interval: StdDuration::from_secs(60),
            payment_timeout: StdDuration::from_secs(3600),
        },
    );
    assert_eq!(cleanup.run_cycle().await.unwrap(), 1);

    let reconciler = SettlementReconciler::new(
        app.settlement.clone(),
        SettlementReconcilerConfig::default(),
    );
    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(
        app.ledger.balance(ride.driver_id).await.unwrap().balance,
        dec("180.00")
    );
}

#[tokio::test]
async fn test_workers_stop_when_shutdown_sender_is_dropped() {
    use ridepay_backend::workers::{
        PaymentCleanupConfig, PaymentCleanupWorker, SettlementReconciler,
        SettlementReconcilerConfig,
    };
    use std::time::Duration as StdDuration;
    use tokio::sync::watch;

    let app = TestApp::new();
    let (tx, rx) = watch::channel(false);

    let cleanup = tokio::spawn(
        PaymentCleanupWorker::new(
            app.payments.clone(),
            PaymentCleanupConfig {
                interval: StdDuration::from_secs(3600),
                payment_timeout: StdDuration::from_secs(3600),
            },
        )
        .run(rx.clone()),
    );
    let reconciler = tokio::spawn(
        SettlementReconciler::new(app.settlement.clone(), SettlementReconcilerConfig::default())
            .run(rx),
    );

    drop(tx);

    let joined = tokio::time::timeout(StdDuration::from_secs(5), async {
        cleanup.await.unwrap();
        reconciler.await.unwrap();
    })
    .await;
    assert!(joined.is_ok(), "workers kept running after the sender was dropped");
}

#[tokio::test]
async fn test_refund_before_settlement_is_reconciled_net() {
    let app = TestApp::new();
    let ride = app.book_ride("1000.00").await;

    app.wallet_store.set_unavailable(true);
    let payment_id = app.pay(&ride, "1000.00", "pay_refunded_early").await;
    let refund = app
        .payments
        .refund_payment(payment_id, Some(dec("400.00")), Some("shorter trip"))
        .await
        .unwrap();
    assert_eq!(refund.payment.status, PaymentStatus::PartialRefund);
    assert!(refund.clawback.is_none());
    app.wallet_store.set_unavailable(false);

    app.clock.advance(Duration::minutes(30));
    let report = app
        .settlement
        .reconcile_unsettled(Duration::minutes(2), 50)
        .await
        .unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.settled, 1);

    assert_eq!(
        app.ledger.balance(ride.driver_id).await.unwrap().balance,
        dec("540.00")
    );
    let payment = app.payments.get_payment(payment_id).await.unwrap();
    assert!(payment.settled_at.is_some());

    // The rest of the fare is refunded after settlement: the usual clawback applies.
    let rest = app
        .payments
        .refund_payment(payment_id, None, None)
        .await
        .unwrap();
    assert_eq!(rest.clawback.unwrap().amount, dec("540.00"));
    assert_eq!(
        app.ledger.balance(ride.driver_id).await.unwrap().balance,
        dec("0")
    );
}
