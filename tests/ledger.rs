// tests/ledger.rs
//
// Transaction state machine guarantees at the ledger level.

use std::sync::Arc;

use goodspay::error::PaymentError;
use goodspay::ledger::{Completion, TransactionLedger};
use goodspay::models::{Currency, IntentKind, PurchaseIntent, TransactionStatus};
use goodspay::store::memory::MemoryTransactionStore;

fn ledger() -> TransactionLedger {
    TransactionLedger::new(Arc::new(MemoryTransactionStore::default()))
}

fn intent(user_id: i64) -> PurchaseIntent {
    PurchaseIntent {
        user_id,
        plan_id: "pro-30".into(),
        devices: 1,
        duration_days: 30,
        price: 1000.0,
        currency: Currency::Xtr,
        kind: IntentKind::New,
    }
}

#[tokio::test]
async fn duplicate_payment_id_is_rejected_on_open() {
    let ledger = ledger();
    ledger.open("p1", 1, &intent(1)).await.unwrap();

    let err = ledger.open("p1", 1, &intent(1)).await.unwrap_err();
    assert!(matches!(err, PaymentError::DuplicatePaymentId(id) if id == "p1"));
}

#[tokio::test]
async fn complete_then_complete_is_idempotent() {
    let ledger = ledger();
    ledger.open("p1", 1, &intent(1)).await.unwrap();

    assert!(matches!(
        ledger.complete("p1").await.unwrap(),
        Completion::Applied(_)
    ));
    assert!(matches!(
        ledger.complete("p1").await.unwrap(),
        Completion::AlreadyDone(_)
    ));
}

#[tokio::test]
async fn conflicting_transition_is_an_error() {
    let ledger = ledger();
    ledger.open("p1", 1, &intent(1)).await.unwrap();
    ledger.cancel("p1").await.unwrap();

    let err = ledger.complete("p1").await.unwrap_err();
    match err {
        PaymentError::InvalidTransition { payment_id, from, to } => {
            assert_eq!(payment_id, "p1");
            assert_eq!(from, TransactionStatus::Canceled);
            assert_eq!(to, TransactionStatus::Completed);
        }
        other => panic!("expected InvalidTransition, got {other}"),
    }
}

#[tokio::test]
async fn unknown_payment_id_is_an_error() {
    let ledger = ledger();
    assert!(matches!(
        ledger.complete("ghost").await.unwrap_err(),
        PaymentError::UnknownPayment(_)
    ));
}

#[tokio::test]
async fn concurrent_completes_apply_exactly_once() {
    let ledger = Arc::new(ledger());
    ledger.open("p1", 1, &intent(1)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let _guard = ledger.lock("p1").await;
            ledger.complete("p1").await.unwrap()
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), Completion::Applied(_)) {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
}

#[tokio::test]
async fn delivery_is_recorded_once() {
    use goodspay::store::DeliveryRecord;

    let ledger = ledger();
    ledger.open("p1", 1, &intent(1)).await.unwrap();
    ledger.complete("p1").await.unwrap();

    let payload = serde_json::json!({"kind": "digital"});
    assert_eq!(
        ledger.record_delivery("p1", &payload).await.unwrap(),
        DeliveryRecord::First
    );
    assert_eq!(
        ledger.record_delivery("p1", &payload).await.unwrap(),
        DeliveryRecord::AlreadyDelivered
    );

    let tx = ledger.get("p1").await.unwrap().unwrap();
    assert!(tx.delivered_at.is_some());
    assert_eq!(tx.delivery.unwrap()["kind"], "digital");
}
