// tests/webhook_dispatch.rs
//
// HTTP-level tests for the shared webhook endpoint: routing, signature
// rejection, idempotent replays.

use actix_web::{test, web, App};
use serde_json::Value;

use goodspay::models::{IntentKind, TransactionStatus};
use goodspay::{api, AppState};

mod support;

macro_rules! app {
    ($h:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(AppState {
                    engine: $h.engine.clone(),
                }))
                .service(web::scope("/api").service(api::payments::create_payment))
                .service(api::webhooks::provider_webhook),
        )
        .await
    };
}

#[actix_web::test]
async fn unknown_provider_is_404() {
    let h = support::harness().await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/webhook/nosuch")
        .insert_header(("x-signature", support::CALLBACK_TOKEN))
        .set_payload(support::success_body("points-whatever"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn bad_signature_is_401_and_leaves_no_trace() {
    let h = support::harness().await;
    let session = support::begin_points(&h, 1, "pro-30", IntentKind::New).await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/webhook/points")
        .insert_header(("x-signature", "wrong-token"))
        .set_payload(support::success_body(&session.payment_id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let tx = h
        .engine
        .ledger()
        .get(&session.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(h.notifier.user_message_count(1).await, 0);
}

#[actix_web::test]
async fn missing_signature_is_401() {
    let h = support::harness().await;
    let session = support::begin_points(&h, 1, "pro-30", IntentKind::New).await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/webhook/points")
        .set_payload(support::success_body(&session.payment_id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn malformed_payload_is_400() {
    let h = support::harness().await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/webhook/points")
        .insert_header(("x-signature", support::CALLBACK_TOKEN))
        .set_payload(r#"{"status":"paid"}"#)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn unknown_payment_id_is_acknowledged_and_ignored() {
    let h = support::harness().await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/webhook/points")
        .insert_header(("x-signature", support::CALLBACK_TOKEN))
        .set_payload(support::success_body("points-never-opened"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["ignored"], true);
}

#[actix_web::test]
async fn full_purchase_flow_over_http() {
    let h = support::harness().await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/api/create-payment")
        .set_json(serde_json::json!({
            "user_id": 1,
            "plan_id": "pro-30",
            "provider": "points",
        }))
        .to_request();
    let session: Value = test::call_and_read_body_json(&app, req).await;
    let payment_id = session["payment_id"].as_str().unwrap().to_string();
    assert!(payment_id.starts_with("points-"));
    assert_eq!(session["checkout"]["type"], "invoice");

    let req = test::TestRequest::post()
        .uri("/webhook/points")
        .insert_header(("x-signature", support::CALLBACK_TOKEN))
        .set_payload(support::success_body(&payment_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["ok"], true);
    assert!(body.get("idempotent").is_none());

    let tx = h.engine.ledger().get(&payment_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert!(tx.delivered_at.is_some());

    let ent = h
        .stores
        .entitlements
        .get(1, "digital")
        .await
        .unwrap()
        .expect("entitlement created");
    assert_eq!(ent.product_id, "pro-30");
    assert_eq!(h.notifier.user_message_count(1).await, 1);
}

#[actix_web::test]
async fn replayed_success_webhook_is_idempotent() {
    let h = support::harness().await;
    let session = support::begin_points(&h, 1, "pro-30", IntentKind::New).await;
    let app = app!(h);

    for expect_idempotent in [false, true] {
        let req = test::TestRequest::post()
            .uri("/webhook/points")
            .insert_header(("x-signature", support::CALLBACK_TOKEN))
            .set_payload(support::success_body(&session.payment_id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body.get("idempotent").is_some(), expect_idempotent);
    }

    // One delivery, one notification, one entitlement.
    assert_eq!(h.notifier.user_message_count(1).await, 1);
    let ent = h.stores.entitlements.get(1, "digital").await.unwrap();
    assert!(ent.is_some());
}

#[actix_web::test]
async fn cancel_webhook_marks_transaction_canceled() {
    let h = support::harness().await;
    let session = support::begin_points(&h, 2, "pro-30", IntentKind::New).await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/webhook/points")
        .insert_header(("x-signature", support::CALLBACK_TOKEN))
        .set_payload(support::cancel_body(&session.payment_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["ok"], true);

    let tx = h
        .engine
        .ledger()
        .get(&session.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Canceled);
    assert!(h.stores.entitlements.get(2, "digital").await.unwrap().is_none());
}

#[actix_web::test]
async fn success_after_cancel_is_acknowledged_without_effects() {
    let h = support::harness().await;
    let session = support::begin_points(&h, 2, "pro-30", IntentKind::New).await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/webhook/points")
        .insert_header(("x-signature", support::CALLBACK_TOKEN))
        .set_payload(support::cancel_body(&session.payment_id))
        .to_request();
    let _: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/webhook/points")
        .insert_header(("x-signature", support::CALLBACK_TOKEN))
        .set_payload(support::success_body(&session.payment_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["ignored"], true);

    let tx = h
        .engine
        .ledger()
        .get(&session.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Canceled);
    assert!(h.stores.entitlements.get(2, "digital").await.unwrap().is_none());
    // The conflict was escalated to the operator.
    assert!(!h.notifier.operator_messages.lock().await.is_empty());
}

#[actix_web::test]
async fn create_payment_rejects_unknown_plan() {
    let h = support::harness().await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/api/create-payment")
        .set_json(serde_json::json!({
            "user_id": 1,
            "plan_id": "nope",
            "provider": "points",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn create_payment_rejects_unknown_provider() {
    let h = support::harness().await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/api/create-payment")
        .set_json(serde_json::json!({
            "user_id": 1,
            "plan_id": "pro-30",
            "provider": "wire",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}
