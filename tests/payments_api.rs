//! Authenticated payment and donation endpoints.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use crowdfunding_web_server::models::payment::PaymentStatus;
use crowdfunding_web_server::models::project::ProjectStatus;
use serde_json::json;

#[tokio::test]
async fn health_reports_connected_store() {
    let app = TestApp::new(10_000);
    let request = axum::http::Request::builder()
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, json) = app.send(request).await;

    assert_eq!(status, 200);
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn protected_routes_require_an_active_token() {
    let app = TestApp::new(10_000);

    let no_token = axum::http::Request::builder()
        .uri("/api/v1/payments/5001")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, json) = app.send(no_token).await;
    assert_eq!(status, 401);
    assert_eq!(json["error"]["code"], "invalid_token");

    let (status, _) = app
        .send(authed("GET", "/api/v1/payments/5001", "unknown-token", None))
        .await;
    assert_eq!(status, 401);

    app.store.revoke_token(OTHER_TOKEN);
    let (status, _) = app
        .send(authed("GET", "/api/v1/payments/5001", OTHER_TOKEN, None))
        .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn intention_opens_a_pending_payment() {
    let app = TestApp::new(10_000);

    let (status, json) = app
        .send(authed(
            "POST",
            "/api/v1/payments/intentions",
            DONOR_TOKEN,
            Some(json!({ "project_id": app.project.id, "amount_cents": 2_500 })),
        ))
        .await;

    assert_eq!(status, 201);
    assert_eq!(json["public_key"], "egy_pk_test");
    assert_eq!(json["amount_cents"], 2_500);
    assert_eq!(json["currency"], "EGP");

    let order_id = json["order_id"].as_str().unwrap();
    let payment = app.state.ledger.payment(order_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.user_id, app.donor.id);
    assert_eq!(json["client_secret"], payment.provider_payment_key);

    let sent = app.provider.intentions.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].special_reference, payment.id.to_string());
    assert_eq!(sent[0].billing_email, "donor@example.com");
}

#[tokio::test]
async fn intention_above_remaining_target_is_rejected_before_the_provider() {
    let app = TestApp::new(10_000);

    let (status, json) = app
        .send(authed(
            "POST",
            "/api/v1/payments/intentions",
            DONOR_TOKEN,
            Some(json!({ "project_id": app.project.id, "amount_cents": 10_001 })),
        ))
        .await;

    assert_eq!(status, 400);
    assert!(json["error"]["message"].as_str().unwrap().contains("Maximum allowed"));
    assert!(app.provider.intentions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn provider_refusal_records_nothing() {
    let app = TestApp::new(10_000);
    *app.provider.refuse_intentions.lock().unwrap() = true;

    let (status, _) = app
        .send(authed(
            "POST",
            "/api/v1/payments/intentions",
            DONOR_TOKEN,
            Some(json!({ "project_id": app.project.id, "amount_cents": 1_000 })),
        ))
        .await;

    assert_eq!(status, 502);
    assert!(app.state.ledger.payment("5000").await.is_err());
}

#[tokio::test]
async fn payment_is_only_visible_to_its_owner() {
    let app = TestApp::new(10_000);
    app.open_payment("5200", 1_000).await;

    let (mine, json) = app
        .send(authed("GET", "/api/v1/payments/5200", DONOR_TOKEN, None))
        .await;
    let (theirs, _) = app
        .send(authed("GET", "/api/v1/payments/5200", OTHER_TOKEN, None))
        .await;

    assert_eq!(mine, 200);
    assert_eq!(json["status"], "pending");
    assert_eq!(json["order_id"], "5200");
    assert_eq!(theirs, 404);
}

#[tokio::test]
async fn verify_runs_polling_in_the_background() {
    let app = TestApp::new(10_000);
    app.open_payment("5201", 1_000).await;
    app.provider.settle(true, 1_000);

    let (status, json) = app
        .send(authed("POST", "/api/v1/payments/5201/verify", DONOR_TOKEN, None))
        .await;
    assert_eq!(status, 202);
    assert_eq!(json["status"], "pending");

    let mut settled = false;
    for _ in 0..50 {
        if app.state.ledger.payment("5201").await.unwrap().status == PaymentStatus::Paid {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(settled, "background verification should pay the payment");

    let (status, json) = app
        .send(authed("POST", "/api/v1/payments/5201/verify", DONOR_TOKEN, None))
        .await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "paid");
    assert_eq!(app.provider.inquiries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn manual_donation_reaching_target_finishes_the_project() {
    let app = TestApp::new(5_000);

    let (first, _) = app
        .send(authed(
            "POST",
            "/api/v1/donations",
            DONOR_TOKEN,
            Some(json!({ "project_id": app.project.id, "amount_cents": 3_000 })),
        ))
        .await;
    let (second, json) = app
        .send(authed(
            "POST",
            "/api/v1/donations",
            OTHER_TOKEN,
            Some(json!({ "project_id": app.project.id, "amount_cents": 2_000 })),
        ))
        .await;

    assert_eq!(first, 201);
    assert_eq!(second, 201);
    assert_eq!(json["amount_cents"], 2_000);
    assert_eq!(
        app.store.project(app.project.id).unwrap().status,
        ProjectStatus::Finished
    );
    assert_eq!(app.notifier.count("donation_received"), 2);
    assert_eq!(app.notifier.count("project_funded"), 1);

    let (closed, json) = app
        .send(authed(
            "POST",
            "/api/v1/donations",
            DONOR_TOKEN,
            Some(json!({ "project_id": app.project.id, "amount_cents": 1 })),
        ))
        .await;
    assert_eq!(closed, 422);
    assert_eq!(json["error"]["code"], "project_closed");
}

#[tokio::test]
async fn donation_to_unknown_project_is_404() {
    let app = TestApp::new(5_000);

    let (status, _) = app
        .send(authed(
            "POST",
            "/api/v1/donations",
            DONOR_TOKEN,
            Some(json!({ "project_id": uuid::Uuid::new_v4(), "amount_cents": 100 })),
        ))
        .await;

    assert_eq!(status, 404);
}
