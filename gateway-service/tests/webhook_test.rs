mod common;

use common::{TestApp, cancellation_body, signed_header};
use wiremock::MockServer;

#[tokio::test]
async fn test_webhook_without_signature_is_rejected() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    let response = app
        .post_webhook_raw(&cancellation_body("cus_nosig"), None)
        .await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_webhook_with_invalid_signature_is_rejected() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    let body = cancellation_body("cus_badsig");
    let response = app
        .post_webhook_raw(&body, Some("t=1700000000,v1=deadbeef"))
        .await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_webhook_signature_covers_the_exact_body() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    // Signature computed over a different body than the one delivered.
    let signature = signed_header(&cancellation_body("cus_one"));
    let response = app
        .post_webhook_raw(&cancellation_body("cus_two"), Some(&signature))
        .await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_cancellation_for_unknown_customer_is_acknowledged() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    // The provider may emit events for customers outside this system.
    let response = app.post_webhook(&cancellation_body("cus_stranger")).await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("ack body");
    assert_eq!(body["received"], true);
}

#[tokio::test]
async fn test_cancellation_replay_is_idempotent() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    app.provision("cus_redeliver", "pro").await;

    let body = cancellation_body("cus_redeliver");
    for _ in 0..3 {
        let response = app.post_webhook(&body).await;
        assert_eq!(response.status(), 200);
    }
}

#[tokio::test]
async fn test_unhandled_event_kinds_are_acknowledged() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    let body = serde_json::json!({
        "type": "invoice.payment_succeeded",
        "data": { "object": { "customer": "cus_paid" } }
    })
    .to_string();
    let response = app.post_webhook(&body).await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("ack body");
    assert_eq!(body["received"], true);
}

#[tokio::test]
async fn test_malformed_payload_with_valid_signature_is_rejected() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    let response = app.post_webhook("not json at all").await;

    assert_eq!(response.status(), 400);
}
