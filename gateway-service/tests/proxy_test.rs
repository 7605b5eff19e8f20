mod common;

use common::{TEST_EMAIL, TestApp};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_forwarded_request_carries_identity_and_drops_credentials() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    Mock::given(method("GET"))
        .and(path("/internal"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&backend)
        .await;

    let token = app.provision("cus_fwd", "pro").await;
    let response = app.proxy_get("/mcp", &token).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.expect("body"), "ok");

    let received = backend.received_requests().await.expect("recording enabled");
    assert_eq!(received.len(), 1);
    let request = &received[0];
    // Caller identity is asserted by the gateway, not the client.
    assert_eq!(
        request.headers.get("x-account-email").map(|v| v.to_str().unwrap()),
        Some(TEST_EMAIL)
    );
    // The account token must never reach the backend.
    assert!(request.headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_path_and_query_are_rewritten_to_mount_path() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    Mock::given(method("GET"))
        .and(path("/internal/tools/list"))
        .and(query_param("cursor", "abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&backend)
        .await;

    let token = app.provision("cus_rewrite", "pro").await;
    let response = app.proxy_get("/mcp/tools/list?cursor=abc", &token).await;

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_request_body_passes_through_unchanged() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    Mock::given(method("POST"))
        .and(path("/internal/messages"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&backend)
        .await;

    let token = app.provision("cus_body", "pro").await;
    let payload = serde_json::json!({"jsonrpc": "2.0", "method": "tools/call", "id": 7});
    let response = app
        .client
        .post(format!("{}/mcp/messages", app.address))
        .bearer_auth(&token)
        .json(&payload)
        .send()
        .await
        .expect("proxy request");
    assert_eq!(response.status(), 200);

    let received = backend.received_requests().await.expect("recording enabled");
    let forwarded: serde_json::Value =
        serde_json::from_slice(&received[0].body).expect("forwarded body");
    assert_eq!(forwarded, payload);
}

#[tokio::test]
async fn test_streaming_route_response_is_shaped_for_sse() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    Mock::given(method("GET"))
        .and(path("/internal/sse"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .set_body_string("data: hello\n\n"),
        )
        .mount(&backend)
        .await;

    let token = app.provision("cus_sse", "pro").await;
    let response = app.proxy_get("/mcp/sse", &token).await;

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .map(|v| v.to_str().unwrap()),
        Some("text/event-stream")
    );
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .map(|v| v.to_str().unwrap()),
        Some("no-cache")
    );
    assert!(response.headers().get("content-length").is_none());
    assert_eq!(response.text().await.expect("body"), "data: hello\n\n");
}

#[tokio::test]
async fn test_backend_error_status_passes_through_and_unit_stands() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    Mock::given(method("GET"))
        .and(path("/internal"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend broke"))
        .mount(&backend)
        .await;

    let token = app.provision("cus_err", "pro").await;
    let response = app.proxy_get("/mcp", &token).await;

    // The backend's own status is relayed as-is, not wrapped in a gateway error.
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.expect("body"), "backend broke");

    // The unit was consumed before forwarding.
    let usage = app.usage(&token).await;
    assert_eq!(usage["used"], 1);
}

#[tokio::test]
async fn test_unreachable_backend_maps_to_bad_gateway() {
    let billing = MockServer::start().await;
    // Nothing listens here; the connection is refused immediately.
    let app = TestApp::spawn("http://127.0.0.1:9", &billing.uri()).await;

    let token = app.provision("cus_down", "pro").await;
    let response = app.proxy_get("/mcp", &token).await;

    assert_eq!(response.status(), 502);

    // Usage-then-forward: the failed forward does not refund the unit.
    let usage = app.usage(&token).await;
    assert_eq!(usage["used"], 1);
}

#[tokio::test]
async fn test_slow_backend_maps_to_gateway_timeout() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn_with_backend_timeout(&backend.uri(), &billing.uri(), 1).await;

    Mock::given(method("GET"))
        .and(path("/internal"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&backend)
        .await;

    let token = app.provision("cus_slow", "pro").await;
    let response = app.proxy_get("/mcp", &token).await;

    assert_eq!(response.status(), 504);

    // Usage-then-forward: the timed-out forward does not refund the unit.
    let usage = app.usage(&token).await;
    assert_eq!(usage["used"], 1);
}

#[tokio::test]
async fn test_streaming_route_is_exempt_from_backend_timeout() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn_with_backend_timeout(&backend.uri(), &billing.uri(), 1).await;

    // Slower than the per-request timeout; event streams stay open far longer
    // than any sensible total timeout, so none is applied to them.
    Mock::given(method("GET"))
        .and(path("/internal/sse"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_secs(2))
                .set_body_string("data: late\n\n"),
        )
        .mount(&backend)
        .await;

    let token = app.provision("cus_patient", "pro").await;
    let response = app.proxy_get("/mcp/sse", &token).await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.expect("body"), "data: late\n\n");
}

#[tokio::test]
async fn test_missing_token_is_rejected_without_touching_backend() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    let response = app
        .client
        .get(format!("{}/mcp", app.address))
        .send()
        .await
        .expect("proxy request");

    assert_eq!(response.status(), 401);
    assert!(backend.received_requests().await.expect("recording").is_empty());
}

#[tokio::test]
async fn test_unknown_token_is_rejected_without_touching_backend() {
    let backend = MockServer::start().await;
    let billing = MockServer::start().await;
    let app = TestApp::spawn(&backend.uri(), &billing.uri()).await;

    let response = app.proxy_get("/mcp", "sk_live_definitely_not_issued").await;

    assert_eq!(response.status(), 403);
    assert!(backend.received_requests().await.expect("recording").is_empty());
}
