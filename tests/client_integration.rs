//! End-to-end coverage of the request pipeline against a mock server:
//! header assembly, retry/backoff, circuit breaking, 401 recovery, and
//! response decoding.

use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use backstage_sdk::{
    AuthFailurePolicy, CircuitBreakerConfig, ClientConfig, Credential, ErrorKind, HttpClient,
    RequestOptions,
};

fn fast_config(server: &MockServer) -> backstage_sdk::ClientConfigBuilder {
    ClientConfig::builder(server.uri())
        .max_retries(3)
        .retry_base_delay(Duration::from_millis(10))
}

#[tokio::test]
async fn get_sends_auth_and_request_id_headers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/plugins"))
        .and(header("x-api-key", "bk_live_key"))
        .and(header_exists("x-request-id"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [], "total": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        HttpClient::new(fast_config(&server).api_key("bk_live_key").build().unwrap()).unwrap();

    let params = [("limit".to_string(), "10".to_string())];
    let result = client.get("/plugins", Some(&params), None).await.unwrap();
    assert_eq!(result, json!({"items": [], "total": 0}));

    let requests = server.received_requests().await.unwrap();
    let request_id = requests[0].headers.get("x-request-id").unwrap().to_str().unwrap();
    assert!(request_id.starts_with("req_"), "request id should be prefixed: {request_id}");
}

#[tokio::test]
async fn no_content_becomes_empty_object() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/plugins/p1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpClient::new(fast_config(&server).build().unwrap()).unwrap();
    let result = client.delete("/plugins/p1", None).await.unwrap();
    assert_eq!(result, json!({}));
}

#[tokio::test]
async fn non_json_body_returned_as_string() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let client = HttpClient::new(fast_config(&server).build().unwrap()).unwrap();
    let result = client.get("/ping", None, None).await.unwrap();
    assert_eq!(result, json!("pong"));
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/workflows/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "workflow not found",
            "details": {"workflow_id": "missing"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpClient::new(fast_config(&server).build().unwrap()).unwrap();
    let err = client.get("/workflows/missing", None, None).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(err.status, Some(404));
    assert_eq!(err.message, "workflow not found");
    assert_eq!(err.details, Some(json!({"workflow_id": "missing"})));
}

#[tokio::test]
async fn server_errors_retry_until_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpClient::new(
        fast_config(&server).retry_base_delay(Duration::from_millis(50)).build().unwrap(),
    )
    .unwrap();

    let start = Instant::now();
    let result = client.get("/health", None, None).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(result, json!({"status": "ok"}));
    // Backoff before attempts 2 and 3: 50ms + 100ms.
    assert!(elapsed >= Duration::from_millis(140), "backoff too short: {elapsed:?}");
}

#[tokio::test]
async fn exhausted_retries_surface_last_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "down"})))
        .expect(3)
        .mount(&server)
        .await;

    let client = HttpClient::new(fast_config(&server).build().unwrap()).unwrap();
    let err = client.get("/health", None, None).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Server);
    assert_eq!(err.status, Some(503));
    assert_eq!(err.message, "down");
}

#[tokio::test]
async fn slow_response_classified_as_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .expect(2)
        .mount(&server)
        .await;

    let client =
        HttpClient::new(fast_config(&server).max_retries(2).build().unwrap()).unwrap();

    let options = RequestOptions::with_timeout(Duration::from_millis(50));
    let err = client.get("/slow", None, Some(&options)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn circuit_opens_and_fast_fails() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let breaker = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .timeout(Duration::from_secs(60))
        .build()
        .unwrap();
    let client = HttpClient::new(
        fast_config(&server).max_retries(1).circuit_breaker(breaker).build().unwrap(),
    )
    .unwrap();

    for _ in 0..2 {
        let err = client.get("/flaky", None, None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Server);
    }

    // Third call is rejected locally; the mock's expect(2) verifies no
    // request reached the server.
    let err = client.get("/flaky", None, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CircuitBreakerOpen);
    assert_eq!(client.circuit_breaker_status().failure_count, 2);

    client.reset_circuit_breaker();
    assert_eq!(client.circuit_breaker_status().failure_count, 0);
}

#[tokio::test]
async fn unauthorized_triggers_single_refresh_and_resend() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/secure"))
        .and(header("authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refresh_token": "rt-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-token",
            "refresh_token": "rt-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secure"))
        .and(header("authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpClient::new(
        fast_config(&server).bearer_token("old-token").refresh_token("rt-1").build().unwrap(),
    )
    .unwrap();

    let result = client.get("/secure", None, None).await.unwrap();
    assert_eq!(result, json!({"ok": true}));

    let credential = client.auth().unwrap().credential().await.unwrap();
    assert_eq!(credential.access_token, "new-token");
    assert_eq!(credential.refresh_token.as_deref(), Some("rt-2"));

    client.close();
}

#[tokio::test]
async fn retry_after_401_recovery_carries_refreshed_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/secure"))
        .and(header("authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-token",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    // The resend right after the refresh hits a transient 503; the retry
    // that follows must still send the refreshed token, not the stale one.
    Mock::given(method("GET"))
        .and(path("/secure"))
        .and(header("authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secure"))
        .and(header("authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpClient::new(
        fast_config(&server).bearer_token("old-token").refresh_token("rt-1").build().unwrap(),
    )
    .unwrap();

    let result = client.get("/secure", None, None).await.unwrap();
    assert_eq!(result, json!({"ok": true}));

    client.close();
}

#[tokio::test]
async fn failed_refresh_surfaces_authentication_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/secure"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpClient::new(
        fast_config(&server).bearer_token("old-token").refresh_token("rt-1").build().unwrap(),
    )
    .unwrap();

    let err = client.get("/secure", None, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);
    assert_eq!(err.status, Some(401));

    // The stale credential is kept rather than silently dropped.
    let credential = client.auth().unwrap().credential().await.unwrap();
    assert_eq!(credential.access_token, "old-token");
}

#[tokio::test]
async fn fail_policy_blocks_request_without_credential() {
    let server = MockServer::start().await;

    let client = HttpClient::new(
        fast_config(&server)
            .bearer_token("tok")
            .auth_failure_policy(AuthFailurePolicy::Fail)
            .build()
            .unwrap(),
    )
    .unwrap();

    // Replace with an expired credential that cannot be refreshed.
    let expired = Credential::bearer_with_expiry(
        "tok",
        None,
        Some(chrono::Utc::now() - chrono::Duration::seconds(10)),
    );
    client.auth().unwrap().set(expired).await;

    let err = client.get("/anything", None, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn default_policy_proceeds_unauthenticated() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        HttpClient::new(fast_config(&server).bearer_token("tok").build().unwrap()).unwrap();

    let expired = Credential::bearer_with_expiry(
        "tok",
        None,
        Some(chrono::Utc::now() - chrono::Duration::seconds(10)),
    );
    client.auth().unwrap().set(expired).await;

    let result = client.get("/public", None, None).await.unwrap();
    assert_eq!(result, json!({"ok": true}));

    let requests = server.received_requests().await.unwrap();
    assert!(
        !requests[0].headers.contains_key("authorization"),
        "request should have gone out without an auth header"
    );
}

#[tokio::test]
async fn connection_status_reflects_credential_and_breaker() {
    let server = MockServer::start().await;

    let client =
        HttpClient::new(fast_config(&server).api_key("bk_key").build().unwrap()).unwrap();

    let status = client.connection_status().await;
    assert!(status.authenticated);
    assert_eq!(status.circuit_breaker.failure_count, 0);

    client.auth().unwrap().clear().await;
    let status = client.connection_status().await;
    assert!(!status.authenticated);
}

#[tokio::test]
async fn rate_limiter_paces_burst_overflow() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(3)
        .mount(&server)
        .await;

    // 2-token burst, then ~1 token per 100ms.
    let client = HttpClient::new(
        fast_config(&server).rate_limit(2, Duration::from_millis(200)).build().unwrap(),
    )
    .unwrap();

    let start = Instant::now();
    for _ in 0..3 {
        client.get("/items", None, None).await.unwrap();
    }
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(80), "third request should wait: {elapsed:?}");
}
