//! Integration tests for session expiry handling in the request executor.
//!
//! The session endpoint hands out `t1` on the first handshake and `t2` on
//! every later one, and operation mocks match on the session header, so
//! each test can tell which token every request carried.

use std::sync::Arc;

use dep_client::account::{AccountDetail, account_detail};
use dep_client::client::DepClient;
use dep_client::config::{ClientConfig, ExpiryRule};
use dep_client::error::ErrorKind;
use dep_client::oauth::Credentials;
use dep_client::session::SessionToken;
use dep_client::store::{CredentialStore, MemoryStore};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn acme_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new().with_credentials(
        "acme",
        Credentials {
            consumer_key: "CK_acme".to_string(),
            consumer_secret: "CS_acme".to_string(),
            access_token: "AT_acme".to_string(),
            access_secret: "AS_acme".to_string(),
            access_token_expiry: None,
        },
    ))
}

fn mock_client_with(server: &MockServer, config: ClientConfig, store: Arc<MemoryStore>) -> DepClient {
    DepClient::new(config.with_server("acme", server.uri()), store).unwrap()
}

fn mock_client(server: &MockServer) -> DepClient {
    mock_client_with(server, ClientConfig::default(), acme_store())
}

/// Mounts a session endpoint returning `t1` once, then `t2`.
async fn mount_rotating_sessions(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "auth_session_token": "t1" })),
        )
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "auth_session_token": "t2" })),
        )
        .mount(server)
        .await;
}

fn account_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "server_name": "acme-mdm",
        "org_name": "Acme Corp"
    }))
}

// ── Recovery ───────────────────────────────────────────────────────────

#[tokio::test]
async fn unauthorized_then_success_reauthenticates_once() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    mount_rotating_sessions(&server).await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("X-ADM-Auth-Session", "t1"))
        .respond_with(ResponseTemplate::new(401).set_body_string("UNAUTHORIZED"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("X-ADM-Auth-Session", "t2"))
        .respond_with(account_ok())
        .expect(1)
        .mount(&server)
        .await;

    let detail = account_detail(&client, "acme").await.unwrap();
    assert_eq!(detail.server_name.as_deref(), Some("acme-mdm"));
    assert_eq!(client.sessions().handshake_count(), 2);
    assert_eq!(client.sessions().cached("acme"), Some(SessionToken::new("t2")));

    let account_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/account")
        .count();
    assert_eq!(account_calls, 2, "exactly one original call and one retry");
}

#[tokio::test]
async fn forbidden_marker_is_treated_as_expiry() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    mount_rotating_sessions(&server).await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("X-ADM-Auth-Session", "t1"))
        .respond_with(ResponseTemplate::new(403).set_body_string("FORBIDDEN"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("X-ADM-Auth-Session", "t2"))
        .respond_with(account_ok())
        .expect(1)
        .mount(&server)
        .await;

    account_detail(&client, "acme").await.unwrap();
    assert_eq!(client.sessions().handshake_count(), 2);
}

#[tokio::test]
async fn stale_persisted_session_is_replaced_after_expiry() {
    let server = MockServer::start().await;
    let store = acme_store();
    store
        .put_session("acme", &SessionToken::new("yesterday"))
        .await
        .unwrap();
    let client = mock_client_with(&server, ClientConfig::default(), Arc::clone(&store));
    mount_rotating_sessions(&server).await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("X-ADM-Auth-Session", "yesterday"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("X-ADM-Auth-Session", "t1"))
        .respond_with(account_ok())
        .expect(1)
        .mount(&server)
        .await;

    account_detail(&client, "acme").await.unwrap();
    assert_eq!(client.sessions().handshake_count(), 1);
    assert_eq!(
        store.session("acme").await.unwrap(),
        Some(SessionToken::new("t1"))
    );
}

// ── Exhaustion ─────────────────────────────────────────────────────────

#[tokio::test]
async fn second_expiry_is_auth_with_no_third_attempt() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    mount_rotating_sessions(&server).await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(401).set_body_string("UNAUTHORIZED"))
        .expect(2)
        .mount(&server)
        .await;

    let err = account_detail(&client, "acme").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(err.status().map(|s| s.as_u16()), Some(401));
    assert_eq!(err.body(), Some("UNAUTHORIZED"));
    assert_eq!(client.sessions().handshake_count(), 2);
    assert!(
        client.sessions().cached("acme").is_none(),
        "the rejected retry token is evicted too"
    );
}

#[tokio::test]
async fn handshake_failure_during_retry_is_returned() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "auth_session_token": "t1" })),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(401).set_body_string("oauth_problem=token_rejected"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = account_detail(&client, "acme").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(err.body(), Some("oauth_problem=token_rejected"));
}

// ── Not retried ────────────────────────────────────────────────────────

#[tokio::test]
async fn terms_not_signed_is_validation_without_retry() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    mount_rotating_sessions(&server).await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(403).set_body_string("T_C_NOT_SIGNED"))
        .expect(1)
        .mount(&server)
        .await;

    let err = account_detail(&client, "acme").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.code(), Some("T_C_NOT_SIGNED"));
    assert_eq!(client.sessions().handshake_count(), 1);
    assert_eq!(client.sessions().cached("acme"), Some(SessionToken::new("t1")));
}

#[tokio::test]
async fn server_error_is_not_retried() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    mount_rotating_sessions(&server).await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(503).set_body_string("SERVICE_UNAVAILABLE"))
        .expect(1)
        .mount(&server)
        .await;

    let err = account_detail(&client, "acme").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(err.body(), Some("SERVICE_UNAVAILABLE"));
    assert_eq!(client.sessions().handshake_count(), 1);
}

#[tokio::test]
async fn custom_expiry_rules_replace_the_defaults() {
    let server = MockServer::start().await;
    let config =
        ClientConfig::default().with_expiry_rules(vec![ExpiryRule::status_with_body(400, "SESSION_GONE")]);
    let client = mock_client_with(&server, config, acme_store());
    mount_rotating_sessions(&server).await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("X-ADM-Auth-Session", "t1"))
        .respond_with(ResponseTemplate::new(400).set_body_string("SESSION_GONE"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("X-ADM-Auth-Session", "t2"))
        .respond_with(ResponseTemplate::new(401).set_body_string("UNAUTHORIZED"))
        .expect(1)
        .mount(&server)
        .await;

    // 401 is no longer an expiry signal under these rules.
    let err = account_detail(&client, "acme").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(client.sessions().handshake_count(), 2);
}

#[tokio::test]
async fn server_error_rule_does_not_trigger_reauth() {
    let server = MockServer::start().await;
    let config = ClientConfig::default().with_expiry_rules(vec![ExpiryRule::status(503)]);
    let client = mock_client_with(&server, config, acme_store());
    mount_rotating_sessions(&server).await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(503).set_body_string("SERVICE_UNAVAILABLE"))
        .expect(1)
        .mount(&server)
        .await;

    let err = account_detail(&client, "acme").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(client.sessions().handshake_count(), 1);
    assert_eq!(client.sessions().cached("acme"), Some(SessionToken::new("t1")));
}

// ── Rotation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn rotated_session_header_is_adopted() {
    let server = MockServer::start().await;
    let store = acme_store();
    let client = mock_client_with(&server, ClientConfig::default(), Arc::clone(&store));
    mount_rotating_sessions(&server).await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("X-ADM-Auth-Session", "t1"))
        .respond_with(account_ok().insert_header("X-ADM-Auth-Session", "t9"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("X-ADM-Auth-Session", "t9"))
        .respond_with(account_ok())
        .expect(1)
        .mount(&server)
        .await;

    let first: AccountDetail = account_detail(&client, "acme").await.unwrap();
    let second = account_detail(&client, "acme").await.unwrap();
    assert_eq!(first, second);

    assert_eq!(client.sessions().cached("acme"), Some(SessionToken::new("t9")));
    assert_eq!(
        store.session("acme").await.unwrap(),
        Some(SessionToken::new("t9"))
    );
    assert_eq!(client.sessions().handshake_count(), 1);
}
