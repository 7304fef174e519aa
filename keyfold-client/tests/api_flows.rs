//! API client behavior against a mock server.

use keyfold_client::{ApiClient, ClientConfig, ClientError, PasswordTokenOutcome};
use keyfold_crypto::KdfParams;
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(ClientConfig::with_base_url(server.uri()))
}

#[tokio::test]
async fn prelogin_maps_pbkdf2_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/identity/accounts/prelogin"))
        .and(body_string_contains("user@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kdf": 0,
            "kdfIterations": 600_000
        })))
        .mount(&server)
        .await;

    let params = client_for(&server).prelogin("user@example.com").await.unwrap();
    assert_eq!(params, KdfParams::Pbkdf2 { iterations: 600_000 });
}

#[tokio::test]
async fn prelogin_maps_argon2_memory_to_kibibytes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/identity/accounts/prelogin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kdf": 1,
            "kdfIterations": 3,
            "kdfMemory": 64,
            "kdfParallelism": 4
        })))
        .mount(&server)
        .await;

    let params = client_for(&server).prelogin("user@example.com").await.unwrap();
    assert_eq!(
        params,
        KdfParams::Argon2id {
            iterations: 3,
            memory_kib: 64 * 1024,
            parallelism: 4
        }
    );
}

#[tokio::test]
async fn password_grant_surfaces_device_otp_demand() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/identity/connect/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "device_otp_required"
        })))
        .mount(&server)
        .await;

    let outcome = client_for(&server)
        .token_password("user@example.com", "hash", None)
        .await
        .unwrap();
    assert!(matches!(outcome, PasswordTokenOutcome::TwoFactorRequired));
}

#[tokio::test]
async fn password_grant_reports_the_server_description() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/identity/connect/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Username or password is incorrect."
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .token_password("user@example.com", "bad-hash", None)
        .await
        .unwrap_err();
    match err {
        ClientError::ServerRejected(message) => {
            assert_eq!(message, "Username or password is incorrect.")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn sync_refreshes_once_on_401() {
    let server = MockServer::start().await;

    // The stale token is rejected, the fresh one accepted.
    Mock::given(method("GET"))
        .and(path("/api/sync"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sync"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "profile": {
                "email": "user@example.com",
                "key": "2.AAAA|BBBB|CCCC"
            },
            "ciphers": []
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/identity/connect/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh",
            "refresh_token": "rotated",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = client_for(&server);
    api.set_tokens("stale".to_string(), Some("refr".to_string()))
        .await;

    let response = api.sync().await.unwrap();
    assert_eq!(response.profile.email, "user@example.com");
    assert!(response.ciphers.is_empty());
}

#[tokio::test]
async fn rejected_refresh_clears_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/identity/connect/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let api = client_for(&server);
    api.set_tokens("stale".to_string(), Some("dead".to_string()))
        .await;

    assert!(api.refresh_access_token().await.is_err());
    assert!(!api.is_authenticated().await);
}

#[tokio::test]
async fn unauthenticated_sync_is_refused_locally() {
    let server = MockServer::start().await;
    let api = client_for(&server);
    assert!(matches!(
        api.sync().await.unwrap_err(),
        ClientError::AuthRequired
    ));
}
