//! Session lifecycle against a real HTTP server
//!
//! Tests:
//! - Login persists the token pair and yields claims
//! - 401 triggers one refresh and one replay
//! - Concurrent 401s share a single refresh exchange
//! - Failed refresh clears tokens and signals expiry
//! - A second 401 after replay is an authentication error

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use mockito::Matcher;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use taskdeck::session::{FileStore, TokenPair, TokenStore};
use taskdeck::{ClientConfig, Error, SessionEvent, SessionManager};

fn jwt(claims: Value) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

fn valid_jwt() -> String {
    jwt(json!({
        "exp": chrono::Utc::now().timestamp() + 300,
        "user_id": 7,
        "username": "ada"
    }))
}

fn session_for(server: &mockito::Server, tokens: TokenStore) -> SessionManager {
    let config = ClientConfig::from_base_url(&server.url()).unwrap();
    SessionManager::with_reqwest(config, tokens).unwrap()
}

fn stored_pair(access: &str, refresh: &str) -> TokenStore {
    let tokens = TokenStore::in_memory();
    tokens
        .set_pair(&TokenPair {
            access: access.to_string(),
            refresh: refresh.to_string(),
        })
        .unwrap();
    tokens
}

#[tokio::test]
async fn login_persists_tokens_across_reopen() {
    let mut server = mockito::Server::new_async().await;
    let access = valid_jwt();
    let login = server
        .mock("POST", "/api/users/login/")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::Json(json!({"username": "ada", "password": "pw"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"access": access, "refresh": "r1"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.json");
    let tokens = TokenStore::new(Arc::new(FileStore::open(&path).unwrap()));
    let session = session_for(&server, tokens);

    let claims = session.login("ada", "pw").await.unwrap();
    assert_eq!(claims.username(), Some("ada"));
    assert_eq!(claims.user_id(), Some("7".to_string()));
    assert!(session.is_authenticated());
    login.assert_async().await;

    // A fresh process sees the same session
    let reopened = TokenStore::new(Arc::new(FileStore::open(&path).unwrap()));
    let restored = session_for(&server, reopened);
    assert!(restored.is_authenticated());
    assert_eq!(restored.access_token(), Some(access));
}

#[tokio::test]
async fn rejected_login_carries_server_message() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/users/login/")
        .with_status(401)
        .with_body(r#"{"detail":"No active account found with the given credentials"}"#)
        .create_async()
        .await;

    let session = session_for(&server, TokenStore::in_memory());
    match session.login("ada", "nope").await {
        Err(Error::Authentication(msg)) => assert!(msg.contains("No active account")),
        other => panic!("expected authentication error, got {other:?}"),
    }
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn register_does_not_log_in() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/users/register/")
        .match_header("authorization", Matcher::Missing)
        .with_status(201)
        .with_body(r#"{"id": 3, "username": "bob"}"#)
        .create_async()
        .await;

    let tokens = TokenStore::in_memory();
    let session = session_for(&server, tokens.clone());
    let payload = session
        .register(&json!({"username": "bob", "password": "pw", "email": "bob@example.com"}))
        .await
        .unwrap();

    assert_eq!(payload["username"], "bob");
    assert!(!tokens.has_any().unwrap());
}

#[tokio::test]
async fn expired_access_token_is_refreshed_and_replayed() {
    let mut server = mockito::Server::new_async().await;
    let rejected = server
        .mock("GET", "/api/tasks/")
        .match_header("authorization", "Bearer old")
        .with_status(401)
        .with_body(r#"{"detail":"Given token not valid for any token type"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/users/token/refresh/")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::Json(json!({"refresh": "r1"})))
        .with_status(200)
        .with_body(r#"{"access": "new"}"#)
        .expect(1)
        .create_async()
        .await;
    let replayed = server
        .mock("GET", "/api/tasks/")
        .match_header("authorization", "Bearer new")
        .with_status(200)
        .with_body(r#"[{"task_id": "t1"}]"#)
        .expect(1)
        .create_async()
        .await;

    let tokens = stored_pair("old", "r1");
    let session = session_for(&server, tokens.clone());
    let mut events = session.subscribe();

    let tasks: Value = session.get_json("tasks/").await.unwrap();

    assert_eq!(tasks[0]["task_id"], "t1");
    assert_eq!(tokens.access_token().unwrap().as_deref(), Some("new"));
    assert_eq!(events.recv().await.unwrap(), SessionEvent::TokenRefreshed);
    rejected.assert_async().await;
    refresh.assert_async().await;
    replayed.assert_async().await;
}

#[tokio::test]
async fn concurrent_401s_trigger_a_single_refresh() {
    let mut server = mockito::Server::new_async().await;
    let rejected = server
        .mock("GET", "/api/tasks/")
        .match_header("authorization", "Bearer old")
        .with_status(401)
        .expect(5)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/users/token/refresh/")
        .with_status(200)
        .with_body(r#"{"access": "new"}"#)
        .expect(1)
        .create_async()
        .await;
    let replayed = server
        .mock("GET", "/api/tasks/")
        .match_header("authorization", "Bearer new")
        .with_status(200)
        .with_body("[]")
        .expect(5)
        .create_async()
        .await;

    let session = session_for(&server, stored_pair("old", "r1"));
    let calls = (0..5).map(|_| session.get_json::<Value>("tasks/"));
    let results = futures::future::join_all(calls).await;

    for result in results {
        assert_eq!(result.unwrap(), json!([]));
    }
    rejected.assert_async().await;
    refresh.assert_async().await;
    replayed.assert_async().await;
}

#[tokio::test]
async fn failed_refresh_expires_the_session() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/tasks/reverse_string/")
        .with_status(401)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/users/token/refresh/")
        .with_status(401)
        .with_body(r#"{"detail":"Token is blacklisted","code":"token_not_valid"}"#)
        .expect(1)
        .create_async()
        .await;

    let tokens = stored_pair(
        &jwt(json!({"exp": chrono::Utc::now().timestamp() - 60})),
        "revoked",
    );
    let session = session_for(&server, tokens.clone());
    let mut events = session.subscribe();

    let err = session
        .post_json::<_, Value>("tasks/reverse_string/", &json!({"text": "hello"}))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SessionExpired(_)), "got {err:?}");
    assert!(!tokens.has_any().unwrap());
    assert!(!session.is_authenticated());
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
    refresh.assert_async().await;
}

#[tokio::test]
async fn second_401_is_not_retried_again() {
    let mut server = mockito::Server::new_async().await;
    let protected = server
        .mock("GET", "/api/tasks/t1/")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/users/token/refresh/")
        .with_status(200)
        .with_body(r#"{"access": "new"}"#)
        .expect(1)
        .create_async()
        .await;

    let session = session_for(&server, stored_pair("old", "r1"));
    let err = session.get_json::<Value>("tasks/t1/").await.unwrap_err();

    assert!(matches!(err, Error::Authentication(_)), "got {err:?}");
    protected.assert_async().await;
    refresh.assert_async().await;
}
