//! Session lifecycle: login, logout, validity checks and the authenticated
//! request protocol.
//!
//! # Refresh protocol
//!
//! [`SessionManager::authorized_request`] sends a request through the
//! middleware chain (which attaches the bearer token). On a 401 it:
//!
//! 1. marks the request as retried,
//! 2. obtains a fresh access token, either one a concurrent refresh already
//!    stored, or by joining the single in-flight refresh exchange (starting
//!    it if none is running),
//! 3. replays the original request once with the new token.
//!
//! A 401 on the replay is an [`Error::Authentication`]; there is no second
//! refresh. A failed refresh clears both tokens, broadcasts
//! [`SessionEvent::Expired`] and surfaces [`Error::SessionExpired`].

use crate::client::auth_middleware::{bearer_value, BearerAuthMiddleware};
use crate::client::http_logging_middleware::HttpLoggingMiddleware;
use crate::client::http_middleware::{
    HttpMiddlewareChain, HttpMiddlewareContext, HttpRequest, HttpResponse,
};
use crate::client::transport::HttpTransport;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::session::claims::Claims;
use crate::session::token_store::{TokenPair, TokenStore};
use futures::future::{BoxFuture, FutureExt, Shared};
use http::header::AUTHORIZATION;
use http::Method;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

const LOGIN_PATH: &str = "users/login/";
const REGISTER_PATH: &str = "users/register/";
const REFRESH_PATH: &str = "users/token/refresh/";

/// Whether a usable access token is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No token, or the access token is expired or unreadable.
    Unauthenticated,
    /// An unexpired access token is stored.
    Authenticated,
}

/// Session transitions, broadcast to every [`SessionManager::subscribe`] receiver.
///
/// [`SessionEvent::Expired`] is the signal a front end uses to send the user
/// back to the login screen. The core never navigates on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Login succeeded and tokens were stored.
    LoggedIn,
    /// The access token was exchanged for a new one.
    TokenRefreshed,
    /// The user logged out.
    LoggedOut,
    /// Refresh failed or was impossible; tokens were cleared.
    Expired,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
}

type RefreshOutcome = std::result::Result<String, String>;
type RefreshFuture = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Owns the token pair and every decision about its validity.
///
/// Cloning is cheap: clones share tokens, the refresh slot and the event channel.
///
/// # Examples
///
/// ```rust,no_run
/// use taskdeck::{ClientConfig, SessionManager};
/// use taskdeck::session::token_store::TokenStore;
///
/// # async fn example() -> taskdeck::Result<()> {
/// let session = SessionManager::with_reqwest(ClientConfig::from_env(), TokenStore::in_memory())?;
/// let claims = session.login("ada", "correct horse").await?;
/// println!("logged in as {:?}", claims.username());
///
/// let tasks: serde_json::Value = session.get_json("tasks/").await?;
/// println!("{tasks}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    tokens: TokenStore,
    transport: Arc<dyn HttpTransport>,
    chain: HttpMiddlewareChain,
    events: broadcast::Sender<SessionEvent>,
    /// Generation-tagged in-flight refresh exchange.
    refresh: Mutex<Option<(u64, RefreshFuture)>>,
    refresh_generation: Mutex<u64>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.inner.config)
            .field("chain", &self.inner.chain)
            .field("refresh_in_flight", &self.inner.refresh.lock().is_some())
            .finish()
    }
}

impl SessionManager {
    /// Create a session manager sending requests through `transport`.
    ///
    /// The middleware chain attaches bearer tokens from `tokens` and logs
    /// every call with credentials redacted.
    pub fn new(config: ClientConfig, tokens: TokenStore, transport: Arc<dyn HttpTransport>) -> Self {
        let mut chain = HttpMiddlewareChain::new();
        chain.add(Arc::new(BearerAuthMiddleware::new(tokens.clone())));
        chain.add(Arc::new(HttpLoggingMiddleware::new()));
        Self::with_chain(config, tokens, transport, chain)
    }

    /// Create a session manager with a caller-assembled middleware chain.
    ///
    /// The chain must contain a [`BearerAuthMiddleware`] over the same
    /// `tokens`: it attaches the access token and flags the 401 responses
    /// that trigger refresh-and-replay. Without it, requests go out
    /// unauthenticated and a 401 is returned to the caller as-is.
    pub fn with_chain(
        config: ClientConfig,
        tokens: TokenStore,
        transport: Arc<dyn HttpTransport>,
        chain: HttpMiddlewareChain,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                config,
                tokens,
                transport,
                chain,
                events,
                refresh: Mutex::new(None),
                refresh_generation: Mutex::new(0),
            }),
        }
    }

    /// Create a session manager backed by [`ReqwestTransport`](crate::client::transport::ReqwestTransport).
    #[cfg(feature = "http-client")]
    pub fn with_reqwest(config: ClientConfig, tokens: TokenStore) -> Result<Self> {
        let transport =
            crate::client::transport::ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::new(config, tokens, Arc::new(transport)))
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Receive session transitions from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Send credentials and store the returned token pair.
    ///
    /// Returns the decoded claims of the new access token.
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] when the server rejects the credentials
    /// (its response body is included) or answers with something that is not
    /// a well-formed token pair. Nothing is stored in that case.
    pub async fn login(&self, username: &str, password: &str) -> Result<Claims> {
        let request = HttpRequest::json(
            Method::POST,
            self.inner.config.api_url(LOGIN_PATH)?,
            &json!({ "username": username, "password": password }),
        )?;
        let response = self.inner.dispatch_public(request).await?;
        if !response.is_success() {
            return Err(Error::authentication(format!(
                "login rejected ({}): {}",
                response.status.as_u16(),
                response.text()
            )));
        }

        let pair: TokenPair = response
            .json()
            .map_err(|e| Error::authentication(format!("malformed token response: {e}")))?;
        let claims = Claims::decode(&pair.access)?;
        self.inner.tokens.set_pair(&pair)?;

        tracing::info!(user = ?claims.username(), "Logged in");
        self.inner.emit(SessionEvent::LoggedIn);
        Ok(claims)
    }

    /// Create an account. Returns the server payload; does not log in.
    pub async fn register<T: Serialize + ?Sized>(&self, user_data: &T) -> Result<Value> {
        let request = HttpRequest::json(
            Method::POST,
            self.inner.config.api_url(REGISTER_PATH)?,
            user_data,
        )?;
        self.inner
            .dispatch_public(request)
            .await?
            .error_for_status()?
            .json()
    }

    /// Forget both tokens. Safe to call without a session.
    pub fn logout(&self) -> Result<()> {
        let had_session = self.inner.tokens.has_any()?;
        self.inner.tokens.clear()?;
        if had_session {
            tracing::info!("Logged out");
            self.inner.emit(SessionEvent::LoggedOut);
        }
        Ok(())
    }

    /// True iff an access token is stored, decodes, and has not expired.
    ///
    /// Never fails: any storage or decode problem reads as `false`.
    pub fn is_authenticated(&self) -> bool {
        self.current_user().is_some_and(|claims| claims.is_valid())
    }

    /// Claims of the stored access token, or `None` if absent or undecodable.
    pub fn current_user(&self) -> Option<Claims> {
        let token = self.access_token()?;
        Claims::decode(&token).ok()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        if self.is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    /// The stored access token, for consumers such as the realtime channel.
    pub fn access_token(&self) -> Option<String> {
        match self.inner.tokens.access_token() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Could not read access token: {}", e);
                None
            },
        }
    }

    /// Send `request` with the bearer token attached, refreshing and replaying
    /// once on 401.
    ///
    /// Any non-401 response is returned as-is; use
    /// [`HttpResponse::error_for_status`] to turn failures into errors.
    pub async fn authorized_request(&self, request: HttpRequest) -> Result<HttpResponse> {
        let context = HttpMiddlewareContext::for_request(&request);
        let (response, sent_token) = self.inner.dispatch(request.clone(), &context).await?;
        if !context.auth_failed() {
            return Ok(response);
        }

        tracing::debug!(
            "{} {} answered 401, obtaining a fresh access token",
            context.method,
            context.url
        );
        let replay_context = context.retry();
        let token = self.fresh_access_token(sent_token.as_deref()).await?;

        let mut replay = request;
        replay.add_header(AUTHORIZATION, &bearer_value(&token))?;
        let (response, _) = self.inner.dispatch(replay, &replay_context).await?;
        if replay_context.auth_failed() {
            return Err(Error::authentication(format!(
                "{} {} rejected after token refresh",
                replay_context.method, replay_context.url
            )));
        }
        Ok(response)
    }

    /// Authenticated `GET` of an API path (relative to `/api/`), decoded as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = HttpRequest::get(self.inner.config.api_url(path)?);
        self.authorized_request(request)
            .await?
            .error_for_status()?
            .json()
    }

    /// Authenticated JSON `POST` of an API path (relative to `/api/`).
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = HttpRequest::json(Method::POST, self.inner.config.api_url(path)?, body)?;
        self.authorized_request(request)
            .await?
            .error_for_status()?
            .json()
    }

    /// An access token newer than `stale`, refreshing only if nobody else has.
    async fn fresh_access_token(&self, stale: Option<&str>) -> Result<String> {
        // A refresh that completed while our request was in flight already
        // rotated the token; reuse it instead of exchanging again.
        if let Some(current) = self.access_token() {
            if stale != Some(current.as_str()) {
                tracing::debug!("Access token already rotated, replaying without refresh");
                return Ok(current);
            }
        }

        let (generation, refresh) = {
            let mut slot = self.inner.refresh.lock();
            match slot.as_ref() {
                Some((generation, in_flight)) => (*generation, in_flight.clone()),
                None => {
                    let generation = {
                        let mut counter = self.inner.refresh_generation.lock();
                        *counter += 1;
                        *counter
                    };
                    let exchange = Inner::refresh_exchange(self.inner.clone())
                        .boxed()
                        .shared();
                    *slot = Some((generation, exchange.clone()));
                    (generation, exchange)
                },
            }
        };

        let outcome = refresh.await;

        {
            let mut slot = self.inner.refresh.lock();
            if slot.as_ref().is_some_and(|(current, _)| *current == generation) {
                *slot = None;
            }
        }

        outcome.map_err(Error::SessionExpired)
    }
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Run `request` through the chain and transport.
    ///
    /// Also returns the bearer token the request actually carried.
    async fn dispatch(
        &self,
        mut request: HttpRequest,
        context: &HttpMiddlewareContext,
    ) -> Result<(HttpResponse, Option<String>)> {
        self.chain.process_request(&mut request, context).await?;
        let sent_token = request
            .get_header(AUTHORIZATION.as_str())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_owned);

        let mut response = self.transport.send(request).await?;
        self.chain.process_response(&mut response, context).await?;
        Ok((response, sent_token))
    }

    async fn dispatch_public(&self, request: HttpRequest) -> Result<HttpResponse> {
        let context = HttpMiddlewareContext::public(&request);
        let (response, _) = self.dispatch(request, &context).await?;
        Ok(response)
    }

    /// The one refresh exchange shared by every request waiting on it.
    async fn refresh_exchange(self: Arc<Self>) -> RefreshOutcome {
        let refresh = match self.tokens.refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => return Err(self.expire("no refresh token available".to_string())),
            Err(e) => return Err(self.expire(format!("cannot read refresh token: {e}"))),
        };

        let request = match self.config.api_url(REFRESH_PATH).and_then(|url| {
            HttpRequest::json(Method::POST, url, &json!({ "refresh": refresh }))
        }) {
            Ok(request) => request,
            Err(e) => return Err(self.expire(format!("cannot build refresh request: {e}"))),
        };

        let response = match self.dispatch_public(request).await {
            Ok(response) => response,
            Err(e) => return Err(self.expire(format!("refresh request failed: {e}"))),
        };
        if !response.is_success() {
            return Err(self.expire(format!(
                "refresh rejected with status {}",
                response.status.as_u16()
            )));
        }

        let access = match response.json::<RefreshResponse>() {
            Ok(body) => body.access,
            Err(e) => return Err(self.expire(format!("malformed refresh response: {e}"))),
        };
        if let Err(e) = self.tokens.set_access_token(&access) {
            return Err(self.expire(format!("cannot store refreshed token: {e}")));
        }

        tracing::info!("Access token refreshed");
        self.emit(SessionEvent::TokenRefreshed);
        Ok(access)
    }

    /// Drop the session and announce it. Returns `reason` for the caller's error.
    fn expire(&self, reason: String) -> String {
        let had_session = self.tokens.has_any().unwrap_or(true);
        if let Err(e) = self.tokens.clear() {
            tracing::error!("Failed to clear tokens after refresh failure: {}", e);
        }
        if had_session {
            tracing::error!("Session expired: {}", reason);
            self.emit(SessionEvent::Expired);
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::claims::unsigned_token;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::time::Duration;

    type Handler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

    /// Transport answering from a closure and recording `(path, bearer)` per call.
    struct ScriptedTransport {
        handler: Handler,
        calls: Mutex<Vec<(String, Option<String>)>>,
        refresh_delay: Duration,
    }

    impl ScriptedTransport {
        fn new(handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static) -> Self {
            Self {
                handler: Box::new(handler),
                calls: Mutex::new(Vec::new()),
                refresh_delay: Duration::ZERO,
            }
        }

        fn with_refresh_delay(mut self, delay: Duration) -> Self {
            self.refresh_delay = delay;
            self
        }

        fn count(&self, path: &str) -> usize {
            self.calls.lock().iter().filter(|(p, _)| p == path).count()
        }

        fn bearers(&self, path: &str) -> Vec<Option<String>> {
            self.calls
                .lock()
                .iter()
                .filter(|(p, _)| p == path)
                .map(|(_, bearer)| bearer.clone())
                .collect()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.calls.lock().push((
                request.url.path().to_string(),
                request
                    .get_header("authorization")
                    .map(|v| v.trim_start_matches("Bearer ").to_string()),
            ));
            if request.url.path() == "/api/users/token/refresh/" && !self.refresh_delay.is_zero() {
                tokio::time::sleep(self.refresh_delay).await;
            }
            Ok((self.handler)(&request))
        }
    }

    fn json_response(status: StatusCode, body: Value) -> HttpResponse {
        HttpResponse::new(status, body.to_string().into_bytes())
    }

    fn token_expiring_in(secs: i64) -> String {
        unsigned_token(&json!({
            "exp": chrono::Utc::now().timestamp() + secs,
            "user_id": 1,
            "username": "ada"
        }))
    }

    fn bearer(request: &HttpRequest) -> Option<&str> {
        request
            .get_header("authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    fn session_with(transport: Arc<ScriptedTransport>, tokens: TokenStore) -> SessionManager {
        SessionManager::new(ClientConfig::default(), tokens, transport)
    }

    fn tokens(access: &str, refresh: &str) -> TokenStore {
        let tokens = TokenStore::in_memory();
        tokens
            .set_pair(&TokenPair {
                access: access.to_string(),
                refresh: refresh.to_string(),
            })
            .unwrap();
        tokens
    }

    fn protected_request() -> HttpRequest {
        HttpRequest::get(ClientConfig::default().api_url("tasks/").unwrap())
    }

    #[test]
    fn is_authenticated_tracks_token_validity() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            HttpResponse::new(StatusCode::OK, vec![])
        }));

        let valid = session_with(transport.clone(), tokens(&token_expiring_in(600), "r"));
        assert!(valid.is_authenticated());
        assert_eq!(valid.state(), SessionState::Authenticated);
        assert_eq!(valid.current_user().unwrap().username(), Some("ada"));

        let expired = session_with(transport.clone(), tokens(&token_expiring_in(-1), "r"));
        assert!(!expired.is_authenticated());
        assert!(expired.current_user().is_some());

        let malformed = session_with(transport.clone(), tokens("not-a-jwt", "r"));
        assert!(!malformed.is_authenticated());
        assert!(malformed.current_user().is_none());

        let empty = session_with(transport, TokenStore::in_memory());
        assert!(!empty.is_authenticated());
        assert_eq!(empty.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn login_stores_tokens_and_returns_claims() {
        let access = token_expiring_in(600);
        let body = json!({"access": access, "refresh": "r1"});
        let transport = Arc::new(ScriptedTransport::new(move |request| {
            assert!(bearer(request).is_none());
            json_response(StatusCode::OK, body.clone())
        }));
        let store = TokenStore::in_memory();
        let session = session_with(transport.clone(), store.clone());
        let mut events = session.subscribe();

        let claims = session.login("ada", "pw").await.unwrap();

        assert_eq!(claims.username(), Some("ada"));
        assert_eq!(store.access_token().unwrap(), Some(access));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));
        assert!(session.is_authenticated());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedIn);
        assert_eq!(transport.count("/api/users/login/"), 1);
    }

    #[tokio::test]
    async fn login_rejection_propagates_server_message() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            json_response(
                StatusCode::UNAUTHORIZED,
                json!({"detail": "No active account found"}),
            )
        }));
        let store = TokenStore::in_memory();
        let session = session_with(transport.clone(), store.clone());

        let err = session.login("ada", "wrong").await.unwrap_err();
        match err {
            Error::Authentication(msg) => assert!(msg.contains("No active account found")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!store.has_any().unwrap());
        // A rejected login is not a refresh trigger
        assert_eq!(transport.count("/api/users/token/refresh/"), 0);
    }

    #[tokio::test]
    async fn login_with_malformed_token_stores_nothing() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            json_response(StatusCode::OK, json!({"access": "garbage", "refresh": "r"}))
        }));
        let store = TokenStore::in_memory();
        let session = session_with(transport, store.clone());

        assert!(matches!(
            session.login("ada", "pw").await,
            Err(Error::Authentication(_))
        ));
        assert!(!store.has_any().unwrap());
    }

    #[tokio::test]
    async fn register_returns_raw_payload_without_logging_in() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            json_response(StatusCode::CREATED, json!({"id": 9, "username": "bob"}))
        }));
        let store = TokenStore::in_memory();
        let session = session_with(transport, store.clone());

        let payload = session
            .register(&json!({"username": "bob", "password": "pw"}))
            .await
            .unwrap();
        assert_eq!(payload["id"], 9);
        assert!(!store.has_any().unwrap());
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            HttpResponse::new(StatusCode::OK, vec![])
        }));
        let session = session_with(transport, tokens(&token_expiring_in(600), "r"));
        let mut events = session.subscribe();

        session.logout().unwrap();
        session.logout().unwrap();

        assert!(!session.is_authenticated());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedOut);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn attaches_bearer_token() {
        let access = token_expiring_in(600);
        let expected = access.clone();
        let transport = Arc::new(ScriptedTransport::new(move |request| {
            assert_eq!(bearer(request), Some(expected.as_str()));
            HttpResponse::new(StatusCode::OK, b"[]".to_vec())
        }));
        let session = session_with(transport.clone(), tokens(&access, "r"));

        let response = session.authorized_request(protected_request()).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(transport.count("/api/tasks/"), 1);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_request_replayed() {
        let transport = Arc::new(ScriptedTransport::new(|request| {
            match (request.url.path(), bearer(request)) {
                ("/api/users/token/refresh/", None) => {
                    json_response(StatusCode::OK, json!({"access": "new"}))
                },
                ("/api/tasks/", Some("new")) => json_response(StatusCode::OK, json!([])),
                _ => HttpResponse::new(StatusCode::UNAUTHORIZED, vec![]),
            }
        }));
        let store = tokens("old", "r1");
        let session = session_with(transport.clone(), store.clone());
        let mut events = session.subscribe();

        let response = session.authorized_request(protected_request()).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(transport.count("/api/users/token/refresh/"), 1);
        assert_eq!(
            transport.bearers("/api/tasks/"),
            vec![Some("old".to_string()), Some("new".to_string())]
        );
        assert_eq!(store.access_token().unwrap().as_deref(), Some("new"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::TokenRefreshed);
    }

    #[tokio::test]
    async fn second_401_after_replay_is_an_auth_error() {
        let transport = Arc::new(ScriptedTransport::new(|request| {
            if request.url.path() == "/api/users/token/refresh/" {
                json_response(StatusCode::OK, json!({"access": "new"}))
            } else {
                HttpResponse::new(StatusCode::UNAUTHORIZED, vec![])
            }
        }));
        let session = session_with(transport.clone(), tokens("old", "r1"));

        let err = session
            .authorized_request(protected_request())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(transport.count("/api/users/token/refresh/"), 1);
        assert_eq!(transport.count("/api/tasks/"), 2);
        // The refreshed token stays; only a failed refresh ends the session
        assert_eq!(session.access_token().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn missing_refresh_token_expires_session_without_network_call() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            HttpResponse::new(StatusCode::UNAUTHORIZED, vec![])
        }));
        let store = TokenStore::in_memory();
        store.set_access_token("old").unwrap();
        let session = session_with(transport.clone(), store.clone());
        let mut events = session.subscribe();

        let err = session
            .authorized_request(protected_request())
            .await
            .unwrap_err();

        assert!(err.is_session_expired());
        assert_eq!(transport.count("/api/users/token/refresh/"), 0);
        assert!(!store.has_any().unwrap());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Expired);
    }

    #[tokio::test]
    async fn failed_refresh_clears_tokens_and_signals_expiry() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            json_response(
                StatusCode::UNAUTHORIZED,
                json!({"detail": "Token is invalid or expired"}),
            )
        }));
        let store = tokens(&token_expiring_in(-10), "r1");
        let session = session_with(transport.clone(), store.clone());
        let mut events = session.subscribe();

        let err = session
            .authorized_request(protected_request())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SessionExpired(_)));
        assert!(!store.has_any().unwrap());
        assert!(!session.is_authenticated());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Expired);
        assert_eq!(transport.count("/api/users/token/refresh/"), 1);
        assert_eq!(transport.count("/api/tasks/"), 1);
    }

    #[tokio::test]
    async fn concurrent_401s_share_one_refresh() {
        let transport = Arc::new(
            ScriptedTransport::new(|request| match (request.url.path(), bearer(request)) {
                ("/api/users/token/refresh/", _) => {
                    json_response(StatusCode::OK, json!({"access": "new"}))
                },
                (_, Some("new")) => json_response(StatusCode::OK, json!({"ok": true})),
                _ => HttpResponse::new(StatusCode::UNAUTHORIZED, vec![]),
            })
            .with_refresh_delay(Duration::from_millis(20)),
        );
        let session = session_with(transport.clone(), tokens("old", "r1"));

        let requests = (0..5).map(|_| session.authorized_request(protected_request()));
        let results = futures::future::join_all(requests).await;

        assert!(results.iter().all(|r| r.as_ref().is_ok_and(|resp| resp.is_success())));
        assert_eq!(transport.count("/api/users/token/refresh/"), 1);
        assert_eq!(transport.count("/api/tasks/"), 10);
    }

    #[tokio::test]
    async fn late_401_reuses_already_rotated_token() {
        let transport = Arc::new(ScriptedTransport::new(|request| {
            match bearer(request) {
                Some("new") => json_response(StatusCode::OK, json!({})),
                _ => HttpResponse::new(StatusCode::UNAUTHORIZED, vec![]),
            }
        }));
        let session = session_with(transport.clone(), tokens("new", "r1"));

        // Sent with the token that was current before another request refreshed it
        let mut request = protected_request();
        request.add_header(AUTHORIZATION, "Bearer old").unwrap();
        let response = session.authorized_request(request).await.unwrap();

        assert!(response.is_success());
        assert_eq!(transport.count("/api/users/token/refresh/"), 0);
    }

    #[tokio::test]
    async fn non_401_failures_are_returned_untouched() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR, b"boom".to_vec())
        }));
        let session = session_with(transport.clone(), tokens("old", "r1"));

        let response = session.authorized_request(protected_request()).await.unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(transport.count("/api/users/token/refresh/"), 0);

        let err = session.get_json::<Value>("tasks/").await.unwrap_err();
        assert_eq!(err.status_code(), Some(500));
    }

    #[tokio::test]
    async fn refresh_is_driven_by_auth_middleware_flag() {
        let transport = Arc::new(ScriptedTransport::new(|request| match request.url.path() {
            "/api/users/token/refresh/" => json_response(StatusCode::OK, json!({"access": "new"})),
            _ => HttpResponse::new(StatusCode::UNAUTHORIZED, vec![]),
        }));
        let store = tokens("old", "r1");

        // No bearer middleware: nothing flags the 401, so nothing is refreshed
        let bare = SessionManager::with_chain(
            ClientConfig::default(),
            store.clone(),
            transport.clone(),
            HttpMiddlewareChain::new(),
        );
        let response = bare.authorized_request(protected_request()).await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(transport.count("/api/users/token/refresh/"), 0);
        assert_eq!(store.access_token().unwrap().as_deref(), Some("old"));

        // With it, the flagged 401 runs refresh-and-replay exactly once
        let session = session_with(transport.clone(), store);
        let err = session.authorized_request(protected_request()).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)), "got {err:?}");
        assert_eq!(transport.count("/api/users/token/refresh/"), 1);
        assert_eq!(transport.bearers("/api/tasks/"), vec![None, Some("old".into()), Some("new".into())]);
    }
}
