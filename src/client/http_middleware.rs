//! HTTP middleware for request/response transformation.
//!
//! Every API call made by the session layer passes through an
//! [`HttpMiddlewareChain`] before it reaches the [`HttpTransport`]. This is
//! where bearer tokens are attached and where requests are logged.
//!
//! [`HttpTransport`]: crate::client::transport::HttpTransport

use crate::error::{Error, Result};
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Metadata key marking a call that must not carry credentials.
pub const PUBLIC_CALL: &str = "auth.public";

/// Metadata key marking a request that is a post-refresh replay.
pub const RETRIED: &str = "auth.retried";

/// Metadata key set by the auth middleware when the server answered 401.
pub const AUTH_FAILURE: &str = "auth_failure";

/// Context for HTTP middleware execution.
#[derive(Debug, Clone)]
pub struct HttpMiddlewareContext {
    /// Request ID for correlation
    pub request_id: Option<String>,
    /// URL being requested
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Attempt number; `1` for the replay after a token refresh
    pub attempt: u32,
    /// Custom metadata
    pub metadata: Arc<parking_lot::RwLock<HashMap<String, String>>>,
}

impl HttpMiddlewareContext {
    /// Create a new HTTP middleware context
    pub fn new(url: String, method: String) -> Self {
        Self {
            request_id: None,
            url,
            method,
            attempt: 0,
            metadata: Arc::new(parking_lot::RwLock::new(HashMap::new())),
        }
    }

    /// Context for `request`.
    pub fn for_request(request: &HttpRequest) -> Self {
        Self::new(request.url.to_string(), request.method.to_string())
    }

    /// Context for a call that must bypass bearer injection.
    pub fn public(request: &HttpRequest) -> Self {
        let context = Self::for_request(request);
        context.set_metadata(PUBLIC_CALL.to_string(), "true".to_string());
        context
    }

    /// Derive the context for a replay of this request.
    ///
    /// Metadata is copied, not shared, so the original attempt's record stays intact.
    pub fn retry(&self) -> Self {
        let mut metadata = self.metadata.read().clone();
        metadata.remove(AUTH_FAILURE);
        let context = Self {
            request_id: self.request_id.clone(),
            url: self.url.clone(),
            method: self.method.clone(),
            attempt: self.attempt + 1,
            metadata: Arc::new(parking_lot::RwLock::new(metadata)),
        };
        context.set_metadata(RETRIED.to_string(), "true".to_string());
        context
    }

    /// Whether this request has already been replayed once.
    pub fn is_retry(&self) -> bool {
        self.attempt > 0 || self.get_metadata(RETRIED).is_some()
    }

    /// Whether the auth middleware flagged this attempt as rejected.
    pub fn auth_failed(&self) -> bool {
        self.get_metadata(AUTH_FAILURE).is_some()
    }

    /// Set metadata value
    pub fn set_metadata(&self, key: String, value: String) {
        self.metadata.write().insert(key, value);
    }

    /// Get metadata value
    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.metadata.read().get(key).cloned()
    }
}

/// Outbound HTTP request as seen by middleware.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute target URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Create a new HTTP request
    pub fn new(method: Method, url: Url, body: Vec<u8>) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// `GET` request without a body.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, Vec::new())
    }

    /// Request with a JSON body and `content-type: application/json`.
    pub fn json<T: Serialize + ?Sized>(method: Method, url: Url, body: &T) -> Result<Self> {
        let mut request = Self::new(method, url, serde_json::to_vec(body)?);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(request)
    }

    /// Add (or replace) a header
    pub fn add_header(&mut self, name: HeaderName, value: &str) -> Result<()> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::transport(format!("invalid value for header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Get a header value as text
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether a header is present
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }
}

/// HTTP response representation for middleware
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create a new HTTP response
    pub fn new(status: StatusCode, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// 4xx
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// 5xx
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Into::into)
    }

    /// Turn a non-success response into [`Error::Http`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Http {
                status: self.status.as_u16(),
                body: self.text(),
            })
        }
    }
}

/// HTTP-level middleware trait.
///
/// # Examples
///
/// ```rust
/// use taskdeck::client::http_middleware::{HttpMiddleware, HttpRequest, HttpMiddlewareContext};
/// use async_trait::async_trait;
/// use http::header::HeaderName;
///
/// struct ClientVersionMiddleware;
///
/// #[async_trait]
/// impl HttpMiddleware for ClientVersionMiddleware {
///     async fn on_request(
///         &self,
///         request: &mut HttpRequest,
///         _context: &HttpMiddlewareContext,
///     ) -> taskdeck::Result<()> {
///         request.add_header(HeaderName::from_static("x-client-version"), "0.1.0")
///     }
/// }
/// ```
#[async_trait]
pub trait HttpMiddleware: Send + Sync {
    /// Called before HTTP request is sent
    async fn on_request(
        &self,
        request: &mut HttpRequest,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        let _ = (request, context);
        Ok(())
    }

    /// Called after HTTP response is received
    async fn on_response(
        &self,
        response: &mut HttpResponse,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        let _ = (response, context);
        Ok(())
    }

    /// Priority for ordering (lower runs first)
    fn priority(&self) -> i32 {
        50 // Default priority
    }

    /// Should this middleware execute for this context?
    async fn should_execute(&self, _context: &HttpMiddlewareContext) -> bool {
        true
    }
}

/// Chain of HTTP middleware
pub struct HttpMiddlewareChain {
    middlewares: Vec<Arc<dyn HttpMiddleware>>,
}

impl HttpMiddlewareChain {
    /// Create a new HTTP middleware chain
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Add middleware to the chain
    pub fn add(&mut self, middleware: Arc<dyn HttpMiddleware>) {
        self.middlewares.push(middleware);
        // Stable sort keeps insertion order among equal priorities
        self.middlewares.sort_by_key(|m| m.priority());
    }

    /// Number of registered middleware
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// True when no middleware is registered
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Process request through all middleware
    pub async fn process_request(
        &self,
        request: &mut HttpRequest,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        for middleware in &self.middlewares {
            if middleware.should_execute(context).await {
                middleware.on_request(request, context).await?;
            }
        }
        Ok(())
    }

    /// Process response through all middleware (in reverse order)
    pub async fn process_response(
        &self,
        response: &mut HttpResponse,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        for middleware in self.middlewares.iter().rev() {
            if middleware.should_execute(context).await {
                middleware.on_response(response, context).await?;
            }
        }
        Ok(())
    }
}

impl Default for HttpMiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HttpMiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMiddlewareChain")
            .field("count", &self.middlewares.len())
            .finish()
    }
}
