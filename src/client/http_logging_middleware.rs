//! HTTP logging middleware with sensitive header redaction.
//!
//! Redaction is on by default for `authorization`, `cookie`, `set-cookie`,
//! `x-api-key`, `proxy-authorization` and `x-auth-token`. Authorization
//! values keep their scheme (`Bearer [REDACTED]`) unless configured otherwise.
//!
//! # Examples
//!
//! ```rust
//! use taskdeck::client::http_logging_middleware::HttpLoggingMiddleware;
//! use taskdeck::client::http_middleware::HttpMiddlewareChain;
//! use std::sync::Arc;
//!
//! let mut http_chain = HttpMiddlewareChain::new();
//! http_chain.add(Arc::new(
//!     HttpLoggingMiddleware::new()
//!         .with_level(tracing::Level::DEBUG)
//!         .with_max_body_bytes(512),
//! ));
//! ```

use crate::client::http_middleware::{
    HttpMiddleware, HttpMiddlewareContext, HttpRequest, HttpResponse, PUBLIC_CALL,
};
use crate::error::Result;
use crate::shared::http_utils::{default_redacted_headers, format_headers, redact_header_value};
use async_trait::async_trait;
use http::header::HeaderName;
use std::collections::HashSet;

/// Logs requests and responses passing through the chain.
#[derive(Debug, Clone)]
pub struct HttpLoggingMiddleware {
    level: tracing::Level,
    redact_headers: HashSet<HeaderName>,
    show_auth_scheme: bool,
    max_header_value_len: Option<usize>,
    max_body_bytes: Option<usize>,
}

impl Default for HttpLoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpLoggingMiddleware {
    /// Create a new HTTP logging middleware with secure defaults.
    ///
    /// Defaults: DEBUG level, default redactions, auth scheme shown, no
    /// header truncation, bodies not logged.
    pub fn new() -> Self {
        Self {
            level: tracing::Level::DEBUG,
            redact_headers: default_redacted_headers(),
            show_auth_scheme: true,
            max_header_value_len: None,
            max_body_bytes: None,
        }
    }

    /// Set the log level for this middleware.
    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = level;
        self
    }

    /// Add a header to the redaction list.
    pub fn redact_header(mut self, name: HeaderName) -> Self {
        self.redact_headers.insert(name);
        self
    }

    /// Set whether redacted Authorization headers keep their scheme.
    pub fn with_show_auth_scheme(mut self, show: bool) -> Self {
        self.show_auth_scheme = show;
        self
    }

    /// Truncate non-redacted header values longer than `max_len`.
    pub fn with_max_header_value_len(mut self, max_len: usize) -> Self {
        self.max_header_value_len = Some(max_len);
        self
    }

    /// Log up to `max_bytes` of each body. Bodies are not logged by default.
    ///
    /// Bodies of public calls (login, register, token refresh) carry
    /// passwords and tokens and are never previewed.
    pub fn with_max_body_bytes(mut self, max_bytes: usize) -> Self {
        self.max_body_bytes = Some(max_bytes);
        self
    }

    /// Redact a header value based on the header name.
    pub fn redact_header_value(&self, name: &HeaderName, value: &str) -> String {
        redact_header_value(
            name,
            value,
            &self.redact_headers,
            self.show_auth_scheme,
            self.max_header_value_len,
        )
    }

    fn body_info(&self, body: &[u8], context: &HttpMiddlewareContext) -> String {
        if context.get_metadata(PUBLIC_CALL).is_some() {
            return format!(" body={}B [REDACTED]", body.len());
        }
        match self.max_body_bytes {
            Some(max_bytes) if !body.is_empty() => {
                let preview_len = max_bytes.min(body.len());
                let preview = String::from_utf8_lossy(&body[..preview_len]);
                if body.len() > max_bytes {
                    format!(" body={}B (showing {}B): {}...", body.len(), preview_len, preview)
                } else {
                    format!(" body={}B: {}", body.len(), preview)
                }
            },
            _ => format!(" body={}B", body.len()),
        }
    }

    fn log_request(&self, request: &HttpRequest, context: &HttpMiddlewareContext) {
        let headers = format_headers(
            &request.headers,
            &self.redact_headers,
            self.show_auth_scheme,
            self.max_header_value_len,
        );
        let body = self.body_info(&request.body, context);
        let attempt = context.attempt;

        match self.level {
            tracing::Level::TRACE => tracing::trace!(
                attempt,
                "HTTP {} {} | headers: [{}]{}",
                request.method,
                request.url,
                headers,
                body
            ),
            tracing::Level::DEBUG => tracing::debug!(
                attempt,
                "HTTP {} {} | headers: [{}]{}",
                request.method,
                request.url,
                headers,
                body
            ),
            tracing::Level::INFO => {
                tracing::info!(attempt, "HTTP {} {}", request.method, request.url)
            },
            tracing::Level::WARN => {
                tracing::warn!(attempt, "HTTP {} {}", request.method, request.url)
            },
            _ => {
                tracing::error!(attempt, "HTTP {} {}", request.method, request.url)
            },
        }
    }

    fn log_response(&self, response: &HttpResponse, context: &HttpMiddlewareContext) {
        let body = self.body_info(&response.body, context);
        let marker = if response.is_success() {
            "✓"
        } else if response.is_client_error() {
            "⚠"
        } else if response.is_server_error() {
            "✗"
        } else {
            "→"
        };

        match self.level {
            tracing::Level::TRACE => tracing::trace!(
                "{} HTTP {} for {} {}{}",
                marker,
                response.status,
                context.method,
                context.url,
                body
            ),
            tracing::Level::DEBUG => tracing::debug!(
                "{} HTTP {} for {} {}{}",
                marker,
                response.status,
                context.method,
                context.url,
                body
            ),
            tracing::Level::INFO => {
                tracing::info!("{} HTTP {} for {}", marker, response.status, context.url)
            },
            tracing::Level::WARN => {
                tracing::warn!("{} HTTP {} for {}", marker, response.status, context.url)
            },
            _ => {
                tracing::error!("{} HTTP {} for {}", marker, response.status, context.url)
            },
        }
    }
}

#[async_trait]
impl HttpMiddleware for HttpLoggingMiddleware {
    async fn on_request(
        &self,
        request: &mut HttpRequest,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        self.log_request(request, context);
        Ok(())
    }

    async fn on_response(
        &self,
        response: &mut HttpResponse,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        self.log_response(response, context);
        Ok(())
    }

    fn priority(&self) -> i32 {
        100 // After auth injection, so the logged request is what goes on the wire
    }
}
