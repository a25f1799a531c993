//! Bearer token middleware.
//!
//! Attaches `Authorization: Bearer <access>` to every outbound call when the
//! [`TokenStore`] holds an access token, and flags 401 responses in the
//! middleware context so the session manager can run its refresh-and-replay
//! protocol. The middleware itself never refreshes or retries.

use crate::client::http_middleware::{
    HttpMiddleware, HttpMiddlewareContext, HttpRequest, HttpResponse, AUTH_FAILURE, PUBLIC_CALL,
};
use crate::error::Result;
use crate::session::token_store::TokenStore;
use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::StatusCode;

/// `Authorization` header value for an access token.
pub fn bearer_value(token: &str) -> String {
    format!("Bearer {token}")
}

/// Injects the stored access token into outbound requests.
///
/// # Examples
///
/// ```rust
/// use taskdeck::client::auth_middleware::BearerAuthMiddleware;
/// use taskdeck::client::http_middleware::HttpMiddlewareChain;
/// use taskdeck::session::token_store::{MemoryStore, TokenStore};
/// use std::sync::Arc;
///
/// let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
/// let mut chain = HttpMiddlewareChain::new();
/// chain.add(Arc::new(BearerAuthMiddleware::new(tokens)));
/// ```
#[derive(Debug, Clone)]
pub struct BearerAuthMiddleware {
    tokens: TokenStore,
}

impl BearerAuthMiddleware {
    /// Create a middleware reading tokens from `tokens`.
    pub fn new(tokens: TokenStore) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl HttpMiddleware for BearerAuthMiddleware {
    async fn on_request(
        &self,
        request: &mut HttpRequest,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        if context.get_metadata(PUBLIC_CALL).is_some() {
            tracing::trace!("Skipping bearer injection for public call {}", context.url);
            return Ok(());
        }

        // A replay already carries the refreshed token
        if request.has_header(AUTHORIZATION.as_str()) {
            tracing::trace!("Authorization header already present - not overriding");
            return Ok(());
        }

        // Unreadable storage means "no token": the call goes out anonymously
        // and the 401 path decides what happens next.
        let token = match self.tokens.access_token() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Could not read access token: {}", e);
                None
            },
        };

        if let Some(token) = token {
            request.add_header(AUTHORIZATION, &bearer_value(&token))?;
            tracing::trace!("Bearer token injected into Authorization header");
        }

        Ok(())
    }

    async fn on_response(
        &self,
        response: &mut HttpResponse,
        context: &HttpMiddlewareContext,
    ) -> Result<()> {
        if response.status == StatusCode::UNAUTHORIZED {
            context.set_metadata(AUTH_FAILURE.to_string(), "true".to_string());
            if context.is_retry() {
                tracing::warn!(
                    "Authentication failed after token refresh for {} {}",
                    context.method,
                    context.url
                );
            }
        }
        Ok(())
    }

    fn priority(&self) -> i32 {
        10 // High priority - run early
    }
}
