//! The wire underneath the middleware chain.

use crate::client::http_middleware::{HttpRequest, HttpResponse};
use crate::error::Result;
use async_trait::async_trait;

/// Sends one HTTP request and returns whatever the server answered.
///
/// Non-success statuses are returned as responses, not errors: deciding what
/// a 401 means is the session layer's job. Only failures that produce no
/// response at all (connect, TLS, timeout) are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request`.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[cfg(feature = "http-client")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "http-client")]
mod reqwest_transport {
    use super::HttpTransport;
    use crate::client::http_middleware::{HttpRequest, HttpResponse};
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use std::time::Duration;

    /// [`HttpTransport`] backed by a `reqwest::Client`.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        /// Create a transport with the given per-request timeout.
        pub fn new(timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| Error::transport(format!("Failed to create HTTP client: {}", e)))?;
            Ok(Self { client })
        }

        /// Create a transport from an existing reqwest client.
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            let response = self
                .client
                .request(request.method, request.url)
                .headers(request.headers)
                .body(request.body)
                .send()
                .await
                .map_err(|e| Error::transport(e.to_string()))?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| Error::transport(format!("Failed to read response body: {}", e)))?;

            let mut out = HttpResponse::new(status, body.to_vec());
            out.headers = headers;
            Ok(out)
        }
    }
}
