//! HTTP plumbing: request/response types, the middleware chain and the transport.

pub mod auth_middleware;
pub mod http_logging_middleware;
pub mod http_middleware;
pub mod transport;

pub use auth_middleware::BearerAuthMiddleware;
pub use http_logging_middleware::HttpLoggingMiddleware;
pub use http_middleware::{
    HttpMiddleware, HttpMiddlewareChain, HttpMiddlewareContext, HttpRequest, HttpResponse,
};
#[cfg(feature = "http-client")]
pub use transport::ReqwestTransport;
pub use transport::HttpTransport;
