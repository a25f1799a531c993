//! Error types for the taskdeck client core.
//!
//! All fallible operations return [`Result`], whose error side is the single
//! crate-wide [`Error`] enum. The variants follow the failure taxonomy the UI
//! layer cares about:
//!
//! - [`Error::Authentication`] - bad credentials or an unrecoverable 401
//! - [`Error::SessionExpired`] - refresh failed or impossible; forces re-login
//! - [`Error::Validation`] - input rejected locally, before any network call
//! - [`Error::Submission`] - a task POST failed
//! - [`Error::Channel`] - malformed frame or connection failure on the push
//!   channel; handled internally, never returned to UI callers

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the taskdeck client core.
///
/// # Examples
///
/// ```
/// use taskdeck::Error;
///
/// let err = Error::validation("min_value must not exceed max_value");
/// assert!(err.is_validation());
/// assert!(err.to_string().contains("min_value"));
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials were rejected, or a request still got 401 after a refresh.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The session can no longer be refreshed. Tokens have been cleared.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// Client-side input validation failed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Submitting a task failed.
    #[error("failed to submit {task_type} task: {source}")]
    Submission {
        /// The task type that was being submitted.
        task_type: String,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Push channel failure (malformed frame, connection error).
    #[error("channel error: {0}")]
    Channel(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body, lossily decoded.
        body: String,
    },

    /// The request never produced a response (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// The key-value store backing the token pair failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an authentication error.
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a session-expired error.
    pub fn session_expired(msg: impl Into<String>) -> Self {
        Self::SessionExpired(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Wrap a failure that happened while submitting `task_type`.
    pub fn submission(task_type: impl Into<String>, source: Error) -> Self {
        Self::Submission {
            task_type: task_type.into(),
            source: Box::new(source),
        }
    }

    /// Create a channel error.
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True if this error (or the failure it wraps) means the session is gone.
    pub fn is_session_expired(&self) -> bool {
        match self {
            Self::SessionExpired(_) => true,
            Self::Submission { source, .. } => source.is_session_expired(),
            _ => false,
        }
    }

    /// True for client-side validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// HTTP status carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Submission { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("invalid URL: {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("TOML parse error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            Error::authentication("bad password").to_string(),
            "authentication failed: bad password"
        );
        assert_eq!(
            Error::Http {
                status: 503,
                body: "unavailable".to_string()
            }
            .to_string(),
            "HTTP 503: unavailable"
        );
    }

    #[test]
    fn submission_exposes_inner_failure() {
        let err = Error::submission(
            "reverse_string",
            Error::Http {
                status: 500,
                body: String::new(),
            },
        );
        assert_eq!(err.status_code(), Some(500));
        assert!(!err.is_session_expired());
        assert!(std::error::Error::source(&err).is_some());

        let err = Error::submission("reverse_string", Error::session_expired("gone"));
        assert!(err.is_session_expired());
    }

    #[test]
    fn url_errors_become_config_errors() {
        let err: Error = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, Error::Config(_)));
    }
}
