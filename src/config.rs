//! Client configuration: where the backend lives and how the push channel behaves.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Configuration for a taskdeck client.
///
/// # Example Configuration File
///
/// ```toml
/// request_timeout_ms = 30000
///
/// [backend]
/// host = "api.example.com"
/// port = 443
/// secure = true
///
/// [websocket]
/// path = "ws/notifications/"
/// reconnect_delay_ms = 5000
/// ```
///
/// # Examples
///
/// ```
/// use taskdeck::ClientConfig;
///
/// let config = ClientConfig::default();
/// assert_eq!(
///     config.api_url("users/login/").unwrap().as_str(),
///     "http://localhost:8000/api/users/login/"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Remote API location.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Push channel settings.
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// Host and port of the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Hostname or IP address.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use `https`/`wss` instead of `http`/`ws`.
    #[serde(default)]
    pub secure: bool,
}

/// Push channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Path of the streaming endpoint, relative to the backend root.
    #[serde(default = "default_ws_path")]
    pub path: String,

    /// Fixed delay before reconnecting after the connection closes.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_ws_path() -> String {
    "ws/notifications/".to_string()
}

fn default_reconnect_delay() -> u64 {
    5_000
}

fn default_request_timeout() -> u64 {
    30_000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secure: false,
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: default_ws_path(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            websocket: WebSocketConfig::default(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Into::into)
    }

    /// Build a configuration pointing at `base`, e.g. `http://127.0.0.1:8000`.
    ///
    /// An `https` scheme switches both the API and the channel to TLS.
    pub fn from_base_url(base: &str) -> Result<Self> {
        let url = Url::parse(base)?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::config(format!("base URL has no host: {base}")))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::config(format!("base URL has no port: {base}")))?;

        Ok(Self {
            backend: BackendConfig {
                host,
                port,
                secure: url.scheme() == "https",
            },
            ..Self::default()
        })
    }

    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// - `TASKDECK_BACKEND_HOST`
    /// - `TASKDECK_BACKEND_PORT`
    /// - `TASKDECK_BACKEND_SECURE` (`1`/`true`)
    /// - `TASKDECK_WS_PATH`
    /// - `TASKDECK_RECONNECT_DELAY_MS`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("TASKDECK_BACKEND_HOST") {
            config.backend.host = host;
        }
        if let Some(port) = env_parse::<u16>("TASKDECK_BACKEND_PORT") {
            config.backend.port = port;
        }
        if let Ok(secure) = std::env::var("TASKDECK_BACKEND_SECURE") {
            config.backend.secure = matches!(secure.as_str(), "1" | "true" | "TRUE" | "yes");
        }
        if let Ok(path) = std::env::var("TASKDECK_WS_PATH") {
            config.websocket.path = path;
        }
        if let Some(delay) = env_parse::<u64>("TASKDECK_RECONNECT_DELAY_MS") {
            config.websocket.reconnect_delay_ms = delay;
        }

        config
    }

    /// Set the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.websocket.reconnect_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Reconnect delay as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.websocket.reconnect_delay_ms)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Absolute URL of an API endpoint. `path` is relative to `/api/`.
    pub fn api_url(&self, path: &str) -> Result<Url> {
        let scheme = if self.backend.secure { "https" } else { "http" };
        let url = format!(
            "{scheme}://{}:{}/api/{}",
            self.backend.host,
            self.backend.port,
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&url)?)
    }

    /// Streaming endpoint URL carrying `token` as the `token` query credential.
    pub fn websocket_url(&self, token: &str) -> Result<Url> {
        let scheme = if self.backend.secure { "wss" } else { "ws" };
        let mut url = Url::parse(&format!(
            "{scheme}://{}:{}/{}",
            self.backend.host,
            self.backend.port,
            self.websocket.path.trim_start_matches('/')
        ))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        },
    }
}
