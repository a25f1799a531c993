//! Connection seam under [`RealtimeChannel`](super::RealtimeChannel).
//!
//! The channel owns lifecycle and dispatch; a [`Connector`] only knows how to
//! open a socket and hand back its text frames.

use crate::error::Result;
use async_trait::async_trait;
use url::Url;

/// Opens push connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`. The URL already carries the credential.
    async fn connect(&self, url: &Url) -> Result<Box<dyn FrameSource>>;
}

/// Inbound side of one open connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame.
    ///
    /// `None` once the peer closed the connection. An `Err` is a transport
    /// failure; the connection is unusable afterwards.
    async fn next_frame(&mut self) -> Option<Result<String>>;

    /// Close the connection. Best effort.
    async fn close(&mut self);
}

#[cfg(feature = "websocket")]
pub use self::tungstenite_connector::TungsteniteConnector;

#[cfg(feature = "websocket")]
mod tungstenite_connector {
    use super::{Connector, FrameSource};
    use crate::error::{Error, Result};
    use crate::shared::http_utils::redact_url_token;
    use async_trait::async_trait;
    use futures::StreamExt;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
    use url::Url;

    /// [`Connector`] over `tokio-tungstenite`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TungsteniteConnector;

    impl TungsteniteConnector {
        /// Create a connector.
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl Connector for TungsteniteConnector {
        async fn connect(&self, url: &Url) -> Result<Box<dyn FrameSource>> {
            let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| {
                    Error::channel(format!("connect to {} failed: {e}", redact_url_token(url)))
                })?;
            tracing::debug!(status = %response.status(), "WebSocket handshake complete");
            Ok(Box::new(TungsteniteFrames { stream }))
        }
    }

    struct TungsteniteFrames {
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    }

    #[async_trait]
    impl FrameSource for TungsteniteFrames {
        async fn next_frame(&mut self) -> Option<Result<String>> {
            loop {
                match self.stream.next().await? {
                    Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                    // Invalid UTF-8 then fails JSON decoding and is dropped like any bad frame
                    Ok(Message::Binary(bytes)) => {
                        return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "Peer closed WebSocket");
                        return None;
                    },
                    // Ping/pong are answered by tungstenite itself
                    Ok(_) => continue,
                    Err(e) => return Some(Err(Error::channel(format!("receive failed: {e}")))),
                }
            }
        }

        async fn close(&mut self) {
            if let Err(e) = self.stream.close(None).await {
                tracing::debug!("WebSocket close failed: {}", e);
            }
        }
    }
}
