//! One supervised push connection with fixed-delay reconnect.
//!
//! [`RealtimeChannel::connect`] spawns a supervisor task that loops:
//! read the access token, open a connection with it as the `token` query
//! credential, dispatch frames until the connection closes, wait the
//! configured delay, repeat. The loop ends when the caller disconnects
//! (which also cancels a pending reconnect wait) or when no access token is
//! available anymore.

use crate::config::ClientConfig;
use crate::realtime::connector::{Connector, FrameSource};
use crate::realtime::frame::parse_frame;
use crate::session::SessionManager;
use crate::shared::http_utils::redact_url_token;
use crate::tasks::TaskUpdate;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, possibly waiting to reconnect.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Frames are flowing.
    Open,
}

type Listener = Arc<dyn Fn(&TaskUpdate) + Send + Sync>;

/// Handle for one [`RealtimeChannel::on_task_update`] registration.
///
/// Each registration gets its own handle, even when the same callback is
/// registered twice.
#[must_use = "keep the Subscription to be able to unsubscribe the listener"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    channel: Weak<ChannelInner>,
}

impl Subscription {
    /// Remove exactly this registration.
    ///
    /// Returns `false` if the channel is gone or the listener was already removed.
    pub fn unsubscribe(self) -> bool {
        let Some(channel) = self.channel.upgrade() else {
            return false;
        };
        let mut listeners = channel.listeners.write();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        listeners.len() != before
    }
}

/// Push channel delivering [`TaskUpdate`]s to registered listeners.
///
/// Owned by whoever manages the dashboard's lifetime; dropping it stops the
/// supervisor task.
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ChannelInner {
    config: ClientConfig,
    session: SessionManager,
    connector: Arc<dyn Connector>,
    state: RwLock<ConnectionState>,
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
}

impl std::fmt::Debug for ChannelInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelInner")
            .field("state", &*self.state.read())
            .field("listeners", &self.listeners.read().len())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("inner", &self.inner)
            .field("running", &self.worker.lock().is_some())
            .finish()
    }
}

impl RealtimeChannel {
    /// Create a disconnected channel.
    ///
    /// The websocket URL and reconnect delay come from `config`; the access
    /// token is read from `session` on every connection attempt.
    pub fn new(config: ClientConfig, session: SessionManager, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                config,
                session,
                connector,
                state: RwLock::new(ConnectionState::Disconnected),
                listeners: RwLock::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Channel using the `tokio-tungstenite` connector and the session's config.
    #[cfg(feature = "websocket")]
    pub fn with_tungstenite(session: SessionManager) -> Self {
        let config = session.config().clone();
        Self::new(
            config,
            session,
            Arc::new(crate::realtime::connector::TungsteniteConnector::new()),
        )
    }

    /// Start the connection loop, replacing any running one.
    ///
    /// Returns `false`, after logging, when there is no access token to
    /// connect with. Connection failures are never returned; they are logged
    /// and retried.
    pub async fn connect(&self) -> bool {
        self.disconnect().await;

        if self.inner.session.access_token().is_none() {
            tracing::error!("Cannot open realtime channel: no access token");
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.inner.clone().supervise(cancel.clone()));
        let previous = self.worker.lock().replace(Worker { cancel, handle });
        if let Some(previous) = previous {
            // Lost a race with a concurrent connect
            previous.cancel.cancel();
        }
        true
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// No reconnect happens until [`connect`](Self::connect) is called again.
    pub async fn disconnect(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                tracing::error!("Realtime channel task failed: {}", e);
            }
            tracing::info!("Realtime channel disconnected");
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Whether frames are currently flowing.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Whether the connection loop is alive, connected or waiting to reconnect.
    ///
    /// False before the first [`connect`](Self::connect), after
    /// [`disconnect`](Self::disconnect), and once the loop stopped for lack of
    /// an access token.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Call `callback` for every task update, in arrival order.
    pub fn on_task_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TaskUpdate) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            channel: Arc::downgrade(&self.inner),
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

impl ChannelInner {
    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let Some(token) = self.session.access_token() else {
                tracing::error!("No access token available, realtime channel stopped");
                break;
            };
            let url = match self.config.websocket_url(&token) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!("Invalid realtime channel URL: {}", e);
                    break;
                },
            };

            self.set_state(ConnectionState::Connecting);
            tracing::info!("Connecting realtime channel to {}", redact_url_token(&url));
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.connector.connect(&url) => result,
            };

            match connected {
                Ok(mut source) => {
                    self.set_state(ConnectionState::Open);
                    tracing::info!("Realtime channel open");
                    let stopped = self.pump(source.as_mut(), &cancel).await;
                    source.close().await;
                    if stopped {
                        break;
                    }
                    tracing::info!("Realtime channel closed");
                },
                Err(e) => tracing::warn!("Realtime channel connection failed: {}", e),
            }

            self.set_state(ConnectionState::Disconnected);
            let delay = self.config.reconnect_delay();
            tracing::info!("Reconnecting realtime channel in {:?}", delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {},
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Dispatch frames until the connection ends. True if cancelled.
    async fn pump(&self, source: &mut dyn FrameSource, cancel: &CancellationToken) -> bool {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return true,
                frame = source.next_frame() => frame,
            };
            match frame {
                Some(Ok(text)) => self.handle_frame(&text),
                Some(Err(e)) => {
                    tracing::warn!("Realtime channel receive error: {}", e);
                    return false;
                },
                None => return false,
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        match parse_frame(text) {
            Ok(Some(update)) => {
                tracing::debug!(task_id = %update.task_id, status = %update.status, "Task update received");
                self.dispatch(&update);
            },
            Ok(None) => tracing::trace!("Ignoring non-task frame"),
            Err(e) => tracing::warn!("Dropping realtime frame: {}", e),
        }
    }

    fn dispatch(&self, update: &TaskUpdate) {
        // Listeners may (un)subscribe from inside the callback
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(update);
        }
    }
}
