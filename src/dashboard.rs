//! Dashboard lifetime wiring.
//!
//! A [`Dashboard`] owns the realtime channel, the task ledger it feeds and
//! the submission gateway for as long as a dashboard is mounted. Front ends
//! render from [`Dashboard::tasks`] and re-render when the revision counter
//! from [`Dashboard::watch`] changes.

use crate::error::{Error, Result};
use crate::realtime::{RealtimeChannel, Subscription};
use crate::session::SessionManager;
use crate::tasks::{TaskLedger, TaskRecord, TaskSubmissionGateway};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;

/// Channel, ledger and gateway for one mounted dashboard.
#[derive(Debug)]
pub struct Dashboard {
    session: SessionManager,
    channel: RealtimeChannel,
    gateway: TaskSubmissionGateway,
    ledger: Arc<RwLock<TaskLedger>>,
    revision: Arc<watch::Sender<u64>>,
    subscription: Mutex<Option<Subscription>>,
}

impl Dashboard {
    /// Dashboard over `session`, receiving updates from `channel`.
    pub fn new(session: SessionManager, channel: RealtimeChannel) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            gateway: TaskSubmissionGateway::new(session.clone()),
            session,
            channel,
            ledger: Arc::new(RwLock::new(TaskLedger::new())),
            revision: Arc::new(revision),
            subscription: Mutex::new(None),
        }
    }

    /// Dashboard with a websocket channel built from the session's config.
    #[cfg(feature = "websocket")]
    pub fn with_tungstenite(session: SessionManager) -> Self {
        let channel = RealtimeChannel::with_tungstenite(session.clone());
        Self::new(session, channel)
    }

    /// Start feeding the ledger from the realtime channel.
    ///
    /// Mounting while the channel runs is a no-op. Mounting again after the
    /// channel stopped (for example because the session expired and the
    /// user logged in again) restarts it with the same ledger listener.
    ///
    /// # Errors
    ///
    /// [`Error::SessionExpired`] when there is no valid session; the front end
    /// should send the user to log in.
    pub async fn mount(&self) -> Result<()> {
        if !self.session.is_authenticated() {
            return Err(Error::session_expired("not logged in"));
        }
        if self.is_mounted() && self.channel.is_running() {
            return Ok(());
        }

        self.subscribe_ledger();
        if !self.channel.connect().await {
            self.unsubscribe();
            return Err(Error::session_expired("no access token for realtime channel"));
        }
        tracing::info!("Dashboard mounted");
        Ok(())
    }

    /// Stop the channel and detach the ledger. The ledger keeps its records.
    pub async fn unmount(&self) {
        self.channel.disconnect().await;
        if self.unsubscribe() {
            tracing::info!("Dashboard unmounted");
        }
    }

    /// Whether [`mount`](Self::mount) succeeded and no unmount followed.
    ///
    /// A mounted dashboard whose channel stopped for lack of a token stays
    /// mounted; see [`Dashboard::is_live`].
    pub fn is_mounted(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Mounted and the channel loop is running.
    pub fn is_live(&self) -> bool {
        self.is_mounted() && self.channel.is_running()
    }

    /// Copy of the ledger contents, newest task first.
    pub fn tasks(&self) -> Vec<TaskRecord> {
        self.ledger.read().snapshot().to_vec()
    }

    /// Revision counter, bumped on every ledger change.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Gateway for submitting tasks.
    pub fn gateway(&self) -> &TaskSubmissionGateway {
        &self.gateway
    }

    /// The underlying realtime channel.
    pub fn channel(&self) -> &RealtimeChannel {
        &self.channel
    }

    fn subscribe_ledger(&self) {
        let mut slot = self.subscription.lock();
        if slot.is_some() {
            return;
        }
        let ledger = self.ledger.clone();
        let revision = self.revision.clone();
        *slot = Some(self.channel.on_task_update(move |update| {
            let outcome = ledger.write().apply(update.clone());
            if outcome.changed() {
                revision.send_modify(|rev| *rev += 1);
            }
        }));
    }

    fn unsubscribe(&self) -> bool {
        match self.subscription.lock().take() {
            Some(subscription) => subscription.unsubscribe(),
            None => false,
        }
    }
}
