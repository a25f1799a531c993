//! # taskdeck
//!
//! Async client core for a task dashboard backend.
//!
//! The crate keeps an access/refresh token pair valid across arbitrary API
//! calls and mirrors server-side task progress into a local ledger fed by a
//! websocket push channel.
//!
//! - [`SessionManager`] logs in and out, decides token validity and runs
//!   every authenticated call through a refresh-and-replay protocol with a
//!   single shared in-flight refresh.
//! - [`RealtimeChannel`] holds one push connection, dispatches task updates
//!   and reconnects after a fixed delay.
//! - [`TaskLedger`] upserts task updates: new ids are prepended, known ids
//!   are replaced in place.
//! - [`TaskSubmissionGateway`] validates and submits tasks.
//! - [`Dashboard`] wires the three together for the lifetime of a view.
//!
//! ## Example
//!
//! ```rust,no_run
//! use taskdeck::{ClientConfig, Dashboard, SessionEvent, SessionManager};
//! use taskdeck::session::TokenStore;
//!
//! # async fn example() -> taskdeck::Result<()> {
//! let session = SessionManager::with_reqwest(ClientConfig::from_env(), TokenStore::in_memory())?;
//! session.login("ada", "correct horse").await?;
//!
//! let mut events = session.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if event == SessionEvent::Expired {
//!             eprintln!("session expired, please log in again");
//!         }
//!     }
//! });
//!
//! let dashboard = Dashboard::with_tungstenite(session);
//! dashboard.mount().await?;
//! let submitted = dashboard.gateway().generate_random_number(1, 100).await?;
//!
//! let mut revisions = dashboard.watch();
//! while revisions.changed().await.is_ok() {
//!     if let Some(task) = dashboard.tasks().iter().find(|t| t.task_id == submitted.task_id) {
//!         println!("{} is {}", task.task_id, task.status);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod realtime;
pub mod session;
pub mod shared;
pub mod tasks;

pub use config::ClientConfig;
pub use dashboard::Dashboard;
pub use error::{Error, Result};
pub use realtime::{ConnectionState, RealtimeChannel, Subscription};
pub use session::{Claims, SessionEvent, SessionManager, SessionState};
pub use tasks::{
    ApplyOutcome, SubmittedTask, TaskLedger, TaskRecord, TaskResult, TaskStatus,
    TaskSubmissionGateway, TaskType, TaskUpdate,
};
