//! Task model, client-side ledger and submission gateway.

pub mod gateway;
pub mod ledger;
pub mod types;

pub use gateway::{TaskSubmissionGateway, MAX_REVERSE_TEXT_CHARS};
pub use ledger::{ApplyOutcome, TaskLedger};
pub use types::{SubmittedTask, TaskRecord, TaskResult, TaskStatus, TaskType, TaskUpdate};
