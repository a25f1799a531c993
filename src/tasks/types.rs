//! Task wire types.
//!
//! Results are a tagged union resolved from the task type, not from the
//! payload's shape alone. A `generate_random_number` result is
//! [`TaskResult::RandomNumber`], a `reverse_string` result is
//! [`TaskResult::ReversedText`], anything else stays raw JSON.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kind of work a task performs. Also its submission endpoint segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    /// `generate_random_number`
    GenerateRandomNumber,
    /// `reverse_string`
    ReverseString,
    /// A task type this client has no typed support for.
    Other(String),
}

impl TaskType {
    /// Wire name, e.g. `reverse_string`.
    pub fn as_str(&self) -> &str {
        match self {
            Self::GenerateRandomNumber => "generate_random_number",
            Self::ReverseString => "reverse_string",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for TaskType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "generate_random_number" => Self::GenerateRandomNumber,
            "reverse_string" => Self::ReverseString,
            _ => Self::Other(name),
        }
    }
}

impl From<&str> for TaskType {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<TaskType> for String {
    fn from(task_type: TaskType) -> Self {
        match task_type {
            TaskType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum TaskStatus {
    /// Accepted, not started.
    Pending,
    /// Being processed.
    Running,
    /// Finished with a result. Terminal.
    Succeeded,
    /// Finished with an error. Terminal.
    Failed,
}

impl TaskStatus {
    /// Whether no further transitions are expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // Workers publish `completed`/`error`; accept those and a few synonyms
        match s.to_ascii_lowercase().as_str() {
            "pending" | "queued" => Ok(Self::Pending),
            "running" | "processing" | "started" => Ok(Self::Running),
            "succeeded" | "completed" | "success" => Ok(Self::Succeeded),
            "failed" | "error" | "failure" => Ok(Self::Failed),
            other => Err(Error::channel(format!("unknown task status '{other}'"))),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result payload of a finished task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskResult {
    /// `{"number": 42}`
    RandomNumber {
        /// The generated number.
        number: i64,
    },
    /// `{"reversed_text": "olleh"}`
    ReversedText {
        /// The input text reversed.
        reversed_text: String,
    },
    /// Untyped payload: unknown task type or unexpected shape.
    Other(Value),
}

#[derive(Deserialize)]
struct RandomNumberPayload {
    number: i64,
}

#[derive(Deserialize)]
struct ReversedTextPayload {
    reversed_text: String,
}

impl TaskResult {
    /// Interpret `payload` according to `task_type`.
    pub fn from_payload(task_type: &TaskType, payload: Value) -> Self {
        match task_type {
            TaskType::GenerateRandomNumber => {
                match serde_json::from_value::<RandomNumberPayload>(payload.clone()) {
                    Ok(p) => Self::RandomNumber { number: p.number },
                    Err(_) => Self::Other(payload),
                }
            },
            TaskType::ReverseString => {
                match serde_json::from_value::<ReversedTextPayload>(payload.clone()) {
                    Ok(p) => Self::ReversedText {
                        reversed_text: p.reversed_text,
                    },
                    Err(_) => Self::Other(payload),
                }
            },
            TaskType::Other(_) => Self::Other(payload),
        }
    }

    /// The generated number, for random-number results.
    pub fn number(&self) -> Option<i64> {
        match self {
            Self::RandomNumber { number } => Some(*number),
            _ => None,
        }
    }

    /// The reversed text, for reverse-string results.
    pub fn reversed_text(&self) -> Option<&str> {
        match self {
            Self::ReversedText { reversed_text } => Some(reversed_text),
            _ => None,
        }
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RandomNumber { number } => write!(f, "{number}"),
            Self::ReversedText { reversed_text } => f.write_str(reversed_text),
            Self::Other(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Deserialize)]
struct RawTaskUpdate {
    task_id: String,
    task_type: TaskType,
    status: TaskStatus,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Normalized task-update event, as pushed by the realtime channel.
///
/// Deserializing enforces the terminal-state rule: a succeeded update never
/// carries an error and a failed update never carries a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTaskUpdate")]
pub struct TaskUpdate {
    /// Server-assigned id, unique within a ledger.
    pub task_id: String,
    /// Task kind.
    pub task_type: TaskType,
    /// Current status.
    pub status: TaskStatus,
    /// Result payload, typed by `task_type`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TryFrom<RawTaskUpdate> for TaskUpdate {
    type Error = Error;

    fn try_from(raw: RawTaskUpdate) -> Result<Self> {
        if raw.task_id.is_empty() {
            return Err(Error::channel("task update without task_id"));
        }
        let result = raw
            .result
            .map(|payload| TaskResult::from_payload(&raw.task_type, payload));
        Ok(Self::new(raw.task_id, raw.task_type, raw.status)
            .with_result(result)
            .with_error(raw.error))
    }
}

impl TaskUpdate {
    /// Update without result or error.
    pub fn new(task_id: impl Into<String>, task_type: TaskType, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            task_type,
            status,
            result: None,
            error: None,
        }
    }

    /// Attach a result. Dropped if the status is `failed`.
    pub fn with_result(mut self, result: Option<TaskResult>) -> Self {
        self.result = result;
        self.normalized()
    }

    /// Attach an error message. Dropped if the status is `succeeded`.
    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        match self.status {
            TaskStatus::Succeeded => self.error = None,
            TaskStatus::Failed => self.result = None,
            TaskStatus::Pending | TaskStatus::Running => {},
        }
        self
    }
}

/// One ledger entry: the latest update for a task plus when it arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    /// Server-assigned id.
    pub task_id: String,
    /// Task kind.
    pub task_type: TaskType,
    /// Current status.
    pub status: TaskStatus,
    /// Result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the update that produced this record was applied.
    pub received_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Record built from `update`, received at `received_at`.
    pub fn from_update(update: TaskUpdate, received_at: DateTime<Utc>) -> Self {
        Self {
            task_id: update.task_id,
            task_type: update.task_type,
            status: update.status,
            result: update.result,
            error: update.error,
            received_at,
        }
    }

    /// Whether `update` carries exactly this record's payload.
    pub fn matches(&self, update: &TaskUpdate) -> bool {
        self.task_id == update.task_id
            && self.task_type == update.task_type
            && self.status == update.status
            && self.result == update.result
            && self.error == update.error
    }
}

/// Server acknowledgement of a submitted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedTask {
    /// Id under which updates for this task will arrive.
    pub task_id: String,
    /// Echoed task type, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    /// Initial status as reported by the server, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}
