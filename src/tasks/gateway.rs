//! Task submission through the authenticated transport.

use crate::error::{Error, Result};
use crate::session::SessionManager;
use crate::tasks::types::{SubmittedTask, TaskType};
use serde_json::{json, Value};

/// Longest text the backend accepts for `reverse_string`.
pub const MAX_REVERSE_TEXT_CHARS: usize = 1000;

/// Typed wrapper around the task endpoints.
///
/// Submissions are not retried. Token refresh happens underneath, inside
/// [`SessionManager::authorized_request`].
#[derive(Debug, Clone)]
pub struct TaskSubmissionGateway {
    session: SessionManager,
}

impl TaskSubmissionGateway {
    /// Gateway sending through `session`.
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    /// `POST /api/tasks/{task_type}/` with `parameters` as the body.
    ///
    /// # Errors
    ///
    /// [`Error::SessionExpired`] passes through unchanged so front ends can
    /// react to it uniformly; every other failure is wrapped in
    /// [`Error::Submission`].
    /// A task type name outside `[A-Za-z0-9_-]` is a validation error and
    /// never reaches the network.
    pub async fn submit_task(&self, task_type: TaskType, parameters: Value) -> Result<SubmittedTask> {
        let path = format!("tasks/{}/", path_segment("task type", task_type.as_str())?);
        match self.session.post_json::<_, SubmittedTask>(&path, &parameters).await {
            Ok(submitted) => {
                tracing::info!(task_id = %submitted.task_id, %task_type, "Task submitted");
                Ok(submitted)
            },
            Err(e) if e.is_session_expired() => Err(e),
            Err(e) => {
                tracing::warn!(%task_type, "Task submission failed: {}", e);
                Err(Error::submission(task_type.as_str(), e))
            },
        }
    }

    /// Submit `generate_random_number` for the inclusive range `min..=max`.
    pub async fn generate_random_number(&self, min: i64, max: i64) -> Result<SubmittedTask> {
        if min > max {
            return Err(Error::validation(format!(
                "minimum ({min}) must not exceed maximum ({max})"
            )));
        }
        self.submit_task(
            TaskType::GenerateRandomNumber,
            json!({ "min_value": min, "max_value": max }),
        )
        .await
    }

    /// Submit `reverse_string` for `text`.
    ///
    /// The text must not be blank and must fit the backend's length limit.
    pub async fn reverse_string(&self, text: &str) -> Result<SubmittedTask> {
        if text.trim().is_empty() {
            return Err(Error::validation("text must not be empty"));
        }
        let chars = text.chars().count();
        if chars > MAX_REVERSE_TEXT_CHARS {
            return Err(Error::validation(format!(
                "text is {chars} characters, limit is {MAX_REVERSE_TEXT_CHARS}"
            )));
        }
        self.submit_task(TaskType::ReverseString, json!({ "text": text }))
            .await
    }

    /// `GET /api/tasks/`, as returned by the server.
    pub async fn list_tasks(&self) -> Result<Value> {
        self.session.get_json("tasks/").await
    }

    /// `GET /api/tasks/{task_id}/`, as returned by the server.
    pub async fn get_task(&self, task_id: &str) -> Result<Value> {
        let task_id = path_segment("task id", task_id)?;
        self.session.get_json(&format!("tasks/{task_id}/")).await
    }
}

/// Reject values that would change which endpoint a path addresses.
fn path_segment<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(value)
    } else {
        Err(Error::validation(format!("invalid {what} '{value}'")))
    }
}
