//! Inbound push frame decoding.
//!
//! Two envelopes carry task updates:
//!
//! ```json
//! {"type": "task_result", "data": {...}}
//! {"type": "task_update", "task": {...}}
//! ```
//!
//! The second is the legacy shape. Both decode to the same [`TaskUpdate`].
//! Frames with any other `type` (for example the server's
//! `connection_established` greeting) are ignored.

use crate::error::{Error, Result};
use crate::tasks::TaskUpdate;
use serde_json::Value;

/// Frame `type` of the current task update envelope.
pub const TASK_RESULT: &str = "task_result";

/// Frame `type` of the legacy task update envelope.
pub const TASK_UPDATE: &str = "task_update";

/// Decode one text frame.
///
/// Returns `Ok(None)` for well-formed frames this client does not handle.
///
/// # Errors
///
/// [`Error::Channel`] when the frame is not JSON, or when a task envelope's
/// payload is missing or not a valid task update.
pub fn parse_frame(text: &str) -> Result<Option<TaskUpdate>> {
    let mut frame: Value = serde_json::from_str(text)
        .map_err(|e| Error::channel(format!("malformed frame: {e}")))?;

    let payload_key = match frame.get("type").and_then(Value::as_str) {
        Some(TASK_RESULT) => "data",
        Some(TASK_UPDATE) => "task",
        _ => return Ok(None),
    };

    let payload = frame
        .get_mut(payload_key)
        .map(Value::take)
        .ok_or_else(|| Error::channel(format!("task frame without '{payload_key}'")))?;
    serde_json::from_value(payload)
        .map(Some)
        .map_err(|e| Error::channel(format!("invalid task payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{TaskResult, TaskStatus, TaskType};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "task_id": "t1",
            "task_type": "generate_random_number",
            "status": "succeeded",
            "result": {"number": 42}
        })
    }

    #[test]
    fn both_envelopes_decode_identically() {
        let current = json!({"type": "task_result", "data": payload()}).to_string();
        let legacy = json!({"type": "task_update", "task": payload()}).to_string();

        let a = parse_frame(&current).unwrap().unwrap();
        let b = parse_frame(&legacy).unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.task_type, TaskType::GenerateRandomNumber);
        assert_eq!(a.status, TaskStatus::Succeeded);
        assert_eq!(a.result, Some(TaskResult::RandomNumber { number: 42 }));
    }

    #[rstest]
    #[case(json!({"type": "connection_established", "message": "Connected as user 1"}))]
    #[case(json!({"type": "heartbeat"}))]
    #[case(json!({"data": {"task_id": "t1"}}))]
    #[case(json!([1, 2, 3]))]
    fn unknown_frames_are_ignored(#[case] frame: Value) {
        assert_eq!(parse_frame(&frame.to_string()).unwrap(), None);
    }

    #[rstest]
    #[case("not json")]
    #[case("{\"type\": \"task_result\"")]
    #[case(r#"{"type": "task_result"}"#)]
    #[case(r#"{"type": "task_update", "data": {}}"#)]
    #[case(r#"{"type": "task_result", "data": {"task_id": "t1", "status": "exploded", "task_type": "x"}}"#)]
    fn bad_frames_are_channel_errors(#[case] text: &str) {
        assert!(matches!(parse_frame(text), Err(Error::Channel(_))));
    }
}
