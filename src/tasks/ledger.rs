//! Client-side task ledger.
//!
//! An ordered sequence of [`TaskRecord`]s, one per task id. New ids are
//! prepended; updates to known ids replace the record in place. Records are
//! never removed here.

use crate::tasks::types::{TaskRecord, TaskUpdate};
use chrono::{DateTime, Utc};

/// What [`TaskLedger::apply`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First update for this id; the record was prepended.
    Inserted,
    /// The existing record was replaced in place.
    Updated,
    /// The update matched the existing record exactly; nothing changed.
    Unchanged,
}

impl ApplyOutcome {
    /// Whether the ledger contents changed.
    pub fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Newest-first task records keyed by task id.
#[derive(Debug, Clone, Default)]
pub struct TaskLedger {
    records: Vec<TaskRecord>,
}

impl TaskLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert `update`, stamping it with the current time.
    pub fn apply(&mut self, update: TaskUpdate) -> ApplyOutcome {
        self.apply_at(update, Utc::now())
    }

    /// Upsert `update`, stamping it with `received_at`.
    ///
    /// Repeating an identical update is a no-op that keeps the original
    /// timestamp, so applying the same payload twice leaves the ledger as
    /// applying it once.
    pub fn apply_at(&mut self, update: TaskUpdate, received_at: DateTime<Utc>) -> ApplyOutcome {
        match self.position(&update.task_id) {
            Some(index) if self.records[index].matches(&update) => {
                tracing::trace!(task_id = %update.task_id, "Duplicate task update ignored");
                ApplyOutcome::Unchanged
            },
            Some(index) => {
                tracing::debug!(
                    task_id = %update.task_id,
                    status = %update.status,
                    "Task updated"
                );
                self.records[index] = TaskRecord::from_update(update, received_at);
                ApplyOutcome::Updated
            },
            None => {
                tracing::debug!(
                    task_id = %update.task_id,
                    status = %update.status,
                    "Task added"
                );
                self.records
                    .insert(0, TaskRecord::from_update(update, received_at));
                ApplyOutcome::Inserted
            },
        }
    }

    /// Current records, newest task first.
    pub fn snapshot(&self) -> &[TaskRecord] {
        &self.records
    }

    /// Record for `task_id`.
    pub fn get(&self, task_id: &str) -> Option<&TaskRecord> {
        self.position(task_id).map(|index| &self.records[index])
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no task has been seen.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn position(&self, task_id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.task_id == task_id)
    }
}
