//! Scheduled-task registry (spec §6 `ScheduleTask`/`ListTasks`/`CancelTask`)
//!
//! Generalizes the teacher's `sync::worker::SyncWorker` (a single named
//! background loop driven by an `mpsc` command channel) into a registry of
//! many independently cancellable tasks, one per lifecycle worker a tenant
//! has scheduled (dedup sweep, summarization sweep, expiry sweep, backup
//! verification). This registry only tracks *intent* — the schedule and
//! cancellation flag — the actual run loop lives with whatever process
//! polls [`TaskRegistry::due`].

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MemoriaError, Result};

pub type TaskId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Dedup,
    Summarize,
    Expiry,
    BackupVerify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: TaskId,
    pub user_id: String,
    pub kind: TaskKind,
    /// Cron expression, same grammar as `config.dedup_schedule.schedule_cron`.
    pub schedule_cron: String,
    pub cancelled: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, ScheduledTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, user_id: &str, kind: TaskKind, schedule_cron: &str) -> ScheduledTask {
        let task = ScheduledTask {
            task_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            schedule_cron: schedule_cron.to_string(),
            cancelled: false,
            created_at: chrono::Utc::now(),
            last_run_at: None,
        };
        self.tasks.insert(task.task_id, task.clone());
        task
    }

    pub fn list(&self, user_id: &str) -> Vec<ScheduledTask> {
        self.tasks
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect()
    }

    pub fn cancel(&self, task_id: TaskId) -> Result<()> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| MemoriaError::NotFound(format!("scheduled task {}", task_id)))?;
        task.cancelled = true;
        Ok(())
    }

    pub fn mark_ran(&self, task_id: TaskId) -> Result<()> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| MemoriaError::NotFound(format!("scheduled task {}", task_id)))?;
        task.last_run_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Tasks not yet cancelled, for whatever loop polls this registry.
    pub fn active(&self) -> Vec<ScheduledTask> {
        self.tasks
            .iter()
            .filter(|entry| !entry.cancelled)
            .map(|entry| entry.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_task_is_excluded_from_active() {
        let registry = TaskRegistry::new();
        let task = registry.schedule("u1", TaskKind::Dedup, "0 4 * * 0");
        assert_eq!(registry.active().len(), 1);
        registry.cancel(task.task_id).unwrap();
        assert!(registry.active().is_empty());
        assert_eq!(registry.list("u1").len(), 1);
    }

    #[test]
    fn cancel_unknown_task_is_not_found() {
        let registry = TaskRegistry::new();
        assert!(matches!(registry.cancel(Uuid::new_v4()), Err(MemoriaError::NotFound(_))));
    }
}
