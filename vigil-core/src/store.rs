//! Persistence accessor surface.
//!
//! The SQL layer proper is an external collaborator; the orchestration
//! engine only ever touches task and report state through this narrow
//! async trait. Every method is read-your-writes consistent, and
//! [`TaskStore::schedules_snapshot`] returns one atomic snapshot of all
//! schedules joined with their tasks' run status.
//!
//! [`MemoryStore`] backs the daemon default and the test suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use vigil_model::{
    NvtPlugin, OwnerId, Preference, Report, ReportId, ResultMessage, Schedule, ScheduleId,
    SlaveBookkeeping, Task, TaskId,
};

use crate::status::{RunStatus, StatusEvent, Transition};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("report {0} not found")]
    ReportNotFound(ReportId),

    #[error("schedule {0} not found")]
    ScheduleNotFound(ScheduleId),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One row of the scheduler's atomic snapshot: a schedule joined with the
/// task it drives and that task's current run status.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub schedule: Schedule,
    pub task: TaskId,
    pub owner: OwnerId,
    pub run_status: RunStatus,
}

/// Narrow accessor surface over persisted task/report/schedule state.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn task(&self, id: TaskId) -> StoreResult<Task>;
    async fn task_exists(&self, id: TaskId) -> StoreResult<bool>;
    async fn insert_task(&self, task: Task) -> StoreResult<()>;
    /// Remove a task. `ultimate` also removes its reports; otherwise they
    /// stay behind for later inspection.
    async fn delete_task(&self, id: TaskId, ultimate: bool) -> StoreResult<()>;

    async fn run_status(&self, id: TaskId) -> StoreResult<RunStatus>;
    async fn set_run_status(&self, id: TaskId, status: RunStatus) -> StoreResult<()>;

    /// Allocate a fresh report and make it the task's current one.
    async fn create_report(&self, task: TaskId) -> StoreResult<ReportId>;
    /// Reuse the task's existing report for a resumed run: same id, end
    /// times cleared.
    async fn reopen_report(&self, task: TaskId) -> StoreResult<ReportId>;
    /// Drop results of unfinished hosts before falling back from a failed
    /// resume to a fresh start.
    async fn trim_report(&self, task: TaskId) -> StoreResult<()>;
    async fn current_report(&self, task: TaskId) -> StoreResult<Option<Report>>;

    async fn append_result(&self, report: ReportId, message: ResultMessage) -> StoreResult<()>;
    async fn set_scan_start(&self, report: ReportId, at: DateTime<Utc>) -> StoreResult<()>;
    async fn set_scan_end(&self, report: ReportId, at: Option<DateTime<Utc>>) -> StoreResult<()>;
    async fn set_host_start(
        &self,
        report: ReportId,
        host: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn set_host_end(
        &self,
        report: ReportId,
        host: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn set_host_attack_state(
        &self,
        report: ReportId,
        host: &str,
        state: &str,
    ) -> StoreResult<()>;
    async fn set_host_progress(
        &self,
        report: ReportId,
        host: &str,
        current: u32,
        max: u32,
    ) -> StoreResult<()>;
    async fn add_host_detail(
        &self,
        report: ReportId,
        host: &str,
        detail: &str,
    ) -> StoreResult<()>;

    /// Record or update the slave bookkeeping of a delegated report.
    async fn set_slave_bookkeeping(
        &self,
        report: ReportId,
        bookkeeping: SlaveBookkeeping,
    ) -> StoreResult<()>;

    async fn insert_schedule(&self, schedule: Schedule) -> StoreResult<()>;
    /// Atomic snapshot of every schedule joined with its tasks.
    async fn schedules_snapshot(&self) -> StoreResult<Vec<ScheduleEntry>>;
    async fn set_schedule_next_time(
        &self,
        id: ScheduleId,
        next: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    /// Cache one plugin record from the scanner's handshake list.
    async fn cache_plugin(&self, plugin: NvtPlugin) -> StoreResult<()>;
    async fn cache_preference(&self, preference: Preference) -> StoreResult<()>;
    async fn set_feed_version(&self, version: String) -> StoreResult<()>;
}

/// Apply one state-machine event to a task's persisted run status. Illegal
/// (status, event) pairs leave the status unchanged and are logged, never
/// silently accepted as a different transition.
pub async fn apply_status_event(
    store: &dyn TaskStore,
    task: TaskId,
    event: StatusEvent,
) -> StoreResult<RunStatus> {
    let current = store.run_status(task).await?;
    match current.apply(event) {
        Transition::To(next) => {
            store.set_run_status(task, next).await?;
            tracing::debug!(%task, from = %current, to = %next, ?event, "run status transition");
            Ok(next)
        }
        Transition::Ignored => {
            tracing::warn!(%task, status = %current, ?event, "ignoring illegal status transition");
            Ok(current)
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    tasks: HashMap<TaskId, Task>,
    statuses: HashMap<TaskId, RunStatus>,
    reports: HashMap<ReportId, Report>,
    schedules: HashMap<ScheduleId, Schedule>,
    plugins: HashMap<String, NvtPlugin>,
    preferences: HashMap<String, String>,
    feed_version: Option<String>,
}

/// In-memory [`TaskStore`]. One `RwLock` over the whole state gives the
/// snapshot and read-your-writes guarantees for free.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn report_mut<'a>(
        inner: &'a mut MemoryInner,
        id: ReportId,
    ) -> StoreResult<&'a mut Report> {
        inner
            .reports
            .get_mut(&id)
            .ok_or(StoreError::ReportNotFound(id))
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn task(&self, id: TaskId) -> StoreResult<Task> {
        self.inner
            .read()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(id))
    }

    async fn task_exists(&self, id: TaskId) -> StoreResult<bool> {
        Ok(self.inner.read().await.tasks.contains_key(&id))
    }

    async fn insert_task(&self, task: Task) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.statuses.insert(task.id, RunStatus::New);
        inner.tasks.insert(task.id, task);
        Ok(())
    }

    async fn delete_task(&self, id: TaskId, ultimate: bool) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner.tasks.remove(&id).ok_or(StoreError::TaskNotFound(id))?;
        inner.statuses.remove(&id);
        if ultimate {
            inner.reports.retain(|_, report| report.task != task.id);
        }
        Ok(())
    }

    async fn run_status(&self, id: TaskId) -> StoreResult<RunStatus> {
        self.inner
            .read()
            .await
            .statuses
            .get(&id)
            .copied()
            .ok_or(StoreError::TaskNotFound(id))
    }

    async fn set_run_status(&self, id: TaskId, status: RunStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(&id) {
            return Err(StoreError::TaskNotFound(id));
        }
        inner.statuses.insert(id, status);
        Ok(())
    }

    async fn create_report(&self, task: TaskId) -> StoreResult<ReportId> {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(&task) {
            return Err(StoreError::TaskNotFound(task));
        }
        let report = Report::new(task);
        let id = report.id;
        inner.reports.insert(id, report);
        if let Some(record) = inner.tasks.get_mut(&task) {
            record.report = Some(id);
        }
        Ok(id)
    }

    async fn reopen_report(&self, task: TaskId) -> StoreResult<ReportId> {
        let mut inner = self.inner.write().await;
        let record = inner
            .tasks
            .get(&task)
            .ok_or(StoreError::TaskNotFound(task))?;
        let Some(id) = record.report else {
            drop(inner);
            return self.create_report(task).await;
        };
        let report = Self::report_mut(&mut inner, id)?;
        report.reopen();
        Ok(id)
    }

    async fn trim_report(&self, task: TaskId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .tasks
            .get(&task)
            .ok_or(StoreError::TaskNotFound(task))?;
        if let Some(id) = record.report {
            Self::report_mut(&mut inner, id)?.trim_partial_results();
        }
        Ok(())
    }

    async fn current_report(&self, task: TaskId) -> StoreResult<Option<Report>> {
        let inner = self.inner.read().await;
        let record = inner
            .tasks
            .get(&task)
            .ok_or(StoreError::TaskNotFound(task))?;
        Ok(record.report.and_then(|id| inner.reports.get(&id)).cloned())
    }

    async fn append_result(&self, report: ReportId, message: ResultMessage) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        Self::report_mut(&mut inner, report)?.results.push(message);
        Ok(())
    }

    async fn set_scan_start(&self, report: ReportId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        Self::report_mut(&mut inner, report)?.scan_started_at = Some(at);
        Ok(())
    }

    async fn set_scan_end(
        &self,
        report: ReportId,
        at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        Self::report_mut(&mut inner, report)?.scan_finished_at = at;
        Ok(())
    }

    async fn set_host_start(
        &self,
        report: ReportId,
        host: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        Self::report_mut(&mut inner, report)?.host_mut(host).started_at = Some(at);
        Ok(())
    }

    async fn set_host_end(
        &self,
        report: ReportId,
        host: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        Self::report_mut(&mut inner, report)?.host_mut(host).finished_at = Some(at);
        Ok(())
    }

    async fn set_host_attack_state(
        &self,
        report: ReportId,
        host: &str,
        state: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        Self::report_mut(&mut inner, report)?.host_mut(host).attack_state =
            Some(state.to_string());
        Ok(())
    }

    async fn set_host_progress(
        &self,
        report: ReportId,
        host: &str,
        current: u32,
        max: u32,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let progress = Self::report_mut(&mut inner, report)?.host_mut(host);
        progress.current = current;
        progress.max = max;
        Ok(())
    }

    async fn add_host_detail(
        &self,
        report: ReportId,
        host: &str,
        detail: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        Self::report_mut(&mut inner, report)?
            .host_mut(host)
            .details
            .push(detail.to_string());
        Ok(())
    }

    async fn set_slave_bookkeeping(
        &self,
        report: ReportId,
        bookkeeping: SlaveBookkeeping,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        Self::report_mut(&mut inner, report)?.slave = Some(bookkeeping);
        Ok(())
    }

    async fn insert_schedule(&self, schedule: Schedule) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .schedules
            .insert(schedule.id, schedule);
        Ok(())
    }

    async fn schedules_snapshot(&self) -> StoreResult<Vec<ScheduleEntry>> {
        let inner = self.inner.read().await;
        let mut entries = Vec::new();
        for task in inner.tasks.values() {
            let Some(schedule_id) = task.schedule else {
                continue;
            };
            let Some(schedule) = inner.schedules.get(&schedule_id) else {
                continue;
            };
            let Some(run_status) = inner.statuses.get(&task.id) else {
                continue;
            };
            entries.push(ScheduleEntry {
                schedule: schedule.clone(),
                task: task.id,
                owner: task.owner,
                run_status: *run_status,
            });
        }
        Ok(entries)
    }

    async fn set_schedule_next_time(
        &self,
        id: ScheduleId,
        next: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let schedule = inner
            .schedules
            .get_mut(&id)
            .ok_or(StoreError::ScheduleNotFound(id))?;
        schedule.next_time = next;
        Ok(())
    }

    async fn cache_plugin(&self, plugin: NvtPlugin) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .plugins
            .insert(plugin.oid.clone(), plugin);
        Ok(())
    }

    async fn cache_preference(&self, preference: Preference) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .preferences
            .insert(preference.name, preference.value);
        Ok(())
    }

    async fn set_feed_version(&self, version: String) -> StoreResult<()> {
        self.inner.write().await.feed_version = Some(version);
        Ok(())
    }
}

impl MemoryStore {
    /// Plugin cache size, mainly for handshake assertions in tests.
    pub async fn plugin_count(&self) -> usize {
        self.inner.read().await.plugins.len()
    }

    pub async fn feed_version(&self) -> Option<String> {
        self.inner.read().await.feed_version.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(OwnerId::new(), "weekly dmz sweep", "10.0.0.0/24")
    }

    #[tokio::test]
    async fn reopen_reuses_the_report_id() {
        let store = MemoryStore::new();
        let task = task();
        let id = task.id;
        store.insert_task(task).await.unwrap();

        let report = store.create_report(id).await.unwrap();
        store.set_scan_end(report, Some(Utc::now())).await.unwrap();

        let reopened = store.reopen_report(id).await.unwrap();
        assert_eq!(reopened, report);
        let current = store.current_report(id).await.unwrap().unwrap();
        assert!(current.scan_finished_at.is_none());
    }

    #[tokio::test]
    async fn ultimate_delete_removes_reports() {
        let store = MemoryStore::new();
        let task = task();
        let id = task.id;
        store.insert_task(task).await.unwrap();
        store.create_report(id).await.unwrap();

        store.delete_task(id, true).await.unwrap();
        assert!(!store.task_exists(id).await.unwrap());
        assert!(store.inner.read().await.reports.is_empty());
    }

    #[tokio::test]
    async fn snapshot_joins_tasks_with_their_schedules() {
        let store = MemoryStore::new();
        let owner = OwnerId::new();
        let schedule = Schedule::once(owner, "nightly", Utc::now());
        let schedule_id = schedule.id;
        store.insert_schedule(schedule).await.unwrap();

        let task = Task::new(owner, "nightly sweep", "192.0.2.0/24").with_schedule(schedule_id);
        let task_id = task.id;
        store.insert_task(task).await.unwrap();

        let entries = store.schedules_snapshot().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].task, task_id);
        assert_eq!(entries[0].run_status, RunStatus::New);
    }
}
