//! Recurrence scheduler.
//!
//! Once per poll interval the scheduler takes one atomic snapshot of all
//! schedules, decides which tasks are due to start or stop, advances each
//! due schedule's next time immediately (a schedule must never fire twice
//! for one due period, however long the downstream work takes), and then
//! dispatches one worker per due (task, owner) pair through the injected
//! [`ScheduleConnector`]. The scheduler never performs the remote call
//! itself, which keeps it decoupled from transport and session bootstrap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_model::{OwnerId, TaskId};

use crate::error::Result;
use crate::schedule::{elapsed_into_period, next_time};
use crate::status::RunStatus;
use crate::store::{ScheduleEntry, TaskStore};

/// Client for one dispatched worker; starts or stops a single task on
/// behalf of its owner.
#[async_trait]
pub trait ScheduleClient: Send {
    async fn start_task(&mut self, task: TaskId) -> Result<()>;
    async fn stop_task(&mut self, task: TaskId) -> Result<()>;
}

/// Connection factory injected into the scheduler. A failure to connect is
/// logged and the schedule simply fires again next period.
#[async_trait]
pub trait ScheduleConnector: Send + Sync {
    async fn connect(&self, owner: OwnerId) -> Result<Box<dyn ScheduleClient>>;
}

/// What one poll cycle decided.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// Tasks a start worker was dispatched for.
    pub started: Vec<TaskId>,
    /// Tasks a stop worker was dispatched for.
    pub stopped: Vec<TaskId>,
    /// Tasks due but skipped because their duration window had elapsed.
    pub skipped: Vec<TaskId>,
}

pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    connector: Arc<dyn ScheduleConnector>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("poll_interval", &self.poll_interval)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        connector: Arc<dyn ScheduleConnector>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            connector,
            poll_interval,
            shutdown,
        }
    }

    /// Poll loop. Runs until the shutdown token fires.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.poll_interval, "schedule poll loop started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("schedule poll loop stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.poll_once(Utc::now()).await {
                        // Poll failures are never fatal to the daemon; the
                        // next tick retries.
                        warn!(%error, "schedule poll failed");
                    }
                }
            }
        }
    }

    /// One poll cycle at `now`. Public for scenario tests.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<PollOutcome> {
        let entries = self.store.schedules_snapshot().await?;

        let mut outcome = PollOutcome::default();
        let mut start_due: Vec<(TaskId, OwnerId)> = Vec::new();
        let mut stop_due: Vec<(TaskId, OwnerId)> = Vec::new();

        for entry in entries {
            if self.start_is_due(&entry, now) {
                // Advance before any downstream work so a slow or failing
                // dispatch cannot make the schedule fire twice.
                let advanced =
                    next_time(entry.schedule.first_time, entry.schedule.period, now);
                self.store
                    .set_schedule_next_time(entry.schedule.id, advanced)
                    .await?;

                if self.window_elapsed(&entry, now) {
                    debug!(task = %entry.task, "start due but scan window elapsed, skipping");
                    outcome.skipped.push(entry.task);
                    continue;
                }
                start_due.push((entry.task, entry.owner));
            } else if self.stop_is_due(&entry, now) {
                stop_due.push((entry.task, entry.owner));
            }
        }

        // Snapshot released; dispatch one worker per pair.
        let mut workers = Vec::new();
        for (task, owner) in start_due {
            outcome.started.push(task);
            workers.push(self.dispatch(task, owner, WorkerAction::Start));
        }
        for (task, owner) in stop_due {
            outcome.stopped.push(task);
            workers.push(self.dispatch(task, owner, WorkerAction::Stop));
        }
        join_all(workers).await;

        Ok(outcome)
    }

    fn start_is_due(&self, entry: &ScheduleEntry, now: DateTime<Utc>) -> bool {
        if !matches!(
            entry.run_status,
            RunStatus::New | RunStatus::Stopped | RunStatus::Done
        ) {
            return false;
        }
        match entry.schedule.next_time {
            Some(next) => next <= now,
            None => false,
        }
    }

    fn stop_is_due(&self, entry: &ScheduleEntry, now: DateTime<Utc>) -> bool {
        if !matches!(
            entry.run_status,
            RunStatus::Requested | RunStatus::Running | RunStatus::Paused
        ) {
            return false;
        }
        self.window_elapsed(entry, now)
    }

    fn window_elapsed(&self, entry: &ScheduleEntry, now: DateTime<Utc>) -> bool {
        let Some(window) = entry.schedule.duration else {
            return false;
        };
        let elapsed = elapsed_into_period(
            entry.schedule.first_time,
            entry.schedule.period,
            now,
            entry.schedule.utc_offset_secs,
        );
        elapsed.num_seconds() >= 0 && elapsed.num_seconds() as u64 > window
    }

    async fn dispatch(&self, task: TaskId, owner: OwnerId, action: WorkerAction) {
        let mut client = match self.connector.connect(owner).await {
            Ok(client) => client,
            Err(error) => {
                // The schedule was already advanced, so the task retries at
                // the next period boundary.
                warn!(%task, %error, "schedule worker connection failed");
                return;
            }
        };
        let result = match action {
            WorkerAction::Start => client.start_task(task).await,
            WorkerAction::Stop => client.stop_task(task).await,
        };
        if let Err(error) = result {
            warn!(%task, ?action, %error, "schedule worker call failed");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WorkerAction {
    Start,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Mutex;
    use vigil_model::{RecurrencePeriod, Schedule, Task};

    #[derive(Debug, Default)]
    struct RecordingConnector {
        calls: Arc<Mutex<Vec<(TaskId, &'static str)>>>,
        fail_connect: bool,
    }

    struct RecordingClient {
        calls: Arc<Mutex<Vec<(TaskId, &'static str)>>>,
    }

    #[async_trait]
    impl ScheduleClient for RecordingClient {
        async fn start_task(&mut self, task: TaskId) -> Result<()> {
            self.calls.lock().unwrap().push((task, "start"));
            Ok(())
        }

        async fn stop_task(&mut self, task: TaskId) -> Result<()> {
            self.calls.lock().unwrap().push((task, "stop"));
            Ok(())
        }
    }

    #[async_trait]
    impl ScheduleConnector for RecordingConnector {
        async fn connect(&self, _owner: OwnerId) -> Result<Box<dyn ScheduleClient>> {
            if self.fail_connect {
                return Err(crate::error::CoreError::ScannerDown);
            }
            Ok(Box::new(RecordingClient {
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    async fn seed(
        store: &MemoryStore,
        schedule: Schedule,
        status: RunStatus,
    ) -> (TaskId, vigil_model::ScheduleId) {
        let schedule_id = schedule.id;
        let owner = schedule.owner;
        store.insert_schedule(schedule).await.unwrap();
        let task = Task::new(owner, "scheduled sweep", "10.0.0.0/24").with_schedule(schedule_id);
        let task_id = task.id;
        store.insert_task(task).await.unwrap();
        store.set_run_status(task_id, status).await.unwrap();
        (task_id, schedule_id)
    }

    fn scheduler(
        store: Arc<MemoryStore>,
        connector: Arc<RecordingConnector>,
    ) -> Scheduler {
        Scheduler::new(
            store,
            connector,
            Duration::from_secs(10),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn due_schedule_starts_the_task_and_advances() {
        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(RecordingConnector::default());
        let now = utc(2026, 8, 7, 12, 0, 5);

        let first = utc(2026, 8, 7, 12, 0, 0);
        let schedule = Schedule::once(OwnerId::new(), "hourly", first)
            .with_period(RecurrencePeriod::Seconds(3600))
            .unwrap();
        let (task_id, schedule_id) = seed(&store, schedule, RunStatus::New).await;

        let outcome = scheduler(Arc::clone(&store), Arc::clone(&connector))
            .poll_once(now)
            .await
            .unwrap();

        assert_eq!(outcome.started, vec![task_id]);
        assert_eq!(
            connector.calls.lock().unwrap().as_slice(),
            &[(task_id, "start")]
        );

        let entries = store.schedules_snapshot().await.unwrap();
        let entry = entries
            .iter()
            .find(|entry| entry.schedule.id == schedule_id)
            .unwrap();
        assert_eq!(entry.schedule.next_time, Some(utc(2026, 8, 7, 13, 0, 0)));
    }

    #[tokio::test]
    async fn elapsed_window_skips_the_start_but_still_advances() {
        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(RecordingConnector::default());
        // 10 minutes into the period with a 5 minute window.
        let first = utc(2026, 8, 7, 0, 0, 0);
        let now = utc(2026, 8, 7, 2, 10, 0);

        let schedule = Schedule::once(OwnerId::new(), "hourly", first)
            .with_period(RecurrencePeriod::Seconds(3600))
            .unwrap()
            .with_duration(300);
        let (task_id, schedule_id) = seed(&store, schedule, RunStatus::New).await;

        let outcome = scheduler(Arc::clone(&store), Arc::clone(&connector))
            .poll_once(now)
            .await
            .unwrap();

        assert!(outcome.started.is_empty());
        assert_eq!(outcome.skipped, vec![task_id]);
        assert!(connector.calls.lock().unwrap().is_empty());

        let entries = store.schedules_snapshot().await.unwrap();
        let entry = entries
            .iter()
            .find(|entry| entry.schedule.id == schedule_id)
            .unwrap();
        assert_eq!(entry.schedule.next_time, Some(utc(2026, 8, 7, 3, 0, 0)));
    }

    #[tokio::test]
    async fn running_task_past_its_window_is_stopped() {
        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(RecordingConnector::default());
        let first = utc(2026, 8, 7, 0, 0, 0);
        let now = utc(2026, 8, 7, 0, 20, 0);

        let mut schedule = Schedule::once(OwnerId::new(), "hourly", first)
            .with_period(RecurrencePeriod::Seconds(3600))
            .unwrap()
            .with_duration(600);
        // Already fired this period.
        schedule.next_time = Some(utc(2026, 8, 7, 1, 0, 0));
        let (task_id, _) = seed(&store, schedule, RunStatus::Running).await;

        let outcome = scheduler(Arc::clone(&store), Arc::clone(&connector))
            .poll_once(now)
            .await
            .unwrap();

        assert_eq!(outcome.stopped, vec![task_id]);
        assert_eq!(
            connector.calls.lock().unwrap().as_slice(),
            &[(task_id, "stop")]
        );
    }

    #[tokio::test]
    async fn one_shot_schedule_fires_once_and_disables() {
        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(RecordingConnector::default());
        let first = utc(2026, 8, 7, 12, 0, 0);
        let now = first + ChronoDuration::seconds(30);

        let schedule = Schedule::once(OwnerId::new(), "one shot", first);
        let (task_id, schedule_id) = seed(&store, schedule, RunStatus::New).await;

        let vigil = scheduler(Arc::clone(&store), Arc::clone(&connector));
        let outcome = vigil.poll_once(now).await.unwrap();
        assert_eq!(outcome.started, vec![task_id]);

        let entries = store.schedules_snapshot().await.unwrap();
        let entry = entries
            .iter()
            .find(|entry| entry.schedule.id == schedule_id)
            .unwrap();
        assert_eq!(entry.schedule.next_time, None);

        // Second poll: disabled schedules never fire again.
        let outcome = vigil.poll_once(now + ChronoDuration::seconds(60)).await.unwrap();
        assert!(outcome.started.is_empty());
    }

    #[tokio::test]
    async fn connection_failure_is_not_fatal_and_retries_next_period() {
        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(RecordingConnector {
            calls: Arc::default(),
            fail_connect: true,
        });
        let first = utc(2026, 8, 7, 12, 0, 0);
        let now = first + ChronoDuration::seconds(5);

        let schedule = Schedule::once(OwnerId::new(), "hourly", first)
            .with_period(RecurrencePeriod::Seconds(3600))
            .unwrap();
        let (_, schedule_id) = seed(&store, schedule, RunStatus::New).await;

        let outcome = scheduler(Arc::clone(&store), Arc::clone(&connector))
            .poll_once(now)
            .await
            .unwrap();
        // Dispatch was attempted; the connection failure is swallowed and
        // the advanced next time retries the task next period.
        assert_eq!(outcome.started.len(), 1);
        let entries = store.schedules_snapshot().await.unwrap();
        let entry = entries
            .iter()
            .find(|entry| entry.schedule.id == schedule_id)
            .unwrap();
        assert_eq!(entry.schedule.next_time, Some(utc(2026, 8, 7, 13, 0, 0)));
    }
}
