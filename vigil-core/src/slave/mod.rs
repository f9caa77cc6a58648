//! Slave delegation controller.
//!
//! A task bound to a remote manager never touches the local scanner.
//! Instead this controller mirrors the task onto the slave (credentials,
//! target, config, task — in that order), starts or resumes it, and then
//! polls: each iteration first reconciles local state changes into remote
//! calls, then translates the remote status and report back into the local
//! task and report. A missing remote resource aborts delegation into
//! `InternalError` without retry; transient socket failures reconnect with
//! a sleep between attempts. A pending giveup is honored unconditionally at
//! the top of every iteration, abandoning in-flight remote resources.

pub mod client;

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_model::{Preference, SlaveBookkeeping, SlaveDescriptor, TaskId};
use zeroize::Zeroizing;

use crate::error::{CoreError, Result};
use crate::status::{RunStatus, StatusEvent};
use crate::store::{TaskStore, apply_status_event};
use client::{RemoteTaskStatus, SlaveClient, SlaveError};

/// Credential material pushed to the slave. Passwords are zeroized on drop.
pub struct SlaveCredentials {
    pub slave_password: Zeroizing<String>,
    pub ssh_login: String,
    pub ssh_password: Zeroizing<String>,
    pub smb_login: String,
    pub smb_password: Zeroizing<String>,
}

impl std::fmt::Debug for SlaveCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlaveCredentials")
            .field("ssh_login", &self.ssh_login)
            .field("smb_login", &self.smb_login)
            .finish()
    }
}

/// Connection factory for the slave, re-invoked on reconnects.
#[async_trait::async_trait]
pub trait SlaveConnector: Send + Sync {
    async fn connect(
        &self,
        slave: &SlaveDescriptor,
    ) -> std::result::Result<Box<dyn SlaveClient>, SlaveError>;
}

/// Tuning knobs of the poll loop.
#[derive(Debug, Clone)]
pub struct SlavePolicy {
    pub poll_interval: Duration,
    pub reconnect_backoff: Duration,
}

impl Default for SlavePolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(25),
            reconnect_backoff: Duration::from_secs(10),
        }
    }
}

/// How a delegation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationOutcome {
    Done,
    Stopped,
    /// Stopped and the pending delete was carried out.
    Deleted,
    GivenUp,
    InternalError,
}

/// Remote resources created during setup, unwound in reverse order on any
/// setup failure and torn down best-effort on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreatedResource {
    Credential(Uuid),
    Target(Uuid),
    Config(Uuid),
    Task(Uuid),
}

pub struct SlaveController {
    store: Arc<dyn TaskStore>,
    connector: Arc<dyn SlaveConnector>,
    task: TaskId,
    slave: SlaveDescriptor,
    credentials: SlaveCredentials,
    policy: SlavePolicy,
    client: Option<Box<dyn SlaveClient>>,
    created: Vec<CreatedResource>,
    remote_task: Option<Uuid>,
    remote_report: Option<Uuid>,
    seen_results: usize,
}

impl std::fmt::Debug for SlaveController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlaveController")
            .field("task", &self.task)
            .field("slave", &self.slave.host)
            .field("remote_task", &self.remote_task)
            .field("seen_results", &self.seen_results)
            .finish()
    }
}

impl SlaveController {
    pub fn new(
        store: Arc<dyn TaskStore>,
        connector: Arc<dyn SlaveConnector>,
        task: TaskId,
        slave: SlaveDescriptor,
        credentials: SlaveCredentials,
        policy: SlavePolicy,
    ) -> Self {
        Self {
            store,
            connector,
            task,
            slave,
            credentials,
            policy,
            client: None,
            created: Vec::new(),
            remote_task: None,
            remote_report: None,
            seen_results: 0,
        }
    }

    /// Drive the delegated task to completion. `resume` selects the
    /// resume-by-remembered-id path, which falls back to a fresh start when
    /// the remote task is gone.
    pub async fn run(&mut self, resume: bool) -> Result<DelegationOutcome> {
        if let Err(error) = self.setup(resume).await {
            warn!(task = %self.task, %error, "slave setup failed");
            apply_status_event(self.store.as_ref(), self.task, StatusEvent::Fault).await?;
            return Ok(DelegationOutcome::InternalError);
        }

        loop {
            // The giveup escape hatch outranks everything, including an
            // unreachable slave: resolve to Stopped and abandon the remote
            // resources as an accepted leak.
            let status = self.store.run_status(self.task).await?;
            if status == RunStatus::StopRequestedGiveup {
                info!(task = %self.task, "honoring giveup, abandoning slave resources");
                apply_status_event(self.store.as_ref(), self.task, StatusEvent::GiveupHonored)
                    .await?;
                return Ok(DelegationOutcome::GivenUp);
            }

            match self.poll_iteration(status).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {
                    tokio::time::sleep(self.policy.poll_interval).await;
                }
                Err(SlaveError::Missing) => {
                    // The 404 analogue: fatal to delegation, never retried.
                    warn!(task = %self.task, "remote resource missing, aborting delegation");
                    apply_status_event(self.store.as_ref(), self.task, StatusEvent::Fault)
                        .await?;
                    return Ok(DelegationOutcome::InternalError);
                }
                Err(SlaveError::Transport(reason)) => {
                    debug!(task = %self.task, %reason, "slave connection lost, will retry");
                    self.client = None;
                    self.sleep_with_jitter().await;
                }
                Err(error) => {
                    warn!(task = %self.task, %error, "slave poll failed");
                    apply_status_event(self.store.as_ref(), self.task, StatusEvent::Fault)
                        .await?;
                    return Ok(DelegationOutcome::InternalError);
                }
            }
        }
    }

    async fn sleep_with_jitter(&self) {
        let base = self.policy.reconnect_backoff;
        let jitter = rand::rng().random_range(0..=base.as_millis() as u64 / 4);
        tokio::time::sleep(base + Duration::from_millis(jitter)).await;
    }

    async fn ensure_client(&mut self) -> std::result::Result<&mut dyn SlaveClient, SlaveError> {
        if self.client.is_none() {
            let mut client = self.connector.connect(&self.slave).await?;
            client
                .authenticate(&self.slave.username, &self.credentials.slave_password)
                .await?;
            self.client = Some(client);
        }
        match self.client.as_deref_mut() {
            Some(client) => Ok(client),
            None => Err(SlaveError::Transport("slave client unavailable".to_string())),
        }
    }

    async fn setup(&mut self, resume: bool) -> Result<()> {
        if resume
            && let Some(report) = self.store.current_report(self.task).await?
            && let Some(bookkeeping) = report.slave
        {
            self.remote_task = Some(bookkeeping.remote_task);
            self.remote_report = bookkeeping.remote_report;
            self.seen_results = report.results.len();

            let remote_task = bookkeeping.remote_task;
            let resumed = {
                let client = self.ensure_client().await.map_err(CoreError::from)?;
                client.resume_stopped_task(remote_task).await
            };
            match resumed {
                Ok(()) => {
                    info!(task = %self.task, %remote_task, "resumed remote task");
                    return Ok(());
                }
                Err(SlaveError::Missing) | Err(SlaveError::Rejected { .. }) => {
                    // The remote side lost or rejected the old task: drop
                    // partial results and fall through to a fresh start.
                    info!(task = %self.task, "remote resume failed, falling back to fresh start");
                    self.store.trim_report(self.task).await?;
                    self.remote_task = None;
                    self.remote_report = None;
                    let report = self.store.current_report(self.task).await?;
                    self.seen_results =
                        report.map(|report| report.results.len()).unwrap_or(0);
                }
                Err(error) => return Err(error.into()),
            }
        }

        match self.fresh_setup().await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.unwind().await;
                Err(error)
            }
        }
    }

    /// Create credentials, target, config, and task on the slave — in that
    /// order — then start the task.
    async fn fresh_setup(&mut self) -> Result<()> {
        let task = self.store.task(self.task).await?;
        let name = format!("{} ({})", task.name, self.task);
        let ssh_login = self.credentials.ssh_login.clone();
        let ssh_password = self.credentials.ssh_password.clone();
        let smb_login = self.credentials.smb_login.clone();
        let smb_password = self.credentials.smb_password.clone();

        let client = self.ensure_client().await.map_err(CoreError::from)?;

        let ssh_credential = client
            .create_credential(&format!("{name} ssh"), &ssh_login, &ssh_password)
            .await
            .map_err(CoreError::from)?;
        self.created.push(CreatedResource::Credential(ssh_credential));

        let client = self.ensure_client().await.map_err(CoreError::from)?;
        let smb_credential = client
            .create_credential(&format!("{name} smb"), &smb_login, &smb_password)
            .await
            .map_err(CoreError::from)?;
        self.created.push(CreatedResource::Credential(smb_credential));

        let client = self.ensure_client().await.map_err(CoreError::from)?;
        let target = client
            .create_target(
                &name,
                &task.target,
                Some(ssh_credential),
                Some(smb_credential),
            )
            .await
            .map_err(CoreError::from)?;
        self.created.push(CreatedResource::Target(target));

        let preferences = [Preference::new("scan_config", task.config.clone())];
        let client = self.ensure_client().await.map_err(CoreError::from)?;
        let config = client
            .create_config(&name, &preferences)
            .await
            .map_err(CoreError::from)?;
        self.created.push(CreatedResource::Config(config));

        let client = self.ensure_client().await.map_err(CoreError::from)?;
        let remote_task = client
            .create_task(&name, config, target)
            .await
            .map_err(CoreError::from)?;
        self.created.push(CreatedResource::Task(remote_task));

        let client = self.ensure_client().await.map_err(CoreError::from)?;
        client.start_task(remote_task).await.map_err(CoreError::from)?;
        self.remote_task = Some(remote_task);

        if let Some(report) = self.store.current_report(self.task).await? {
            self.store
                .set_slave_bookkeeping(
                    report.id,
                    SlaveBookkeeping {
                        host: self.slave.host.clone(),
                        port: self.slave.port,
                        remote_task,
                        remote_report: None,
                        progress: 0,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Unwind partially created remote resources in reverse creation
    /// order, tolerating each step's failure.
    async fn unwind(&mut self) {
        let created: Vec<_> = self.created.drain(..).rev().collect();
        for resource in created {
            if let Err(error) = self.delete_resource(resource).await {
                debug!(?resource, %error, "unwind step failed, continuing");
            }
        }
    }

    async fn delete_resource(
        &mut self,
        resource: CreatedResource,
    ) -> std::result::Result<(), SlaveError> {
        let client = self.ensure_client().await?;
        match resource {
            CreatedResource::Task(id) => client.delete_task(id).await,
            CreatedResource::Config(id) => client.delete_config(id).await,
            CreatedResource::Target(id) => client.delete_target(id).await,
            CreatedResource::Credential(id) => client.delete_credential(id).await,
        }
    }

    /// One poll iteration: reconcile local requests, then mirror the remote
    /// status and report. Returns a final outcome once the delegation ends.
    async fn poll_iteration(
        &mut self,
        status: RunStatus,
    ) -> std::result::Result<Option<DelegationOutcome>, SlaveError> {
        let Some(remote_task) = self.remote_task else {
            return Err(SlaveError::Protocol("no remote task bound".to_string()));
        };

        // Local changes made by users or concurrent sessions go out first.
        match status {
            RunStatus::StopRequested => {
                self.ensure_client().await?.stop_task(remote_task).await?;
                self.dispatch(StatusEvent::StopDispatched).await?;
            }
            RunStatus::PauseRequested => {
                self.ensure_client().await?.pause_task(remote_task).await?;
                self.dispatch(StatusEvent::PauseDispatched).await?;
            }
            RunStatus::ResumeRequested => {
                self.ensure_client()
                    .await?
                    .resume_paused_task(remote_task)
                    .await?;
                self.dispatch(StatusEvent::ResumeDispatched).await?;
            }
            RunStatus::DeleteRequested | RunStatus::DeleteUltimateRequested => {
                self.ensure_client().await?.stop_task(remote_task).await?;
                self.dispatch(StatusEvent::DeleteDispatched).await?;
            }
            _ => {}
        }

        let remote = self.ensure_client().await?.task_status(remote_task).await?;
        self.mirror_report(&remote).await?;

        let local = self
            .store
            .run_status(self.task)
            .await
            .map_err(store_to_slave)?;

        match remote.status {
            RunStatus::Running => {
                if local == RunStatus::Requested {
                    self.dispatch(StatusEvent::ScanStarted).await?;
                } else if matches!(
                    local,
                    RunStatus::ResumeRequested | RunStatus::ResumeWaiting | RunStatus::Paused
                ) {
                    self.dispatch(StatusEvent::ResumeAcknowledged).await?;
                }
                Ok(None)
            }
            RunStatus::Paused => {
                self.dispatch(StatusEvent::PauseAcknowledged).await?;
                Ok(None)
            }
            RunStatus::Done => {
                self.teardown().await;
                self.dispatch(StatusEvent::ScanDone).await?;
                Ok(Some(DelegationOutcome::Done))
            }
            RunStatus::Stopped => {
                self.teardown().await;
                if let Some(ultimate) = local.delete_pending() {
                    // The deferred delete: the task has now stopped.
                    self.store
                        .delete_task(self.task, ultimate)
                        .await
                        .map_err(store_to_slave)?;
                    return Ok(Some(DelegationOutcome::Deleted));
                }
                self.dispatch(StatusEvent::ScanStopped).await?;
                Ok(Some(DelegationOutcome::Stopped))
            }
            RunStatus::InternalError => Err(SlaveError::Protocol(
                "remote task failed internally".to_string(),
            )),
            // In-flight remote states; nothing to mirror yet.
            _ => Ok(None),
        }
    }

    async fn dispatch(
        &self,
        event: StatusEvent,
    ) -> std::result::Result<RunStatus, SlaveError> {
        apply_status_event(self.store.as_ref(), self.task, event)
            .await
            .map_err(store_to_slave)
    }

    /// Merge newly arrived remote results and host end-times into the local
    /// report.
    async fn mirror_report(
        &mut self,
        remote: &RemoteTaskStatus,
    ) -> std::result::Result<(), SlaveError> {
        let Some(report) = self
            .store
            .current_report(self.task)
            .await
            .map_err(store_to_slave)?
        else {
            return Ok(());
        };

        if let Some(remote_report) = remote.report {
            self.remote_report = Some(remote_report);
            let seen_results = self.seen_results;
            let slice = self
                .ensure_client()
                .await?
                .report_results(remote_report, seen_results)
                .await?;

            for message in slice.results {
                self.seen_results += 1;
                self.store
                    .append_result(report.id, message)
                    .await
                    .map_err(store_to_slave)?;
            }
            for (host, at) in slice.host_ends {
                self.store
                    .set_host_end(report.id, &host, at)
                    .await
                    .map_err(store_to_slave)?;
            }
            if let Some(at) = slice.finished_at {
                self.store
                    .set_scan_end(report.id, Some(at))
                    .await
                    .map_err(store_to_slave)?;
            }
        }

        self.store
            .set_slave_bookkeeping(
                report.id,
                SlaveBookkeeping {
                    host: self.slave.host.clone(),
                    port: self.slave.port,
                    remote_task: self.remote_task.unwrap_or_default(),
                    remote_report: self.remote_report,
                    progress: remote.progress,
                },
            )
            .await
            .map_err(store_to_slave)?;
        Ok(())
    }

    /// Best-effort removal of the mirrored resources. Failures are logged
    /// and ignored: leftover remote resources are orphaned but harmless.
    async fn teardown(&mut self) {
        if let Some(remote_task) = self.remote_task {
            if let Ok(client) = self.ensure_client().await {
                if let Err(error) = client.stop_task(remote_task).await {
                    debug!(%error, "remote stop during teardown failed");
                }
            }
        }
        let created: Vec<_> = self.created.drain(..).rev().collect();
        for resource in created {
            if let Err(error) = self.delete_resource(resource).await {
                debug!(?resource, %error, "teardown step failed, continuing");
            }
        }
    }
}

fn store_to_slave(error: crate::store::StoreError) -> SlaveError {
    SlaveError::Protocol(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TaskStore};
    use client::{MockSlaveClient, RemoteReport};
    use std::sync::Mutex;
    use vigil_model::{OwnerId, SlaveId, Task};

    struct TestConnector {
        client: Mutex<Option<MockSlaveClient>>,
    }

    impl TestConnector {
        fn with(client: MockSlaveClient) -> Arc<Self> {
            Arc::new(Self {
                client: Mutex::new(Some(client)),
            })
        }
    }

    #[async_trait::async_trait]
    impl SlaveConnector for TestConnector {
        async fn connect(
            &self,
            _slave: &SlaveDescriptor,
        ) -> std::result::Result<Box<dyn SlaveClient>, SlaveError> {
            match self.client.lock().unwrap().take() {
                Some(client) => Ok(Box::new(client)),
                None => Err(SlaveError::Transport("no further connections".to_string())),
            }
        }
    }

    fn descriptor() -> SlaveDescriptor {
        SlaveDescriptor {
            id: SlaveId::new(),
            host: "slave.example".to_string(),
            port: 9390,
            username: "delegate".to_string(),
        }
    }

    fn credentials() -> SlaveCredentials {
        SlaveCredentials {
            slave_password: Zeroizing::new("managerpw".to_string()),
            ssh_login: "scanuser".to_string(),
            ssh_password: Zeroizing::new("sshpw".to_string()),
            smb_login: "scanuser".to_string(),
            smb_password: Zeroizing::new("smbpw".to_string()),
        }
    }

    fn policy() -> SlavePolicy {
        SlavePolicy {
            poll_interval: Duration::from_millis(1),
            reconnect_backoff: Duration::from_millis(1),
        }
    }

    async fn seeded_task(store: &MemoryStore) -> TaskId {
        let task = Task::new(OwnerId::new(), "delegated sweep", "10.0.0.0/24")
            .with_slave(descriptor());
        let id = task.id;
        store.insert_task(task).await.unwrap();
        store.create_report(id).await.unwrap();
        store
            .set_run_status(id, RunStatus::Requested)
            .await
            .unwrap();
        id
    }

    fn expect_fresh_setup(client: &mut MockSlaveClient) {
        client.expect_authenticate().returning(|_, _| Ok(()));
        client
            .expect_create_credential()
            .times(2)
            .returning(|_, _, _| Ok(Uuid::new_v4()));
        client
            .expect_create_target()
            .times(1)
            .returning(|_, _, _, _| Ok(Uuid::new_v4()));
        client
            .expect_create_config()
            .times(1)
            .returning(|_, _| Ok(Uuid::new_v4()));
        client
            .expect_create_task()
            .times(1)
            .returning(|_, _, _| Ok(Uuid::new_v4()));
        client.expect_start_task().times(1).returning(|_| Ok(()));
    }

    fn controller(
        store: Arc<MemoryStore>,
        connector: Arc<TestConnector>,
        task: TaskId,
    ) -> SlaveController {
        SlaveController::new(
            store,
            connector,
            task,
            descriptor(),
            credentials(),
            policy(),
        )
    }

    #[tokio::test]
    async fn missing_remote_resource_aborts_into_internal_error() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store).await;

        let mut client = MockSlaveClient::new();
        expect_fresh_setup(&mut client);
        // The poll finds the remote task gone; nothing may be called after.
        client
            .expect_task_status()
            .times(1)
            .returning(|_| Err(SlaveError::Missing));

        let mut controller =
            controller(Arc::clone(&store), TestConnector::with(client), task);
        let outcome = controller.run(false).await.unwrap();

        assert_eq!(outcome, DelegationOutcome::InternalError);
        assert_eq!(
            store.run_status(task).await.unwrap(),
            RunStatus::InternalError
        );
    }

    #[tokio::test]
    async fn giveup_is_honored_before_any_remote_call() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store).await;

        let mut client = MockSlaveClient::new();
        expect_fresh_setup(&mut client);
        // No task_status expectation: the giveup must short-circuit the
        // poll loop entirely.

        store
            .set_run_status(task, RunStatus::StopRequestedGiveup)
            .await
            .unwrap();

        let mut controller =
            controller(Arc::clone(&store), TestConnector::with(client), task);
        let outcome = controller.run(false).await.unwrap();

        assert_eq!(outcome, DelegationOutcome::GivenUp);
        assert_eq!(store.run_status(task).await.unwrap(), RunStatus::Stopped);
    }

    #[tokio::test]
    async fn completed_delegation_merges_results_and_finishes() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store).await;
        let remote_report = Uuid::new_v4();

        let mut client = MockSlaveClient::new();
        expect_fresh_setup(&mut client);

        let mut calls = 0u32;
        client.expect_task_status().times(2).returning(move |_| {
            calls += 1;
            Ok(RemoteTaskStatus {
                status: if calls == 1 {
                    RunStatus::Running
                } else {
                    RunStatus::Done
                },
                progress: if calls == 1 { 40 } else { 100 },
                report: Some(remote_report),
            })
        });

        let mut served = 0u32;
        client.expect_report_results().times(2).returning(move |_, first| {
            served += 1;
            if served == 1 {
                assert_eq!(first, 0);
                Ok(RemoteReport {
                    results: vec![ResultMessageFixture::alarm("10.0.0.7")],
                    host_ends: Vec::new(),
                    finished_at: None,
                })
            } else {
                assert_eq!(first, 1);
                Ok(RemoteReport::default())
            }
        });

        // Best-effort teardown; failures here must not change the outcome.
        client.expect_stop_task().returning(|_| Ok(()));
        client.expect_delete_task().returning(|_| Ok(()));
        client
            .expect_delete_config()
            .returning(|_| Err(SlaveError::Rejected {
                status: 400,
                text: "config in use".to_string(),
            }));
        client.expect_delete_target().returning(|_| Ok(()));
        client.expect_delete_credential().times(2).returning(|_| Ok(()));

        let mut controller =
            controller(Arc::clone(&store), TestConnector::with(client), task);
        let outcome = controller.run(false).await.unwrap();

        assert_eq!(outcome, DelegationOutcome::Done);
        assert_eq!(store.run_status(task).await.unwrap(), RunStatus::Done);

        let report = store.current_report(task).await.unwrap().unwrap();
        assert_eq!(report.results.len(), 1);
        let bookkeeping = report.slave.unwrap();
        assert_eq!(bookkeeping.progress, 100);
        assert_eq!(bookkeeping.remote_report, Some(remote_report));
    }

    #[tokio::test]
    async fn foreign_stop_goes_out_before_the_status_poll() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store).await;
        store
            .set_run_status(task, RunStatus::StopRequested)
            .await
            .unwrap();

        let mut client = MockSlaveClient::new();
        expect_fresh_setup(&mut client);
        client.expect_stop_task().returning(|_| Ok(()));
        client.expect_task_status().times(1).returning(|_| {
            Ok(RemoteTaskStatus {
                status: RunStatus::Stopped,
                progress: 10,
                report: None,
            })
        });
        client.expect_delete_task().returning(|_| Ok(()));
        client.expect_delete_config().returning(|_| Ok(()));
        client.expect_delete_target().returning(|_| Ok(()));
        client.expect_delete_credential().returning(|_| Ok(()));

        let mut controller =
            controller(Arc::clone(&store), TestConnector::with(client), task);
        let outcome = controller.run(false).await.unwrap();

        assert_eq!(outcome, DelegationOutcome::Stopped);
        assert_eq!(store.run_status(task).await.unwrap(), RunStatus::Stopped);
    }

    struct ResultMessageFixture;

    impl ResultMessageFixture {
        fn alarm(host: &str) -> vigil_model::ResultMessage {
            vigil_model::ResultMessage {
                host: host.to_string(),
                port: vigil_model::PortDescriptor::general("tcp"),
                nvt_oid: "1.3.6.1.4.1.25623.1.0.105".to_string(),
                description: "Weak host key".to_string(),
                result_type: vigil_model::ResultType::Alarm,
            }
        }
    }
}
