//! Per-connection scanner session.
//!
//! One session owns one scanner connection's mutable state: the decoder,
//! the receive buffer, and the binding to the current task. It is created
//! at connection accept and destroyed at connection close; nothing here is
//! process-global. Cross-session coordination happens only through the
//! store: [`ScannerSession::reconcile`] runs at least once per decoder tick
//! and translates run-status changes made elsewhere into outbound scanner
//! commands. That reconciliation is the sole substitute for cross-session
//! locking.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};
use vigil_model::{Preference, ReportId, TaskId};

use crate::error::{CoreError, Result};
use crate::otp::{Feed, OtpDecoder, OtpEvent, ReceiveBuffer, command};
use crate::status::{RunStatus, StatusEvent};
use crate::store::{TaskStore, apply_status_event};

/// Outbound half of the scanner connection.
#[async_trait]
pub trait ScannerLink: Send {
    async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()>;
}

/// [`ScannerLink`] over any async writer.
#[derive(Debug)]
pub struct WriteLink<W>(pub W);

#[async_trait]
impl<W> ScannerLink for WriteLink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.0.write_all(bytes).await?;
        self.0.flush().await
    }
}

/// Default receive-buffer capacity. A single field never legitimately
/// exceeds this.
pub const RECEIVE_BUFFER_CAPACITY: usize = 1_048_576;

pub struct ScannerSession {
    store: Arc<dyn TaskStore>,
    link: Box<dyn ScannerLink>,
    decoder: OtpDecoder,
    buffer: ReceiveBuffer,
    current_task: Option<TaskId>,
    current_report: Option<ReportId>,
}

impl std::fmt::Debug for ScannerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerSession")
            .field("phase", &self.decoder.phase())
            .field("current_task", &self.current_task)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl ScannerSession {
    pub fn new(store: Arc<dyn TaskStore>, link: Box<dyn ScannerLink>, cache_mode: bool) -> Self {
        Self {
            store,
            link,
            decoder: OtpDecoder::new(cache_mode),
            buffer: ReceiveBuffer::new(RECEIVE_BUFFER_CAPACITY),
            current_task: None,
            current_report: None,
        }
    }

    /// Open the protocol handshake on a fresh connection.
    pub async fn open(&mut self) -> Result<()> {
        self.link.send(command::version_request()).await?;
        self.decoder.version_sent();
        Ok(())
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.current_task
    }

    /// True once the handshake finished and a scan may be launched.
    pub fn scanner_ready(&self) -> bool {
        self.decoder.is_ready()
    }

    /// Feed freshly read bytes through the decoder, apply the resulting
    /// events, and reconcile externally requested status changes. A
    /// protocol error poisons the current task and must close the
    /// connection.
    pub async fn on_bytes(&mut self, data: &[u8]) -> Result<Feed> {
        if let Err(error) = self.buffer.extend(data) {
            return Err(self.fault_connection(error).await);
        }

        let mut events = Vec::new();
        let feed = match self.decoder.feed(&mut self.buffer, &mut events) {
            Ok(feed) => feed,
            Err(error) => {
                // Apply whatever decoded cleanly before the mismatch, then
                // poison: partial protocol state cannot be resynchronized.
                for event in events.drain(..) {
                    self.apply_event(event).await?;
                }
                return Err(self.fault_connection(error).await);
            }
        };

        for event in events {
            self.apply_event(event).await?;
        }

        if feed == Feed::Bye {
            self.link.send(command::bye_ack()).await?;
        }

        self.reconcile().await?;
        Ok(feed)
    }

    /// Mark the current task poisoned and unbind it; the caller closes the
    /// connection.
    async fn fault_connection(&mut self, error: crate::otp::ProtocolError) -> CoreError {
        if let Some(task) = self.current_task {
            if let Err(store_error) =
                apply_status_event(self.store.as_ref(), task, StatusEvent::Fault).await
            {
                warn!(%task, %store_error, "failed to mark task after protocol error");
            }
        }
        self.current_task = None;
        self.current_report = None;
        CoreError::Protocol(error)
    }

    /// Launch a task on this session's scanner. Refuses when another task
    /// is already current or the scanner handshake has not finished.
    /// `resume` re-enters a stopped task, reusing its existing report.
    pub async fn start_task(&mut self, task: TaskId, resume: bool) -> Result<ReportId> {
        if let Some(current) = self.current_task {
            return Err(CoreError::TaskAlreadyCurrent(current));
        }
        if !self.decoder.is_ready() {
            return Err(CoreError::ScannerDown);
        }

        let status = self.store.run_status(task).await?;
        let startable = matches!(
            status,
            RunStatus::New | RunStatus::Stopped | RunStatus::Done
        );
        if !startable || (resume && status != RunStatus::Stopped) {
            return Err(CoreError::InvalidStart(status));
        }

        let record = self.store.task(task).await?;
        let report = if resume {
            // Same report id; its end time is cleared so the run reads as
            // in-progress again.
            self.store.reopen_report(task).await?
        } else {
            self.store.create_report(task).await?
        };

        apply_status_event(self.store.as_ref(), task, StatusEvent::Start).await?;

        let preferences = [Preference::new("ntp_keep_communication_alive", "yes")];
        self.link.send(&command::preferences(&preferences)).await?;
        self.link.send(&command::long_attack(&record.target)).await?;

        self.current_task = Some(task);
        self.current_report = Some(report);
        info!(%task, %report, resume, "scan launched");
        Ok(report)
    }

    /// User stop. `slave_bound` enables the giveup escalation.
    pub async fn request_stop(&mut self, task: TaskId, slave_bound: bool) -> Result<RunStatus> {
        let status =
            apply_status_event(self.store.as_ref(), task, StatusEvent::Stop { slave_bound })
                .await?;
        self.reconcile().await?;
        Ok(status)
    }

    pub async fn request_pause(&mut self, task: TaskId) -> Result<RunStatus> {
        let status = apply_status_event(self.store.as_ref(), task, StatusEvent::Pause).await?;
        self.reconcile().await?;
        Ok(status)
    }

    pub async fn request_resume(&mut self, task: TaskId) -> Result<RunStatus> {
        let status = apply_status_event(self.store.as_ref(), task, StatusEvent::Resume).await?;
        self.reconcile().await?;
        Ok(status)
    }

    /// User delete. Rest-state tasks are removed immediately; an active
    /// task is marked and deleted once it reaches `Stopped`.
    pub async fn request_delete(&mut self, task: TaskId, ultimate: bool) -> Result<()> {
        let status = self.store.run_status(task).await?;
        if matches!(
            status,
            RunStatus::New | RunStatus::Stopped | RunStatus::Done | RunStatus::InternalError
        ) {
            self.store.delete_task(task, ultimate).await?;
            return Ok(());
        }
        apply_status_event(self.store.as_ref(), task, StatusEvent::Delete { ultimate }).await?;
        self.reconcile().await?;
        Ok(())
    }

    /// Translate run-status changes made by other sessions into outbound
    /// scanner commands. Invoked at least once per decoder tick.
    pub async fn reconcile(&mut self) -> Result<()> {
        let Some(task) = self.current_task else {
            return Ok(());
        };
        let status = self.store.run_status(task).await?;
        match status {
            RunStatus::StopRequested => {
                self.link.send(command::stop_whole_test()).await?;
                apply_status_event(self.store.as_ref(), task, StatusEvent::StopDispatched)
                    .await?;
            }
            RunStatus::PauseRequested => {
                self.link.send(command::pause_whole_test()).await?;
                apply_status_event(self.store.as_ref(), task, StatusEvent::PauseDispatched)
                    .await?;
            }
            RunStatus::ResumeRequested => {
                self.link.send(command::resume_whole_test()).await?;
                apply_status_event(self.store.as_ref(), task, StatusEvent::ResumeDispatched)
                    .await?;
            }
            RunStatus::DeleteRequested | RunStatus::DeleteUltimateRequested => {
                self.link.send(command::stop_whole_test()).await?;
                apply_status_event(self.store.as_ref(), task, StatusEvent::DeleteDispatched)
                    .await?;
            }
            RunStatus::StopRequestedGiveup => {
                // Slave-only state; a local task can never legally get
                // here.
                error!(%task, "giveup requested for a local task");
                debug_assert!(false, "giveup on a non-delegated task");
                apply_status_event(self.store.as_ref(), task, StatusEvent::Fault).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn apply_event(&mut self, event: OtpEvent) -> Result<()> {
        match event {
            OtpEvent::VersionAgreed => {
                if self.decoder.cache_mode() {
                    self.link.send(command::complete_list_request()).await?;
                }
            }
            OtpEvent::HandshakeComplete => {
                info!("scanner handshake complete");
            }
            OtpEvent::FeedVersion(version) => {
                self.store.set_feed_version(version).await?;
            }
            OtpEvent::Plugin(plugin) => {
                self.store.cache_plugin(plugin).await?;
            }
            OtpEvent::Preference(preference) => {
                self.store.cache_preference(preference).await?;
            }
            OtpEvent::ScanStarted { at } => {
                let Some((task, report)) = self.current() else {
                    return Ok(());
                };
                self.store
                    .set_scan_start(report, at.unwrap_or_else(Utc::now))
                    .await?;
                apply_status_event(self.store.as_ref(), task, StatusEvent::ScanStarted).await?;
            }
            OtpEvent::ScanEnded { at } => {
                self.finish_scan(at).await?;
            }
            OtpEvent::HostStarted { host, at } => {
                if let Some((_, report)) = self.current() {
                    self.store
                        .set_host_start(report, &host, at.unwrap_or_else(Utc::now))
                        .await?;
                }
            }
            OtpEvent::HostEnded { host, at } => {
                if let Some((_, report)) = self.current() {
                    self.store
                        .set_host_end(report, &host, at.unwrap_or_else(Utc::now))
                        .await?;
                }
            }
            OtpEvent::Result(message) => {
                if let Some((_, report)) = self.current() {
                    self.store.append_result(report, message).await?;
                } else {
                    debug!("dropping result without a current task");
                }
            }
            OtpEvent::HostDetail { host, detail } => {
                if let Some((_, report)) = self.current() {
                    self.store.add_host_detail(report, &host, &detail).await?;
                }
            }
            OtpEvent::HostProgress { host, current, max } => {
                if let Some((_, report)) = self.current() {
                    self.store
                        .set_host_progress(report, &host, current, max)
                        .await?;
                }
            }
            OtpEvent::HostAttackState { host, state } => {
                if let Some((_, report)) = self.current() {
                    self.store
                        .set_host_attack_state(report, &host, &state)
                        .await?;
                }
            }
            OtpEvent::AttackPaused { .. } => {
                if let Some((task, _)) = self.current() {
                    apply_status_event(
                        self.store.as_ref(),
                        task,
                        StatusEvent::PauseAcknowledged,
                    )
                    .await?;
                }
            }
            OtpEvent::AttackResumed { .. } => {
                if let Some((task, _)) = self.current() {
                    apply_status_event(
                        self.store.as_ref(),
                        task,
                        StatusEvent::ResumeAcknowledged,
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// `SCAN_END`: stamp the report, drive the task to its terminal state,
    /// and carry out a deferred delete if one is pending.
    async fn finish_scan(&mut self, at: Option<chrono::DateTime<Utc>>) -> Result<()> {
        let Some((task, report)) = self.current() else {
            return Ok(());
        };
        self.store
            .set_scan_end(report, Some(at.unwrap_or_else(Utc::now)))
            .await?;

        let status = self.store.run_status(task).await?;
        if let Some(ultimate) = status.delete_pending() {
            info!(%task, ultimate, "scan ended with delete pending, removing task");
            self.store.delete_task(task, ultimate).await?;
        } else if matches!(status, RunStatus::StopRequested | RunStatus::StopWaiting) {
            apply_status_event(self.store.as_ref(), task, StatusEvent::ScanStopped).await?;
        } else {
            apply_status_event(self.store.as_ref(), task, StatusEvent::ScanDone).await?;
        }

        self.current_task = None;
        self.current_report = None;
        Ok(())
    }

    fn current(&self) -> Option<(TaskId, ReportId)> {
        match (self.current_task, self.current_report) {
            (Some(task), Some(report)) => Some((task, report)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Mutex;
    use vigil_model::{OwnerId, Task};

    #[derive(Debug, Default, Clone)]
    struct RecordingLink {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl RecordingLink {
        fn contains(&self, needle: &[u8]) -> bool {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .any(|frame| frame.windows(needle.len()).any(|window| window == needle))
        }
    }

    #[async_trait]
    impl ScannerLink for RecordingLink {
        async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    async fn ready_session(store: Arc<MemoryStore>) -> (ScannerSession, RecordingLink) {
        let link = RecordingLink::default();
        let mut session = ScannerSession::new(store, Box::new(link.clone()), false);
        session.open().await.unwrap();
        session.on_bytes(b"< OTP/2.0 >\n").await.unwrap();
        session
            .on_bytes(b"SERVER <|> PREFERENCES <|> ntp_opt_show_end <|> yes\nSERVER\n")
            .await
            .unwrap();
        assert!(session.scanner_ready());
        (session, link)
    }

    async fn seeded_task(store: &MemoryStore) -> TaskId {
        let task = Task::new(OwnerId::new(), "dmz sweep", "10.0.0.0/24");
        let id = task.id;
        store.insert_task(task).await.unwrap();
        id
    }

    #[tokio::test]
    async fn start_refuses_before_handshake() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store).await;
        let link = RecordingLink::default();
        let mut session = ScannerSession::new(store, Box::new(link), false);
        session.open().await.unwrap();
        assert!(matches!(
            session.start_task(task, false).await,
            Err(CoreError::ScannerDown)
        ));
    }

    #[tokio::test]
    async fn only_one_task_per_session() {
        let store = Arc::new(MemoryStore::new());
        let first = seeded_task(&store).await;
        let second = seeded_task(&store).await;
        let (mut session, link) = ready_session(Arc::clone(&store)).await;

        session.start_task(first, false).await.unwrap();
        assert!(link.contains(b"LONG_ATTACK"));
        assert_eq!(
            store.run_status(first).await.unwrap(),
            RunStatus::Requested
        );

        match session.start_task(second, false).await {
            Err(CoreError::TaskAlreadyCurrent(current)) => assert_eq!(current, first),
            other => panic!("expected TaskAlreadyCurrent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resume_reuses_the_report_and_clears_its_end() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store).await;
        let report = store.create_report(task).await.unwrap();
        store.set_scan_end(report, Some(Utc::now())).await.unwrap();
        store
            .set_run_status(task, RunStatus::Stopped)
            .await
            .unwrap();

        let (mut session, _link) = ready_session(Arc::clone(&store)).await;
        let resumed = session.start_task(task, true).await.unwrap();

        assert_eq!(resumed, report);
        assert_eq!(store.run_status(task).await.unwrap(), RunStatus::Requested);
        let current = store.current_report(task).await.unwrap().unwrap();
        assert!(current.scan_finished_at.is_none());
    }

    #[tokio::test]
    async fn resume_requires_a_stopped_task() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store).await;
        let (mut session, _link) = ready_session(Arc::clone(&store)).await;
        assert!(matches!(
            session.start_task(task, true).await,
            Err(CoreError::InvalidStart(RunStatus::New))
        ));
    }

    #[tokio::test]
    async fn reconcile_translates_a_foreign_stop_into_a_command() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store).await;
        let (mut session, link) = ready_session(Arc::clone(&store)).await;
        session.start_task(task, false).await.unwrap();

        // Another session asked for a stop through the store.
        apply_status_event(
            store.as_ref(),
            task,
            StatusEvent::Stop { slave_bound: false },
        )
        .await
        .unwrap();

        // Next decoder tick reconciles.
        session
            .on_bytes(b"SERVER <|> STATUS <|> 10.0.0.7 <|> 1/10 <|> SERVER\n")
            .await
            .unwrap();

        assert!(link.contains(b"STOP_WHOLE_TEST"));
        assert_eq!(
            store.run_status(task).await.unwrap(),
            RunStatus::StopWaiting
        );
    }

    #[tokio::test]
    async fn scan_end_with_pending_delete_removes_the_task() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store).await;
        let (mut session, _link) = ready_session(Arc::clone(&store)).await;
        session.start_task(task, false).await.unwrap();
        session
            .on_bytes(b"SERVER <|> TIME <|> SCAN_START <|> Fri Jun 13 10:21:51 2014 <|> SERVER\n")
            .await
            .unwrap();

        session.request_delete(task, false).await.unwrap();
        assert!(store.task_exists(task).await.unwrap());

        session
            .on_bytes(b"SERVER <|> TIME <|> SCAN_END <|> Fri Jun 13 10:30:01 2014 <|> SERVER\n")
            .await
            .unwrap();

        assert!(!store.task_exists(task).await.unwrap());
        assert_eq!(session.current_task(), None);
    }

    #[tokio::test]
    async fn pause_toggles_through_the_status_record() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store).await;
        let (mut session, link) = ready_session(Arc::clone(&store)).await;
        session.start_task(task, false).await.unwrap();
        session
            .on_bytes(b"SERVER <|> TIME <|> SCAN_START <|> Fri Jun 13 10:21:51 2014 <|> SERVER\n")
            .await
            .unwrap();
        assert_eq!(store.run_status(task).await.unwrap(), RunStatus::Running);

        session.request_pause(task).await.unwrap();
        assert!(link.contains(b"PAUSE_WHOLE_TEST"));
        assert_eq!(
            store.run_status(task).await.unwrap(),
            RunStatus::PauseWaiting
        );

        session
            .on_bytes(b"SERVER <|> STATUS <|> 10.0.0.7 <|> pause <|> SERVER\n")
            .await
            .unwrap();
        assert_eq!(store.run_status(task).await.unwrap(), RunStatus::Paused);
    }

    #[tokio::test]
    async fn protocol_garbage_poisons_the_task() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store).await;
        let (mut session, _link) = ready_session(Arc::clone(&store)).await;
        session.start_task(task, false).await.unwrap();

        let result = session.on_bytes(b"NOISE <|> NOISE <|> SERVER\n").await;
        assert!(matches!(result, Err(CoreError::Protocol(_))));
        assert_eq!(
            store.run_status(task).await.unwrap(),
            RunStatus::InternalError
        );
        assert_eq!(session.current_task(), None);
    }
}
