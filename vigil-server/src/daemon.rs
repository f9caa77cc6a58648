//! Scanner-connection supervisor and scheduler wiring.
//!
//! One tokio task owns the scanner connection and its session state; every
//! other component reaches it through the command channel. The scheduler's
//! injected connector feeds the same channel, so due tasks start through
//! exactly the same path as user-started ones.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vigil_config::DaemonConfig;
use vigil_core::slave::client::{SlaveClient, SlaveError, XmlSlaveClient};
use vigil_core::{
    CoreError, Feed, Result, RunStatus, ScannerSession, ScheduleClient, ScheduleConnector,
    SlaveConnector, SlaveController, SlaveCredentials, SlavePolicy, StatusEvent, TaskStore,
    WriteLink, apply_status_event,
};
use vigil_model::{OwnerId, SlaveDescriptor, TaskId};
use zeroize::Zeroizing;

/// Commands the session actor accepts from schedulers and client handlers.
#[derive(Debug, Clone, Copy)]
pub enum SessionCommand {
    Start { task: TaskId },
    Stop { task: TaskId },
}

/// [`ScheduleConnector`] that feeds the session actor's command channel.
#[derive(Debug, Clone)]
pub struct ChannelScheduleConnector {
    tx: mpsc::Sender<SessionCommand>,
}

impl ChannelScheduleConnector {
    pub fn new(tx: mpsc::Sender<SessionCommand>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ScheduleConnector for ChannelScheduleConnector {
    async fn connect(&self, _owner: OwnerId) -> Result<Box<dyn ScheduleClient>> {
        Ok(Box::new(ChannelScheduleClient {
            tx: self.tx.clone(),
        }))
    }
}

struct ChannelScheduleClient {
    tx: mpsc::Sender<SessionCommand>,
}

#[async_trait]
impl ScheduleClient for ChannelScheduleClient {
    async fn start_task(&mut self, task: TaskId) -> Result<()> {
        self.tx
            .send(SessionCommand::Start { task })
            .await
            .map_err(|_| CoreError::ScannerDown)
    }

    async fn stop_task(&mut self, task: TaskId) -> Result<()> {
        self.tx
            .send(SessionCommand::Stop { task })
            .await
            .map_err(|_| CoreError::ScannerDown)
    }
}

/// Slave connections are plain TCP; TLS termination belongs to the
/// deployment in front of the slave.
#[derive(Debug, Default)]
pub struct TcpSlaveConnector;

#[async_trait]
impl SlaveConnector for TcpSlaveConnector {
    async fn connect(
        &self,
        slave: &SlaveDescriptor,
    ) -> std::result::Result<Box<dyn SlaveClient>, SlaveError> {
        let stream = TcpStream::connect((slave.host.as_str(), slave.port)).await?;
        Ok(Box::new(XmlSlaveClient::new(stream)))
    }
}

/// Owns the scanner connection: connects, handshakes, then multiplexes
/// socket reads with session commands until shutdown. Reconnects with a
/// fixed backoff on connection loss and while the scanner is loading.
pub struct ScannerSupervisor {
    store: Arc<dyn TaskStore>,
    config: DaemonConfig,
    commands: mpsc::Receiver<SessionCommand>,
    slave_connector: Arc<dyn SlaveConnector>,
    shutdown: CancellationToken,
}

impl ScannerSupervisor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        config: DaemonConfig,
        commands: mpsc::Receiver<SessionCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            config,
            commands,
            slave_connector: Arc::new(TcpSlaveConnector),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let backoff = Duration::from_secs(self.config.scanner.reconnect_backoff_secs.max(1));
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            match self.serve_one_connection().await {
                Ok(ConnectionEnd::Shutdown) => return,
                Ok(ConnectionEnd::LoginFailed) => {
                    error!("scanner rejected our login, giving up");
                    self.shutdown.cancel();
                    return;
                }
                Ok(ConnectionEnd::Retry) => {}
                Err(error) => {
                    warn!(%error, "scanner connection failed");
                }
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    async fn serve_one_connection(&mut self) -> Result<ConnectionEnd> {
        let address = (
            self.config.scanner.host.as_str(),
            self.config.scanner.port,
        );
        let stream = TcpStream::connect(address).await?;
        info!(host = %self.config.scanner.host, port = self.config.scanner.port, "scanner connected");

        let (mut reader, writer) = stream.into_split();
        let mut session = ScannerSession::new(
            Arc::clone(&self.store),
            Box::new(WriteLink(writer)),
            self.config.scanner.cache_mode,
        );
        session.open().await?;

        let mut chunk = [0u8; 16_384];
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(ConnectionEnd::Shutdown);
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(&mut session, command).await,
                        None => return Ok(ConnectionEnd::Shutdown),
                    }
                }
                read = reader.read(&mut chunk) => {
                    let n = read?;
                    if n == 0 {
                        warn!("scanner closed the connection");
                        return Ok(ConnectionEnd::Retry);
                    }
                    match session.on_bytes(&chunk[..n]).await {
                        Ok(Feed::Bye) => {
                            info!("scanner said goodbye");
                            return Ok(ConnectionEnd::Retry);
                        }
                        Ok(Feed::LoginFailed) => return Ok(ConnectionEnd::LoginFailed),
                        Ok(Feed::Loading { loaded, total }) => {
                            info!(loaded, total, "scanner still loading, will retry");
                            return Ok(ConnectionEnd::Retry);
                        }
                        Ok(_) => {}
                        Err(error) => {
                            // Protocol poison: the session already marked
                            // the task; drop the connection.
                            warn!(%error, "closing scanner connection");
                            return Ok(ConnectionEnd::Retry);
                        }
                    }
                }
            }
        }
    }

    async fn handle_command(&self, session: &mut ScannerSession, command: SessionCommand) {
        let result = match command {
            SessionCommand::Start { task } => self.start(session, task).await,
            SessionCommand::Stop { task } => self.stop(session, task).await,
        };
        if let Err(error) = result {
            warn!(?command, %error, "session command failed");
        }
    }

    async fn start(&self, session: &mut ScannerSession, task: TaskId) -> Result<()> {
        let record = self.store.task(task).await?;
        let resume = self.store.run_status(task).await? == RunStatus::Stopped;

        match record.slave {
            Some(slave) => self.start_delegated(task, slave, resume).await,
            None => session.start_task(task, resume).await.map(|_| ()),
        }
    }

    /// Delegated execution: bind a report, mark the task requested, and
    /// hand the rest to a slave controller on its own task.
    async fn start_delegated(
        &self,
        task: TaskId,
        slave: SlaveDescriptor,
        resume: bool,
    ) -> Result<()> {
        if resume {
            self.store.reopen_report(task).await?;
        } else {
            self.store.create_report(task).await?;
        }
        apply_status_event(self.store.as_ref(), task, StatusEvent::Start).await?;

        let settings = &self.config.slave;
        let credentials = SlaveCredentials {
            slave_password: Zeroizing::new(settings.password.clone()),
            ssh_login: settings.ssh_login.clone(),
            ssh_password: Zeroizing::new(settings.ssh_password.clone()),
            smb_login: settings.smb_login.clone(),
            smb_password: Zeroizing::new(settings.smb_password.clone()),
        };
        let policy = SlavePolicy {
            poll_interval: Duration::from_secs(settings.poll_interval_secs.max(1)),
            reconnect_backoff: Duration::from_secs(settings.reconnect_backoff_secs.max(1)),
        };

        let mut controller = SlaveController::new(
            Arc::clone(&self.store),
            Arc::clone(&self.slave_connector),
            task,
            slave,
            credentials,
            policy,
        );
        tokio::spawn(async move {
            match controller.run(resume).await {
                Ok(outcome) => info!(%task, ?outcome, "delegation finished"),
                Err(error) => error!(%task, %error, "delegation aborted"),
            }
        });
        Ok(())
    }

    async fn stop(&self, session: &mut ScannerSession, task: TaskId) -> Result<()> {
        let record = self.store.task(task).await?;
        let slave_bound = record.slave.is_some();
        apply_status_event(
            self.store.as_ref(),
            task,
            StatusEvent::Stop { slave_bound },
        )
        .await?;
        // Local tasks get the command pushed on this tick; delegated tasks
        // pick the request up on their controller's next reconcile.
        session.reconcile().await
    }
}

enum ConnectionEnd {
    Shutdown,
    Retry,
    LoginFailed,
}
