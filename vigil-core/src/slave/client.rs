//! Outbound client for a remote manager ("slave").
//!
//! Delegated tasks never talk to a local scanner; the controller drives the
//! slave through the same XML command protocol end users speak, acting as
//! an ordinary outbound client. The [`SlaveClient`] trait is the seam the
//! controller is tested through; [`XmlSlaveClient`] is the production
//! implementation over any async byte stream.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesText, Event};
use quick_xml::writer::Writer;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;
use vigil_model::{MessageType, Preference, ResultMessage, ResultType, ThreatLevel};

use crate::otp::{parse_port, parse_scanner_time};
use crate::status::RunStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlaveError {
    /// The remote resource is gone (the 404 analogue). Never retried:
    /// delegation aborts into `InternalError`.
    #[error("remote resource missing")]
    Missing,

    /// Transient socket trouble; the controller reconnects and retries.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response could not be parsed.
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// The slave refused the command.
    #[error("command rejected ({status}): {text}")]
    Rejected { status: u16, text: String },
}

impl From<std::io::Error> for SlaveError {
    fn from(error: std::io::Error) -> Self {
        SlaveError::Transport(error.to_string())
    }
}

/// Status snapshot of the mirrored task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTaskStatus {
    pub status: RunStatus,
    pub progress: u8,
    pub report: Option<Uuid>,
}

/// Incremental slice of the remote report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteReport {
    pub results: Vec<ResultMessage>,
    pub host_ends: Vec<(String, DateTime<Utc>)>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Commands the delegation controller issues against a slave.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SlaveClient: Send + Sync {
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), SlaveError>;

    async fn create_credential(
        &mut self,
        name: &str,
        login: &str,
        password: &str,
    ) -> Result<Uuid, SlaveError>;
    async fn create_target(
        &mut self,
        name: &str,
        hosts: &str,
        ssh_credential: Option<Uuid>,
        smb_credential: Option<Uuid>,
    ) -> Result<Uuid, SlaveError>;
    async fn create_config(
        &mut self,
        name: &str,
        preferences: &[Preference],
    ) -> Result<Uuid, SlaveError>;
    async fn create_task(
        &mut self,
        name: &str,
        config: Uuid,
        target: Uuid,
    ) -> Result<Uuid, SlaveError>;

    async fn start_task(&mut self, task: Uuid) -> Result<(), SlaveError>;
    async fn resume_stopped_task(&mut self, task: Uuid) -> Result<(), SlaveError>;
    async fn stop_task(&mut self, task: Uuid) -> Result<(), SlaveError>;
    async fn pause_task(&mut self, task: Uuid) -> Result<(), SlaveError>;
    async fn resume_paused_task(&mut self, task: Uuid) -> Result<(), SlaveError>;

    async fn delete_task(&mut self, task: Uuid) -> Result<(), SlaveError>;
    async fn delete_config(&mut self, config: Uuid) -> Result<(), SlaveError>;
    async fn delete_target(&mut self, target: Uuid) -> Result<(), SlaveError>;
    async fn delete_credential(&mut self, credential: Uuid) -> Result<(), SlaveError>;

    async fn task_status(&mut self, task: Uuid) -> Result<RemoteTaskStatus, SlaveError>;
    /// Fetch results starting at `first_result`, so polls stay incremental.
    async fn report_results(
        &mut self,
        report: Uuid,
        first_result: usize,
    ) -> Result<RemoteReport, SlaveError>;
}

/// Production client speaking the XML command protocol over `S`.
#[derive(Debug)]
pub struct XmlSlaveClient<S> {
    stream: S,
    rx: Vec<u8>,
}

impl<S> XmlSlaveClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            rx: Vec::with_capacity(4096),
        }
    }

    async fn roundtrip(&mut self, request: Vec<u8>) -> Result<Vec<u8>, SlaveError> {
        self.stream.write_all(&request).await?;
        self.stream.flush().await?;

        self.rx.clear();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(SlaveError::Transport(
                    "connection closed mid-response".to_string(),
                ));
            }
            self.rx.extend_from_slice(&chunk[..n]);
            if document_complete(&self.rx) {
                return Ok(std::mem::take(&mut self.rx));
            }
        }
    }

    async fn command(&mut self, request: Vec<u8>) -> Result<ResponseEnvelope, SlaveError> {
        let response = self.roundtrip(request).await?;
        parse_envelope(&response)
    }

    /// Issue a command whose reply carries a created-resource id.
    async fn create(&mut self, request: Vec<u8>) -> Result<Uuid, SlaveError> {
        let envelope = self.command(request).await?;
        envelope.check()?;
        envelope
            .id
            .ok_or_else(|| SlaveError::Protocol("response carries no id".to_string()))
    }
}

/// Parsed response envelope: root status attributes plus the id of a
/// created resource where present.
#[derive(Debug, Default)]
struct ResponseEnvelope {
    status: u16,
    status_text: String,
    id: Option<Uuid>,
    body: Vec<u8>,
}

impl ResponseEnvelope {
    fn check(&self) -> Result<(), SlaveError> {
        match self.status {
            200..=299 => Ok(()),
            404 => Err(SlaveError::Missing),
            status => Err(SlaveError::Rejected {
                status,
                text: self.status_text.clone(),
            }),
        }
    }
}

fn document_complete(bytes: &[u8]) -> bool {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => {
                depth += 1;
                seen_root = true;
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return true;
                }
            }
            Ok(Event::Empty(_)) => {
                seen_root = true;
                if depth == 0 {
                    return true;
                }
            }
            Ok(Event::Eof) => return false,
            Err(_) => return seen_root && depth == 0,
            _ => {}
        }
        buf.clear();
    }
}

fn parse_envelope(bytes: &[u8]) -> Result<ResponseEnvelope, SlaveError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut envelope = ResponseEnvelope {
        body: bytes.to_vec(),
        ..ResponseEnvelope::default()
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                for attr in element.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"status" => {
                            envelope.status = String::from_utf8_lossy(&attr.value)
                                .parse()
                                .map_err(|_| {
                                    SlaveError::Protocol("non-numeric status".to_string())
                                })?;
                        }
                        b"status_text" => {
                            envelope.status_text =
                                String::from_utf8_lossy(&attr.value).into_owned();
                        }
                        b"id" => {
                            envelope.id =
                                String::from_utf8_lossy(&attr.value).parse().ok();
                        }
                        _ => {}
                    }
                }
                return Ok(envelope);
            }
            Ok(Event::Eof) => {
                return Err(SlaveError::Protocol("empty response".to_string()));
            }
            Err(error) => {
                return Err(SlaveError::Protocol(error.to_string()));
            }
            _ => {}
        }
    }
}

fn element(name: &str, children: impl FnOnce(&mut Writer<Vec<u8>>)) -> Vec<u8> {
    let mut writer = Writer::new(Vec::new());
    let _ = writer
        .create_element(name)
        .write_inner_content(|writer| -> std::io::Result<()> {
            children(writer);
            Ok(())
        });
    writer.into_inner()
}

fn text_child(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) {
    let _ = writer
        .create_element(name)
        .write_text_content(BytesText::new(value));
}

fn empty_with_id(name: &str, attr: &str, id: Uuid) -> Vec<u8> {
    let mut writer = Writer::new(Vec::new());
    let _ = writer
        .create_element(name)
        .with_attribute((attr, id.to_string().as_str()))
        .write_empty();
    writer.into_inner()
}

fn parse_result_type(text: &str) -> ResultType {
    if let Ok(result_type) = text.parse::<ResultType>() {
        return result_type;
    }
    // Older slaves speak the legacy message-type vocabulary; translate it
    // through the threat-level mapping.
    match text.parse::<MessageType>() {
        Ok(message_type) => match message_type.to_level() {
            ThreatLevel::High | ThreatLevel::Medium | ThreatLevel::Low => ResultType::Alarm,
            ThreatLevel::Log => ResultType::LogMessage,
            ThreatLevel::Debug => ResultType::DebugMessage,
            ThreatLevel::FalsePositive => ResultType::FalsePositive,
            ThreatLevel::Error | ThreatLevel::None => ResultType::ErrorMessage,
        },
        Err(_) => ResultType::LogMessage,
    }
}

#[async_trait]
impl<S> SlaveClient for XmlSlaveClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), SlaveError> {
        let request = element("authenticate", |writer| {
            let _ = writer
                .create_element("credentials")
                .write_inner_content(|writer| -> std::io::Result<()> {
                    text_child(writer, "username", username);
                    text_child(writer, "password", password);
                    Ok(())
                });
        });
        self.command(request).await?.check()
    }

    async fn create_credential(
        &mut self,
        name: &str,
        login: &str,
        password: &str,
    ) -> Result<Uuid, SlaveError> {
        let request = element("create_lsc_credential", |writer| {
            text_child(writer, "name", name);
            text_child(writer, "login", login);
            text_child(writer, "password", password);
        });
        self.create(request).await
    }

    async fn create_target(
        &mut self,
        name: &str,
        hosts: &str,
        ssh_credential: Option<Uuid>,
        smb_credential: Option<Uuid>,
    ) -> Result<Uuid, SlaveError> {
        let request = element("create_target", |writer| {
            text_child(writer, "name", name);
            text_child(writer, "hosts", hosts);
            if let Some(id) = ssh_credential {
                let _ = writer
                    .create_element("ssh_lsc_credential")
                    .with_attribute(("id", id.to_string().as_str()))
                    .write_empty();
            }
            if let Some(id) = smb_credential {
                let _ = writer
                    .create_element("smb_lsc_credential")
                    .with_attribute(("id", id.to_string().as_str()))
                    .write_empty();
            }
        });
        self.create(request).await
    }

    async fn create_config(
        &mut self,
        name: &str,
        preferences: &[Preference],
    ) -> Result<Uuid, SlaveError> {
        let request = element("create_config", |writer| {
            text_child(writer, "name", name);
            let _ = writer
                .create_element("preferences")
                .write_inner_content(|writer| -> std::io::Result<()> {
                    for preference in preferences {
                        let _ = writer
                            .create_element("preference")
                            .write_inner_content(|writer| -> std::io::Result<()> {
                                text_child(writer, "name", &preference.name);
                                text_child(writer, "value", &preference.value);
                                Ok(())
                            });
                    }
                    Ok(())
                });
        });
        self.create(request).await
    }

    async fn create_task(
        &mut self,
        name: &str,
        config: Uuid,
        target: Uuid,
    ) -> Result<Uuid, SlaveError> {
        let request = element("create_task", |writer| {
            text_child(writer, "name", name);
            let _ = writer
                .create_element("config")
                .with_attribute(("id", config.to_string().as_str()))
                .write_empty();
            let _ = writer
                .create_element("target")
                .with_attribute(("id", target.to_string().as_str()))
                .write_empty();
        });
        self.create(request).await
    }

    async fn start_task(&mut self, task: Uuid) -> Result<(), SlaveError> {
        let request = empty_with_id("start_task", "task_id", task);
        self.command(request).await?.check()
    }

    async fn resume_stopped_task(&mut self, task: Uuid) -> Result<(), SlaveError> {
        let request = empty_with_id("resume_stopped_task", "task_id", task);
        self.command(request).await?.check()
    }

    async fn stop_task(&mut self, task: Uuid) -> Result<(), SlaveError> {
        let request = empty_with_id("stop_task", "task_id", task);
        self.command(request).await?.check()
    }

    async fn pause_task(&mut self, task: Uuid) -> Result<(), SlaveError> {
        let request = empty_with_id("pause_task", "task_id", task);
        self.command(request).await?.check()
    }

    async fn resume_paused_task(&mut self, task: Uuid) -> Result<(), SlaveError> {
        let request = empty_with_id("resume_paused_task", "task_id", task);
        self.command(request).await?.check()
    }

    async fn delete_task(&mut self, task: Uuid) -> Result<(), SlaveError> {
        let request = empty_with_id("delete_task", "task_id", task);
        self.command(request).await?.check()
    }

    async fn delete_config(&mut self, config: Uuid) -> Result<(), SlaveError> {
        let request = empty_with_id("delete_config", "config_id", config);
        self.command(request).await?.check()
    }

    async fn delete_target(&mut self, target: Uuid) -> Result<(), SlaveError> {
        let request = empty_with_id("delete_target", "target_id", target);
        self.command(request).await?.check()
    }

    async fn delete_credential(&mut self, credential: Uuid) -> Result<(), SlaveError> {
        let request = empty_with_id("delete_lsc_credential", "lsc_credential_id", credential);
        self.command(request).await?.check()
    }

    async fn task_status(&mut self, task: Uuid) -> Result<RemoteTaskStatus, SlaveError> {
        let request = empty_with_id("get_tasks", "task_id", task);
        let envelope = self.command(request).await?;
        envelope.check()?;
        parse_task_status(&envelope.body)
    }

    async fn report_results(
        &mut self,
        report: Uuid,
        first_result: usize,
    ) -> Result<RemoteReport, SlaveError> {
        let mut writer = Writer::new(Vec::new());
        let _ = writer
            .create_element("get_report")
            .with_attribute(("report_id", report.to_string().as_str()))
            .with_attribute(("first_result", first_result.to_string().as_str()))
            .write_empty();
        let request = writer.into_inner();

        let envelope = self.command(request).await?;
        envelope.check()?;
        parse_report(&envelope.body)
    }
}

fn parse_task_status(bytes: &[u8]) -> Result<RemoteTaskStatus, SlaveError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut status: Option<RunStatus> = None;
    let mut progress = 0u8;
    let mut report = None;
    let mut in_last_report = false;
    let mut capture: Option<&'static str> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => match element.name().as_ref() {
                b"status" => capture = Some("status"),
                b"progress" => capture = Some("progress"),
                b"last_report" => in_last_report = true,
                _ => {}
            },
            Ok(Event::Empty(element)) => {
                if in_last_report && element.name().as_ref() == b"report" {
                    for attr in element.attributes().flatten() {
                        if attr.key.as_ref() == b"id" {
                            report = String::from_utf8_lossy(&attr.value).parse().ok();
                        }
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let value = text.unescape().unwrap_or_default().into_owned();
                match capture.take() {
                    Some("status") => {
                        status = Some(value.parse().map_err(|_| {
                            SlaveError::Protocol(format!("unknown remote status {value:?}"))
                        })?);
                    }
                    Some("progress") => {
                        progress = value.parse().unwrap_or(0);
                    }
                    _ => {}
                }
            }
            Ok(Event::End(element)) => {
                if element.name().as_ref() == b"last_report" {
                    in_last_report = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(SlaveError::Protocol(error.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let status =
        status.ok_or_else(|| SlaveError::Protocol("response carries no status".to_string()))?;
    Ok(RemoteTaskStatus {
        status,
        progress,
        report,
    })
}

#[derive(Default)]
struct ResultBuilder {
    host: String,
    port: String,
    oid: String,
    description: String,
    result_type: Option<ResultType>,
}

fn parse_report(bytes: &[u8]) -> Result<RemoteReport, SlaveError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut report = RemoteReport::default();
    let mut current: Option<ResultBuilder> = None;
    let mut in_host_end = false;
    let mut host_end_host = String::new();
    let mut capture: Option<&'static str> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => match element.name().as_ref() {
                b"result" => current = Some(ResultBuilder::default()),
                b"host" if current.is_some() || in_host_end => capture = Some("host"),
                b"port" => capture = Some("port"),
                b"description" => capture = Some("description"),
                b"type" | b"threat" => capture = Some("type"),
                b"host_end" => in_host_end = true,
                b"end" if in_host_end => capture = Some("end"),
                b"scan_end" => capture = Some("scan_end"),
                _ => {}
            },
            Ok(Event::Empty(element)) => {
                if element.name().as_ref() == b"nvt" {
                    if let Some(result) = current.as_mut() {
                        for attr in element.attributes().flatten() {
                            if attr.key.as_ref() == b"oid" {
                                result.oid =
                                    String::from_utf8_lossy(&attr.value).into_owned();
                            }
                        }
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let value = text.unescape().unwrap_or_default().into_owned();
                match capture.take() {
                    Some("host") => {
                        if in_host_end {
                            host_end_host = value;
                        } else if let Some(result) = current.as_mut() {
                            result.host = value;
                        }
                    }
                    Some("port") => {
                        if let Some(result) = current.as_mut() {
                            result.port = value;
                        }
                    }
                    Some("description") => {
                        if let Some(result) = current.as_mut() {
                            result.description = value;
                        }
                    }
                    Some("type") => {
                        if let Some(result) = current.as_mut() {
                            result.result_type = Some(parse_result_type(&value));
                        }
                    }
                    Some("end") => {
                        if let Some(at) = parse_scanner_time(&value) {
                            report
                                .host_ends
                                .push((std::mem::take(&mut host_end_host), at));
                        }
                    }
                    Some("scan_end") => {
                        report.finished_at = parse_scanner_time(&value);
                    }
                    _ => {}
                }
            }
            Ok(Event::End(element)) => match element.name().as_ref() {
                b"result" => {
                    if let Some(result) = current.take() {
                        report.results.push(ResultMessage {
                            host: result.host,
                            port: parse_port(&result.port),
                            nvt_oid: result.oid,
                            description: result.description,
                            result_type: result.result_type.unwrap_or(ResultType::LogMessage),
                        });
                    }
                }
                b"host_end" => in_host_end = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(error) => return Err(SlaveError::Protocol(error.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(report)
}
