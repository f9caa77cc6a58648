use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ModelError;
use crate::ids::{ReportId, TaskId};

/// Message type of one finding, derived from the record kind that carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Alarm,
    LogMessage,
    DebugMessage,
    FalsePositive,
    ErrorMessage,
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultType::Alarm => write!(f, "Alarm"),
            ResultType::LogMessage => write!(f, "Log Message"),
            ResultType::DebugMessage => write!(f, "Debug Message"),
            ResultType::FalsePositive => write!(f, "False Positive"),
            ResultType::ErrorMessage => write!(f, "Error Message"),
        }
    }
}

impl FromStr for ResultType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Alarm" => Ok(ResultType::Alarm),
            "Log Message" => Ok(ResultType::LogMessage),
            "Debug Message" => Ok(ResultType::DebugMessage),
            "False Positive" => Ok(ResultType::FalsePositive),
            "Error Message" => Ok(ResultType::ErrorMessage),
            other => Err(ModelError::UnknownMessageType(other.to_string())),
        }
    }
}

/// Port field of a result: parsed number and protocol plus the original
/// string, which is kept verbatim because descriptors like `general/tcp`
/// carry no number at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub number: Option<u16>,
    pub protocol: Option<String>,
    pub raw: String,
}

impl PortDescriptor {
    pub fn general(protocol: impl Into<String>) -> Self {
        let protocol = protocol.into();
        Self {
            number: None,
            raw: format!("general/{protocol}"),
            protocol: Some(protocol),
        }
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// One finding. Immutable once created; appended to a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub host: String,
    pub port: PortDescriptor,
    pub nvt_oid: String,
    pub description: String,
    pub result_type: ResultType,
}

/// Attack progress of a single host within one report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProgress {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attack_state: Option<String>,
    pub current: u32,
    pub max: u32,
    /// Free-form host details stored by `general/Host_Details` log records.
    pub details: Vec<String>,
}

/// Bookkeeping for a report whose execution is mirrored on a remote manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveBookkeeping {
    pub host: String,
    pub port: u16,
    pub remote_task: Uuid,
    pub remote_report: Option<Uuid>,
    /// Progress percentage as last mirrored from the slave.
    pub progress: u8,
}

/// One scan run's accumulating result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub task: TaskId,
    pub scan_started_at: Option<DateTime<Utc>>,
    pub scan_finished_at: Option<DateTime<Utc>>,
    pub hosts: HashMap<String, HostProgress>,
    pub results: Vec<ResultMessage>,
    pub slave: Option<SlaveBookkeeping>,
}

impl Report {
    pub fn new(task: TaskId) -> Self {
        Self {
            id: ReportId::new(),
            task,
            scan_started_at: None,
            scan_finished_at: None,
            hosts: HashMap::new(),
            results: Vec::new(),
            slave: None,
        }
    }

    pub fn host_mut(&mut self, host: &str) -> &mut HostProgress {
        self.hosts.entry(host.to_string()).or_default()
    }

    /// Prepare an existing report for a resumed run: the id is kept, the
    /// end-times are cleared so the run reads as in-progress again.
    pub fn reopen(&mut self) {
        self.scan_finished_at = None;
        for progress in self.hosts.values_mut() {
            if progress.finished_at.is_some() {
                continue;
            }
            progress.attack_state = None;
        }
    }

    /// Drop partial results for hosts that never finished. Used before
    /// falling back from a failed resume to a fresh delegated start.
    pub fn trim_partial_results(&mut self) {
        let unfinished: Vec<String> = self
            .hosts
            .iter()
            .filter(|(_, progress)| progress.finished_at.is_none())
            .map(|(host, _)| host.clone())
            .collect();
        self.results
            .retain(|message| !unfinished.contains(&message.host));
        for host in unfinished {
            self.hosts.remove(&host);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(host: &str) -> ResultMessage {
        ResultMessage {
            host: host.to_string(),
            port: PortDescriptor::general("tcp"),
            nvt_oid: "1.3.6.1.4.1.25623.1.0.10330".to_string(),
            description: "Service detected".to_string(),
            result_type: ResultType::LogMessage,
        }
    }

    #[test]
    fn reopen_keeps_id_and_clears_end_time() {
        let mut report = Report::new(TaskId::new());
        let id = report.id;
        report.scan_finished_at = Some(Utc::now());
        report.reopen();
        assert_eq!(report.id, id);
        assert!(report.scan_finished_at.is_none());
    }

    #[test]
    fn trim_drops_only_unfinished_hosts() {
        let mut report = Report::new(TaskId::new());
        report.host_mut("10.0.0.1").finished_at = Some(Utc::now());
        report.host_mut("10.0.0.2");
        report.results.push(message("10.0.0.1"));
        report.results.push(message("10.0.0.2"));

        report.trim_partial_results();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].host, "10.0.0.1");
        assert!(report.hosts.contains_key("10.0.0.1"));
        assert!(!report.hosts.contains_key("10.0.0.2"));
    }

    #[test]
    fn result_type_names_round_trip() {
        for result_type in [
            ResultType::Alarm,
            ResultType::LogMessage,
            ResultType::DebugMessage,
            ResultType::FalsePositive,
            ResultType::ErrorMessage,
        ] {
            assert_eq!(
                result_type.to_string().parse::<ResultType>().unwrap(),
                result_type
            );
        }
    }
}
