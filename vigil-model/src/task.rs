use serde::{Deserialize, Serialize};

use crate::ids::{OwnerId, ReportId, ScheduleId, SlaveId, TaskId};

/// Remote manager a task's execution is delegated to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveDescriptor {
    pub id: SlaveId,
    pub host: String,
    pub port: u16,
    pub username: String,
}

/// A named, schedulable unit of work binding a target, a scan configuration,
/// and optionally a schedule and a slave. The run status is store-side state
/// owned by the orchestration engine, not part of this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner: OwnerId,
    pub name: String,
    /// Hosts to scan, in the scanner's target syntax.
    pub target: String,
    /// Name of the scan configuration selecting NVTs and preferences.
    pub config: String,
    pub schedule: Option<ScheduleId>,
    pub slave: Option<SlaveDescriptor>,
    /// The currently active report, if a run is underway or resumable.
    pub report: Option<ReportId>,
}

impl Task {
    pub fn new(owner: OwnerId, name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            owner,
            name: name.into(),
            target: target.into(),
            config: "Full and fast".to_string(),
            schedule: None,
            slave: None,
            report: None,
        }
    }

    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = config.into();
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleId) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_slave(mut self, slave: SlaveDescriptor) -> Self {
        self.slave = Some(slave);
        self
    }

    pub fn is_delegated(&self) -> bool {
        self.slave.is_some()
    }
}
