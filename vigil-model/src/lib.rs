//! Shared data models for the Vigil scan manager.
//!
//! This crate carries the types that cross crate boundaries: typed ids,
//! task/report/schedule records, NVT plugin metadata, and the severity
//! classifier. It deliberately stays free of I/O so both the orchestration
//! engine and the daemon binary can depend on it without pulling in a
//! runtime.

pub mod error;
pub mod ids;
pub mod nvt;
pub mod report;
pub mod schedule;
pub mod severity;
pub mod task;

pub use error::{ModelError, Result};
pub use ids::{OwnerId, ReportId, ScheduleId, SlaveId, TaskId};
pub use nvt::{NvtPlugin, Preference};
pub use report::{
    HostProgress, PortDescriptor, Report, ResultMessage, ResultType, SlaveBookkeeping,
};
pub use schedule::{RecurrencePeriod, Schedule};
pub use severity::{ClassificationScheme, MessageType, ThreatLevel};
pub use task::{SlaveDescriptor, Task};
