//! Core orchestration engine of the Vigil scan manager.
//!
//! Four tightly coupled pieces make up the engine:
//!
//! - [`status`] — the task run-status state machine, the single source of
//!   truth for what a scan is doing;
//! - [`otp`] — the incremental decoder turning raw scanner-protocol bytes
//!   into state transitions and report data;
//! - [`scheduler`] — the recurrence scheduler deciding when queued tasks
//!   start or stop;
//! - [`slave`] — the delegation controller mirroring a task's execution
//!   onto a remote manager.
//!
//! The decoder and the slave controller both drive the same state machine,
//! and the scheduler both consults and mutates it. Persistence is reached
//! only through the [`store::TaskStore`] accessor trait; per-connection
//! state lives in a [`session::ScannerSession`].

pub mod error;
pub mod otp;
pub mod schedule;
pub mod scheduler;
pub mod session;
pub mod slave;
pub mod status;
pub mod store;

pub use error::{CoreError, Result};
pub use otp::{Feed, OtpDecoder, OtpEvent, ProtocolError, ReceiveBuffer};
pub use scheduler::{PollOutcome, ScheduleClient, ScheduleConnector, Scheduler};
pub use session::{ScannerLink, ScannerSession, WriteLink};
pub use slave::{
    DelegationOutcome, SlaveConnector, SlaveController, SlaveCredentials, SlavePolicy,
    client::{RemoteReport, RemoteTaskStatus, SlaveClient, SlaveError, XmlSlaveClient},
};
pub use status::{RunStatus, StatusEvent, Transition};
pub use store::{MemoryStore, ScheduleEntry, StoreError, TaskStore, apply_status_event};
