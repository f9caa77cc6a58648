use thiserror::Error;
use vigil_model::TaskId;

use crate::otp::ProtocolError;
use crate::slave::client::SlaveError;
use crate::status::RunStatus;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("slave error: {0}")]
    Slave(#[from] SlaveError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("model error: {0}")]
    Model(#[from] vigil_model::ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task {0} is already bound to this scanner connection")]
    TaskAlreadyCurrent(TaskId),

    #[error("scanner connection is down or still initializing")]
    ScannerDown,

    #[error("task cannot start from status {0}")]
    InvalidStart(RunStatus),

    #[error("task {0} has no active report")]
    NoActiveReport(TaskId),

    #[error("delegation aborted: {0}")]
    DelegationAborted(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
