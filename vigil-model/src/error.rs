use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid severity score: {0}")]
    InvalidSeverity(f64),

    #[error("unknown classification scheme: {0}")]
    UnknownScheme(String),

    #[error("unknown threat level: {0}")]
    UnknownLevel(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("invalid port descriptor: {0}")]
    InvalidPort(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
