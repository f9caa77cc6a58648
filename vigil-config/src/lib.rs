//! Shared configuration for the Vigil scan manager daemon.
//!
//! This crate centralizes config loading and validation so the daemon
//! binary and any auxiliary tooling agree on defaults, file locations, and
//! environment overrides. Files are TOML; every `VIGIL_*` environment
//! variable overrides its file counterpart.

pub mod loader;
pub mod models;

pub use loader::{ConfigError, ConfigSource, load, load_from_env};
pub use models::{
    DaemonConfig, SchedulerSettings, ScannerSettings, SeveritySettings, SlaveSettings,
};
