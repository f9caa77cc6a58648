use std::path::{Path, PathBuf};
use std::{env, fs};
use thiserror::Error;
use tracing::debug;

use crate::models::DaemonConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid {variable}: {reason}")]
    Env { variable: String, reason: String },
}

/// Source that produced the daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    File(PathBuf),
}

const DEFAULT_CANDIDATES: &[&str] = &["vigil.toml", "config/vigil.toml", "/etc/vigil/vigil.toml"];

/// Load the daemon configuration. Evaluation order:
/// 1) `$VIGIL_CONFIG` (TOML file),
/// 2) the first of `vigil.toml`, `config/vigil.toml`, `/etc/vigil/vigil.toml`,
/// 3) built-in defaults.
/// `VIGIL_*` environment variables override file values afterwards.
pub fn load_from_env() -> Result<(DaemonConfig, ConfigSource), ConfigError> {
    load(None)
}

/// Load from an explicit path (CLI flag) or fall back to the environment
/// search order of [`load_from_env`].
pub fn load(path: Option<&Path>) -> Result<(DaemonConfig, ConfigSource), ConfigError> {
    let (mut config, source) = match path {
        Some(path) => (load_file(path)?, ConfigSource::File(path.to_path_buf())),
        None => base_config()?,
    };
    apply_env_overrides(&mut config)?;
    debug!(?source, "daemon configuration loaded");
    Ok((config, source))
}

fn base_config() -> Result<(DaemonConfig, ConfigSource), ConfigError> {
    if let Ok(path) = env::var("VIGIL_CONFIG")
        && !path.trim().is_empty()
    {
        let path = PathBuf::from(path);
        let config = load_file(&path)?;
        return Ok((config, ConfigSource::EnvPath(path)));
    }

    for candidate in DEFAULT_CANDIDATES {
        let path = Path::new(candidate);
        if path.exists() {
            let config = load_file(path)?;
            return Ok((config, ConfigSource::File(path.to_path_buf())));
        }
    }

    Ok((DaemonConfig::default(), ConfigSource::Default))
}

fn load_file(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides(config: &mut DaemonConfig) -> Result<(), ConfigError> {
    if let Some(host) = non_empty_var("VIGIL_SCANNER_HOST") {
        config.scanner.host = host;
    }
    if let Some(port) = non_empty_var("VIGIL_SCANNER_PORT") {
        config.scanner.port = port.parse().map_err(|_| ConfigError::Env {
            variable: "VIGIL_SCANNER_PORT".to_string(),
            reason: format!("not a port number: {port}"),
        })?;
    }
    if let Some(interval) = non_empty_var("VIGIL_SCHEDULE_INTERVAL") {
        config.scheduler.poll_interval_secs = parse_duration_secs("VIGIL_SCHEDULE_INTERVAL", &interval)?;
    }
    if let Some(interval) = non_empty_var("VIGIL_SLAVE_INTERVAL") {
        config.slave.poll_interval_secs = parse_duration_secs("VIGIL_SLAVE_INTERVAL", &interval)?;
    }
    if let Some(scheme) = non_empty_var("VIGIL_SEVERITY_SCHEME") {
        config.severity.scheme = scheme.parse().map_err(|_| ConfigError::Env {
            variable: "VIGIL_SEVERITY_SCHEME".to_string(),
            reason: format!("unknown scheme: {scheme}"),
        })?;
    }
    if let Some(filter) = non_empty_var("VIGIL_LOG") {
        config.log_filter = Some(filter);
    }
    Ok(())
}

/// Accept both humantime forms ("25s", "2m") and bare second counts.
fn parse_duration_secs(variable: &str, value: &str) -> Result<u64, ConfigError> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(seconds);
    }
    humantime::parse_duration(value)
        .map(|duration| duration.as_secs())
        .map_err(|_| ConfigError::Env {
            variable: variable.to_string(),
            reason: format!("not a duration: {value}"),
        })
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_values_survive_the_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [scanner]
            host = "scanner.dmz"
            port = 9999

            [scheduler]
            poll_interval_secs = 30
            "#
        )
        .unwrap();

        let config = load_file(file.path()).unwrap();
        assert_eq!(config.scanner.host, "scanner.dmz");
        assert_eq!(config.scanner.port, 9999);
        assert_eq!(config.scheduler.poll_interval_secs, 30);
        // Untouched sections keep defaults.
        assert_eq!(config.slave.poll_interval_secs, 25);
    }

    #[test]
    fn durations_accept_humantime_and_seconds() {
        assert_eq!(parse_duration_secs("X", "25").unwrap(), 25);
        assert_eq!(parse_duration_secs("X", "25s").unwrap(), 25);
        assert_eq!(parse_duration_secs("X", "2m").unwrap(), 120);
        assert!(parse_duration_secs("X", "soon").is_err());
    }

    #[test]
    fn broken_toml_is_reported_with_its_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scanner = 5").unwrap();
        let error = load_file(file.path()).unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
    }
}
