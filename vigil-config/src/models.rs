use serde::{Deserialize, Serialize};
use vigil_model::ClassificationScheme;

/// Where and how to reach the scanner process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerSettings {
    pub host: String,
    pub port: u16,
    /// Request the complete plugin list during the handshake so the NVT
    /// cache stays warm. Turn off against scanners with very large feeds
    /// when startup latency matters more than cache freshness.
    pub cache_mode: bool,
    /// Seconds to wait before reconnecting after the scanner drops the
    /// connection or reports that it is still loading.
    pub reconnect_backoff_secs: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9391,
            cache_mode: true,
            reconnect_backoff_secs: 10,
        }
    }
}

/// Recurrence scheduler tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub enabled: bool,
    /// Seconds between schedule polls. Shorter intervals start due scans
    /// sooner at the price of more store traffic.
    pub poll_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 10,
        }
    }
}

/// Slave delegation tuning and the credential material pushed to slaves.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SlaveSettings {
    /// Seconds between polls of a delegated task.
    pub poll_interval_secs: u64,
    /// Seconds between reconnect attempts after a transient socket
    /// failure.
    pub reconnect_backoff_secs: u64,
    pub username: String,
    pub password: String,
    pub ssh_login: String,
    pub ssh_password: String,
    pub smb_login: String,
    pub smb_password: String,
}

impl Default for SlaveSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 25,
            reconnect_backoff_secs: 10,
            username: String::new(),
            password: String::new(),
            ssh_login: String::new(),
            ssh_password: String::new(),
            smb_login: String::new(),
            smb_password: String::new(),
        }
    }
}

/// Severity classification.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SeveritySettings {
    pub scheme: ClassificationScheme,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub scanner: ScannerSettings,
    pub scheduler: SchedulerSettings,
    pub slave: SlaveSettings,
    pub severity: SeveritySettings,
    /// Tracing filter directive, e.g. `info` or `vigil_core=debug,info`.
    pub log_filter: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DaemonConfig::default();
        assert_eq!(config.scanner.port, 9391);
        assert!(config.scheduler.enabled);
        assert_eq!(config.scheduler.poll_interval_secs, 10);
        assert_eq!(config.slave.poll_interval_secs, 25);
        assert_eq!(config.severity.scheme, ClassificationScheme::Nist);
    }

    #[test]
    fn partial_toml_fills_the_rest_with_defaults() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [scanner]
            host = "scanner.internal"

            [severity]
            scheme = "classic"
            "#,
        )
        .unwrap();
        assert_eq!(config.scanner.host, "scanner.internal");
        assert_eq!(config.scanner.port, 9391);
        assert_eq!(config.severity.scheme, ClassificationScheme::Classic);
    }
}
