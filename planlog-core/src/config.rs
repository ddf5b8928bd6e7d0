//! Configuration types for planlog

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PlanlogError, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct PlanlogConfig {
    /// Event log location and index checks
    pub log: LogConfig,

    /// Tailing server
    pub server: ServerConfig,

    /// Replay history
    pub replay: ReplayConfig,
}

/// Event log configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Basename of the log; files are `<basename>-events.log` and
    /// `<basename>-index.log`
    pub basename: PathBuf,

    /// Index entries compared with the event file when opening a log
    pub index_sample_count: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            basename: PathBuf::from("planlog"),
            index_sample_count: crate::log::DEFAULT_INDEX_SAMPLES,
        }
    }
}

/// Tailing server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind_address: IpAddr,

    /// Port to listen on, 0 for an ephemeral port
    pub port: u16,

    /// How often the event file is polled for new bytes
    #[serde(with = "humantime_serde")]
    pub sampling_period: Duration,

    /// Largest chunk queued for, and written to, one client
    pub max_chunk_size: usize,

    /// Queued bytes after which a client is disconnected
    pub max_pending_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 20200,
            sampling_period: Duration::from_millis(50),
            max_chunk_size: 16 * 1024,
            max_pending_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Replay configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ReplayConfig {
    /// Snapshots kept in history, oldest evicted first (unbounded if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_snapshots: Option<usize>,
}

/// Builder for PlanlogConfig
pub struct ConfigBuilder {
    config: PlanlogConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: PlanlogConfig::default(),
        }
    }

    /// Set the log basename
    pub fn basename(mut self, basename: impl Into<PathBuf>) -> Self {
        self.config.log.basename = basename.into();
        self
    }

    /// Set log configuration
    pub fn log(mut self, config: LogConfig) -> Self {
        self.config.log = config;
        self
    }

    /// Set server configuration
    pub fn server(mut self, config: ServerConfig) -> Self {
        self.config.server = config;
        self
    }

    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Set the server sampling period
    pub fn sampling_period(mut self, period: Duration) -> Self {
        self.config.server.sampling_period = period;
        self
    }

    /// Set replay configuration
    pub fn replay(mut self, config: ReplayConfig) -> Self {
        self.config.replay = config;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<PlanlogConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanlogConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `planlog.toml` in the working directory
    /// 3. The file named by `PLANLOG_CONFIG_PATH`
    /// 4. `PLANLOG_`-prefixed environment variables, `__` separating
    ///    sections (`PLANLOG_SERVER__PORT=9000`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(PlanlogConfig::default()))
            .merge(Toml::file("planlog.toml"));

        if let Ok(path) = std::env::var("PLANLOG_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("PLANLOG_").ignore(&["config_path"]).split("__"));

        let config: PlanlogConfig = figment.extract().map_err(|e| {
            PlanlogError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: PlanlogConfig = Figment::from(Serialized::defaults(PlanlogConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()
            .map_err(|e| {
                PlanlogError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.max_chunk_size == 0 {
            return Err(PlanlogError::Configuration(
                "server.max_chunk_size must be positive".to_string(),
            ));
        }
        if server.sampling_period.is_zero() {
            return Err(PlanlogError::Configuration(
                "server.sampling_period must be positive".to_string(),
            ));
        }
        if server.max_pending_bytes < server.max_chunk_size {
            return Err(PlanlogError::Configuration(format!(
                "server.max_pending_bytes ({}) is smaller than one chunk ({})",
                server.max_pending_bytes, server.max_chunk_size
            )));
        }
        if self.replay.max_snapshots == Some(0) {
            return Err(PlanlogError::Configuration(
                "replay.max_snapshots must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PlanlogConfig::default();
        assert_eq!(config.server.port, 20200);
        assert_eq!(config.server.sampling_period, Duration::from_millis(50));
        assert_eq!(config.server.max_chunk_size, 16 * 1024);
        assert_eq!(config.log.index_sample_count, 8);
        assert!(config.replay.max_snapshots.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[log]
basename = "/var/log/robot/run"

[server]
port = 9100
sampling_period = "200ms"

[replay]
max_snapshots = 32
"#
        )
        .unwrap();

        let config = PlanlogConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log.basename, PathBuf::from("/var/log/robot/run"));
        assert_eq!(config.log.index_sample_count, 8);
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.sampling_period, Duration::from_millis(200));
        assert_eq!(config.server.max_chunk_size, 16 * 1024);
        assert_eq!(config.replay.max_snapshots, Some(32));
    }

    #[test]
    fn test_invalid_file_is_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = \"not a port\"").unwrap();
        assert!(matches!(
            PlanlogConfig::from_file(file.path()),
            Err(PlanlogError::Configuration(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = PlanlogConfig::default();
        config.server.max_chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = PlanlogConfig::default();
        config.server.sampling_period = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = PlanlogConfig::default();
        config.server.max_pending_bytes = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = ConfigBuilder::new()
            .basename("run")
            .port(0)
            .sampling_period(Duration::from_millis(10))
            .build()
            .unwrap();
        assert_eq!(config.log.basename, PathBuf::from("run"));
        assert_eq!(config.server.port, 0);

        assert!(
            ConfigBuilder::new()
                .sampling_period(Duration::ZERO)
                .build()
                .is_err()
        );
    }
}
