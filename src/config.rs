//! Dispatcher configuration.

use crate::adapter::Deadline;
use crate::engine::ClientCert;
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// APNs endpoint and credential.
    #[serde(default)]
    pub apns: ApnsConfig,

    /// Transfer engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Event loop settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.dispatcher;
        if d.deadline_floor_ms > d.deadline_ceiling_ms {
            return Err(ConfigError::Invalid(format!(
                "deadline_floor_ms ({}) must not exceed deadline_ceiling_ms ({})",
                d.deadline_floor_ms, d.deadline_ceiling_ms
            )));
        }
        if d.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        if self.engine.max_host_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_host_connections must be greater than zero".to_string(),
            ));
        }
        if self.engine.max_streams_per_connection == 0 {
            return Err(ConfigError::Invalid(
                "max_streams_per_connection must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// APNs environment, selecting the default host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    pub fn host(&self) -> &'static str {
        match self {
            Environment::Production => "api.push.apple.com",
            Environment::Development => "api.development.push.apple.com",
        }
    }
}

/// APNs endpoint and credential.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApnsConfig {
    #[serde(default)]
    pub environment: Environment,

    /// Explicit host (and optional port), overriding the environment.
    pub host: Option<String>,

    /// Sent as the `apns-topic` header, usually the app bundle id.
    pub topic: Option<String>,

    /// Sent as the `apns-push-type` header.
    pub push_type: Option<String>,

    /// Sent as the `apns-priority` header.
    pub priority: Option<u8>,

    /// PEM file with the client certificate and key.
    pub cert: Option<PathBuf>,

    pub cert_password: Option<String>,
}

impl ApnsConfig {
    pub fn host(&self) -> &str {
        self.host
            .as_deref()
            .unwrap_or_else(|| self.environment.host())
    }

    pub fn client_cert(&self) -> Option<Arc<ClientCert>> {
        self.cert.as_ref().map(|path| {
            Arc::new(ClientCert {
                path: path.clone(),
                password: self.cert_password.clone(),
            })
        })
    }

    /// Headers attached to every request.
    pub fn headers(&self) -> Vec<String> {
        let mut headers = Vec::new();
        if let Some(topic) = &self.topic {
            headers.push(format!("apns-topic: {topic}"));
        }
        if let Some(push_type) = &self.push_type {
            headers.push(format!("apns-push-type: {push_type}"));
        }
        if let Some(priority) = self.priority {
            headers.push(format!("apns-priority: {priority}"));
        }
        headers
    }
}

/// Transfer engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum connections opened to one host.
    #[serde(default = "EngineConfig::default_max_host_connections")]
    pub max_host_connections: usize,

    /// Maximum concurrent HTTP/2 streams multiplexed on one connection.
    #[serde(default = "EngineConfig::default_max_streams_per_connection")]
    pub max_streams_per_connection: usize,

    /// Negotiate HTTP/2.
    #[serde(default = "EngineConfig::default_true")]
    pub http2: bool,

    /// Wait for a multiplexable connection rather than opening a new one.
    #[serde(default = "EngineConfig::default_true")]
    pub pipewait: bool,

    /// Connection timeout in milliseconds.
    #[serde(default = "EngineConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Whole-transfer timeout in milliseconds. Zero disables it.
    #[serde(default = "EngineConfig::default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,

    /// Route libcurl's verbose output to trace-level log events.
    #[serde(default)]
    pub verbose: bool,

    /// Extra request headers, in addition to those derived from `[apns]`.
    #[serde(default)]
    pub headers: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_host_connections: Self::default_max_host_connections(),
            max_streams_per_connection: Self::default_max_streams_per_connection(),
            http2: true,
            pipewait: true,
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            transfer_timeout_ms: Self::default_transfer_timeout_ms(),
            verbose: false,
            headers: Vec::new(),
        }
    }
}

impl EngineConfig {
    fn default_max_host_connections() -> usize {
        50
    }

    fn default_max_streams_per_connection() -> usize {
        30
    }

    fn default_true() -> bool {
        true
    }

    fn default_connect_timeout_ms() -> u64 {
        5000
    }

    fn default_transfer_timeout_ms() -> u64 {
        30_000
    }
}

/// Event loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Shortest wait, applied even when the engine asks for less.
    #[serde(default = "DispatcherConfig::default_deadline_floor_ms")]
    pub deadline_floor_ms: u64,

    /// Longest wait, applied when the engine has no timer or asks for more.
    #[serde(default = "DispatcherConfig::default_deadline_ceiling_ms")]
    pub deadline_ceiling_ms: u64,

    /// Wait used before the engine has reported any deadline.
    #[serde(default = "DispatcherConfig::default_initial_deadline_ms")]
    pub initial_deadline_ms: u64,

    /// Readiness events fetched per wait.
    #[serde(default = "DispatcherConfig::default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            deadline_floor_ms: Self::default_deadline_floor_ms(),
            deadline_ceiling_ms: Self::default_deadline_ceiling_ms(),
            initial_deadline_ms: Self::default_initial_deadline_ms(),
            event_capacity: Self::default_event_capacity(),
        }
    }
}

impl DispatcherConfig {
    fn default_deadline_floor_ms() -> u64 {
        10
    }

    fn default_deadline_ceiling_ms() -> u64 {
        1000
    }

    fn default_initial_deadline_ms() -> u64 {
        1000
    }

    fn default_event_capacity() -> usize {
        1024
    }

    pub fn deadline(&self) -> Deadline {
        Deadline::new(
            Duration::from_millis(self.deadline_floor_ms),
            Duration::from_millis(self.deadline_ceiling_ms),
            Duration::from_millis(self.initial_deadline_ms),
        )
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Log format: "pretty", "json", or "compact".
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps in log lines.
    #[serde(default = "LoggingConfig::default_timestamps")]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: LogFormat::default(),
            timestamps: Self::default_timestamps(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_timestamps() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.apns.host(), "api.push.apple.com");
        assert_eq!(config.engine.max_host_connections, 50);
        assert_eq!(config.engine.max_streams_per_connection, 30);
        assert!(config.engine.http2);
        assert!(config.engine.pipewait);
        assert_eq!(config.dispatcher.deadline_floor_ms, 10);
        assert_eq!(config.dispatcher.deadline_ceiling_ms, 1000);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.apns.client_cert().is_none());
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            [apns]
            environment = "development"
            topic = "com.example.app"
            push_type = "alert"
            priority = 10
            cert = "/etc/apns/cert.pem"
            cert_password = "secret"

            [engine]
            max_host_connections = 4
            max_streams_per_connection = 100
            http2 = false
            headers = ["x-trace: 1"]

            [dispatcher]
            deadline_floor_ms = 5
            deadline_ceiling_ms = 200
            event_capacity = 64

            [logging]
            level = "debug"
            format = "json"
            timestamps = false
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.apns.host(), "api.development.push.apple.com");
        assert_eq!(
            config.apns.headers(),
            vec![
                "apns-topic: com.example.app".to_string(),
                "apns-push-type: alert".to_string(),
                "apns-priority: 10".to_string(),
            ]
        );
        let cert = config.apns.client_cert().unwrap();
        assert_eq!(cert.path, PathBuf::from("/etc/apns/cert.pem"));
        assert_eq!(cert.password.as_deref(), Some("secret"));
        assert!(!config.engine.http2);
        assert_eq!(config.dispatcher.event_capacity, 64);
        assert_eq!(config.logging.format, LogFormat::Json);

        let deadline = config.dispatcher.deadline();
        assert_eq!(deadline.floor(), Duration::from_millis(5));
        assert_eq!(deadline.ceiling(), Duration::from_millis(200));
        assert_eq!(deadline.current(), Duration::from_millis(200));
    }

    #[test]
    fn test_host_override() {
        let config: Config = toml::from_str(
            r#"
            [apns]
            host = "127.0.0.1:8443"
            "#,
        )
        .unwrap();
        assert_eq!(config.apns.host(), "127.0.0.1:8443");
    }

    #[test]
    fn test_validate_rejects_inverted_deadline() {
        let config: Config = toml::from_str(
            r#"
            [dispatcher]
            deadline_floor_ms = 500
            deadline_ceiling_ms = 100
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut config = Config::default();
        config.engine.max_host_connections = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dispatcher.event_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_environment_is_rejected() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [apns]
            environment = "staging"
            "#,
        );
        assert!(result.is_err());
    }
}
