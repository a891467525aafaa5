//! Configuration management for pairgate.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::ServerConfig;
use crate::cli::Args;
use crate::logging::LogFormat;
use crate::orchestrator::{OrchestratorConfig, ResumeConfig};
use crate::security::AuthConfig;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Security configuration.
    pub security: SecuritySection,
    /// Session orchestration limits and timeouts.
    pub orchestrator: OrchestratorSection,
    /// Durable session store.
    pub store: StoreSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            graceful_shutdown: true,
        }
    }
}

/// Security configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// Authentication settings.
    pub auth: AuthSection,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Enable authentication.
    pub enabled: bool,
    /// API keys.
    pub api_keys: Vec<String>,
}

/// Orchestrator configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// Maximum number of registered workers.
    pub max_sessions: usize,
    pub pairing_artifact_timeout_secs: u64,
    pub pairing_artifact_validity_secs: u64,
    pub pairing_window_secs: u64,
    pub phone_pairing_timeout_secs: u64,
    pub status_write_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    /// Restart previously connected sessions on startup.
    pub resume_enabled: bool,
    pub resume_settle_ms: u64,
    pub resume_stagger_ms: u64,
    pub resume_budget_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_sessions: 50,
            pairing_artifact_timeout_secs: 30,
            pairing_artifact_validity_secs: 20,
            pairing_window_secs: 180,
            phone_pairing_timeout_secs: 30,
            status_write_timeout_secs: 5,
            stop_timeout_secs: 10,
            resume_enabled: true,
            resume_settle_ms: 2000,
            resume_stagger_ms: 500,
            resume_budget_secs: 30,
        }
    }
}

/// Which session store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

/// Store configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: StoreBackend,
    /// SQLite connection URL.
    pub database_url: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            database_url: "sqlite://pairgate.db".to_string(),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter directive.
    pub level: String,
    /// Output format (compact or json).
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("PAIRGATE_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("PAIRGATE_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        if let Some(key) = var("PAIRGATE_API_KEY").filter(|k| !k.is_empty()) {
            self.add_api_key(key);
        }

        if let Some(url) = var("PAIRGATE_DATABASE_URL").filter(|u| !u.is_empty()) {
            self.store.backend = StoreBackend::Sqlite;
            self.store.database_url = url;
        }

        if let Some(max) = var("PAIRGATE_MAX_SESSIONS").and_then(|m| m.parse().ok()) {
            self.orchestrator.max_sessions = max;
        }

        if let Some(level) = var("PAIRGATE_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref key) = args.api_key {
            self.add_api_key(key.clone());
        }

        if args.no_auth {
            self.security.auth.enabled = false;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if let Some(ref url) = args.database {
            self.store.backend = StoreBackend::Sqlite;
            self.store.database_url = url.clone();
        }
        if args.memory_store {
            self.store.backend = StoreBackend::Memory;
        }

        if let Some(max) = args.max_sessions {
            self.orchestrator.max_sessions = max;
        }
        if args.no_resume {
            self.orchestrator.resume_enabled = false;
        }
    }

    fn add_api_key(&mut self, key: String) {
        self.security.auth.enabled = true;
        if !self.security.auth.api_keys.contains(&key) {
            self.security.auth.api_keys.push(key);
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env();
        config.apply_args(args);
        config.validate()?;

        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_sessions must be at least 1".into(),
            ));
        }
        if self.orchestrator.pairing_artifact_validity_secs == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.pairing_artifact_validity_secs must be at least 1".into(),
            ));
        }
        if self.security.auth.enabled && self.security.auth.api_keys.is_empty() {
            return Err(ConfigError::Invalid(
                "authentication is enabled but no API keys are configured".into(),
            ));
        }
        Ok(())
    }

    /// Convert to ServerConfig for the API server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        let auth = if self.security.auth.enabled {
            AuthConfig::default()
        } else {
            AuthConfig::disabled()
        };

        let mut server_config =
            ServerConfig::new(host.to_string(), self.server.port).with_auth(auth);
        for key in &self.security.auth.api_keys {
            server_config = server_config.with_api_key(key);
        }

        if !self.server.graceful_shutdown {
            server_config = server_config.without_graceful_shutdown();
        }

        Ok(server_config)
    }

    /// Runtime orchestrator settings.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let o = &self.orchestrator;
        OrchestratorConfig {
            max_sessions: o.max_sessions,
            pairing_artifact_timeout: Duration::from_secs(o.pairing_artifact_timeout_secs),
            pairing_artifact_validity: Duration::from_secs(o.pairing_artifact_validity_secs),
            pairing_window: Duration::from_secs(o.pairing_window_secs),
            phone_pairing_timeout: Duration::from_secs(o.phone_pairing_timeout_secs),
            status_write_timeout: Duration::from_secs(o.status_write_timeout_secs),
            stop_timeout: Duration::from_secs(o.stop_timeout_secs),
            resume: ResumeConfig {
                enabled: o.resume_enabled,
                settle: Duration::from_millis(o.resume_settle_ms),
                stagger: Duration::from_millis(o.resume_stagger_ms),
                budget: Duration::from_secs(o.resume_budget_secs),
            },
        }
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }

    pub fn log_format(&self) -> LogFormat {
        LogFormat::parse(&self.logging.format)
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
    /// A value outside its allowed range.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
            Self::Invalid(message) => write!(f, "invalid configuration: {}", message),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert!(!config.security.auth.enabled);
        assert_eq!(config.orchestrator.max_sessions, 50);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "server": {
                "host": "0.0.0.0",
                "port": 9090
            },
            "security": {
                "auth": {
                    "enabled": true,
                    "api_keys": ["key1", "key2"]
                }
            },
            "orchestrator": {
                "max_sessions": 5,
                "resume_enabled": false
            },
            "store": {
                "backend": "memory"
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9090);
        assert!(config.security.auth.enabled);
        assert_eq!(config.security.auth.api_keys.len(), 2);
        assert_eq!(config.orchestrator.max_sessions, 5);
        assert!(!config.orchestrator.resume_enabled);
        assert_eq!(config.orchestrator.pairing_window_secs, 180); // Default
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{
            "server": {
                "port": 9000
            }
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1"); // Default
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_apply_vars() {
        let vars: HashMap<&str, &str> = [
            ("PAIRGATE_PORT", "7000"),
            ("PAIRGATE_API_KEY", "env-key"),
            ("PAIRGATE_DATABASE_URL", "sqlite://other.db"),
            ("PAIRGATE_MAX_SESSIONS", "3"),
            ("RUST_LOG", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.store.backend = StoreBackend::Memory;
        config.apply_vars(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.server.port, 7000);
        assert!(config.security.auth.enabled);
        assert_eq!(config.security.auth.api_keys, vec!["env-key".to_string()]);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.database_url, "sqlite://other.db");
        assert_eq!(config.orchestrator.max_sessions, 3);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_vars(|name| match name {
            "PAIRGATE_PORT" => Some("not-a-port".into()),
            "PAIRGATE_MAX_SESSIONS" => Some("-1".into()),
            _ => None,
        });
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.orchestrator.max_sessions, 50);
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        let args = Args {
            host: Some("192.168.1.1".parse().unwrap()),
            port: Some(5000),
            api_key: Some("test-key".to_string()),
            memory_store: true,
            max_sessions: Some(7),
            no_resume: true,
            ..Args::default()
        };

        config.apply_args(&args);

        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 5000);
        assert!(config.security.auth.enabled);
        assert!(config
            .security
            .auth
            .api_keys
            .contains(&"test-key".to_string()));
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.orchestrator.max_sessions, 7);
        assert!(!config.orchestrator.resume_enabled);
    }

    #[test]
    fn test_args_without_host_keep_file_values() {
        let mut config = Config::default();
        config.server.host = "10.0.0.1".to_string();
        config.apply_args(&Args::default());
        assert_eq!(config.server.host, "10.0.0.1");
    }

    #[test]
    fn test_apply_no_auth() {
        let mut config = Config::default();
        config.security.auth.enabled = true;

        let args = Args {
            no_auth: true,
            ..Args::default()
        };

        config.apply_args(&args);
        assert!(!config.security.auth.enabled);
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.orchestrator.max_sessions = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.security.auth.enabled = true;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_to_server_config() {
        let config = Config::default();
        let server_config = config.to_server_config().unwrap();

        assert_eq!(server_config.host, "127.0.0.1");
        assert_eq!(server_config.port, 8080);
        assert!(!server_config.auth.enabled);
    }

    #[test]
    fn test_invalid_host() {
        let mut config = Config::default();
        config.server.host = "not-an-ip".to_string();

        let result = config.to_server_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_orchestrator_config() {
        let config = Config::default().orchestrator_config();
        assert_eq!(config.max_sessions, 50);
        assert_eq!(config.pairing_artifact_timeout, Duration::from_secs(30));
        assert_eq!(config.pairing_artifact_validity, Duration::from_secs(20));
        assert_eq!(config.stop_timeout, Duration::from_secs(10));
        assert_eq!(config.resume.settle, Duration::from_millis(2000));
        assert!(config.resume.enabled);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"host\""));
        assert!(json.contains("\"max_sessions\""));
        assert!(json.contains("\"sqlite\""));
    }
}
