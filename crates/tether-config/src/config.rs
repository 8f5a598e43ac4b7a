//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the config file inside the config directory.
const CONFIG_FILE: &str = "config.ron";

/// Largest accepted reconnect backoff multiplier.
const MAX_BACKOFF_MULTIPLIER: f64 = 16.0;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Server endpoint and login identity.
    pub network: NetworkConfig,
    /// Liveness window, request timeouts and readiness polling.
    pub session: SessionConfig,
    /// Backoff used when re-establishing a lost connection.
    pub reconnect: ReconnectConfig,
    /// Diagnostics and event log settings.
    pub log: LogConfig,
}

/// Server endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server host name or IP address.
    pub server_address: String,
    /// Server port.
    pub server_port: u16,
    /// Name sent in the login frame.
    pub identity: String,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

/// Session timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Heartbeat window in milliseconds. Silence longer than this resets the connection.
    pub heartbeat_window_ms: u64,
    /// Age in milliseconds after which a pending request times out.
    pub request_timeout_ms: u64,
    /// How long a login waits for its acknowledgment, in milliseconds.
    pub login_timeout_ms: u64,
    /// Spacing of readiness polls while a reset is in progress, in milliseconds.
    pub ready_poll_interval_ms: u64,
    /// Number of readiness polls before a request gives up during a reset.
    pub ready_poll_attempts: u32,
    /// Largest inbound record accepted by the decoder, in bytes.
    pub max_record_len: usize,
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the second reconnect attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on the delay between attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Give up after this many attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Jitter factor (0.0 - 1.0), applied as +/- jitter to each delay.
    pub jitter: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (e.g., "debug", "info", "warn,tether_net=debug").
    pub log_level: String,
    /// Event log file. Relative paths resolve against the data directory.
    pub event_log_file: PathBuf,
    /// Also write structured JSON diagnostics to the log directory.
    pub file_logging: bool,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 8124,
            identity: "tether".to_string(),
            connect_timeout_ms: 3000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_window_ms: 2000,
            request_timeout_ms: 5000,
            login_timeout_ms: 5000,
            ready_poll_interval_ms: 1000,
            ready_poll_attempts: 5,
            max_record_len: 1_048_576,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            backoff_multiplier: 2.0,
            max_delay_ms: 5000,
            max_attempts: None,
            jitter: 0.25,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            event_log_file: PathBuf::from("events.log"),
            file_logging: false,
        }
    }
}

impl NetworkConfig {
    /// `host:port` string suitable for `TcpStream::connect`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server_address, self.server_port)
    }
}

// --- Persistence ---

impl Config {
    /// Read `config.ron` from `config_dir`, writing the defaults there first
    /// when the file does not exist yet. The loaded settings are validated.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }

        let config = read_config(&path)?;
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write the config to `config_dir/config.ron`, creating the directory.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .struct_names(false);
        let text = ron::ser::to_string_pretty(self, pretty)?;

        let path = config_dir.join(CONFIG_FILE);
        std::fs::write(&path, text).map_err(|source| ConfigError::Write { path, source })
    }

    /// Re-read the file. Returns the new settings only when they differ from
    /// `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = read_config(&config_dir.join(CONFIG_FILE))?;
        if fresh == *self {
            return Ok(None);
        }
        fresh.validate()?;
        log::info!("Config changed on disk");
        Ok(Some(fresh))
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });
        if self.network.server_address.trim().is_empty() {
            return invalid("network.server_address", "must not be empty");
        }
        if self.network.identity.trim().is_empty() {
            return invalid("network.identity", "must not be empty");
        }
        if self.session.heartbeat_window_ms == 0 {
            return invalid("session.heartbeat_window_ms", "must be positive");
        }
        if self.session.request_timeout_ms == 0 {
            return invalid("session.request_timeout_ms", "must be positive");
        }
        if self.session.max_record_len == 0 {
            return invalid("session.max_record_len", "must be positive");
        }
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.reconnect.backoff_multiplier) {
            return invalid("reconnect.backoff_multiplier", "must be between 1.0 and 16.0");
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return invalid("reconnect.initial_delay_ms", "must not exceed max_delay_ms");
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return invalid("reconnect.jitter", "must be between 0.0 and 1.0");
        }
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    ron::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
