//! Optional TOML configuration.
//!
//! ```toml
//! [websocket]
//! connect_timeout_ms = 10000
//! send_timeout_ms = 5000
//! shutdown_timeout_ms = 1000
//! event_queue_capacity = 256
//! log_capacity = 5000
//! input_limit = 240
//!
//! [http]
//! request_timeout_ms = 30000
//!
//! [logging]
//! level = "debug"
//! file = "/tmp/hulaki.log"
//! ```
//!
//! Every key is optional; missing keys take the defaults shown above
//! (`log_capacity` and `file` default to unset).

use crate::application::session::SessionSettings;
use crate::infrastructure::websocket::WebSocketSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "HULAKI_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub websocket: WebSocketConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub event_queue_capacity: usize,
    pub log_capacity: Option<usize>,
    pub input_limit: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            send_timeout_ms: 5_000,
            shutdown_timeout_ms: 1_000,
            event_queue_capacity: 256,
            log_capacity: None,
            input_limit: 240,
        }
    }
}

impl WebSocketConfig {
    pub fn connection_settings(&self) -> WebSocketSettings {
        WebSocketSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            input_limit: self.input_limit,
            log_capacity: self.log_capacity,
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }

    /// Capacity of the session event queue, never zero
    pub fn queue_capacity(&self) -> usize {
        self.event_queue_capacity.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub request_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { request_timeout_ms: 30_000 }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn".to_string(), file: None }
    }
}

impl Config {
    /// Loads `path` if given, else the file named by `HULAKI_CONFIG`, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(env_path) if !env_path.is_empty() => Self::from_file(Path::new(&env_path)),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
