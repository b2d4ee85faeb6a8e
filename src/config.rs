//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `SCENEWIRE_LISTEN`, `SCENEWIRE_AGENT_URL`,
//!    `SCENEWIRE_SPEECH_URL`
//! 2. **Config file**: path via `--config <path>`, or `scenewire.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8765"
//! ws_path = "/ws"
//! shutdown_grace_ms = 2000
//!
//! [session]
//! inbound_capacity = 0          # 0 = unbounded
//! outbound_capacity = 0         # 0 = unbounded
//! agent_token_timeout_ms = 0    # 0 = wait forever
//! close_timeout_ms = 2000       # bound on closing the connection
//!
//! # Omit `url` to start without an agent (chat requests then fail fast)
//! [agent]
//! url = "http://127.0.0.1:9000/chat"
//! request_timeout_ms = 0
//!
//! # Omit `url` to disable voice input
//! [speech]
//! url = "http://127.0.0.1:9000/transcribe"
//! timeout_ms = 30000
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8765`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Path of the WebSocket endpoint (default `/ws`).
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// How long shutdown waits for session tasks to wind down (default 2000).
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Per-session queue and timeout policy.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Max queued chat requests per session. 0 = unbounded.
    #[serde(default)]
    pub inbound_capacity: usize,
    /// Max queued responses per session. 0 = unbounded.
    #[serde(default)]
    pub outbound_capacity: usize,
    /// Max wait for each agent token in milliseconds. 0 = no limit.
    #[serde(default)]
    pub agent_token_timeout_ms: u64,
    /// Max wait for the connection to close when a session ends (default 2000).
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

/// Agent binding settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    /// NDJSON streaming chat endpoint. Override with `SCENEWIRE_AGENT_URL`.
    pub url: Option<String>,
    /// Overall timeout per chat request in milliseconds. 0 = no limit.
    #[serde(default)]
    pub request_timeout_ms: u64,
}

/// Speech-to-text settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    /// Transcription endpoint. Override with `SCENEWIRE_SPEECH_URL`.
    pub url: Option<String>,
    /// Request timeout in milliseconds (default 30 000).
    #[serde(default = "default_speech_timeout_ms")]
    pub timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_listen() -> String {
    "0.0.0.0:8765".to_string()
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_shutdown_grace_ms() -> u64 {
    2000
}
fn default_close_timeout_ms() -> u64 {
    2000
}
fn default_speech_timeout_ms() -> u64 {
    30_000
}
fn default_log_level() -> String {
    "info".to_string()
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ws_path: default_ws_path(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 0,
            outbound_capacity: 0,
            agent_token_timeout_ms: 0,
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_speech_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        millis(self.request_timeout_ms)
    }
}

impl SessionConfig {
    pub fn agent_token_timeout(&self) -> Option<Duration> {
        millis(self.agent_token_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise looks for
    /// `scenewire.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new("scenewire.toml").exists() => Self::from_file("scenewire.toml")?,
            None => Self::default(),
        };

        if let Ok(listen) = std::env::var("SCENEWIRE_LISTEN") {
            config.server.listen = listen;
        }
        if let Ok(url) = std::env::var("SCENEWIRE_AGENT_URL") {
            config.agent.url = Some(url);
        }
        if let Ok(url) = std::env::var("SCENEWIRE_SPEECH_URL") {
            config.speech.url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the router or listener cannot use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "server.listen {:?} is not a socket address",
                self.server.listen
            )));
        }
        let path = &self.server.ws_path;
        if !path.starts_with('/') || path.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "server.ws_path {path:?} must be an absolute path"
            )));
        }
        if path.starts_with("/api/") {
            return Err(ConfigError::Invalid(format!(
                "server.ws_path {path:?} collides with the /api namespace"
            )));
        }
        Ok(())
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
