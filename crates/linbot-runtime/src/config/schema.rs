//! Configuration schema definitions.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8082
//! path = "/"
//!
//! [state]
//! path = "linbot-state.json"
//!
//! [api]
//! roster_timeout_ms = 5000
//! lookup_timeout_ms = 10000
//!
//! [dispatch]
//! fallback_reply = false
//!
//! [logging]
//! level = "info"
//! format = "compact"
//!
//! [plugins.system]
//! admins = [10001]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use linbot_core::ApiTimeouts;
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinbotConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Free-form per-group plugin sections.
    #[serde(default)]
    pub plugins: BTreeMap<String, serde_json::Value>,
}

impl LinbotConfig {
    /// The `plugins` table as one JSON object.
    pub fn plugins_value(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.plugins
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

// =============================================================================
// Server
// =============================================================================

/// Reverse WebSocket server the gateway connects to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_ws_path(),
        }
    }
}

impl ServerConfig {
    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_ws_path() -> String {
    "/".to_string()
}

// =============================================================================
// State / API / Dispatch
// =============================================================================

/// Where plugin and room toggles are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("linbot-state.json")
}

/// Deadlines for correlated API calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Friend / group list fetches.
    #[serde(default = "default_roster_timeout_ms")]
    pub roster_timeout_ms: u64,

    /// Single-entity lookups made by plugins.
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    /// Fetch the friend and group lists whenever the gateway connects.
    #[serde(default = "default_true")]
    pub fetch_roster_on_connect: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            roster_timeout_ms: default_roster_timeout_ms(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            fetch_roster_on_connect: true,
        }
    }
}

impl ApiConfig {
    pub fn timeouts(&self) -> ApiTimeouts {
        ApiTimeouts {
            roster: Duration::from_millis(self.roster_timeout_ms),
            lookup: Duration::from_millis(self.lookup_timeout_ms),
        }
    }
}

fn default_roster_timeout_ms() -> u64 {
    5000
}

fn default_lookup_timeout_ms() -> u64 {
    10000
}

fn default_true() -> bool {
    true
}

/// Dispatch behaviour outside of handlers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Acknowledge unhandled private messages with a pointer to `帮助`.
    #[serde(default)]
    pub fallback_reply: bool,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Log file rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of the call site.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-module level overrides, e.g. `linbot_core = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,
}
