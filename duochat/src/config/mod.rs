//! Configuration system for the `DuoChat` client.
//!
//! Supports layered configuration with the following priority (highest
//! first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/duochat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use duochat_proto::identity::UserId;

use crate::notify::NotifyConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    identity: IdentityFileConfig,
    notify: NotifyFileConfig,
    channel: ChannelFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    http_base: Option<String>,
    ws_base: Option<String>,
}

/// `[identity]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    username: Option<String>,
}

/// `[notify]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NotifyFileConfig {
    retry_delay_secs: Option<u64>,
    jitter_ms: Option<u64>,
    event_buffer: Option<usize>,
}

/// `[channel]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChannelFileConfig {
    connect_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Base URL of the HTTP collaborators (directory, history, upload).
    pub http_base: Option<String>,
    /// Base URL of the WebSocket endpoints. Derived from `http_base` by
    /// swapping the scheme when not set explicitly.
    pub ws_base: Option<String>,

    // -- Identity --
    /// The local username, as assigned at login.
    pub username: Option<String>,

    // -- Notify --
    /// Delay between notification-channel reconnect attempts.
    pub notify_retry_delay: Duration,
    /// Upper bound of the random jitter added to the reconnect delay.
    pub notify_jitter: Duration,
    /// Capacity of the unread-event queue.
    pub notify_event_buffer: usize,

    // -- Channel --
    /// Timeout for establishing a channel connection.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_base: None,
            ws_base: None,
            username: None,
            notify_retry_delay: Duration::from_secs(3),
            notify_jitter: Duration::from_millis(250),
            notify_event_buffer: 64,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// The resolved endpoints a client instance talks to.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Base URL of the HTTP collaborators.
    pub http_base: url::Url,
    /// Base URL of the WebSocket endpoints.
    pub ws_base: url::Url,
    /// The local identity.
    pub username: UserId,
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. If no `--config` is given, the default path
    /// (`~/.config/duochat/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            http_base: cli
                .server
                .clone()
                .or_else(|| file.server.http_base.clone()),
            ws_base: cli.ws_url.clone().or_else(|| file.server.ws_base.clone()),
            username: cli
                .username
                .clone()
                .or_else(|| file.identity.username.clone()),
            notify_retry_delay: file
                .notify
                .retry_delay_secs
                .map_or(defaults.notify_retry_delay, Duration::from_secs),
            notify_jitter: file
                .notify
                .jitter_ms
                .map_or(defaults.notify_jitter, Duration::from_millis),
            notify_event_buffer: file
                .notify
                .event_buffer
                .unwrap_or(defaults.notify_event_buffer),
            connect_timeout: file
                .channel
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
        }
    }

    /// Builds the endpoint set, if the required fields are present and
    /// parse as URLs.
    ///
    /// The WebSocket base falls back to `http_base` with the scheme
    /// swapped (`http` → `ws`, `https` → `wss`).
    #[must_use]
    pub fn to_endpoints(&self) -> Option<Endpoints> {
        let username = self.username.as_deref()?;
        if username.is_empty() {
            return None;
        }
        let http_base = url::Url::parse(self.http_base.as_deref()?).ok()?;
        let ws_base = match self.ws_base.as_deref() {
            Some(raw) => url::Url::parse(raw).ok()?,
            None => derive_ws_base(&http_base)?,
        };

        Some(Endpoints {
            http_base,
            ws_base,
            username: UserId::new(username),
        })
    }

    /// Builds the notification tracker configuration.
    #[must_use]
    pub const fn to_notify_config(&self) -> NotifyConfig {
        NotifyConfig {
            retry_delay: self.notify_retry_delay,
            jitter: self.notify_jitter,
            event_buffer: self.notify_event_buffer,
        }
    }
}

/// Swaps an HTTP base URL's scheme to its WebSocket counterpart.
fn derive_ws_base(http_base: &url::Url) -> Option<url::Url> {
    let scheme = match http_base.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => return None,
    };
    let mut ws = http_base.clone();
    ws.set_scheme(scheme).ok()?;
    Some(ws)
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "One-to-one messaging client")]
pub struct CliArgs {
    /// Base URL of the chat server's HTTP endpoints.
    #[arg(long, env = "DUOCHAT_SERVER")]
    pub server: Option<String>,

    /// Base URL of the WebSocket endpoints (default: derived from --server).
    #[arg(long, env = "DUOCHAT_WS_URL")]
    pub ws_url: Option<String>,

    /// Your username, as assigned at login.
    #[arg(short, long, env = "DUOCHAT_USER")]
    pub username: Option<String>,

    /// Path to config file (default: `~/.config/duochat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "DUOCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: stderr).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and a missing
/// file is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available — use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("duochat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
