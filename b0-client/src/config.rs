//! Configuration system for the B0 client.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/b0/config.toml`)
//! 4. Compiled defaults
//!
//! A missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use b0_proto::ids::{Conversation, DmRoomId, RoomId};

use crate::session::{ReconnectPolicy, SessionConfig};

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
    api: ApiFileConfig,
    session: SessionFileConfig,
}

/// `[api]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ApiFileConfig {
    rest_url: Option<String>,
    socket_url: Option<String>,
    token: Option<String>,
    connect_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    send_timeout_secs: Option<u64>,
    page_size: Option<usize>,
    reconnect_attempts: Option<u32>,
    reconnect_initial_delay_secs: Option<u64>,
    reconnect_max_delay_secs: Option<u64>,
    notice_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST API base URL.
    pub rest_url: Option<String>,
    /// Socket endpoint URL (`ws://` or `wss://`).
    pub socket_url: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
    /// Group room to join.
    pub room_id: Option<String>,
    /// DM room to join.
    pub dm_room_id: Option<String>,
    /// Socket connect handshake timeout.
    pub connect_timeout: Duration,
    /// Session tunables.
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rest_url: None,
            socket_url: None,
            token: None,
            room_id: None,
            dm_room_id: None,
            connect_timeout: Duration::from_secs(10),
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicitly-given config file cannot
    /// be read, or if the file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Separated from `load()` to enable
    /// unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let session_defaults = SessionConfig::default();
        let reconnect_defaults = ReconnectPolicy::default();

        Self {
            rest_url: cli.rest_url.clone().or_else(|| file.api.rest_url.clone()),
            socket_url: cli
                .socket_url
                .clone()
                .or_else(|| file.api.socket_url.clone()),
            token: cli.token.clone().or_else(|| file.api.token.clone()),
            room_id: cli.room.clone(),
            dm_room_id: cli.dm.clone(),
            connect_timeout: file
                .api
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            session: SessionConfig {
                send_timeout: file
                    .session
                    .send_timeout_secs
                    .map_or(session_defaults.send_timeout, Duration::from_secs),
                page_size: file.session.page_size.unwrap_or(session_defaults.page_size),
                reconnect: ReconnectPolicy {
                    max_attempts: file
                        .session
                        .reconnect_attempts
                        .unwrap_or(reconnect_defaults.max_attempts),
                    initial_delay: file
                        .session
                        .reconnect_initial_delay_secs
                        .map_or(reconnect_defaults.initial_delay, Duration::from_secs),
                    max_delay: file
                        .session
                        .reconnect_max_delay_secs
                        .map_or(reconnect_defaults.max_delay, Duration::from_secs),
                },
                notice_buffer: file
                    .session
                    .notice_buffer
                    .unwrap_or(session_defaults.notice_buffer),
            },
        }
    }

    /// The conversation selected by `--room` / `--dm`, if any.
    #[must_use]
    pub fn conversation(&self) -> Option<Conversation> {
        if let Some(room_id) = &self.room_id {
            return Some(Conversation::Room(RoomId::new(room_id.as_str())));
        }
        self.dm_room_id
            .as_ref()
            .map(|dm_room_id| Conversation::Dm(DmRoomId::new(dm_room_id.as_str())))
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "B0 chat client")]
pub struct CliArgs {
    /// REST API base URL.
    #[arg(long, env = "B0_REST_URL")]
    pub rest_url: Option<String>,

    /// Socket endpoint URL (ws:// or wss://).
    #[arg(long, env = "B0_SOCKET_URL")]
    pub socket_url: Option<String>,

    /// Bearer token for the signed-in user.
    #[arg(long, env = "B0_TOKEN")]
    pub token: Option<String>,

    /// Group room to join.
    #[arg(long, conflicts_with = "dm")]
    pub room: Option<String>,

    /// DM room to join.
    #[arg(long)]
    pub dm: Option<String>,

    /// Path to config file (default: `~/.config/b0/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "B0_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/b0-chat.log`).
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
        config_dir.join("b0").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
