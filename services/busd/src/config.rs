//! Server configuration loading.
//!
//! TOML is the sole config source. A missing config file is not an error —
//! the server runs with defaults and the Discord divert disabled. Command
//! line flags take precedence over file values.
//!
//! # Keys
//! - `[server] bind`, `port`, `api_port` — optional listener overrides.
//! - `[discord] discord_webhook` — outbound webhook URL; empty or missing
//!   disables the divert.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Default bus bind address.
pub const DEFAULT_BIND: &str = "10.244.244.99";
/// Default bus port. The admin API defaults to this plus 1000.
pub const DEFAULT_PORT: u16 = 8082;

/// Validated server configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub api_port: Option<u16>,
    /// Outbound webhook endpoint for the "discord" broadcast divert.
    pub discord_webhook: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    server: Option<RawServer>,
    discord: Option<RawDiscord>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    bind: Option<String>,
    port: Option<u16>,
    api_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawDiscord {
    discord_webhook: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load configuration from `path`. A nonexistent file yields the default
/// config; any other read or parse failure is an error.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let toml_str = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.display().to_string(),
                source: e,
            });
        }
    };
    load_config_from_str(&toml_str)
}

/// Load configuration from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let (bind, port, api_port) = match raw.server {
        Some(s) => (s.bind, s.port, s.api_port),
        None => (None, None, None),
    };

    // An empty webhook string means "not configured".
    let discord_webhook = raw
        .discord
        .and_then(|d| d.discord_webhook)
        .filter(|url| !url.trim().is_empty());

    Ok(Config {
        bind,
        port,
        api_port,
        discord_webhook,
    })
}
