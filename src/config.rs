/// Environment-driven configuration.
///
/// The binary is configured entirely through the environment:
///
/// - `RILL_CHANNEL`  — channel to join (case/`#` insensitive)
/// - `RILL_USERNAME` — bot login
/// - `RILL_TOKEN`    — OAuth access token, without the `oauth:` prefix
/// - `RILL_COMMANDS` — optional path to a JSON command list
///
/// Token acquisition and refresh are someone else's problem; the token
/// is consumed as an opaque string.
use std::path::Path;

use crate::bot::commands::{normalize_trigger, Command};
use crate::irc::client::ConnectParams;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("failed to read commands file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse commands file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub params: ConnectParams,
    pub commands_path: Option<String>,
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            params: ConnectParams {
                channel: require("RILL_CHANNEL")?,
                access_token: require("RILL_TOKEN")?,
                username: require("RILL_USERNAME")?,
            },
            commands_path: std::env::var("RILL_COMMANDS").ok(),
        })
    }
}

/// Load a command list from a JSON file: an array of
/// `{"trigger", "response", "enabled"?, "cooldown_ms"?}` objects.
///
/// Triggers are normalized on load and entries without an id get a
/// positional one, so the file doesn't have to carry either.
pub fn load_commands(path: impl AsRef<Path>) -> Result<Vec<Command>, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let mut commands: Vec<Command> = serde_json::from_str(&raw)?;
    for (idx, cmd) in commands.iter_mut().enumerate() {
        cmd.trigger = normalize_trigger(&cmd.trigger);
        if cmd.id.is_empty() {
            cmd.id = format!("cmd-{idx}");
        }
    }
    Ok(commands)
}
