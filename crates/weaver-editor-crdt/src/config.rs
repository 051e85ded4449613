//! Session configuration.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum ConfigError {
    /// An environment variable is set but cannot be parsed.
    #[error("invalid value {value:?} for {var}: {message}")]
    #[diagnostic(code(weaver::crdt::config::invalid_env))]
    InvalidEnv {
        var: &'static str,
        value: String,
        message: String,
    },
}

/// Collaboration session configuration.
///
/// Every field has a default, so partial JSON/TOML documents deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    /// Fixed CRDT peer id. Random when unset.
    pub peer_id: Option<u64>,
    /// Display name broadcast in presence.
    pub user_name: SmolStr,
    /// Cursor colour (RGBA). Picked from the palette by peer id when unset.
    pub user_color: Option<u32>,
    /// Presence entries not refreshed for this long are dropped.
    pub presence_timeout_ms: u64,
    /// Consecutive local commits closer than this merge into one undo step.
    pub undo_merge_interval_ms: i64,
    pub max_undo_steps: usize,
    /// Block inserted when remote changes leave the root empty.
    pub default_block_type: SmolStr,
    /// Per-type properties that stay local to each peer.
    pub excluded_properties: BTreeMap<SmolStr, Vec<SmolStr>>,
    /// Record sync traces in the debug context.
    pub debug: bool,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            user_name: SmolStr::new_static("Anonymous"),
            user_color: None,
            presence_timeout_ms: 30_000,
            undo_merge_interval_ms: 300,
            max_undo_steps: 100,
            default_block_type: SmolStr::new_static("paragraph"),
            excluded_properties: BTreeMap::new(),
            debug: false,
        }
    }
}

impl CollabConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Optional env vars:
    /// - `WEAVER_COLLAB_PEER_ID`: fixed peer id (u64)
    /// - `WEAVER_COLLAB_USER_NAME`: display name
    /// - `WEAVER_COLLAB_USER_COLOR`: RGBA colour as hex (e.g. `FF6B6BFF`)
    /// - `WEAVER_COLLAB_PRESENCE_TIMEOUT_MS`: presence expiry
    /// - `WEAVER_COLLAB_UNDO_MERGE_MS`: undo merge interval
    /// - `WEAVER_COLLAB_MAX_UNDO_STEPS`: undo stack depth
    /// - `WEAVER_COLLAB_DEFAULT_BLOCK`: block type used for root repair
    /// - `WEAVER_COLLAB_DEBUG`: `true` to record sync traces
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(peer_id) = parse_env("WEAVER_COLLAB_PEER_ID")? {
            config.peer_id = Some(peer_id);
        }
        if let Ok(name) = std::env::var("WEAVER_COLLAB_USER_NAME") {
            config.user_name = name.into();
        }
        if let Ok(color) = std::env::var("WEAVER_COLLAB_USER_COLOR") {
            let parsed = u32::from_str_radix(color.trim_start_matches('#'), 16).map_err(|e| {
                ConfigError::InvalidEnv {
                    var: "WEAVER_COLLAB_USER_COLOR",
                    value: color.clone(),
                    message: e.to_string(),
                }
            })?;
            config.user_color = Some(parsed);
        }
        if let Some(ms) = parse_env("WEAVER_COLLAB_PRESENCE_TIMEOUT_MS")? {
            config.presence_timeout_ms = ms;
        }
        if let Some(ms) = parse_env("WEAVER_COLLAB_UNDO_MERGE_MS")? {
            config.undo_merge_interval_ms = ms;
        }
        if let Some(steps) = parse_env("WEAVER_COLLAB_MAX_UNDO_STEPS")? {
            config.max_undo_steps = steps;
        }
        if let Ok(block) = std::env::var("WEAVER_COLLAB_DEFAULT_BLOCK") {
            config.default_block_type = block.into();
        }
        if let Some(debug) = parse_env("WEAVER_COLLAB_DEBUG")? {
            config.debug = debug;
        }

        Ok(config)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_millis(self.presence_timeout_ms)
    }
}

fn parse_env<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidEnv {
                var,
                message: e.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CollabConfig =
            serde_json::from_str(r#"{ "user_name": "ana", "max_undo_steps": 5 }"#).unwrap();
        assert_eq!(config.user_name, "ana");
        assert_eq!(config.max_undo_steps, 5);
        assert_eq!(config.presence_timeout(), Duration::from_secs(30));
        assert_eq!(config.default_block_type, "paragraph");
    }
}
