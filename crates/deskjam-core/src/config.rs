//! Sync configuration loaded from JSON or environment variables.

use crate::shapes::SerializableColor;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAP_NAME: &str = "canvasObjects";
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:3030/ws";
pub const DEFAULT_ROOM: &str = "design-desk-jam";
pub const DEFAULT_PRESENCE_THROTTLE_MS: u64 = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How local changes are written to the shared map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Clear the map and write every drawable on each publish.
    #[default]
    FullSnapshot,
    /// Write changed keys and delete vanished ones.
    Incremental,
}

impl std::str::FromStr for SyncMode {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "full_snapshot" | "full" => Ok(SyncMode::FullSnapshot),
            "incremental" => Ok(SyncMode::Incremental),
            other => Err(ConfigError::Parse(format!(
                "unknown sync mode '{other}' (expected 'full_snapshot' or 'incremental')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Shared map holding the drawables.
    pub map_name: String,
    pub sync_mode: SyncMode,
    pub presence_throttle_ms: u64,
    /// Id namespace. Unset derives it from the connection id; empty disables it.
    pub id_namespace: Option<String>,
    pub relay_url: String,
    pub room: String,
    pub user_name: Option<String>,
    pub user_color: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            map_name: DEFAULT_MAP_NAME.to_string(),
            sync_mode: SyncMode::default(),
            presence_throttle_ms: DEFAULT_PRESENCE_THROTTLE_MS,
            id_namespace: None,
            relay_url: DEFAULT_RELAY_URL.to_string(),
            room: DEFAULT_ROOM.to_string(),
            user_name: None,
            user_color: None,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Build from environment variables.
    ///
    /// Optional:
    /// - `DESKJAM_ROOM`
    /// - `DESKJAM_RELAY_URL`
    /// - `DESKJAM_SYNC_MODE`: `full_snapshot` (default) or `incremental`
    /// - `DESKJAM_PRESENCE_THROTTLE_MS`: default 16
    /// - `DESKJAM_ID_NAMESPACE`
    /// - `DESKJAM_USER_NAME`, `DESKJAM_USER_COLOR`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(room) = lookup("DESKJAM_ROOM") {
            config.room = room;
        }
        if let Some(url) = lookup("DESKJAM_RELAY_URL") {
            config.relay_url = url;
        }
        if let Some(mode) = lookup("DESKJAM_SYNC_MODE") {
            config.sync_mode = mode.parse()?;
        }
        if let Some(ms) = lookup("DESKJAM_PRESENCE_THROTTLE_MS") {
            config.presence_throttle_ms = ms.trim().parse().map_err(|_| {
                ConfigError::Parse(format!("DESKJAM_PRESENCE_THROTTLE_MS is not a number: {ms}"))
            })?;
        }
        config.id_namespace = lookup("DESKJAM_ID_NAMESPACE");
        config.user_name = lookup("DESKJAM_USER_NAME");
        config.user_color = lookup("DESKJAM_USER_COLOR");
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.map_name.trim().is_empty() {
            return Err(ConfigError::Invalid("map_name must not be empty".into()));
        }
        if self.room.trim().is_empty() {
            return Err(ConfigError::Invalid("room must not be empty".into()));
        }
        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "relay_url must be a ws:// or wss:// URL: {}",
                self.relay_url
            )));
        }
        if let Some(ns) = &self.id_namespace {
            if ns.chars().any(|c| c == '-' || c.is_whitespace()) {
                return Err(ConfigError::Invalid(format!(
                    "id_namespace must not contain '-' or whitespace: {ns}"
                )));
            }
        }
        if let Some(color) = &self.user_color {
            if SerializableColor::from_hex(color).is_none() {
                return Err(ConfigError::Invalid(format!("user_color is not a hex color: {color}")));
            }
        }
        Ok(())
    }

    pub fn presence_throttle(&self) -> Duration {
        Duration::from_millis(self.presence_throttle_ms)
    }
}
