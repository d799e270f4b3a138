//! Wire and domain types exchanged with the content authority
//!
//! All payloads use camelCase field names on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::connection::ConnectionStatus;
use crate::metrics::DeviceHealth;

/// How the renderer lays the items out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    Playlist,
    Layout,
}

/// Provenance of a resolution. Priority between sources is decided upstream;
/// the engine only carries the tag through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Schedule,
    Campaign,
    Emergency,
    Assigned,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistConfig {
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default = "default_item_duration")]
    pub default_duration_seconds: u32,
}

fn default_item_duration() -> u32 {
    10
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            shuffle: false,
            default_duration_seconds: default_item_duration(),
        }
    }
}

/// One renderable unit. Everything beyond id, duration and position belongs
/// to the renderer and is kept verbatim in `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    pub duration_seconds: u32,
    pub position: u32,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// The server's answer to "what should this device show right now"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedContent {
    pub content_hash: String,
    pub mode: ContentMode,
    #[serde(default)]
    pub items: Vec<ContentItem>,
    #[serde(default)]
    pub playlist_config: PlaylistConfig,
    pub source: ContentSource,
}

impl ResolvedContent {
    /// Check the payload invariants and order items by `position`.
    ///
    /// A payload that fails here is treated exactly like a failed call.
    pub fn validated(mut self) -> Result<Self, String> {
        if self.content_hash.trim().is_empty() {
            return Err("empty contentHash".to_string());
        }

        let mut positions = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if !positions.insert(item.position) {
                return Err(format!("duplicate item position {}", item.position));
            }
        }

        self.items.sort_by_key(|item| item.position);
        Ok(self)
    }

    /// Same content re-tagged as coming from the on-device cache
    pub fn from_cache(mut self) -> Self {
        self.source = ContentSource::Cache;
        self
    }
}

/// Outbound liveness report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub device_id: String,
    pub content_hash: Option<String>,
    pub player_version: String,
    pub timestamp: DateTime<Utc>,
    pub connection_status: ConnectionStatus,
    pub is_offline_mode: bool,
    pub hostname: String,
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<DeviceHealth>,
}

/// Server reply to a heartbeat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    #[serde(default)]
    pub needs_screenshot: bool,
    #[serde(default)]
    pub pending_command: Option<PendingCommand>,
    #[serde(default)]
    pub refresh_needed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Reload,
    ClearCache,
    Reboot,
    Reset,
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommandType::Reload => "reload",
            CommandType::ClearCache => "clear_cache",
            CommandType::Reboot => "reboot",
            CommandType::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Remote command delivered with a heartbeat ack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCommand {
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Completed,
    Failed,
}

/// Completion report sent back so the server stops redelivering a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReport {
    pub command_id: String,
    pub status: CommandStatus,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub reported_at: DateTime<Utc>,
}
