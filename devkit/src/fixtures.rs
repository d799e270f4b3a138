/*!
Fixture builders for content payloads, commands and device status
*/

use chrono::Utc;
use serde_json::Value;
use signage_player::model::PlaylistConfig;
use signage_player::{
    CommandType, ConnectionStatus, ContentItem, ContentMode, ContentSource, DeviceStatus,
    HeartbeatAck, PendingCommand, ResolvedContent,
};

/// Fluent builder for `ResolvedContent`
#[derive(Debug, Clone)]
pub struct ContentBuilder {
    content: ResolvedContent,
}

impl ContentBuilder {
    /// Playlist with a single 10s item, sourced from the schedule
    pub fn new(content_hash: &str) -> Self {
        Self {
            content: ResolvedContent {
                content_hash: content_hash.to_string(),
                mode: ContentMode::Playlist,
                items: Vec::new(),
                playlist_config: PlaylistConfig::default(),
                source: ContentSource::Schedule,
            },
        }
        .items(1)
    }

    /// Replace the items with `count` generated ones at positions 0..count
    pub fn items(mut self, count: u32) -> Self {
        let hash = self.content.content_hash.clone();
        self.content.items = (0..count)
            .map(|position| ContentItem {
                id: format!("{hash}-item-{position}"),
                duration_seconds: 10,
                position,
                attributes: Default::default(),
            })
            .collect();
        self
    }

    pub fn item_attribute<S: Into<String>>(mut self, key: S, value: Value) -> Self {
        let key = key.into();
        for item in &mut self.content.items {
            item.attributes.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn mode(mut self, mode: ContentMode) -> Self {
        self.content.mode = mode;
        self
    }

    pub fn source(mut self, source: ContentSource) -> Self {
        self.content.source = source;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.content.playlist_config.shuffle = shuffle;
        self
    }

    pub fn build(self) -> ResolvedContent {
        self.content
    }
}

pub fn command(id: &str, command_type: CommandType) -> PendingCommand {
    PendingCommand {
        id: id.to_string(),
        command_type,
        issued_at: Utc::now(),
    }
}

/// Heartbeat ack delivering one command
pub fn ack_with_command(id: &str, command_type: CommandType) -> HeartbeatAck {
    HeartbeatAck {
        pending_command: Some(command(id, command_type)),
        ..Default::default()
    }
}

pub fn status(device_id: &str) -> DeviceStatus {
    DeviceStatus {
        device_id: device_id.to_string(),
        content_hash: None,
        player_version: "0.0.0-test".to_string(),
        timestamp: Utc::now(),
        connection_status: ConnectionStatus::Connecting,
        is_offline_mode: false,
        hostname: "test-host".to_string(),
        os: "test-os".to_string(),
        health: None,
    }
}
