//! Engine assembly
//!
//! `Player` wires the sync loop, heartbeat loop and command channel around
//! one shared snapshot and hands back a `PlayerHandle` for the renderer.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::LocalCache;
use crate::commands::CommandChannel;
use crate::config::PlayerConfig;
use crate::device::{DeviceControl, ScreenshotCapture};
use crate::discovery::DeviceIdentity;
use crate::heartbeat::{HeartbeatLoop, HeartbeatSettings};
use crate::resolver::ContentResolver;
use crate::shutdown::ShutdownSignal;
use crate::store::KvStore;
use crate::sync::{PlayerSnapshot, ReloadReason, ReloadRequest, SyncLoop, SyncSettings};

/// One pending forced cycle is enough; further requests coalesce into it.
const RELOAD_QUEUE: usize = 1;
const COMMAND_QUEUE: usize = 16;

pub struct Player {
    config: PlayerConfig,
    identity: DeviceIdentity,
    resolver: Arc<dyn ContentResolver>,
    cache: Arc<LocalCache>,
    device: Arc<dyn DeviceControl>,
    screenshot: Arc<dyn ScreenshotCapture>,
}

impl Player {
    pub fn new(
        config: PlayerConfig,
        identity: DeviceIdentity,
        resolver: Arc<dyn ContentResolver>,
        store: Arc<dyn KvStore>,
        device: Arc<dyn DeviceControl>,
        screenshot: Arc<dyn ScreenshotCapture>,
    ) -> Self {
        let cache = Arc::new(LocalCache::new(store, config.storage.max_cache_bytes));
        Self {
            config,
            identity,
            resolver,
            cache,
            device,
            screenshot,
        }
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    /// Start all three loops on the current runtime.
    pub fn spawn(self) -> PlayerHandle {
        let device_id = self.identity.device_id.clone();
        let (snapshot_tx, snapshot_rx) = watch::channel(PlayerSnapshot::initial());
        let snapshots = Arc::new(snapshot_tx);
        let (reload_tx, reload_rx) = mpsc::channel(RELOAD_QUEUE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (shutdown_tx, shutdown) = ShutdownSignal::new();

        let sync = SyncLoop::new(
            device_id.clone(),
            self.resolver.clone(),
            self.cache.clone(),
            snapshots.clone(),
            SyncSettings::from(&self.config.sync),
            reload_rx,
            shutdown.clone(),
        );

        let heartbeat = HeartbeatLoop::new(
            self.identity.clone(),
            HeartbeatSettings {
                interval: self.config.sync.heartbeat_interval(),
                call_timeout: self.config.sync.resolve_timeout(),
                player_version: self.config.device.player_version.clone(),
                include_health: self.config.heartbeat.include_health,
            },
            self.resolver.clone(),
            snapshot_rx,
            self.screenshot.clone(),
            command_tx,
            reload_tx.clone(),
            shutdown.clone(),
        );

        let commands = CommandChannel::new(
            device_id.clone(),
            self.resolver.clone(),
            self.cache.clone(),
            self.device.clone(),
            reload_tx.clone(),
            command_rx,
            self.config.sync.resolve_timeout(),
            shutdown,
        );

        let tasks = vec![
            tokio::spawn(sync.run()),
            tokio::spawn(heartbeat.run()),
            tokio::spawn(commands.run()),
        ];
        info!(device_id = %device_id, "player started");

        PlayerHandle {
            device_id,
            snapshots,
            reload: reload_tx,
            shutdown: shutdown_tx,
            cache: self.cache,
            tasks,
        }
    }
}

/// Renderer-side handle on a running player
pub struct PlayerHandle {
    device_id: String,
    snapshots: Arc<watch::Sender<PlayerSnapshot>>,
    reload: mpsc::Sender<ReloadRequest>,
    shutdown: watch::Sender<bool>,
    cache: Arc<LocalCache>,
    tasks: Vec<JoinHandle<()>>,
}

impl PlayerHandle {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    /// Move to the next item in the rotation. Returns the new index, or
    /// `None` when there is nothing to rotate.
    pub fn advance_item(&self) -> Option<usize> {
        let mut index = None;
        self.snapshots.send_if_modified(|snapshot| {
            let moved = snapshot.advance();
            if moved {
                index = Some(snapshot.current_index);
            }
            moved
        });
        index
    }

    /// Ask for a sync cycle now. `false` once the player has stopped.
    pub fn request_reload(&self) -> bool {
        let request = ReloadRequest {
            reason: ReloadReason::RefreshSignal,
        };
        match self.reload.try_send(request) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stop every loop and wait for them to exit. In-flight network results
    /// are dropped without being applied.
    pub async fn shutdown(self) {
        info!(device_id = %self.device_id, "player shutting down");
        let _ = self.shutdown.send(true);
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!("player task ended abnormally: {}", e);
            }
        }
        info!("player stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionStatus;
    use crate::device::UnsupportedScreenshot;
    use crate::model::{
        CommandReport, ContentItem, ContentMode, ContentSource, DeviceStatus, HeartbeatAck,
        PlaylistConfig, ResolvedContent,
    };
    use crate::resolver::ResolveError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FixedResolver {
        content: Mutex<Option<ResolvedContent>>,
    }

    #[async_trait]
    impl ContentResolver for FixedResolver {
        async fn resolve_content(&self, _: &str) -> Result<ResolvedContent, ResolveError> {
            self.content
                .lock()
                .clone()
                .ok_or_else(|| ResolveError::Network("down".into()))
        }

        async fn send_heartbeat(&self, _: &DeviceStatus) -> Result<HeartbeatAck, ResolveError> {
            Ok(HeartbeatAck::default())
        }

        async fn acknowledge_command(&self, _: &str, _: &CommandReport) -> Result<(), ResolveError> {
            Ok(())
        }
    }

    struct NoopDevice;

    #[async_trait]
    impl DeviceControl for NoopDevice {
        async fn reboot(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn reset(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn playlist(hash: &str, items: u32) -> ResolvedContent {
        ResolvedContent {
            content_hash: hash.into(),
            mode: ContentMode::Playlist,
            items: (0..items)
                .map(|i| ContentItem {
                    id: format!("item-{i}"),
                    duration_seconds: 5,
                    position: i,
                    attributes: Default::default(),
                })
                .collect(),
            playlist_config: PlaylistConfig::default(),
            source: ContentSource::Campaign,
        }
    }

    fn player(content: Option<ResolvedContent>) -> Player {
        let mut config = PlayerConfig::default();
        config.heartbeat.include_health = false;
        Player::new(
            config,
            DeviceIdentity {
                device_id: "dev-1".into(),
                hostname: "lobby".into(),
                os: "linux".into(),
            },
            Arc::new(FixedResolver {
                content: Mutex::new(content),
            }),
            Arc::new(MemoryStore::new()),
            Arc::new(NoopDevice),
            Arc::new(UnsupportedScreenshot),
        )
    }

    #[tokio::test]
    async fn test_spawn_publishes_first_content_immediately() {
        tokio::time::pause();
        let handle = player(Some(playlist("abc", 2))).spawn();
        let mut rx = handle.subscribe();

        rx.wait_for(|s| s.content_hash() == Some("abc")).await.unwrap();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.connection_status, ConnectionStatus::Connected);
        assert_eq!(handle.cache().cached_hash().as_deref(), Some("abc"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_advance_item_wraps() {
        tokio::time::pause();
        let handle = player(Some(playlist("abc", 3))).spawn();
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.content.is_some()).await.unwrap();

        assert_eq!(handle.advance_item(), Some(1));
        assert_eq!(handle.advance_item(), Some(2));
        assert_eq!(handle.advance_item(), Some(0));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_advance_without_content() {
        tokio::time::pause();
        let handle = player(None).spawn();
        assert_eq!(handle.advance_item(), None);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_refused_after_shutdown() {
        tokio::time::pause();
        let handle = player(None).spawn();
        let reload = handle.reload.clone();
        handle.shutdown().await;

        let request = ReloadRequest {
            reason: ReloadReason::RefreshSignal,
        };
        assert!(reload.try_send(request).is_err());
    }
}
