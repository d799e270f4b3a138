/*!
Test harness for the player engine

Wires a complete `Player` against the doubles:
- `MockResolver` as the content server
- `MockDeviceControl` / `MockScreenshot` sharing the resolver's call log
- An in-memory store that outlives the player, so cache state can be
  seeded before start and inspected after shutdown
*/

use crate::mock_device::{MockDeviceControl, MockScreenshot};
use crate::mock_resolver::{CallLog, MockResolver};
use signage_player::discovery::DeviceIdentity;
use signage_player::{
    KvStore, LocalCache, MemoryStore, Player, PlayerConfig, PlayerHandle, PlayerSnapshot,
    ResolvedContent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const TEST_DEVICE_ID: &str = "test-device";

/// Upper bound for any wait; generous because tests run on paused time.
const WAIT_LIMIT: Duration = Duration::from_secs(3600);

pub struct TestHarness {
    pub resolver: MockResolver,
    pub device: MockDeviceControl,
    pub screenshot: MockScreenshot,
    pub store: Arc<MemoryStore>,
    pub config: PlayerConfig,
    pub log: CallLog,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok();

        let log = CallLog::new();
        let mut config = PlayerConfig::default();
        config.device.device_id = Some(TEST_DEVICE_ID.to_string());
        config.heartbeat.include_health = false;

        Self {
            resolver: MockResolver::with_log(log.clone()),
            device: MockDeviceControl::with_log(log.clone()),
            screenshot: MockScreenshot::with_log(log.clone()),
            store: Arc::new(MemoryStore::new()),
            config,
            log,
        }
    }

    /// Adjust the configuration before `start`
    pub fn configure(mut self, f: impl FnOnce(&mut PlayerConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            device_id: TEST_DEVICE_ID.to_string(),
            hostname: "test-host".to_string(),
            os: "test-os".to_string(),
        }
    }

    /// Cache view over the harness store
    pub fn cache(&self) -> LocalCache {
        let store: Arc<dyn KvStore> = self.store.clone();
        LocalCache::new(store, self.config.storage.max_cache_bytes)
    }

    /// Leave a record from a "previous session" in the store
    pub fn seed_cache(&self, content: &ResolvedContent) {
        self.cache().write_cache(content);
        log::info!("[HARNESS] seeded cache with {}", content.content_hash);
    }

    pub fn player(&self) -> Player {
        Player::new(
            self.config.clone(),
            self.identity(),
            Arc::new(self.resolver.clone()),
            self.store.clone(),
            Arc::new(self.device.clone()),
            Arc::new(self.screenshot.clone()),
        )
    }

    pub fn start(&self) -> PlayerHandle {
        self.player().spawn()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        rx: &mut watch::Receiver<PlayerSnapshot>,
        predicate: impl FnMut(&PlayerSnapshot) -> bool,
    ) -> PlayerSnapshot {
        let snapshot = tokio::time::timeout(WAIT_LIMIT, rx.wait_for(predicate))
            .await
            .expect("timed out waiting for player snapshot")
            .expect("player stopped while waiting for snapshot");
        (*snapshot).clone()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::ContentBuilder;

    #[test]
    fn test_seeded_cache_is_visible() {
        let harness = TestHarness::new();
        harness.seed_cache(&ContentBuilder::new("seeded").build());
        assert_eq!(harness.cache().cached_hash().as_deref(), Some("seeded"));
    }

    #[tokio::test]
    async fn test_harness_runs_player() {
        tokio::time::pause();
        let harness = TestHarness::new();
        harness.resolver.serve(ContentBuilder::new("abc").items(2).build());

        let handle = harness.start();
        let mut rx = handle.subscribe();
        let snapshot = TestHarness::wait_for(&mut rx, |s| s.content.is_some()).await;
        assert_eq!(snapshot.content_hash(), Some("abc"));

        handle.shutdown().await;
    }
}
