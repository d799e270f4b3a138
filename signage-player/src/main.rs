use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use signage_player::device::{SystemDeviceControl, UnsupportedScreenshot};
use signage_player::discovery::DeviceIdentity;
use signage_player::{FileStore, HttpResolver, KvStore, MemoryStore, Player, PlayerConfig};

fn open_store(config: &PlayerConfig) -> Arc<dyn KvStore> {
    let opened = config
        .data_dir()
        .and_then(|dir| FileStore::open(&dir).with_context(|| format!("Failed to open store at {:?}", dir)));

    match opened {
        Ok(store) => {
            info!(path = ?store.root(), "persistent store ready");
            Arc::new(store)
        }
        Err(e) => {
            // playback still works, only offline fallback across restarts is lost
            warn!("falling back to in-memory store: {:#}", e);
            Arc::new(MemoryStore::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("signage_player=info")),
        )
        .init();

    info!("Signage player starting...");

    let config = PlayerConfig::load()
        .await
        .context("Failed to load configuration")?;
    let identity = DeviceIdentity::resolve(config.device.device_id.as_deref())
        .context("Failed to determine device identity")?;
    info!(
        device_id = %identity.device_id,
        hostname = %identity.hostname,
        server = %config.server.base_url,
        "device identity resolved"
    );

    let resolver = HttpResolver::new(
        config.server.base_url.clone(),
        config.server.api_key.clone(),
        config.sync.resolve_timeout(),
    )
    .context("Failed to build HTTP client")?;

    let store = open_store(&config);
    let player = Player::new(
        config,
        identity,
        Arc::new(resolver),
        store,
        Arc::new(SystemDeviceControl::default()),
        Arc::new(UnsupportedScreenshot),
    );
    let handle = player.spawn();

    // stand-in for the renderer: log what would be on screen
    let mut snapshots = handle.subscribe();
    let renderer = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            info!(
                content_hash = ?snapshot.content_hash(),
                availability = ?snapshot.availability,
                status = %snapshot.connection_status,
                offline = snapshot.is_offline_mode,
                item = snapshot.current_index,
                "render state changed"
            );
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    handle.shutdown().await;
    renderer.abort();
    Ok(())
}
