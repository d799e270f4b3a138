//! Signage Player - offline-resilient content engine for unattended displays
//!
//! Keeps the locally rendered content consistent with the remote content
//! authority while connectivity comes and goes:
//! - Periodic content resolution with hash-based change detection
//! - Connection state machine with offline fallback to the last-known-good cache
//! - Independent heartbeat channel carrying device status and server signals
//! - Remote command channel (reload, clear_cache, reboot, reset)
//! - Full-jitter exponential backoff shared by every retried call

pub mod backoff;
pub mod cache;
pub mod commands;
pub mod config;
pub mod connection;
pub mod device;
pub mod discovery;
pub mod heartbeat;
pub mod metrics;
pub mod model;
pub mod player;
pub mod resolver;
pub mod shutdown;
pub mod store;
pub mod sync;

pub use cache::{CacheRecord, CredentialKind, LocalCache};
pub use config::PlayerConfig;
pub use connection::{ConnectionState, ConnectionStatus};
pub use device::{DeviceControl, ScreenshotCapture};
pub use model::{
    CommandReport, CommandType, ContentItem, ContentMode, ContentSource, DeviceStatus,
    HeartbeatAck, PendingCommand, ResolvedContent,
};
pub use player::{Player, PlayerHandle};
pub use resolver::{ContentResolver, HttpResolver, ResolveError};
pub use store::{FileStore, KvStore, MemoryStore, StoreError};
pub use sync::{Availability, PlayerSnapshot};
