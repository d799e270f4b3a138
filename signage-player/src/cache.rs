//! Last-known-good content cache and credential hashes
//!
//! A single `CacheRecord` lives under one key and is overwritten on every
//! successful content change. It is read only when live resolution fails and
//! is never expired: stale content is preferred over a blank screen.
//!
//! All failures are logged and swallowed. Losing a cache write only degrades
//! a future offline fallback; it must never block the current render.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::model::ResolvedContent;
use crate::store::{KvStore, StoreError};

/// Bumped whenever the persisted layout changes; older records are ignored.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Largest serialized record the cache accepts
pub const DEFAULT_MAX_CACHE_BYTES: usize = 5 * 1024 * 1024;

const CONTENT_CACHE_KEY: &str = "content_cache";
const DEVICE_CREDENTIAL_KEY: &str = "device_credential_hash";
const MASTER_CREDENTIAL_KEY: &str = "master_credential_hash";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub version: u32,
    /// Duplicated from `content` so it can be compared without decoding the payload
    pub content_hash: String,
    pub cached_at: DateTime<Utc>,
    pub content: ResolvedContent,
}

/// Leading fields of a record; `content` is skipped while parsing.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheHeader {
    version: u32,
    content_hash: String,
}

/// Which kiosk-exit credential a hash belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Device,
    Master,
}

impl CredentialKind {
    fn key(self) -> &'static str {
        match self {
            CredentialKind::Device => DEVICE_CREDENTIAL_KEY,
            CredentialKind::Master => MASTER_CREDENTIAL_KEY,
        }
    }
}

pub struct LocalCache {
    store: Arc<dyn KvStore>,
    max_bytes: usize,
    // hash of the record on disk, once written or read by this instance;
    // the lock also serializes every mutation of the content record
    known_hash: Mutex<Option<String>>,
}

impl LocalCache {
    pub fn new(store: Arc<dyn KvStore>, max_bytes: usize) -> Self {
        Self {
            store,
            max_bytes,
            known_hash: Mutex::new(None),
        }
    }

    /// Persist `content` as the new last-known-good record.
    pub fn write_cache(&self, content: &ResolvedContent) {
        match self.try_write_cache(content) {
            Ok(()) => info!(content_hash = %content.content_hash, "content cached"),
            Err(e) => warn!(content_hash = %content.content_hash, "cache write failed: {}", e),
        }
    }

    pub fn try_write_cache(&self, content: &ResolvedContent) -> Result<(), StoreError> {
        let record = CacheRecord {
            version: CACHE_SCHEMA_VERSION,
            content_hash: content.content_hash.clone(),
            cached_at: Utc::now(),
            content: content.clone(),
        };

        let bytes = serde_json::to_vec(&record)?;
        if bytes.len() > self.max_bytes {
            return Err(StoreError::CapacityExceeded {
                size: bytes.len(),
                capacity: self.max_bytes,
            });
        }

        let mut known_hash = self.known_hash.lock();
        self.store.set(CONTENT_CACHE_KEY, &bytes)?;
        *known_hash = Some(record.content_hash);
        Ok(())
    }

    /// Current record, or `None` when absent, unreadable or from another schema.
    pub fn read_cache(&self) -> Option<CacheRecord> {
        match self.try_read_cache() {
            Ok(record) => record,
            Err(e) => {
                warn!("cache read failed: {}", e);
                None
            }
        }
    }

    pub fn try_read_cache(&self) -> Result<Option<CacheRecord>, StoreError> {
        let Some(bytes) = self.store.get(CONTENT_CACHE_KEY)? else {
            return Ok(None);
        };

        let header: CacheHeader = serde_json::from_slice(&bytes)?;
        if header.version != CACHE_SCHEMA_VERSION {
            return Err(StoreError::VersionMismatch {
                found: header.version,
                expected: CACHE_SCHEMA_VERSION,
            });
        }

        let record: CacheRecord = serde_json::from_slice(&bytes)?;
        Ok(Some(record))
    }

    /// Hash of the cached record without decoding its content. The store is
    /// only consulted until the hash is known.
    pub fn cached_hash(&self) -> Option<String> {
        let mut known_hash = self.known_hash.lock();
        if known_hash.is_none() {
            *known_hash = self.read_cached_hash();
        }
        known_hash.clone()
    }

    fn read_cached_hash(&self) -> Option<String> {
        let bytes = match self.store.get(CONTENT_CACHE_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("cache header read failed: {}", e);
                return None;
            }
        };

        match serde_json::from_slice::<CacheHeader>(&bytes) {
            Ok(header) if header.version == CACHE_SCHEMA_VERSION => Some(header.content_hash),
            Ok(header) => {
                debug!(version = header.version, "ignoring cache record from another schema");
                None
            }
            Err(e) => {
                warn!("cache header unreadable: {}", e);
                None
            }
        }
    }

    /// Drop the content record. Idempotent.
    pub fn clear_cache(&self) {
        if let Err(e) = self.try_clear_cache() {
            warn!("cache clear failed: {}", e);
        }
    }

    pub fn try_clear_cache(&self) -> Result<(), StoreError> {
        let mut known_hash = self.known_hash.lock();
        *known_hash = None;
        self.store.delete(CONTENT_CACHE_KEY)?;
        info!("content cache cleared");
        Ok(())
    }

    pub fn write_credential_hash(&self, kind: CredentialKind, hash: &str) {
        if let Err(e) = self.store.set(kind.key(), hash.as_bytes()) {
            warn!(?kind, "credential hash write failed: {}", e);
        }
    }

    pub fn read_credential_hash(&self, kind: CredentialKind) -> Option<String> {
        match self.store.get(kind.key()) {
            Ok(Some(bytes)) => String::from_utf8(bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(?kind, "credential hash read failed: {}", e);
                None
            }
        }
    }

    /// Remove both credential hashes (device reset).
    pub fn clear_credentials(&self) -> Result<(), StoreError> {
        self.store.delete(DEVICE_CREDENTIAL_KEY)?;
        self.store.delete(MASTER_CREDENTIAL_KEY)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentMode, ContentSource, PlaylistConfig};
    use crate::store::MemoryStore;

    fn content(hash: &str) -> ResolvedContent {
        ResolvedContent {
            content_hash: hash.to_string(),
            mode: ContentMode::Playlist,
            items: Vec::new(),
            playlist_config: PlaylistConfig::default(),
            source: ContentSource::Assigned,
        }
    }

    /// Store whose writes always fail
    struct BrokenStore;

    impl KvStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }
        fn set(&self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
            Err(std::io::Error::other("disk full").into())
        }
        fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(std::io::Error::other("disk gone").into())
        }
    }

    /// Memory store that counts reads
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        reads: Mutex<usize>,
    }

    impl KvStore for CountingStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            *self.reads.lock() += 1;
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            self.inner.set(key, value)
        }
        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key)
        }
    }

    #[test]
    fn test_cached_hash_read_from_store_once() {
        let store = Arc::new(CountingStore::default());
        let seeded = LocalCache::new(store.clone(), DEFAULT_MAX_CACHE_BYTES);
        seeded.write_cache(&content("abc"));

        let cache = LocalCache::new(store.clone(), DEFAULT_MAX_CACHE_BYTES);
        for _ in 0..5 {
            assert_eq!(cache.cached_hash().as_deref(), Some("abc"));
        }
        assert_eq!(*store.reads.lock(), 1);

        cache.write_cache(&content("xyz"));
        assert_eq!(cache.cached_hash().as_deref(), Some("xyz"));
        assert_eq!(*store.reads.lock(), 1);

        cache.clear_cache();
        assert!(cache.cached_hash().is_none());
        assert_eq!(*store.reads.lock(), 2);
    }

    #[test]
    fn test_write_then_read_overwrites() {
        let cache = LocalCache::new(Arc::new(MemoryStore::new()), DEFAULT_MAX_CACHE_BYTES);
        assert!(cache.read_cache().is_none());

        cache.write_cache(&content("abc"));
        cache.write_cache(&content("xyz"));

        let record = cache.read_cache().unwrap();
        assert_eq!(record.content_hash, "xyz");
        assert_eq!(record.content.content_hash, "xyz");
        assert_eq!(record.version, CACHE_SCHEMA_VERSION);
        assert_eq!(cache.cached_hash().as_deref(), Some("xyz"));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let cache = LocalCache::new(Arc::new(MemoryStore::new()), DEFAULT_MAX_CACHE_BYTES);
        cache.write_cache(&content("abc"));
        cache.clear_cache();
        cache.clear_cache();
        assert!(cache.read_cache().is_none());
        assert!(cache.cached_hash().is_none());
    }

    #[test]
    fn test_failures_are_swallowed() {
        let cache = LocalCache::new(Arc::new(BrokenStore), DEFAULT_MAX_CACHE_BYTES);
        cache.write_cache(&content("abc"));
        cache.clear_cache();
        assert!(cache.read_cache().is_none());
        assert!(cache.cached_hash().is_none());
        assert!(cache.read_credential_hash(CredentialKind::Device).is_none());
    }

    #[test]
    fn test_capacity_limit() {
        let cache = LocalCache::new(Arc::new(MemoryStore::new()), 16);
        assert!(matches!(
            cache.try_write_cache(&content("abc")),
            Err(StoreError::CapacityExceeded { .. })
        ));
        assert!(cache.read_cache().is_none());
    }

    #[test]
    fn test_other_schema_version_ignored() {
        let store = Arc::new(MemoryStore::new());
        let cache = LocalCache::new(store.clone(), DEFAULT_MAX_CACHE_BYTES);
        cache.write_cache(&content("abc"));

        let bytes = store.get(CONTENT_CACHE_KEY).unwrap().unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["version"] = serde_json::json!(CACHE_SCHEMA_VERSION + 1);
        store
            .set(CONTENT_CACHE_KEY, &serde_json::to_vec(&value).unwrap())
            .unwrap();

        // a fresh instance, as after an upgrade
        let cache = LocalCache::new(store, DEFAULT_MAX_CACHE_BYTES);
        assert!(cache.read_cache().is_none());
        assert!(cache.cached_hash().is_none());
        assert!(matches!(
            cache.try_read_cache(),
            Err(StoreError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_credential_hashes() {
        let cache = LocalCache::new(Arc::new(MemoryStore::new()), DEFAULT_MAX_CACHE_BYTES);
        cache.write_credential_hash(CredentialKind::Device, "d-hash");
        cache.write_credential_hash(CredentialKind::Master, "m-hash");
        assert_eq!(
            cache.read_credential_hash(CredentialKind::Device).as_deref(),
            Some("d-hash")
        );
        assert_eq!(
            cache.read_credential_hash(CredentialKind::Master).as_deref(),
            Some("m-hash")
        );

        cache.clear_credentials().unwrap();
        assert!(cache.read_credential_hash(CredentialKind::Master).is_none());
    }
}
