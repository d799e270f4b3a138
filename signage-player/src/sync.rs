//! Content sync loop
//!
//! One task owns the poll cadence and the connection state machine. Each
//! cycle resolves content, compares its hash with what is on screen, writes
//! the cache when the content changed and publishes a new [`PlayerSnapshot`]
//! for the renderer.
//!
//! Cycles never overlap: the next one is scheduled only after the previous
//! outcome (including its cache write) has been applied. Forced reloads are
//! delivered to the same task, so they queue behind an in-flight cycle
//! instead of racing it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::connection::{ConnectionState, ConnectionStatus, Transition};
use crate::model::{ContentItem, ResolvedContent};
use crate::resolver::{with_timeout, ContentResolver, ResolveError};
use crate::shutdown::ShutdownSignal;

/// What the renderer has to work with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Live content from the last successful resolution
    Live,
    /// Last-known-good content while the server is unreachable
    Cached,
    /// Nothing to show yet; the renderer displays a "retrying" indicator
    NoContentRetrying,
}

/// Renderer-facing view of the engine, published on every change
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub content: Option<Arc<ResolvedContent>>,
    pub is_offline_mode: bool,
    pub connection_status: ConnectionStatus,
    pub consecutive_failures: u32,
    pub availability: Availability,
    /// Rotation cursor into `content.items`; reset to 0 whenever the content changes
    pub current_index: usize,
}

impl PlayerSnapshot {
    pub fn initial() -> Self {
        Self {
            content: None,
            is_offline_mode: false,
            connection_status: ConnectionStatus::Connecting,
            consecutive_failures: 0,
            availability: Availability::NoContentRetrying,
            current_index: 0,
        }
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.content.as_deref().map(|c| c.content_hash.as_str())
    }

    pub fn current_item(&self) -> Option<&ContentItem> {
        self.content.as_deref()?.items.get(self.current_index)
    }

    /// Move the rotation cursor to the next item, wrapping around.
    pub fn advance(&mut self) -> bool {
        let len = self.content.as_deref().map_or(0, |c| c.items.len());
        if len == 0 {
            return false;
        }
        self.current_index = (self.current_index + 1) % len;
        true
    }

    fn apply_state(&mut self, state: &ConnectionState) {
        self.connection_status = state.status();
        self.consecutive_failures = state.consecutive_failures();
        self.is_offline_mode = state.is_offline_mode();
        self.availability = match (&self.content, self.is_offline_mode) {
            (None, _) => Availability::NoContentRetrying,
            (Some(_), true) => Availability::Cached,
            (Some(_), false) => Availability::Live,
        };
    }

    /// Swap in `content`; the cursor restarts only when the hash differs.
    fn replace_content(&mut self, content: Arc<ResolvedContent>) {
        if self.content_hash() != Some(content.content_hash.as_str()) {
            self.current_index = 0;
        }
        self.content = Some(content);
    }
}

/// Why a cycle is being forced ahead of schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadReason {
    Command(String),
    RefreshSignal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadRequest {
    pub reason: ReloadReason,
}

/// Result of one sync cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// New content hash rendered (and cached)
    Updated,
    /// Same hash as on screen; playback untouched
    Unchanged,
    Failed(ResolveError),
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub resolve_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub offline_threshold: u32,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            resolve_timeout: config.resolve_timeout(),
            backoff: config.backoff(),
            offline_threshold: config.offline_threshold,
        }
    }
}

/// Delay before the next cycle: the poll interval after a success, a
/// full-jitter backoff after a failure. The backoff replaces the interval.
pub fn next_cycle_delay(
    outcome: &CycleOutcome,
    consecutive_failures: u32,
    settings: &SyncSettings,
) -> Duration {
    match outcome {
        CycleOutcome::Failed(_) => settings
            .backoff
            .delay(consecutive_failures.saturating_sub(1)),
        CycleOutcome::Updated | CycleOutcome::Unchanged => settings.poll_interval,
    }
}

pub struct SyncLoop {
    device_id: String,
    resolver: Arc<dyn ContentResolver>,
    cache: Arc<LocalCache>,
    snapshots: Arc<watch::Sender<PlayerSnapshot>>,
    state: ConnectionState,
    settings: SyncSettings,
    reload_rx: mpsc::Receiver<ReloadRequest>,
    reload_open: bool,
    shutdown: ShutdownSignal,
}

impl SyncLoop {
    pub fn new(
        device_id: String,
        resolver: Arc<dyn ContentResolver>,
        cache: Arc<LocalCache>,
        snapshots: Arc<watch::Sender<PlayerSnapshot>>,
        settings: SyncSettings,
        reload_rx: mpsc::Receiver<ReloadRequest>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            device_id,
            resolver,
            cache,
            snapshots,
            state: ConnectionState::new(settings.offline_threshold),
            settings,
            reload_rx,
            reload_open: true,
            shutdown,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Run until shutdown. The first cycle starts immediately.
    pub async fn run(mut self) {
        info!(device_id = %self.device_id, "sync loop started");

        let mut outcome = self.run_cycle().await;
        while let Some(last) = outcome {
            let delay = next_cycle_delay(&last, self.state.consecutive_failures(), &self.settings);
            debug!(delay_ms = delay.as_millis() as u64, "next sync cycle scheduled");
            if !self.wait_for_next_cycle(delay).await {
                break;
            }
            outcome = self.run_cycle().await;
        }

        info!("sync loop stopped");
    }

    /// Sleep until the next cycle is due or a reload is requested.
    /// Returns `false` on shutdown.
    async fn wait_for_next_cycle(&mut self, delay: Duration) -> bool {
        let wake = tokio::time::sleep(delay);
        tokio::pin!(wake);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => return false,
                request = self.reload_rx.recv(), if self.reload_open => match request {
                    Some(request) => {
                        info!(reason = ?request.reason, "forced sync cycle");
                        return true;
                    }
                    None => self.reload_open = false,
                },
                _ = &mut wake => return true,
            }
        }
    }

    /// One resolve + apply. `None` when shutdown interrupted the call; the
    /// in-flight result is then dropped without touching cache or state.
    pub async fn run_cycle(&mut self) -> Option<CycleOutcome> {
        let call = with_timeout(
            self.settings.resolve_timeout,
            self.resolver.resolve_content(&self.device_id),
        );

        let result = tokio::select! {
            biased;
            _ = self.shutdown.wait() => return None,
            result = call => result,
        };

        let result = result.and_then(|content| content.validated().map_err(ResolveError::Malformed));
        Some(self.apply(result))
    }

    fn apply(&mut self, result: Result<ResolvedContent, ResolveError>) -> CycleOutcome {
        match result {
            Ok(content) => self.apply_success(content),
            Err(error) => self.apply_failure(error),
        }
    }

    fn apply_success(&mut self, content: ResolvedContent) -> CycleOutcome {
        let transition = self.state.on_success();

        if self.cache.cached_hash().as_deref() != Some(content.content_hash.as_str()) {
            self.cache.write_cache(&content);
        }

        let changed = self.snapshots.borrow().content_hash() != Some(content.content_hash.as_str());
        let recovered = matches!(transition, Transition::Recovered | Transition::Connected);
        let content = Arc::new(content);
        let state = &self.state;

        self.snapshots.send_if_modified(|snapshot| {
            let before = snapshot.clone();
            // a live answer supersedes whatever was shown, even under the same hash
            if changed || recovered || snapshot.is_offline_mode {
                snapshot.replace_content(content.clone());
            }
            snapshot.apply_state(state);
            *snapshot != before
        });

        if changed {
            info!(content_hash = %content.content_hash, source = ?content.source, "content updated");
            CycleOutcome::Updated
        } else {
            debug!(content_hash = %content.content_hash, "content unchanged");
            CycleOutcome::Unchanged
        }
    }

    fn apply_failure(&mut self, error: ResolveError) -> CycleOutcome {
        let transition = self.state.on_failure();
        warn!(
            failures = self.state.consecutive_failures(),
            status = %self.state.status(),
            network = error.is_network(),
            "content resolution failed: {}",
            error
        );

        let mut fallback = None;
        if transition == Transition::EnterOffline {
            match self.cache.read_cache() {
                Some(record) => {
                    info!(content_hash = %record.content_hash, cached_at = %record.cached_at, "rendering cached content");
                    fallback = Some(Arc::new(record.content.from_cache()));
                }
                None if self.snapshots.borrow().content.is_some() => {
                    warn!("no cache record, keeping last content in memory");
                }
                None => {
                    warn!("offline with no cached content available");
                    self.state.clear_offline_mode();
                }
            }
        }

        let state = &self.state;
        self.snapshots.send_if_modified(|snapshot| {
            let before = snapshot.clone();
            if let Some(content) = fallback {
                snapshot.replace_content(content);
            }
            snapshot.apply_state(state);
            *snapshot != before
        });

        CycleOutcome::Failed(error)
    }
}
