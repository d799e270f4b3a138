//! Heartbeat loop
//!
//! Reports liveness on a fixed interval regardless of how the sync loop is
//! backing off, and routes the server's piggybacked signals: screenshot
//! requests, pending commands and "content changed" refresh hints.
//! Heartbeat failures never touch the connection state.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::device::ScreenshotCapture;
use crate::discovery::DeviceIdentity;
use crate::metrics::HealthSampler;
use crate::model::{DeviceStatus, HeartbeatAck, PendingCommand};
use crate::resolver::{with_timeout, ContentResolver};
use crate::shutdown::ShutdownSignal;
use crate::sync::{PlayerSnapshot, ReloadReason, ReloadRequest};

#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    pub call_timeout: Duration,
    pub player_version: String,
    pub include_health: bool,
}

pub struct HeartbeatLoop {
    identity: DeviceIdentity,
    settings: HeartbeatSettings,
    resolver: Arc<dyn ContentResolver>,
    snapshots: watch::Receiver<PlayerSnapshot>,
    screenshot: Arc<dyn ScreenshotCapture>,
    commands: mpsc::Sender<PendingCommand>,
    reload: mpsc::Sender<ReloadRequest>,
    health: Option<HealthSampler>,
    shutdown: ShutdownSignal,
}

impl HeartbeatLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: DeviceIdentity,
        settings: HeartbeatSettings,
        resolver: Arc<dyn ContentResolver>,
        snapshots: watch::Receiver<PlayerSnapshot>,
        screenshot: Arc<dyn ScreenshotCapture>,
        commands: mpsc::Sender<PendingCommand>,
        reload: mpsc::Sender<ReloadRequest>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let health = settings.include_health.then(HealthSampler::new);
        Self {
            identity,
            settings,
            resolver,
            snapshots,
            screenshot,
            commands,
            reload,
            health,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            device_id = %self.identity.device_id,
            interval_ms = self.settings.interval.as_millis() as u64,
            "heartbeat loop started"
        );

        let mut timer = interval(self.settings.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                _ = timer.tick() => {
                    if !self.beat().await {
                        break;
                    }
                }
            }
        }

        info!("heartbeat loop stopped");
    }

    /// Send one heartbeat and route the ack. Returns false when shutdown
    /// arrived while the call was in flight.
    async fn beat(&mut self) -> bool {
        let status = self.build_status();
        let call = with_timeout(
            self.settings.call_timeout,
            self.resolver.send_heartbeat(&status),
        );

        let result = tokio::select! {
            biased;
            _ = self.shutdown.wait() => return false,
            result = call => result,
        };

        match result {
            Ok(ack) => {
                debug!(content_hash = ?status.content_hash, "heartbeat acknowledged");
                self.handle_ack(ack).await;
            }
            Err(e) => warn!(status = %status.connection_status, "heartbeat failed: {}", e),
        }
        true
    }

    pub fn build_status(&mut self) -> DeviceStatus {
        // the sync loop cannot publish while the snapshot is borrowed
        let health = self.health.as_mut().map(HealthSampler::sample);
        let snapshot = self.snapshots.borrow();
        DeviceStatus {
            device_id: self.identity.device_id.clone(),
            content_hash: snapshot.content_hash().map(str::to_string),
            player_version: self.settings.player_version.clone(),
            timestamp: Utc::now(),
            connection_status: snapshot.connection_status,
            is_offline_mode: snapshot.is_offline_mode,
            hostname: self.identity.hostname.clone(),
            os: self.identity.os.clone(),
            health,
        }
    }

    async fn handle_ack(&self, ack: HeartbeatAck) {
        if ack.needs_screenshot {
            info!("screenshot requested");
            if let Err(e) = self.screenshot.capture().await {
                warn!("screenshot capture failed: {:#}", e);
            }
        }

        if let Some(command) = ack.pending_command {
            // an undelivered command is not acknowledged, so the server resends it
            if let Err(e) = self.commands.try_send(command) {
                warn!("command channel unavailable: {}", e);
            }
        }

        if ack.refresh_needed {
            let request = ReloadRequest {
                reason: ReloadReason::RefreshSignal,
            };
            match self.reload.try_send(request) {
                Ok(()) => info!("server signalled refresh"),
                Err(mpsc::error::TrySendError::Full(_)) => debug!("reload already queued"),
                Err(e) => warn!("sync loop unavailable: {}", e),
            }
        }
    }
}
