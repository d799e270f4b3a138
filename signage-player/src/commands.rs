//! Remote command channel
//!
//! Commands arrive piggybacked on heartbeat acks and are executed here, one
//! at a time, in delivery order. Dispatch:
//! - `reload`: force an immediate sync cycle
//! - `clear_cache`: drop the content cache, then force a sync cycle
//! - `reboot`: acknowledge, then hand over to device control
//! - `reset`: wipe cache and credentials, acknowledge, then hand over
//!
//! Every delivery is acknowledged, including failed executions and
//! duplicates, so a bad command cannot block the channel by redelivery.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::LocalCache;
use crate::device::DeviceControl;
use crate::model::{CommandReport, CommandStatus, CommandType, PendingCommand};
use crate::resolver::{with_timeout, ContentResolver};
use crate::shutdown::ShutdownSignal;
use crate::store::StoreError;
use crate::sync::{ReloadReason, ReloadRequest};

/// How many handled command ids are remembered for de-duplication
pub const RECENT_COMMAND_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Device control failed: {0}")]
    DeviceControl(String),
    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
    #[error("Sync loop is not accepting reload requests")]
    ReloadUnavailable,
}

/// Bounded memory of handled commands and the report sent for each
struct RecentCommands {
    order: VecDeque<String>,
    reports: HashMap<String, CommandReport>,
    capacity: usize,
}

impl RecentCommands {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            reports: HashMap::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, id: &str) -> Option<&CommandReport> {
        self.reports.get(id)
    }

    fn insert(&mut self, report: CommandReport) {
        if self.reports.contains_key(&report.command_id) {
            self.reports.insert(report.command_id.clone(), report);
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.reports.remove(&oldest);
            }
        }
        self.order.push_back(report.command_id.clone());
        self.reports.insert(report.command_id.clone(), report);
    }
}

pub struct CommandChannel {
    device_id: String,
    resolver: Arc<dyn ContentResolver>,
    cache: Arc<LocalCache>,
    device: Arc<dyn DeviceControl>,
    reload: mpsc::Sender<ReloadRequest>,
    inbox: mpsc::Receiver<PendingCommand>,
    ack_timeout: Duration,
    recent: RecentCommands,
    shutdown: ShutdownSignal,
}

impl CommandChannel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device_id: String,
        resolver: Arc<dyn ContentResolver>,
        cache: Arc<LocalCache>,
        device: Arc<dyn DeviceControl>,
        reload: mpsc::Sender<ReloadRequest>,
        inbox: mpsc::Receiver<PendingCommand>,
        ack_timeout: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            device_id,
            resolver,
            cache,
            device,
            reload,
            inbox,
            ack_timeout,
            recent: RecentCommands::new(RECENT_COMMAND_CAPACITY),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(device_id = %self.device_id, "command channel started");

        loop {
            let command = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                command = self.inbox.recv() => command,
            };
            match command {
                Some(command) => self.handle(command).await,
                None => break,
            }
        }

        info!("command channel stopped");
    }

    /// Execute (at most once per id) and acknowledge a delivered command.
    pub async fn handle(&mut self, command: PendingCommand) {
        if let Some(report) = self.recent.get(&command.id).cloned() {
            info!(command_id = %command.id, command = %command.command_type, "duplicate delivery, re-acknowledging");
            self.acknowledge(&report).await;
            return;
        }

        info!(command_id = %command.id, command = %command.command_type, issued_at = %command.issued_at, "executing command");
        let started = Instant::now();

        match command.command_type {
            CommandType::Reload => {
                let result = self.request_reload(&command.id);
                self.finish(&command, started, result).await;
            }
            CommandType::ClearCache => {
                let result = self
                    .cache
                    .try_clear_cache()
                    .map_err(CommandError::from)
                    .and_then(|()| self.request_reload(&command.id));
                self.finish(&command, started, result).await;
            }
            CommandType::Reboot => {
                self.finish(&command, started, Ok(())).await;
                if let Err(e) = self.device.reboot().await {
                    error!(command_id = %command.id, "{}", CommandError::DeviceControl(format!("{e:#}")));
                }
            }
            CommandType::Reset => {
                let result = self.wipe_local_state();
                self.finish(&command, started, result).await;
                if let Err(e) = self.device.reset().await {
                    error!(command_id = %command.id, "{}", CommandError::DeviceControl(format!("{e:#}")));
                }
            }
        }
    }

    fn request_reload(&self, command_id: &str) -> Result<(), CommandError> {
        let request = ReloadRequest {
            reason: ReloadReason::Command(command_id.to_string()),
        };
        match self.reload.try_send(request) {
            Ok(()) => Ok(()),
            // a queued reload covers this one
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(command_id, "reload already queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CommandError::ReloadUnavailable),
        }
    }

    fn wipe_local_state(&self) -> Result<(), CommandError> {
        self.cache.try_clear_cache()?;
        self.cache.clear_credentials()?;
        info!("local player state wiped");
        Ok(())
    }

    /// Record the outcome and report it to the server.
    async fn finish(
        &mut self,
        command: &PendingCommand,
        started: Instant,
        result: Result<(), CommandError>,
    ) {
        let (status, error) = match result {
            Ok(()) => (CommandStatus::Completed, None),
            Err(e) => {
                warn!(command_id = %command.id, command = %command.command_type, "command failed: {}", e);
                (CommandStatus::Failed, Some(e.to_string()))
            }
        };

        let report = CommandReport {
            command_id: command.id.clone(),
            status,
            error,
            execution_time_ms: started.elapsed().as_millis() as u64,
            reported_at: Utc::now(),
        };
        self.recent.insert(report.clone());
        self.acknowledge(&report).await;
    }

    async fn acknowledge(&self, report: &CommandReport) {
        let call = with_timeout(
            self.ack_timeout,
            self.resolver.acknowledge_command(&self.device_id, report),
        );
        match call.await {
            Ok(()) => debug!(command_id = %report.command_id, status = ?report.status, "command acknowledged"),
            Err(e) => warn!(command_id = %report.command_id, "command acknowledgement failed: {}", e),
        }
    }
}
