//! Connection state machine
//!
//! ```text
//! connecting ──ok──▶ connected ──fail──▶ reconnecting ──fail×N──▶ offline
//!     │  ▲                ▲                   │                     │
//!     └──┘ fail (<N)      └────────ok─────────┴──────────ok─────────┘
//! ```
//!
//! Owned by the sync loop; every resolve attempt is fed through exactly one of
//! [`ConnectionState::on_success`] or [`ConnectionState::on_failure`].

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
    Offline,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// What the caller must do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status unchanged or changed without further side effects
    Stay,
    /// Threshold reached: switch rendering to the cached record
    EnterOffline,
    /// First success after failures: leave offline mode, render live content
    Recovered,
    /// First success since start
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    status: ConnectionStatus,
    consecutive_failures: u32,
    is_offline_mode: bool,
    offline_threshold: u32,
}

impl ConnectionState {
    pub fn new(offline_threshold: u32) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            consecutive_failures: 0,
            is_offline_mode: false,
            offline_threshold: offline_threshold.max(1),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_offline_mode(&self) -> bool {
        self.is_offline_mode
    }

    pub fn offline_threshold(&self) -> u32 {
        self.offline_threshold
    }

    /// A resolve call returned valid content.
    pub fn on_success(&mut self) -> Transition {
        let previous = self.status;
        self.status = ConnectionStatus::Connected;
        self.consecutive_failures = 0;
        self.is_offline_mode = false;

        match previous {
            ConnectionStatus::Connecting => {
                info!("connection established");
                Transition::Connected
            }
            ConnectionStatus::Connected => Transition::Stay,
            ConnectionStatus::Reconnecting | ConnectionStatus::Offline => {
                info!(from = %previous, "connection recovered");
                Transition::Recovered
            }
        }
    }

    /// A resolve call failed (network, server, timeout or malformed payload).
    pub fn on_failure(&mut self) -> Transition {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let threshold_reached = self.consecutive_failures >= self.offline_threshold;

        match self.status {
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting if threshold_reached => {
                self.status = ConnectionStatus::Offline;
                self.is_offline_mode = true;
                info!(
                    failures = self.consecutive_failures,
                    "offline threshold reached, switching to cached content"
                );
                Transition::EnterOffline
            }
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => Transition::Stay,
            ConnectionStatus::Connected => {
                self.status = ConnectionStatus::Reconnecting;
                info!("connection lost, reconnecting");
                Transition::Stay
            }
            ConnectionStatus::Offline => Transition::Stay,
        }
    }

    /// Offline mode with nothing to render: keep the offline status but
    /// report that no cached fallback backs it.
    pub fn clear_offline_mode(&mut self) {
        self.is_offline_mode = false;
    }
}
