//! Device health snapshot attached to heartbeats

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::debug;

/// Coarse health figures the dashboard shows next to each screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealth {
    pub uptime_seconds: u64,
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// Keeps one `System` around so CPU usage is measured between heartbeats
/// instead of requiring a sleep on every sample.
pub struct HealthSampler {
    sys: System,
}

impl HealthSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self { sys }
    }

    pub fn sample(&mut self) -> DeviceHealth {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let total = self.sys.total_memory();
        let available = self.sys.available_memory();
        let memory_percent = if total > 0 {
            (total.saturating_sub(available) as f32 / total as f32) * 100.0
        } else {
            0.0
        };

        let health = DeviceHealth {
            uptime_seconds: System::uptime(),
            cpu_percent: self.sys.global_cpu_info().cpu_usage(),
            memory_percent,
        };
        debug!(?health, "device health sampled");
        health
    }
}

impl Default for HealthSampler {
    fn default() -> Self {
        Self::new()
    }
}
