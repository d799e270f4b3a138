//! Platform collaborators the engine delegates to
//!
//! - `DeviceControl`: reboot / factory-reset the device
//! - `ScreenshotCapture`: capture the current screen when the server asks
//!
//! `SystemDeviceControl` shells out to the OS power commands (Linux and
//! Windows); other platforms report the operation as unsupported.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::info;

#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn reboot(&self) -> Result<()>;

    /// Return the device to its unprovisioned state. Local player state has
    /// already been wiped by the time this runs.
    async fn reset(&self) -> Result<()>;
}

#[async_trait]
pub trait ScreenshotCapture: Send + Sync {
    async fn capture(&self) -> Result<()>;
}

/// Power control through the platform's shutdown tooling
pub struct SystemDeviceControl {
    reboot_delay: Duration,
}

impl SystemDeviceControl {
    pub fn new(reboot_delay: Duration) -> Self {
        Self { reboot_delay }
    }

    async fn run(program: &str, args: &[&str]) -> Result<()> {
        let output = AsyncCommand::new(program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute {program}"))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} failed: {}",
                program,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

impl Default for SystemDeviceControl {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl DeviceControl for SystemDeviceControl {
    async fn reboot(&self) -> Result<()> {
        info!(delay_secs = self.reboot_delay.as_secs(), "rebooting device");

        if cfg!(target_os = "linux") {
            // shutdown(8) only schedules in whole minutes
            let minutes = self.reboot_delay.as_secs().div_ceil(60);
            Self::run("sudo", &["shutdown", "-r", &format!("+{minutes}")]).await
        } else if cfg!(target_os = "windows") {
            let secs = self.reboot_delay.as_secs().to_string();
            Self::run("shutdown", &["/r", "/t", &secs]).await
        } else {
            Err(anyhow!("Reboot not supported on this platform"))
        }
    }

    async fn reset(&self) -> Result<()> {
        info!("device reset requested, rebooting into clean state");
        self.reboot().await
    }
}

/// Used when no capture backend is available on the platform
pub struct UnsupportedScreenshot;

#[async_trait]
impl ScreenshotCapture for UnsupportedScreenshot {
    async fn capture(&self) -> Result<()> {
        Err(anyhow!("Screenshot capture not supported on this platform"))
    }
}
