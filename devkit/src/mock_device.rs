/*!
Device-control and screenshot doubles
*/

use crate::mock_resolver::{Call, CallLog};
use async_trait::async_trait;
use signage_player::{DeviceControl, ScreenshotCapture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Records reboot/reset requests instead of touching the machine
#[derive(Clone, Default)]
pub struct MockDeviceControl {
    log: CallLog,
    fail: Arc<AtomicBool>,
}

impl MockDeviceControl {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every subsequent operation fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn reboots(&self) -> usize {
        self.log.count(&Call::Reboot)
    }

    pub fn resets(&self) -> usize {
        self.log.count(&Call::Reset)
    }

    fn outcome(&self, operation: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("[MOCK] {} refused", operation);
        }
        log::info!("[MOCK] {} requested", operation);
        Ok(())
    }
}

#[async_trait]
impl DeviceControl for MockDeviceControl {
    async fn reboot(&self) -> anyhow::Result<()> {
        self.log.record(Call::Reboot);
        self.outcome("reboot")
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.log.record(Call::Reset);
        self.outcome("reset")
    }
}

#[derive(Clone, Default)]
pub struct MockScreenshot {
    log: CallLog,
}

impl MockScreenshot {
    pub fn with_log(log: CallLog) -> Self {
        Self { log }
    }

    pub fn captures(&self) -> usize {
        self.log.count(&Call::Screenshot)
    }
}

#[async_trait]
impl ScreenshotCapture for MockScreenshot {
    async fn capture(&self) -> anyhow::Result<()> {
        self.log.record(Call::Screenshot);
        Ok(())
    }
}
