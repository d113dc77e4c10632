//! Tunnel daemon reload capability.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{StateError, StateResult};

/// Makes the tunnel daemon pick up a rewritten ingress table.
#[async_trait]
pub trait ProxyReloader: Send + Sync {
    async fn reload(&self) -> StateResult<()>;
}

/// Restarts a systemd unit, optionally through `sudo`.
#[derive(Debug, Clone)]
pub struct SystemctlReloader {
    unit: String,
    use_sudo: bool,
}

impl SystemctlReloader {
    pub fn new(unit: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            unit: unit.into(),
            use_sudo,
        }
    }

    fn command(&self) -> Command {
        if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.args(["systemctl", "restart", &self.unit]);
            cmd
        } else {
            let mut cmd = Command::new("systemctl");
            cmd.args(["restart", &self.unit]);
            cmd
        }
    }
}

#[async_trait]
impl ProxyReloader for SystemctlReloader {
    async fn reload(&self) -> StateResult<()> {
        debug!(unit = %self.unit, sudo = self.use_sudo, "restarting tunnel daemon");
        let output = self
            .command()
            .output()
            .await
            .map_err(|e| StateError::Reload(format!("failed to run systemctl: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StateError::Reload(format!(
                "systemctl restart {} exited with {}: {}",
                self.unit,
                output.status,
                stderr.trim()
            )));
        }

        info!(unit = %self.unit, "tunnel daemon restarted");
        Ok(())
    }
}

/// Counts reloads instead of performing them. Can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingReloader {
    count: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingReloader {
    pub fn failing() -> Self {
        let reloader = Self::default();
        reloader.set_failing(true);
        reloader
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Successful reloads so far.
    pub fn reloads(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyReloader for RecordingReloader {
    async fn reload(&self) -> StateResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StateError::Reload("reload disabled".to_string()));
        }
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
