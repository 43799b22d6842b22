//! Operator controls for a running session.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::kill_switch::KillSwitch;

/// Engages the kill switch while a sentinel file exists. Removing the file
/// does not release the switch; an engaged session stays engaged.
#[derive(Debug, Clone)]
pub struct SentinelWatcher {
    path: PathBuf,
    seen: Arc<AtomicBool>,
}

impl SentinelWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seen: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check the file once. Returns true when the switch is engaged afterwards.
    pub fn poll(&self, kill_switch: &KillSwitch) -> bool {
        if self.path.exists() && !self.seen.swap(true, Ordering::SeqCst) {
            warn!(path = %self.path.display(), "kill switch sentinel found, engaging");
            kill_switch.engage();
        }
        kill_switch.is_engaged()
    }
}

/// Engage the kill switch on Ctrl-C. Open positions are still flattened by
/// the forced-exit sweep.
pub fn engage_on_ctrl_c(kill_switch: KillSwitch) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, engaging kill switch");
            kill_switch.engage();
        }
    })
}
