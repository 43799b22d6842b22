//! Global kill switch.
//!
//! New entry orders can only be built from an [`EntryPermit`], and the only
//! way to obtain a permit is [`KillSwitch::permit`], which refuses while the
//! switch is engaged. Exits never need a permit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    engaged: Arc<AtomicBool>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engage(&self) {
        self.engaged.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.engaged.store(false, Ordering::SeqCst);
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    /// A single-use permission to submit one new entry.
    pub fn permit(&self) -> Option<EntryPermit> {
        if self.is_engaged() {
            None
        } else {
            Some(EntryPermit { _private: () })
        }
    }
}

/// Proof that the kill switch was released when the permit was minted.
/// Not `Clone`; consumed by the entry order constructor.
#[derive(Debug)]
pub struct EntryPermit {
    _private: (),
}
