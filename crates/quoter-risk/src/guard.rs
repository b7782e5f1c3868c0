//! Runtime trading guard.
//!
//! Two independent pause sources: an operator override, and an automatic
//! pause raised after a run of venue rejects. In dry-run mode the automatic
//! pause is reported but does not block; the operator override always does.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Runtime guard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub dry_run: bool,
    /// Consecutive rejects that raise the automatic pause. 0 disables it.
    #[serde(default = "default_max_consecutive_rejects")]
    pub max_consecutive_rejects: u32,
}

fn default_max_consecutive_rejects() -> u32 {
    5
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_consecutive_rejects: default_max_consecutive_rejects(),
        }
    }
}

pub struct RuntimeGuard {
    config: GuardConfig,
    manual_pause: AtomicBool,
    auto_paused: AtomicBool,
    consecutive_rejects: AtomicU32,
    reason: RwLock<Option<String>>,
}

impl RuntimeGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            manual_pause: AtomicBool::new(false),
            auto_paused: AtomicBool::new(false),
            consecutive_rejects: AtomicU32::new(0),
            reason: RwLock::new(None),
        }
    }

    /// Effective pause: manual OR (automatic AND NOT dry-run).
    pub fn is_paused(&self) -> bool {
        self.manual_pause.load(Ordering::SeqCst)
            || (self.auto_paused.load(Ordering::SeqCst) && !self.config.dry_run)
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    pub fn set_manual_pause(&self, paused: bool, reason: impl Into<String>) {
        self.manual_pause.store(paused, Ordering::SeqCst);
        let reason = reason.into();
        if paused {
            warn!(reason = %reason, "Manual trading pause engaged");
            *self.reason.write() = Some(format!("manual: {reason}"));
        } else {
            info!("Manual trading pause released");
            if !self.auto_paused.load(Ordering::SeqCst) {
                *self.reason.write() = None;
            }
        }
    }

    /// Venue rejected an order.
    pub fn on_reject(&self, code: &str) {
        let count = self.consecutive_rejects.fetch_add(1, Ordering::AcqRel) + 1;
        let limit = self.config.max_consecutive_rejects;
        if limit > 0
            && count >= limit
            && self
                .auto_paused
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            warn!(count, code, dry_run = self.config.dry_run, "Automatic trading pause after rejects");
            *self.reason.write() = Some(format!("{count} consecutive rejects (last: {code})"));
        }
    }

    /// Venue accepted an order. Clears the reject streak and the
    /// automatic pause.
    pub fn on_send_ok(&self) {
        self.consecutive_rejects.store(0, Ordering::Release);
        if self.auto_paused.swap(false, Ordering::SeqCst) {
            info!("Automatic trading pause cleared");
            if !self.manual_pause.load(Ordering::SeqCst) {
                *self.reason.write() = None;
            }
        }
    }

    pub fn consecutive_rejects(&self) -> u32 {
        self.consecutive_rejects.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_pause() {
        let guard = RuntimeGuard::new(GuardConfig::default());
        assert!(!guard.is_paused());
        guard.set_manual_pause(true, "maintenance");
        assert!(guard.is_paused());
        assert_eq!(guard.reason().as_deref(), Some("manual: maintenance"));
        guard.set_manual_pause(false, "");
        assert!(!guard.is_paused());
        assert!(guard.reason().is_none());
    }

    #[test]
    fn test_auto_pause_after_rejects() {
        let guard = RuntimeGuard::new(GuardConfig {
            dry_run: false,
            max_consecutive_rejects: 2,
        });
        guard.on_reject("rejected");
        assert!(!guard.is_paused());
        guard.on_reject("rejected");
        assert!(guard.is_paused());

        guard.on_send_ok();
        assert!(!guard.is_paused());
        assert_eq!(guard.consecutive_rejects(), 0);
    }

    #[test]
    fn test_dry_run_ignores_auto_pause_but_not_manual() {
        let guard = RuntimeGuard::new(GuardConfig {
            dry_run: true,
            max_consecutive_rejects: 1,
        });
        guard.on_reject("rejected");
        assert!(!guard.is_paused());
        guard.set_manual_pause(true, "ops");
        assert!(guard.is_paused());
    }
}
