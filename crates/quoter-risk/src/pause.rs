//! Risk pause raised by reconciliation.
//!
//! Sticky: once paused, quoting stays paused until [`QuotingPause::resume`]
//! is called, which reconciliation does after a clean cycle. A second pause
//! while already paused keeps the original reason.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{error, info, warn};

use quoter_telemetry::Metrics;

// ============================================================================
// PauseReason
// ============================================================================

/// Why quoting was paused.
#[derive(Debug, Clone, PartialEq)]
pub enum PauseReason {
    /// Local/remote order counts diverged past the threshold.
    HardDesync {
        mismatch_ratio: f64,
        local: usize,
        remote: usize,
    },
    /// Reconciliation could not read venue state several times in a row.
    ConsecutiveFailures { count: u32 },
    /// Operator request.
    Manual { message: String },
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HardDesync {
                mismatch_ratio,
                local,
                remote,
            } => write!(
                f,
                "hard desync: mismatch {:.1}% (local={local}, remote={remote})",
                mismatch_ratio * 100.0
            ),
            Self::ConsecutiveFailures { count } => {
                write!(f, "reconciliation failed {count} times in a row")
            }
            Self::Manual { message } => write!(f, "manual: {message}"),
        }
    }
}

// ============================================================================
// QuotingPause
// ============================================================================

/// Shared pause flag consulted before admitting new orders.
pub struct QuotingPause {
    paused: AtomicBool,
    /// Unix ms when paused, 0 if not paused.
    paused_at: AtomicU64,
    reason: RwLock<Option<PauseReason>>,
}

impl Default for QuotingPause {
    fn default() -> Self {
        Self::new()
    }
}

impl QuotingPause {
    #[must_use]
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            paused_at: AtomicU64::new(0),
            reason: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Pause quoting. Returns true if this call flipped the flag.
    pub fn pause(&self, reason: PauseReason, now_ms: u64) -> bool {
        if self
            .paused
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.paused_at.store(now_ms, Ordering::SeqCst);
            *self.reason.write() = Some(reason.clone());
            Metrics::risk_paused(true);
            error!(reason = %reason, "QUOTING PAUSED");
            true
        } else {
            warn!(new_reason = %reason, "Quoting already paused, keeping original reason");
            false
        }
    }

    /// Resume quoting. Returns true if quoting was paused.
    pub fn resume(&self) -> bool {
        if self
            .paused
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let previous = self.reason.write().take();
            self.paused_at.store(0, Ordering::SeqCst);
            Metrics::risk_paused(false);
            info!(previous_reason = ?previous, "Quoting resumed");
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn reason(&self) -> Option<PauseReason> {
        if self.is_paused() {
            self.reason.read().clone()
        } else {
            None
        }
    }

    #[must_use]
    pub fn paused_at(&self) -> Option<u64> {
        if self.is_paused() {
            Some(self.paused_at.load(Ordering::SeqCst)).filter(|&ts| ts > 0)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_is_sticky_and_keeps_first_reason() {
        let pause = QuotingPause::new();
        assert!(!pause.is_paused());

        assert!(pause.pause(PauseReason::ConsecutiveFailures { count: 3 }, 1_000));
        assert!(!pause.pause(
            PauseReason::Manual {
                message: "ops".into()
            },
            2_000
        ));

        assert!(pause.is_paused());
        assert_eq!(
            pause.reason(),
            Some(PauseReason::ConsecutiveFailures { count: 3 })
        );
        assert_eq!(pause.paused_at(), Some(1_000));
    }

    #[test]
    fn test_resume_clears_state() {
        let pause = QuotingPause::new();
        assert!(!pause.resume());
        pause.pause(
            PauseReason::HardDesync {
                mismatch_ratio: 0.2,
                local: 100,
                remote: 80,
            },
            5,
        );
        assert!(pause.resume());
        assert!(!pause.is_paused());
        assert!(pause.reason().is_none());
        assert!(pause.paused_at().is_none());
    }

    #[test]
    fn test_reason_display() {
        let reason = PauseReason::HardDesync {
            mismatch_ratio: 0.2,
            local: 100,
            remote: 80,
        };
        assert_eq!(
            reason.to_string(),
            "hard desync: mismatch 20.0% (local=100, remote=80)"
        );
    }
}
