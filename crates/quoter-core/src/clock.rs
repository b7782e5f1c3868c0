//! Millisecond clocks.
//!
//! Everything that reasons about order age takes its time from a [`Clock`]
//! so tests can move time explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of the current time in milliseconds since Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    time_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(initial_ms: u64) -> Self {
        Self {
            time_ms: AtomicU64::new(initial_ms),
        }
    }

    pub fn set(&self, time_ms: u64) {
        self.time_ms.store(time_ms, Ordering::Release);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.time_ms.fetch_add(delta_ms, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.time_ms.load(Ordering::Acquire)
    }
}
