//! Per-symbol action throttling.
//!
//! Sliding window of recent creates, amends and cancels per symbol. An
//! action is admitted while the count inside the window stays below
//! `max_per_sec * window_sec`.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

/// Kind of venue action being throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Amend,
    Cancel,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Amend => "amend",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Throttle limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_window_sec")]
    pub window_sec: u64,
    #[serde(default = "default_max_creates_per_sec")]
    pub max_creates_per_sec: u32,
    #[serde(default = "default_max_amends_per_sec")]
    pub max_amends_per_sec: u32,
    #[serde(default = "default_max_cancels_per_sec")]
    pub max_cancels_per_sec: u32,
    /// First adaptive backoff step.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Error rate at or above which backoff engages.
    #[serde(default = "default_error_rate_trigger")]
    pub error_rate_trigger: f64,
    /// Feed lag at or above which backoff engages.
    #[serde(default = "default_ws_lag_trigger_ms")]
    pub ws_lag_trigger_ms: u64,
    /// Deterministic jitter as a fraction of the backoff.
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: f64,
}

fn default_window_sec() -> u64 {
    1
}

fn default_max_creates_per_sec() -> u32 {
    10
}

fn default_max_amends_per_sec() -> u32 {
    10
}

fn default_max_cancels_per_sec() -> u32 {
    20
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

fn default_error_rate_trigger() -> f64 {
    0.05
}

fn default_ws_lag_trigger_ms() -> u64 {
    300
}

fn default_jitter_pct() -> f64 {
    0.10
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_sec: default_window_sec(),
            max_creates_per_sec: default_max_creates_per_sec(),
            max_amends_per_sec: default_max_amends_per_sec(),
            max_cancels_per_sec: default_max_cancels_per_sec(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            error_rate_trigger: default_error_rate_trigger(),
            ws_lag_trigger_ms: default_ws_lag_trigger_ms(),
            jitter_pct: default_jitter_pct(),
        }
    }
}

impl ThrottleConfig {
    fn limit(&self, kind: ActionKind) -> usize {
        let per_sec = match kind {
            ActionKind::Create => self.max_creates_per_sec,
            ActionKind::Amend => self.max_amends_per_sec,
            ActionKind::Cancel => self.max_cancels_per_sec,
        };
        (per_sec as u64 * self.window_sec.max(1)) as usize
    }

    fn window_ms(&self) -> u64 {
        self.window_sec.max(1) * 1_000
    }
}

/// Sliding-window throttle keyed by symbol and action kind.
pub struct ThrottleGuard {
    config: ThrottleConfig,
    events: Mutex<HashMap<(String, ActionKind), VecDeque<u64>>>,
    /// Current adaptive backoff step.
    backoff_ms: Mutex<u64>,
}

impl ThrottleGuard {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            events: Mutex::new(HashMap::new()),
            backoff_ms: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Whether one more `kind` action on `symbol` fits the window.
    pub fn allowed(&self, symbol: &str, kind: ActionKind, now_ms: u64) -> bool {
        let limit = self.config.limit(kind);
        let cutoff = now_ms.saturating_sub(self.config.window_ms());
        let mut events = self.events.lock();
        match events.get_mut(&(symbol.to_string(), kind)) {
            Some(window) => {
                while window.front().is_some_and(|&ts| ts <= cutoff) {
                    window.pop_front();
                }
                window.len() < limit
            }
            None => limit > 0,
        }
    }

    /// Record an action that was sent.
    pub fn on_event(&self, symbol: &str, kind: ActionKind, now_ms: u64) {
        let limit = self.config.limit(kind);
        let mut events = self.events.lock();
        let window = events.entry((symbol.to_string(), kind)).or_default();
        window.push_back(now_ms);
        if window.len() >= limit {
            warn!(symbol = %symbol, kind = %kind, count = window.len(), limit, "Approaching throttle limit");
        }
    }

    /// Actions of `kind` currently inside the window.
    pub fn recent(&self, symbol: &str, kind: ActionKind, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(self.config.window_ms());
        self.events
            .lock()
            .get(&(symbol.to_string(), kind))
            .map(|w| w.iter().filter(|&&ts| ts > cutoff).count())
            .unwrap_or(0)
    }

    /// Adaptive backoff before the next create.
    ///
    /// Doubles from `backoff_base_ms` up to `backoff_max_ms` while the error
    /// rate or feed lag is over its trigger, resets to zero otherwise. The
    /// result carries a deterministic per-symbol jitter that changes every
    /// five seconds.
    pub fn compute_backoff_ms(&self, error_rate: f64, ws_lag_ms: u64, symbol: &str, now_ms: u64) -> u64 {
        let triggered = error_rate >= self.config.error_rate_trigger
            || ws_lag_ms >= self.config.ws_lag_trigger_ms;

        let step = {
            let mut current = self.backoff_ms.lock();
            *current = if !triggered {
                0
            } else if *current == 0 {
                self.config.backoff_base_ms
            } else {
                (*current * 2).min(self.config.backoff_max_ms)
            };
            *current
        };
        if step == 0 {
            return 0;
        }

        let bucket = now_ms / 5_000;
        let unit = deterministic_unit(symbol, bucket);
        let jitter = (unit * 2.0 - 1.0) * self.config.jitter_pct;
        ((step as f64) * (1.0 + jitter)).max(0.0) as u64
    }
}

/// Stable value in `[0, 1)` derived from `(symbol, bucket)`.
fn deterministic_unit(symbol: &str, bucket: u64) -> f64 {
    let digest = Sha256::digest(format!("{symbol}|{bucket}").as_bytes());
    let word = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    f64::from(word) / (f64::from(u32::MAX) + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(max_creates: u32) -> ThrottleGuard {
        ThrottleGuard::new(ThrottleConfig {
            max_creates_per_sec: max_creates,
            ..Default::default()
        })
    }

    #[test]
    fn test_window_limit() {
        let throttle = guard(2);
        assert!(throttle.allowed("BTCUSDT", ActionKind::Create, 1_000));
        throttle.on_event("BTCUSDT", ActionKind::Create, 1_000);
        throttle.on_event("BTCUSDT", ActionKind::Create, 1_100);
        assert!(!throttle.allowed("BTCUSDT", ActionKind::Create, 1_200));

        // Other symbols and kinds are independent.
        assert!(throttle.allowed("ETHUSDT", ActionKind::Create, 1_200));
        assert!(throttle.allowed("BTCUSDT", ActionKind::Cancel, 1_200));
    }

    #[test]
    fn test_window_slides() {
        let throttle = guard(1);
        throttle.on_event("BTCUSDT", ActionKind::Create, 1_000);
        assert!(!throttle.allowed("BTCUSDT", ActionKind::Create, 1_500));
        assert!(throttle.allowed("BTCUSDT", ActionKind::Create, 2_001));
        assert_eq!(throttle.recent("BTCUSDT", ActionKind::Create, 2_001), 0);
    }

    #[test]
    fn test_zero_limit_blocks() {
        let throttle = guard(0);
        assert!(!throttle.allowed("BTCUSDT", ActionKind::Create, 1_000));
    }

    #[test]
    fn test_backoff_doubles_and_resets() {
        let throttle = ThrottleGuard::new(ThrottleConfig {
            jitter_pct: 0.0,
            ..Default::default()
        });
        assert_eq!(throttle.compute_backoff_ms(0.0, 0, "BTCUSDT", 0), 0);
        assert_eq!(throttle.compute_backoff_ms(0.5, 0, "BTCUSDT", 0), 200);
        assert_eq!(throttle.compute_backoff_ms(0.5, 0, "BTCUSDT", 0), 400);
        assert_eq!(throttle.compute_backoff_ms(0.0, 1_000, "BTCUSDT", 0), 800);
        for _ in 0..10 {
            throttle.compute_backoff_ms(0.5, 0, "BTCUSDT", 0);
        }
        assert_eq!(throttle.compute_backoff_ms(0.5, 0, "BTCUSDT", 0), 5_000);
        assert_eq!(throttle.compute_backoff_ms(0.0, 0, "BTCUSDT", 0), 0);
    }

    #[test]
    fn test_backoff_jitter_is_deterministic_and_bounded() {
        let a = ThrottleGuard::new(ThrottleConfig::default());
        let b = ThrottleGuard::new(ThrottleConfig::default());
        let x = a.compute_backoff_ms(1.0, 0, "SOLUSDT", 12_345);
        let y = b.compute_backoff_ms(1.0, 0, "SOLUSDT", 12_345);
        assert_eq!(x, y);
        assert!((180..=220).contains(&x));
    }
}
