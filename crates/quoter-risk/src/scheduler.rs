//! Trading-hours scheduler.
//!
//! Windows are `"HH:MM-HH:MM"` in UTC and may wrap midnight. Inside a window
//! the first `cooldown_open_minutes` and the last `cooldown_close_minutes`
//! are reported as cooldown, so new quotes are held back while the book
//! settles.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{RiskError, RiskResult};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Scheduler verdict for a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerDecision {
    Open,
    Closed,
    Cooldown,
}

impl SchedulerDecision {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// One UTC trading window, as minutes of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: u32,
    end: u32,
}

impl TimeWindow {
    pub fn parse(raw: &str) -> RiskResult<Self> {
        let (start, end) = raw
            .split_once('-')
            .ok_or_else(|| RiskError::InvalidWindow(raw.to_string()))?;
        let start = parse_minute(start.trim(), raw)?;
        let end = parse_minute(end.trim(), raw)?;
        if start == end {
            return Err(RiskError::InvalidWindow(raw.to_string()));
        }
        Ok(Self { start, end })
    }

    fn contains(&self, minute: u32) -> bool {
        if self.start < self.end {
            minute >= self.start && minute < self.end
        } else {
            minute >= self.start || minute < self.end
        }
    }

    fn minutes_since_open(&self, minute: u32) -> u32 {
        (minute + MINUTES_PER_DAY - self.start) % MINUTES_PER_DAY
    }

    fn minutes_until_close(&self, minute: u32) -> u32 {
        (self.end + MINUTES_PER_DAY - minute) % MINUTES_PER_DAY
    }
}

fn parse_minute(hhmm: &str, raw: &str) -> RiskResult<u32> {
    let time = NaiveTime::parse_from_str(hhmm, "%H:%M")
        .map_err(|_| RiskError::InvalidWindow(raw.to_string()))?;
    Ok(time.hour() * 60 + time.minute())
}

/// Scheduler settings. An empty window list means always open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub windows: Vec<String>,
    #[serde(default)]
    pub cooldown_open_minutes: u32,
    #[serde(default)]
    pub cooldown_close_minutes: u32,
    /// Per-symbol schedules replacing the global one.
    #[serde(default)]
    pub overrides: HashMap<String, SchedulerConfig>,
}

#[derive(Debug, Clone)]
pub struct TradingScheduler {
    windows: Vec<TimeWindow>,
    cooldown_open_minutes: u32,
    cooldown_close_minutes: u32,
}

impl TradingScheduler {
    pub fn from_config(config: &SchedulerConfig) -> RiskResult<Self> {
        let windows = config
            .windows
            .iter()
            .map(|w| TimeWindow::parse(w))
            .collect::<RiskResult<Vec<_>>>()?;
        Ok(Self {
            windows,
            cooldown_open_minutes: config.cooldown_open_minutes,
            cooldown_close_minutes: config.cooldown_close_minutes,
        })
    }

    pub fn always_open() -> Self {
        Self {
            windows: Vec::new(),
            cooldown_open_minutes: 0,
            cooldown_close_minutes: 0,
        }
    }

    pub fn check(&self, now_ms: u64) -> SchedulerDecision {
        if self.windows.is_empty() {
            return SchedulerDecision::Open;
        }
        let minute = minute_of_day(now_ms);
        let Some(window) = self.windows.iter().find(|w| w.contains(minute)) else {
            return SchedulerDecision::Closed;
        };
        if window.minutes_since_open(minute) < self.cooldown_open_minutes
            || window.minutes_until_close(minute) <= self.cooldown_close_minutes
        {
            SchedulerDecision::Cooldown
        } else {
            SchedulerDecision::Open
        }
    }
}

fn minute_of_day(now_ms: u64) -> u32 {
    DateTime::from_timestamp_millis(now_ms as i64)
        .map(|dt| dt.hour() * 60 + dt.minute())
        .unwrap_or(0)
}

/// Global schedule plus per-symbol overrides.
#[derive(Debug, Clone, Default)]
pub struct SchedulerSet {
    global: Option<TradingScheduler>,
    overrides: HashMap<String, TradingScheduler>,
}

impl SchedulerSet {
    pub fn from_config(config: &SchedulerConfig) -> RiskResult<Self> {
        let global = if config.windows.is_empty() {
            None
        } else {
            Some(TradingScheduler::from_config(config)?)
        };
        let overrides = config
            .overrides
            .iter()
            .map(|(symbol, cfg)| Ok((symbol.clone(), TradingScheduler::from_config(cfg)?)))
            .collect::<RiskResult<HashMap<_, _>>>()?;
        Ok(Self { global, overrides })
    }

    pub fn check(&self, symbol: &str, now_ms: u64) -> SchedulerDecision {
        self.overrides
            .get(symbol)
            .or(self.global.as_ref())
            .map(|s| s.check(now_ms))
            .unwrap_or(SchedulerDecision::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1970-01-01 at `hh:mm` UTC.
    fn at(hh: u64, mm: u64) -> u64 {
        (hh * 60 + mm) * 60_000
    }

    fn config(windows: &[&str], open: u32, close: u32) -> SchedulerConfig {
        SchedulerConfig {
            windows: windows.iter().map(|w| w.to_string()).collect(),
            cooldown_open_minutes: open,
            cooldown_close_minutes: close,
            overrides: HashMap::new(),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TimeWindow::parse("09:00-17:00").is_ok());
        assert!(TimeWindow::parse("9am-5pm").is_err());
        assert!(TimeWindow::parse("09:00").is_err());
        assert!(TimeWindow::parse("10:00-10:00").is_err());
    }

    #[test]
    fn test_window_with_cooldowns() {
        let sched = TradingScheduler::from_config(&config(&["09:00-17:00"], 5, 10)).unwrap();
        assert_eq!(sched.check(at(8, 59)), SchedulerDecision::Closed);
        assert_eq!(sched.check(at(9, 2)), SchedulerDecision::Cooldown);
        assert_eq!(sched.check(at(12, 0)), SchedulerDecision::Open);
        assert_eq!(sched.check(at(16, 55)), SchedulerDecision::Cooldown);
        assert_eq!(sched.check(at(17, 0)), SchedulerDecision::Closed);
    }

    #[test]
    fn test_window_wrapping_midnight() {
        let sched = TradingScheduler::from_config(&config(&["22:00-02:00"], 0, 0)).unwrap();
        assert_eq!(sched.check(at(23, 30)), SchedulerDecision::Open);
        assert_eq!(sched.check(at(1, 0)), SchedulerDecision::Open);
        assert_eq!(sched.check(at(3, 0)), SchedulerDecision::Closed);
    }

    #[test]
    fn test_override_wins_over_global() {
        let mut cfg = config(&["09:00-10:00"], 0, 0);
        cfg.overrides
            .insert("ETHUSDT".into(), config(&["00:00-23:59"], 0, 0));
        let set = SchedulerSet::from_config(&cfg).unwrap();

        assert_eq!(set.check("BTCUSDT", at(12, 0)), SchedulerDecision::Closed);
        assert_eq!(set.check("ETHUSDT", at(12, 0)), SchedulerDecision::Open);
    }

    #[test]
    fn test_empty_config_always_open() {
        let set = SchedulerSet::from_config(&SchedulerConfig::default()).unwrap();
        assert!(set.check("BTCUSDT", at(3, 0)).is_open());
        assert!(TradingScheduler::always_open().check(0).is_open());
    }
}
