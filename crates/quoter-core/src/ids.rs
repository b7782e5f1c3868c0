//! Client order id allocation.
//!
//! Ids look like `BTCUSDT-b-1700000000123-42-9f3a`:
//! symbol, side, a non-decreasing millisecond timestamp, a process-wide
//! strictly increasing counter and a short random disambiguator. The
//! counter alone makes ids unique within the process; the random suffix
//! keeps two processes started in the same millisecond apart.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::clock::{SharedClock, SystemClock};
use crate::order::{ClientOrderId, OrderSide};

/// Generates unique client order ids without I/O.
pub struct IdAllocator {
    clock: SharedClock,
    /// Last timestamp component handed out.
    last_ts_ms: AtomicU64,
    counter: AtomicU64,
}

impl IdAllocator {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            last_ts_ms: AtomicU64::new(clock.now_ms()),
            counter: AtomicU64::new(0),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(SystemClock::shared())
    }

    /// Next id for `(symbol, side)`.
    pub fn next(&self, symbol: &str, side: OrderSide) -> ClientOrderId {
        let ts = self.next_timestamp();
        let seq = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        let suffix = Uuid::new_v4().simple().to_string();
        ClientOrderId::from_string(format!(
            "{}-{}-{}-{}-{}",
            symbol.to_uppercase(),
            side.short(),
            ts,
            seq,
            &suffix[..4]
        ))
    }

    /// `max(last, now)` so the timestamp never moves backwards, even when
    /// the wall clock does.
    fn next_timestamp(&self) -> u64 {
        let now = self.clock.now_ms();
        loop {
            let last = self.last_ts_ms.load(Ordering::Acquire);
            let next = last.max(now);
            if next == last {
                return last;
            }
            match self.last_ts_ms.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(_) => continue,
            }
        }
    }

    /// Timestamp component of an id produced by this allocator.
    pub fn parse_timestamp(id: &ClientOrderId) -> Option<u64> {
        let mut parts = id.as_str().rsplitn(4, '-');
        let _suffix = parts.next()?;
        let _seq = parts.next()?;
        parts.next()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    const BASE_TIME: u64 = 1_700_000_000_000;

    #[test]
    fn test_ten_thousand_ids_unique_and_non_decreasing() {
        let allocator = IdAllocator::with_system_clock();
        let mut seen = HashSet::new();
        let mut prev_ts = 0u64;

        for _ in 0..10_000 {
            let id = allocator.next("BTCUSDT", OrderSide::Buy);
            let ts = IdAllocator::parse_timestamp(&id).unwrap();
            assert!(ts >= prev_ts, "timestamp went backwards: {ts} < {prev_ts}");
            prev_ts = ts;
            assert!(seen.insert(id), "duplicate id");
        }
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn test_clock_regression_keeps_timestamp() {
        let clock = Arc::new(ManualClock::new(BASE_TIME));
        let allocator = IdAllocator::new(clock.clone());

        let a = allocator.next("ETHUSDT", OrderSide::Sell);
        clock.set(BASE_TIME - 10_000);
        let b = allocator.next("ETHUSDT", OrderSide::Sell);

        assert_eq!(IdAllocator::parse_timestamp(&a), Some(BASE_TIME));
        assert_eq!(IdAllocator::parse_timestamp(&b), Some(BASE_TIME));
        assert_ne!(a, b);
    }

    #[test]
    fn test_format() {
        let clock = Arc::new(ManualClock::new(BASE_TIME));
        let allocator = IdAllocator::new(clock);
        let id = allocator.next("btcusdt", OrderSide::Sell);
        let parts: Vec<&str> = id.as_str().split('-').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], "BTCUSDT");
        assert_eq!(parts[1], "s");
        assert_eq!(parts[2], BASE_TIME.to_string());
        assert_eq!(parts[3], "1");
        assert_eq!(parts[4].len(), 4);
    }

    #[test]
    fn test_concurrent_no_duplicates() {
        let allocator = Arc::new(IdAllocator::with_system_clock());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || {
                    (0..1000)
                        .map(|_| allocator.next("SOLUSDT", OrderSide::Buy))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 8000);
    }
}
