//! Sticky cohort routing.
//!
//! `route` is a pure function of `(salt, client id, split)`: the first eight
//! hex chars of `sha1("{salt}|{id}")` modulo 100 pick green when below the
//! split. Pinned ids are always green. The hash must not change while a
//! rollout is live, or resting orders switch cohorts.

use std::collections::HashSet;

use sha1::{Digest, Sha1};

use quoter_core::{ClientOrderId, Cohort};
use quoter_telemetry::Metrics;

use crate::rollout::RolloutConfig;

/// Bucket in `0..100` for an id.
pub fn bucket(salt: &str, client_order_id: &str) -> u32 {
    let digest = Sha1::digest(format!("{salt}|{client_order_id}").as_bytes());
    let word = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    word % 100
}

/// Routes client ids to cohorts.
#[derive(Debug, Clone, Default)]
pub struct CohortRouter {
    split_pct: u32,
    salt: String,
    pinned: HashSet<String>,
}

impl CohortRouter {
    pub fn new(split_pct: u32, salt: impl Into<String>) -> Self {
        Self {
            split_pct: split_pct.min(100),
            salt: salt.into(),
            pinned: HashSet::new(),
        }
    }

    pub fn from_rollout(rollout: &RolloutConfig) -> Self {
        let mut router = Self::new(rollout.traffic_split_pct, rollout.salt.clone());
        router.pinned = rollout.pinned_green.iter().cloned().collect();
        router
    }

    pub fn pin_green(mut self, client_order_id: impl Into<String>) -> Self {
        self.pinned.insert(client_order_id.into());
        self
    }

    pub fn route(&self, client_order_id: &ClientOrderId) -> Cohort {
        if self.pinned.contains(client_order_id.as_str()) {
            return Cohort::Green;
        }
        if self.split_pct == 0 {
            return Cohort::Blue;
        }
        if bucket(&self.salt, client_order_id.as_str()) < self.split_pct {
            Cohort::Green
        } else {
            Cohort::Blue
        }
    }

    /// `route` plus the per-cohort routing counter.
    pub fn route_and_count(&self, client_order_id: &ClientOrderId) -> Cohort {
        let cohort = self.route(client_order_id);
        Metrics::routed(cohort.as_str());
        cohort
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_is_stable() {
        let router = CohortRouter::new(50, "salt-a");
        let id = ClientOrderId::from("BTCUSDT-b-1700000000000-1-abcd");
        let first = router.route(&id);
        for _ in 0..100 {
            assert_eq!(router.route(&id), first);
        }
        // A fresh router with the same inputs agrees.
        assert_eq!(CohortRouter::new(50, "salt-a").route(&id), first);
    }

    #[test]
    fn test_bucket_known_values() {
        assert_eq!(bucket("quoter-v1", "BTCUSDT-b-1700000000000-1-abcd"), 13);
        assert_eq!(bucket("salt-a", "ETHUSDT-s-1-2-ffff"), 78);
        assert_eq!(bucket("x", "vip"), 58);
    }

    #[test]
    fn test_split_extremes() {
        let id = ClientOrderId::from("ETHUSDT-s-1-2-ffff");
        assert_eq!(CohortRouter::new(0, "x").route(&id), Cohort::Blue);
        assert_eq!(CohortRouter::new(100, "x").route(&id), Cohort::Green);
    }

    #[test]
    fn test_pin_overrides_hash() {
        let router = CohortRouter::new(0, "x").pin_green("vip");
        assert_eq!(router.route(&ClientOrderId::from("vip")), Cohort::Green);
        assert_eq!(router.route(&ClientOrderId::from("other")), Cohort::Blue);
    }

    #[test]
    fn test_split_is_roughly_proportional() {
        let router = CohortRouter::new(30, "salt");
        let green = (0..2_000)
            .filter(|i| router.route(&ClientOrderId::from(format!("id-{i}"))) == Cohort::Green)
            .count();
        assert!((400..800).contains(&green), "green={green}");
    }
}
