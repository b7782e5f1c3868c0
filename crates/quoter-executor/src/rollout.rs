//! Blue/green strategy overlays.
//!
//! Each cohort carries a [`StrategyPatch`]: a typed set of optional
//! overrides applied to the base [`LifecycleConfig`] by value. The base
//! is borrowed immutably, so applying a patch can never change it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use quoter_core::Cohort;

use crate::config::LifecycleConfig;

/// Per-cohort overrides of the lifecycle thresholds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyPatch {
    #[serde(default)]
    pub amend_price_threshold_bps: Option<Decimal>,
    #[serde(default)]
    pub amend_size_threshold: Option<Decimal>,
    #[serde(default)]
    pub min_time_in_book_ms: Option<u64>,
    #[serde(default)]
    pub order_ttl_ms: Option<u64>,
    #[serde(default)]
    pub price_drift_bps: Option<Decimal>,
}

impl StrategyPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// `base` with every set field replaced.
    pub fn apply(&self, base: &LifecycleConfig) -> LifecycleConfig {
        let mut patched = base.clone();
        if let Some(v) = self.amend_price_threshold_bps {
            patched.amend_price_threshold_bps = v;
        }
        if let Some(v) = self.amend_size_threshold {
            patched.amend_size_threshold = v;
        }
        if let Some(v) = self.min_time_in_book_ms {
            patched.min_time_in_book_ms = v;
        }
        if let Some(v) = self.order_ttl_ms {
            patched.order_ttl_ms = v;
        }
        if let Some(v) = self.price_drift_bps {
            patched.price_drift_bps = v;
        }
        patched
    }
}

/// Traffic split between the blue baseline and the green candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Share of client ids routed to green, 0..=100.
    #[serde(default)]
    pub traffic_split_pct: u32,
    #[serde(default)]
    pub salt: String,
    /// Client ids always routed to green.
    #[serde(default)]
    pub pinned_green: Vec<String>,
    #[serde(default)]
    pub blue: StrategyPatch,
    #[serde(default)]
    pub green: StrategyPatch,
}

impl RolloutConfig {
    pub fn patch(&self, cohort: Cohort) -> &StrategyPatch {
        match cohort {
            Cohort::Blue => &self.blue,
            Cohort::Green => &self.green,
        }
    }

    /// Per-cohort configs derived from `base`.
    pub fn resolve(&self, base: &LifecycleConfig) -> CohortConfigs {
        CohortConfigs {
            blue: self.blue.apply(base),
            green: self.green.apply(base),
        }
    }
}

/// Lifecycle configs already patched for each cohort.
#[derive(Debug, Clone)]
pub struct CohortConfigs {
    blue: LifecycleConfig,
    green: LifecycleConfig,
}

impl CohortConfigs {
    pub fn get(&self, cohort: Cohort) -> &LifecycleConfig {
        match cohort {
            Cohort::Blue => &self.blue,
            Cohort::Green => &self.green,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_patch_leaves_base_untouched() {
        let base = LifecycleConfig::default();
        let before = base.clone();
        let patch = StrategyPatch {
            order_ttl_ms: Some(2_000),
            price_drift_bps: Some(dec!(5)),
            ..Default::default()
        };

        let patched = patch.apply(&base);
        assert_eq!(patched.order_ttl_ms, 2_000);
        assert_eq!(patched.price_drift_bps, dec!(5));
        assert_eq!(patched.min_time_in_book_ms, base.min_time_in_book_ms);
        assert_eq!(base, before);
    }

    #[test]
    fn test_resolve_per_cohort() {
        let rollout = RolloutConfig {
            green: StrategyPatch {
                min_time_in_book_ms: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(rollout.blue.is_empty());
        let configs = rollout.resolve(&LifecycleConfig::default());
        assert_eq!(configs.get(Cohort::Blue).min_time_in_book_ms, 500);
        assert_eq!(configs.get(Cohort::Green).min_time_in_book_ms, 0);
    }
}
