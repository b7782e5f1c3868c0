//! Lifecycle manager configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Static settings of the order lifecycle manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Largest rounded price move, in bps, that still qualifies for amend.
    #[serde(default = "default_amend_price_threshold_bps")]
    pub amend_price_threshold_bps: Decimal,
    /// Largest rounded size change ratio that still qualifies for amend.
    #[serde(default = "default_amend_size_threshold")]
    pub amend_size_threshold: Decimal,
    /// Minimum time in book before an amend is attempted.
    #[serde(default = "default_min_time_in_book_ms")]
    pub min_time_in_book_ms: u64,
    #[serde(default = "default_order_ttl_ms")]
    pub order_ttl_ms: u64,
    #[serde(default = "default_price_drift_bps")]
    pub price_drift_bps: Decimal,
    #[serde(default = "default_true")]
    pub enable_anti_stale_guard: bool,
    #[serde(default = "default_stale_check_interval_ms")]
    pub stale_check_interval_ms: u64,
    #[serde(default = "default_stale_error_backoff_ms")]
    pub stale_error_backoff_ms: u64,
    /// Confirm orders locally without touching the venue.
    #[serde(default)]
    pub shadow: bool,
    /// Mid prices older than this are not used for drift checks.
    #[serde(default = "default_mid_max_age_ms")]
    pub mid_max_age_ms: u64,
    #[serde(default = "default_tick_size")]
    pub default_tick_size: Decimal,
    #[serde(default = "default_lot_size")]
    pub default_lot_size: Decimal,
}

fn default_amend_price_threshold_bps() -> Decimal {
    Decimal::ONE
}

fn default_amend_size_threshold() -> Decimal {
    Decimal::new(2, 1)
}

fn default_min_time_in_book_ms() -> u64 {
    500
}

fn default_order_ttl_ms() -> u64 {
    800
}

fn default_price_drift_bps() -> Decimal {
    Decimal::TWO
}

fn default_true() -> bool {
    true
}

fn default_stale_check_interval_ms() -> u64 {
    1_000
}

fn default_stale_error_backoff_ms() -> u64 {
    5_000
}

fn default_mid_max_age_ms() -> u64 {
    5_000
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 2)
}

fn default_lot_size() -> Decimal {
    Decimal::new(1, 2)
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            amend_price_threshold_bps: default_amend_price_threshold_bps(),
            amend_size_threshold: default_amend_size_threshold(),
            min_time_in_book_ms: default_min_time_in_book_ms(),
            order_ttl_ms: default_order_ttl_ms(),
            price_drift_bps: default_price_drift_bps(),
            enable_anti_stale_guard: default_true(),
            stale_check_interval_ms: default_stale_check_interval_ms(),
            stale_error_backoff_ms: default_stale_error_backoff_ms(),
            shadow: false,
            mid_max_age_ms: default_mid_max_age_ms(),
            default_tick_size: default_tick_size(),
            default_lot_size: default_lot_size(),
        }
    }
}

impl LifecycleConfig {
    /// Reject values that would make the manager misbehave.
    pub fn validate(&self) -> Result<(), String> {
        if self.amend_price_threshold_bps < Decimal::ZERO {
            return Err("amend_price_threshold_bps must be >= 0".into());
        }
        if self.amend_size_threshold < Decimal::ZERO {
            return Err("amend_size_threshold must be >= 0".into());
        }
        if self.price_drift_bps <= Decimal::ZERO {
            return Err("price_drift_bps must be > 0".into());
        }
        if self.stale_check_interval_ms == 0 {
            return Err("stale_check_interval_ms must be > 0".into());
        }
        if self.default_tick_size <= Decimal::ZERO || self.default_lot_size <= Decimal::ZERO {
            return Err("default tick and lot sizes must be > 0".into());
        }
        Ok(())
    }
}

/// Runtime policy knobs set by an outside controller. Unset fields fall
/// back to the static configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectiveOverrides {
    #[serde(default)]
    pub min_time_in_book_ms: Option<u64>,
    /// Overrides the amend price threshold.
    #[serde(default)]
    pub replace_threshold_bps: Option<Decimal>,
    #[serde(default)]
    pub levels_per_side_max: Option<u32>,
}
