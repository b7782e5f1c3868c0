//! Application configuration.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use quoter_core::PortfolioTarget;
use quoter_executor::{BusConfig, EffectiveOverrides, LifecycleConfig, OrchestratorConfig, RolloutConfig};
use quoter_gateway::{BackoffPolicy, ChaosConfig};
use quoter_reconcile::ReconcileConfig;
use quoter_risk::{CircuitConfig, GuardConfig, SchedulerConfig, SchedulerSet, ThrottleConfig};

use crate::error::{AppError, AppResult};

/// One quoted instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    /// Starting mid of the paper market.
    pub initial_mid: Decimal,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    /// Exposure cap. Without one the symbol is not capped.
    #[serde(default)]
    pub target: Option<PortfolioTarget>,
}

/// Symmetric quote ladder around the mid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderConfig {
    /// Levels per side.
    #[serde(default = "default_levels")]
    pub levels: u32,
    /// Distance between levels, in bps of the mid.
    #[serde(default = "default_spacing_bps")]
    pub spacing_bps: Decimal,
    #[serde(default = "default_level_qty")]
    pub level_qty: Decimal,
}

fn default_levels() -> u32 {
    3
}

fn default_spacing_bps() -> Decimal {
    Decimal::from(5)
}

fn default_level_qty() -> Decimal {
    Decimal::ONE
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            spacing_bps: default_spacing_bps(),
            level_qty: default_level_qty(),
        }
    }
}

/// Simulated venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Largest mid move per tick, in bps.
    #[serde(default = "default_volatility_bps")]
    pub volatility_bps: Decimal,
    /// Fill resting orders the mid crosses.
    #[serde(default = "default_fill_on_cross")]
    pub fill_on_cross: bool,
}

fn default_volatility_bps() -> Decimal {
    Decimal::from(3)
}

fn default_fill_on_cross() -> bool {
    true
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            volatility_bps: default_volatility_bps(),
            fill_on_cross: default_fill_on_cross(),
        }
    }
}

fn default_snapshot_path() -> String {
    "data/orders.json".to_string()
}

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where the order table is saved on shutdown and restored on start.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    #[serde(default)]
    pub symbols: Vec<SymbolConfig>,
    #[serde(default)]
    pub ladder: LadderConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub overrides: EffectiveOverrides,
    #[serde(default)]
    pub rollout: RolloutConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// No circuit breaker when absent.
    #[serde(default)]
    pub circuit: Option<CircuitConfig>,
    #[serde(default)]
    pub retry: BackoffPolicy,
    #[serde(default)]
    pub chaos: ChaosConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            symbols: Vec::new(),
            ladder: LadderConfig::default(),
            paper: PaperConfig::default(),
            lifecycle: LifecycleConfig::default(),
            overrides: EffectiveOverrides::default(),
            rollout: RolloutConfig::default(),
            bus: BusConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            reconcile: ReconcileConfig::default(),
            throttle: ThrottleConfig::default(),
            guard: GuardConfig::default(),
            scheduler: SchedulerConfig::default(),
            circuit: None,
            retry: BackoffPolicy::default(),
            chaos: ChaosConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject values the components would misbehave on.
    pub fn validate(&self) -> AppResult<()> {
        if self.symbols.is_empty() {
            return Err(AppError::Config("at least one symbol is required".into()));
        }
        let mut seen = HashSet::new();
        for s in &self.symbols {
            if !seen.insert(s.symbol.as_str()) {
                return Err(AppError::Config(format!("duplicate symbol {}", s.symbol)));
            }
            if s.initial_mid <= Decimal::ZERO {
                return Err(AppError::Config(format!("{}: initial_mid must be > 0", s.symbol)));
            }
            if s.tick_size <= Decimal::ZERO || s.lot_size <= Decimal::ZERO {
                return Err(AppError::Config(format!(
                    "{}: tick_size and lot_size must be > 0",
                    s.symbol
                )));
            }
        }
        if self.ladder.levels == 0 {
            return Err(AppError::Config("ladder.levels must be >= 1".into()));
        }
        if self.ladder.spacing_bps <= Decimal::ZERO || self.ladder.level_qty <= Decimal::ZERO {
            return Err(AppError::Config(
                "ladder.spacing_bps and ladder.level_qty must be > 0".into(),
            ));
        }
        if self.paper.volatility_bps < Decimal::ZERO {
            return Err(AppError::Config("paper.volatility_bps must be >= 0".into()));
        }
        self.lifecycle
            .validate()
            .map_err(|e| AppError::Config(format!("lifecycle: {e}")))?;
        if self.rollout.traffic_split_pct > 100 {
            return Err(AppError::Config(
                "rollout.traffic_split_pct must be within 0..=100".into(),
            ));
        }
        if self.bus.max_place_batch == 0 {
            return Err(AppError::Config("bus.max_place_batch must be >= 1".into()));
        }
        if self.orchestrator.max_parallel == 0 || self.orchestrator.tick_interval_ms == 0 {
            return Err(AppError::Config(
                "orchestrator.max_parallel and tick_interval_ms must be >= 1".into(),
            ));
        }
        self.reconcile.validate()?;
        SchedulerSet::from_config(&self.scheduler)?;
        Ok(())
    }

    pub fn symbol_names(&self) -> Vec<String> {
        self.symbols.iter().map(|s| s.symbol.clone()).collect()
    }

    pub fn targets(&self) -> HashMap<String, PortfolioTarget> {
        self.symbols
            .iter()
            .filter_map(|s| s.target.map(|t| (s.symbol.clone(), t)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MINIMAL: &str = r#"
        [[symbols]]
        symbol = "BTCUSDT"
        initial_mid = "50000"
        tick_size = "0.1"
        lot_size = "0.001"

        [[symbols]]
        symbol = "ETHUSDT"
        initial_mid = "2500"
        tick_size = "0.01"
        lot_size = "0.01"
        target = { target_usd = "5000", max_levels = 4 }
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.symbols.len(), 2);
        assert_eq!(config.ladder, LadderConfig::default());
        assert_eq!(config.lifecycle.order_ttl_ms, 800);
        assert_eq!(config.reconcile.interval_ms, 25_000);
        assert!(config.circuit.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_targets_only_for_configured_symbols() {
        let config = AppConfig::from_toml(MINIMAL).unwrap();
        let targets = config.targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets["ETHUSDT"].target_usd, dec!(5000));
        assert_eq!(targets["ETHUSDT"].max_levels, 4);
    }

    #[test]
    fn test_validate_rejects_empty_symbols() {
        assert!(matches!(
            AppConfig::default().validate(),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = AppConfig::from_toml(MINIMAL).unwrap();
        let dup = config.symbols[0].clone();
        config.symbols.push(dup);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate symbol BTCUSDT"));
    }

    #[test]
    fn test_validate_rejects_bad_split_and_window() {
        let mut config = AppConfig::from_toml(MINIMAL).unwrap();
        config.rollout.traffic_split_pct = 101;
        assert!(config.validate().is_err());

        let mut config = AppConfig::from_toml(MINIMAL).unwrap();
        config.scheduler.windows = vec!["25:00-26:00".into()];
        assert!(matches!(config.validate(), Err(AppError::Risk(_))));
    }

    #[test]
    fn test_parse_error_is_config_error() {
        assert!(matches!(
            AppConfig::from_toml("symbols = 3"),
            Err(AppError::Config(_))
        ));
    }
}
