//! Shipped configuration loads, validates and survives a TOML round trip.

use std::path::PathBuf;

use quoter_bot::{AppConfig, Application};
use rust_decimal_macros::dec;

fn default_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/default.toml")
}

#[test]
fn test_default_config_loads_and_validates() {
    let config = AppConfig::from_file(default_config_path()).expect("load default config");
    config.validate().expect("default config is valid");

    assert_eq!(config.symbol_names(), vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
    assert_eq!(config.targets().len(), 2);
    assert_eq!(config.lifecycle.price_drift_bps, dec!(50));
    assert_eq!(config.rollout.green.min_time_in_book_ms, Some(250));
    assert_eq!(config.circuit.as_ref().map(|c| c.fail_threshold), Some(10));
    assert!(!config.chaos.enabled);
}

#[test]
fn test_round_trip_preserves_config() {
    let config = AppConfig::from_file(default_config_path()).expect("load default config");
    let text = toml::to_string(&config).expect("serialize");
    let back = AppConfig::from_toml(&text).expect("parse serialized");
    assert_eq!(back, config);
}

#[test]
fn test_missing_file_is_config_error() {
    let err = AppConfig::from_file("does/not/exist.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config"));
}

#[tokio::test]
async fn test_application_builds_from_default_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = AppConfig::from_file(default_config_path()).expect("load default config");
    config.snapshot_path = dir.path().join("orders.json").to_string_lossy().into_owned();

    let app = Application::new(config).expect("build application");
    assert_eq!(app.restore().expect("restore"), 0);
    assert!(!app.manager().is_shadow());
}
