//! CLI smoke tests

use assert_cmd::Command;
use serde_json::Value;

#[test]
fn test_platforms_json_lists_every_platform() {
    let output = Command::cargo_bin("perp-data-ingestor")
        .unwrap()
        .args(["platforms", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let profiles: Vec<Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(profiles.len(), 6);

    let hyperliquid = profiles
        .iter()
        .find(|p| p["platform"] == "hyperliquid")
        .unwrap();
    assert_eq!(hyperliquid["fundingInterval"], "1h");
    assert_eq!(hyperliquid["resampled"], true);

    let aster = profiles.iter().find(|p| p["platform"] == "aster").unwrap();
    assert_eq!(aster["datasets"], serde_json::json!(["funding", "ohlcv"]));
}

#[test]
fn test_platforms_human_output() {
    let output = Command::cargo_bin("perp-data-ingestor")
        .unwrap()
        .arg("platforms")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("6 platforms:"));
    assert!(stdout.contains("binance"));
    assert!(stdout.contains("dydx"));
}

#[test]
fn test_run_rejects_unknown_platform() {
    Command::cargo_bin("perp-data-ingestor")
        .unwrap()
        .args(["run", "--platform", "mtgox"])
        .assert()
        .failure();
}
