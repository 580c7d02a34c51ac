//! CLI integration tests.
//!
//! These run the `misync` binary against temporary configuration files.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Write `contents` as a config file in `dir`.
fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("misync.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

fn misync() -> Command {
    Command::cargo_bin("misync").expect("Failed to find misync binary")
}

const FULL_CONFIG: &str = r#"
[master]
modules = "Sensor:se:10 Heater:he:11:0.0.0.2"
prefix = "ma"

[device]
name = "Heater"
settings = "Target:f4"
inputs = "seTemp:f4"
outputs = "Power:u2"

[sinks.json]
path = "values.json"

[sinks.log]
settings = true

[udp]
address = "1"
port = 7100
"#;

// ============================================================================
// check-config Tests
// ============================================================================

#[test]
fn check_config_prints_summary() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, FULL_CONFIG);

    misync()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Modules:  2"))
        .stdout(predicate::str::contains("Heater"))
        .stdout(predicate::str::contains("11:0.0.0.2"))
        .stdout(predicate::str::contains("Outputs:  Power:u2"))
        .stdout(predicate::str::contains("OK"));
}

#[test]
fn check_config_accepts_empty_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    misync()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Modules:  0"));
}

#[test]
fn check_config_rejects_bad_module_list() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[master]\nmodules = \"Sensor:se:notanumber\"\n");

    misync()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid module list"));
}

#[test]
fn check_config_rejects_bad_contract() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[device]\nname = \"Heater\"\nsettings = \"Target:zz\"\n");

    misync()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid device contract"));
}

#[test]
fn missing_config_file_fails() {
    let dir = TempDir::new().unwrap();

    misync()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load"));
}

#[test]
fn device_without_section_fails() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[udp]\nbind = \"127.0.0.1\"\nport = 0\n");

    misync()
        .arg("--config")
        .arg(&path)
        .arg("device")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No [device] section"));
}
