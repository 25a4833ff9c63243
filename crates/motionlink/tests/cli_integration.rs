//! Integration tests for the `motionlink` binary.
//!
//! These run the CLI via `assert_cmd` against throwaway config files, so no
//! hardware is needed. Commands that would touch a device point it at a path
//! that does not exist.

use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn cli() -> assert_cmd::Command {
    cargo_bin_cmd!("motionlink")
}

const TWO_CHANNEL_CONFIG: &str = r#"
[engine]
send_timeout_ms = 200
send_slots = 4

[[devices]]
name = "sensor-bar"

[[devices.channels]]
path = "/nonexistent/motionlink/hidraw0"
vendor_id = 0x1d5a
product_id = 0xc080
input_report_len = 28
output_report_len = 7

[[devices.channels]]
path = "/nonexistent/motionlink/hidraw1"
vendor_id = 0x1d5a
product_id = 0xc080
input_report_len = 28
output_report_len = 31
"#;

fn write_config(contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

fn json_of(cmd: &mut assert_cmd::Command) -> serde_json::Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("command should produce valid JSON")
}

#[test]
fn cli_help_succeeds() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("motionlink"));
}

#[test]
fn cli_version_prints_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn cli_devices_json_lists_configured_devices() {
    let (_dir, path) = write_config(TWO_CHANNEL_CONFIG);
    let json = json_of(cli().arg("--json").arg("--config").arg(&path).arg("devices"));
    assert_eq!(json["count"], 1);
    assert_eq!(json["devices"][0]["index"], 1);
    assert_eq!(json["devices"][0]["name"], "sensor-bar");
    assert_eq!(json["devices"][0]["channels"][1]["output_report_len"], 31);
}

#[test]
fn cli_devices_without_config_says_so() {
    let dir = TempDir::new().unwrap();
    cli()
        .arg("--config")
        .arg(dir.path().join("missing.toml"))
        .arg("devices")
        .assert()
        .success()
        .stdout(predicate::str::contains("No devices configured"));
}

#[test]
fn cli_config_json_produces_valid_json() {
    let (_dir, path) = write_config(TWO_CHANNEL_CONFIG);
    let json = json_of(cli().args(["--json", "config", "--config"]).arg(&path));
    assert!(json["settings"].is_object());
    assert_eq!(json["settings"]["engine"]["send_slots"], 4);
    assert_eq!(json["config_file_exists"], true);
    assert_eq!(json["problems"].as_array().map(Vec::len), Some(0));
}

#[test]
fn cli_config_reports_problems() {
    let (_dir, path) = write_config("[engine]\nsend_slots = 0\n");
    cli()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Problems:"))
        .stdout(predicate::str::contains("send_slots"));
}

// ── --verbose flag ──

#[test]
fn cli_verbose_flag_accepted() {
    let (_dir, path) = write_config(TWO_CHANNEL_CONFIG);
    cli().arg("-v").arg("--config").arg(&path).arg("config").assert().success();
}

#[test]
fn cli_double_verbose_accepted() {
    let (_dir, path) = write_config(TWO_CHANNEL_CONFIG);
    cli().arg("-vv").arg("--config").arg(&path).arg("devices").assert().success();
}

// ── info ──

#[test]
fn cli_info_json_by_index() {
    let (_dir, path) = write_config(TWO_CHANNEL_CONFIG);
    let json = json_of(cli().args(["--json", "info", "1", "--config"]).arg(&path));
    assert_eq!(json["device"]["name"], "sensor-bar");
    assert_eq!(json["device"]["vendor"], 0x1d5a);
    assert_eq!(json["device"]["opened"], false);
    assert_eq!(json["device"]["status"], "added");
    assert_eq!(json["channels"].as_array().map(Vec::len), Some(2));
    assert_eq!(json["send_slots"], 4);
}

#[test]
fn cli_info_by_name() {
    let (_dir, path) = write_config(TWO_CHANNEL_CONFIG);
    cli()
        .args(["info", "sensor-bar", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("1d5a:c080"));
}

#[test]
fn cli_info_unknown_device_fails() {
    let (_dir, path) = write_config(TWO_CHANNEL_CONFIG);
    cli()
        .args(["info", "3", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn cli_invalid_config_is_rejected_before_use() {
    let (_dir, path) = write_config("[engine]\nsend_timeout_ms = 0\n\n[[devices]]\nname = \"x\"\n");
    cli()
        .args(["info", "1", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config error"));
}

// ── send / read ──

#[test]
fn cli_send_rejects_bad_hex() {
    let (_dir, path) = write_config(TWO_CHANNEL_CONFIG);
    cli()
        .args(["send", "1", "0g", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Report error"));
}

#[test]
fn cli_send_to_missing_device_fails() {
    let (_dir, path) = write_config(TWO_CHANNEL_CONFIG);
    cli()
        .args(["send", "sensor-bar", "01 02 03", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn cli_read_from_missing_device_fails() {
    let (_dir, path) = write_config(TWO_CHANNEL_CONFIG);
    cli()
        .args(["read", "1", "--timeout-ms", "10", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}
