// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Integration tests for the rearcam CLI
//!
//! These tests run the binary end-to-end using the assert_cmd crate pattern.
//! Everything runs against the simulated board, no hardware required.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::{env, fs, path::PathBuf, process};

/// Helper to create a Command for the rearcam binary
fn rearcam_cmd() -> Command {
    let mut cmd = Command::cargo_bin("rearcam").unwrap();
    cmd.env("RUST_LOG", "error");
    cmd
}

/// Writes `json` to a per-test file under the system temp directory.
fn config_file(name: &str, json: &str) -> PathBuf {
    let dir = env::temp_dir().join(format!("rearcam-cli-{}", process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, json).unwrap();
    path
}

const SMALL_CONFIG: &str = r#"{
    "capture": { "width": 64, "height": 32 },
    "display": { "sync": { "h_active": 64, "v_active": 32, "clock_hz": 2572800 } },
    "gear": { "detect_delay_ms": 20 },
    "buffer_count": 4,
    "cma_bytes": 1048576
}"#;

// =============================================================================
// Basic CLI Tests
// =============================================================================

#[test]
fn test_cli_help() {
    rearcam_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("power"))
        .stdout(predicate::str::contains("layout"));
}

#[test]
fn test_cli_version() {
    rearcam_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rearcam"));
}

#[test]
fn test_unknown_command() {
    rearcam_cmd().arg("record").assert().failure();
}

// =============================================================================
// Power Command
// =============================================================================

#[test]
fn test_power_words() {
    rearcam_cmd()
        .args([
            "power",
            "--words",
            "0x12345678 0xff110000 17 1 10 0 0 0x87654321, 0x12345678,0xff110002,1,5,0x87654321",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("sequence (2 actions)"))
        .stdout(predicate::str::contains("gpio 17 -> 1 (10 ms), 0 (0 ms)"))
        .stdout(predicate::str::contains("clock on (5 ms)"));
}

#[test]
fn test_power_words_json() {
    let output = rearcam_cmd()
        .args([
            "--json",
            "power",
            "--words",
            "0x12345678 0xff110001 1 20 0x87654321",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json[0]["name"], "sequence");
    assert_eq!(json[0]["actions"][0]["type"], "pmic");
    assert_eq!(json[0]["actions"][0]["delay_ms"], 20);
}

#[test]
fn test_power_malformed_sequence() {
    rearcam_cmd()
        .args(["power", "--words", "0x12345678 0xff110000 17 1"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_power_requires_input() {
    rearcam_cmd().arg("power").assert().code(2);
}

#[test]
fn test_power_bad_word() {
    rearcam_cmd()
        .args(["power", "--words", "0x12345678 banana"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("banana"));
}

// =============================================================================
// Layout Command
// =============================================================================

#[test]
fn test_layout_default() {
    rearcam_cmd()
        .arg("layout")
        .assert()
        .success()
        .stdout(predicate::str::contains("capture 720x480"))
        .stdout(predicate::str::contains("overlay 1024x600"));
}

#[test]
fn test_layout_json_with_rotation() {
    let output = rearcam_cmd()
        .args(["layout", "--rotation", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["capture"]["planes"][0]["stride"], 768);
    assert_eq!(json["rotation"]["width"], 1227);
    assert_eq!(json["rotation"]["height"], 720);
    assert_eq!(json["buffers"], 13);
}

#[test]
fn test_layout_missing_config() {
    rearcam_cmd()
        .args(["layout", "--config", "/nonexistent/rearcam.json"])
        .assert()
        .code(3);
}

#[test]
fn test_layout_invalid_config() {
    let path = config_file("invalid.json", r#"{ "buffer_count": 99 }"#);
    rearcam_cmd()
        .args(["layout", "--config"])
        .arg(&path)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("buffer_count"));
}

#[test]
fn test_layout_oversized_config() {
    let path = config_file(
        "oversized.json",
        r#"{ "display": { "sync": { "h_active": 65536, "v_active": 32768 } } }"#,
    );
    rearcam_cmd()
        .args(["layout", "--config"])
        .arg(&path)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("exceeds"));
}

// =============================================================================
// Simulate Command
// =============================================================================

#[test]
#[serial]
fn test_simulate_gear_cycle() {
    let path = config_file("small.json", SMALL_CONFIG);
    let output = rearcam_cmd()
        .args([
            "--json",
            "simulate",
            "--fps",
            "200",
            "--engage-ms",
            "20",
            "--duration-ms",
            "400",
            "--config",
        ])
        .arg(&path)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["width"], 64);
    assert_eq!(json["interrupted"], false);
    assert_eq!(json["stats"]["turn_ons"], 1);
    assert_eq!(json["stats"]["turn_offs"], 1);
    assert!(json["stats"]["frames_displayed"].as_u64().unwrap() > 0);
}

#[test]
#[serial]
fn test_simulate_rotation_text() {
    let path = config_file("small-rot.json", SMALL_CONFIG);
    rearcam_cmd()
        .args([
            "simulate",
            "--rotation",
            "--guide-lines",
            "--fps",
            "200",
            "--engage-ms",
            "20",
            "--duration-ms",
            "400",
            "--config",
        ])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("(rotated)"))
        .stdout(predicate::str::contains("Frames rotated:"));
}

#[test]
fn test_simulate_rejects_zero_fps() {
    rearcam_cmd()
        .args(["simulate", "--fps", "0"])
        .assert()
        .code(2);
}
