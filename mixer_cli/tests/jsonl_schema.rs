use assert_cmd::prelude::*;
use rstest::rstest;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::{TempDir, tempdir};

fn write_sim_config(dir: &TempDir) -> PathBuf {
    let toml = r#"
[serial]
response_delay_ms = 20

[control]
resolution_ms = 20

[simulation]
enabled = true
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn json_lines(bytes: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("not JSON ({e}): {l}")))
        .collect()
}

/// Every stdout line of a manual run is JSON, ending with a summary.
#[rstest]
fn jsonl_manual_run_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_sim_config(&dir);

    let out = Command::cargo_bin("mixer_cli")
        .unwrap()
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("manual")
        .arg("--setpoints")
        .arg("1,0.5,0,0,0")
        .arg("--duration-s")
        .arg("0.2")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let lines = json_lines(&out);
    let states: Vec<&str> = lines
        .iter()
        .filter(|v| v["event"] == "state")
        .filter_map(|v| v["to"].as_str())
        .collect();
    assert_eq!(states, vec!["Run Manual", "Idle"]);

    let summary = lines.last().expect("at least one line");
    assert_eq!(summary["event"], "summary");
    assert_eq!(summary["command"], "manual");
    assert_eq!(summary["final_state"], "Idle");
    assert!(summary["elapsed_s"].as_f64().unwrap() >= 0.2);
    assert!(summary["setpoints_sent"].as_u64().unwrap() >= 2);
    assert!(summary["frames"].as_u64().unwrap() >= 1);
    assert!(summary["rows"].is_null());
}

/// A trip prints a structured error object on stderr.
#[rstest]
fn jsonl_trip_error_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_sim_config(&dir);

    let out = Command::cargo_bin("mixer_cli")
        .unwrap()
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("manual")
        .arg("--setpoints")
        .arg("0,0,0,0,11")
        .assert()
        .code(2)
        .get_output()
        .stderr
        .clone();

    let err = json_lines(&out)
        .into_iter()
        .find(|v| v.get("reason").is_some())
        .expect("error object on stderr");
    assert_eq!(err["reason"], "EmergencyStop");
    assert_eq!(err["exit_code"], 2);
    assert_eq!(
        err["details"]["violations"][0],
        "MFC 5 Setpoint above maximum"
    );
    assert!(err["message"].as_str().unwrap().starts_with("What happened"));
}

#[rstest]
fn jsonl_ports_schema() {
    let out = Command::cargo_bin("mixer_cli")
        .unwrap()
        .arg("--json")
        .arg("--sim")
        .arg("--log-level")
        .arg("error")
        .arg("ports")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let lines = json_lines(&out);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["event"], "port");
    assert_eq!(lines[0]["name"], "sim0");
    assert_eq!(lines[0]["selected"], true);
}
