use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

/// Scratch dir with a placeholder `uv` so resolver discovery succeeds.
fn sandbox() -> (TempDir, assert_cmd::Command) {
    let temp = tempfile::tempdir().expect("tempdir");
    let uv = temp.path().join("uv");
    fs::write(&uv, "#!/bin/sh\nexit 1\n").expect("write uv");
    let mut cmd = cargo_bin_cmd!("layerpack");
    cmd.current_dir(temp.path())
        .env("LAYERPACK_UV", &uv)
        .env("LAYERPACK_CACHE_PATH", temp.path().join("cache"))
        .env_remove("LAYERPACK_INDEX_URL")
        .env("NO_COLOR", "1");
    (temp, cmd)
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn help_lists_both_commands() {
    let assert = cargo_bin_cmd!("layerpack").arg("--help").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 help");
    assert!(stdout.contains("create-layer"), "{stdout}");
    assert!(stdout.contains("analyze"), "{stdout}");
}

#[test]
fn input_is_required() {
    let (_temp, mut cmd) = sandbox();
    cmd.args(["create-layer", "-n", "deps"]).assert().failure();
}

#[test]
fn requirements_and_packages_are_mutually_exclusive() {
    let (_temp, mut cmd) = sandbox();
    cmd.args(["analyze", "-r", "requirements.txt", "-p", "six"])
        .assert()
        .failure();
}

#[test]
fn invalid_optimization_level_is_a_configuration_error() {
    let (_temp, mut cmd) = sandbox();
    let assert = cmd
        .args(["create-layer", "-p", "six", "-n", "deps", "--optimization-level", "5"])
        .assert()
        .code(1);
    let stderr = stderr_of(assert.get_output());
    assert!(stderr.contains("error[ConfigurationError]"), "{stderr}");
    assert!(stderr.contains("hint:"), "{stderr}");
}

#[test]
fn unknown_config_keys_are_rejected() {
    let (temp, mut cmd) = sandbox();
    let config = temp.path().join("layerpack.toml");
    fs::write(&config, "runtime = \"python3.11\"\nmystery = true\n").expect("write config");
    let assert = cmd
        .args(["analyze", "-p", "six", "--config"])
        .arg(&config)
        .assert()
        .code(1);
    let stderr = stderr_of(assert.get_output());
    assert!(stderr.contains("error[ConfigurationError]"), "{stderr}");
    assert!(stderr.contains("mystery"), "{stderr}");
}

#[test]
fn conflicting_pins_report_dependency_conflict() {
    let (temp, mut cmd) = sandbox();
    let requirements = temp.path().join("requirements.txt");
    fs::write(&requirements, "requests==2.31.0\nrequests==2.25.0\n").expect("write requirements");
    let assert = cmd
        .args(["create-layer", "-n", "conflict", "-r"])
        .arg(&requirements)
        .assert()
        .code(1);
    let stderr = stderr_of(assert.get_output());
    assert!(stderr.contains("error[DependencyConflictError]"), "{stderr}");
    assert!(stderr.contains("requests==2.25.0"), "{stderr}");
    assert!(!temp.path().join("dist/conflict.zip").exists());
}

#[test]
fn json_envelope_on_failure() {
    let (_temp, mut cmd) = sandbox();
    let assert = cmd
        .args([
            "--json",
            "create-layer",
            "-p",
            "requests==2.31.0,requests==2.25.0",
            "-n",
            "conflict",
        ])
        .assert()
        .code(1);
    let payload: Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json envelope");
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["kind"], "DependencyConflictError");
    assert!(payload["message"].as_str().unwrap_or_default().contains("requests"));
}

#[test]
fn missing_resolver_is_reported() {
    let temp = tempfile::tempdir().expect("tempdir");
    let assert = cargo_bin_cmd!("layerpack")
        .current_dir(temp.path())
        .env("LAYERPACK_UV", temp.path().join("no-such-uv"))
        .env("PATH", temp.path())
        .env("LAYERPACK_CACHE_PATH", temp.path().join("cache"))
        .env("NO_COLOR", "1")
        .args(["analyze", "-p", "six"])
        .assert()
        .code(1);
    let stderr = stderr_of(assert.get_output());
    assert!(stderr.contains("error[ResolverUnavailableError]"), "{stderr}");
}
