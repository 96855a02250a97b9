use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

fn write_config(dir: &Path, file_name: &str, body: &str) -> PathBuf {
    let config_path = dir.join(file_name);
    fs::write(&config_path, body).expect("write config");
    config_path
}

fn write_valid_config(dir: &Path, file_name: &str) -> PathBuf {
    write_config(
        dir,
        file_name,
        r#"
name = "relaycast-cli-test"
env = "dev"

[bind]
ip = "127.0.0.1"
port = 39999

[signaling]
workers = 2

[observability.log]
output = "console"
"#,
    )
}

fn run_relaycast(args: &[&str], current_dir: Option<&Path>) -> Output {
    let mut cmd = Command::new(PathBuf::from(env!("CARGO_BIN_EXE_relaycast")));
    cmd.args(args);
    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }
    cmd.output().expect("run relaycast command")
}

#[test]
fn relaycast_test_command_accepts_explicit_valid_config() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_valid_config(temp.path(), "valid.toml");
    let output = run_relaycast(&["test", config_path.to_str().expect("utf8 path")], None);

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn relaycast_test_command_finds_default_config_in_current_directory() {
    let temp = tempfile::tempdir().expect("temp dir");
    write_valid_config(temp.path(), "config.toml");
    let output = run_relaycast(&["test"], Some(temp.path()));

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn relaycast_test_command_accepts_example_config() {
    let example = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.toml");
    let output = run_relaycast(&["test", example.to_str().expect("utf8 path")], None);

    assert!(
        output.status.success(),
        "example config should validate, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn relaycast_test_command_tolerates_warnings() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(
        temp.path(),
        "warn.toml",
        r#"
name = "relaycast-cli-warning-test"
env = "prod"

[bind]
ip = "127.0.0.1"
port = 0

[media]
max_payload = 1400
"#,
    );
    let output = run_relaycast(&["test", config_path.to_str().expect("utf8 path")], None);

    assert!(
        output.status.success(),
        "warnings must not fail validation, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn relaycast_test_command_rejects_zero_workers() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(
        temp.path(),
        "zero.toml",
        r#"
name = "relaycast-zero-workers"

[signaling]
workers = 0
"#,
    );
    let output = run_relaycast(&["test", config_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(stderr.contains("配置验证失败"), "unexpected stderr: {stderr}");
}

#[test]
fn relaycast_refuses_to_start_with_zero_workers() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(
        temp.path(),
        "zero.toml",
        r#"
name = "relaycast-zero-workers"

[bind]
ip = "127.0.0.1"
port = 39996

[signaling]
workers = 0
"#,
    );
    let output = run_relaycast(&["--config", config_path.to_str().expect("utf8 path")], None);

    assert!(!output.status.success(), "relay must not start");
}

#[test]
fn relaycast_test_command_fails_for_missing_custom_config_path() {
    let temp = tempfile::tempdir().expect("temp dir");
    let missing_path = temp.path().join("missing.toml");
    let output = run_relaycast(&["test", missing_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("Config file not found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn relaycast_test_command_fails_when_no_default_config_exists() {
    let temp = tempfile::tempdir().expect("temp dir");
    let output = run_relaycast(&["test"], Some(temp.path()));
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("No configuration file found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn relaycast_test_command_fails_for_invalid_config_content() {
    let temp = tempfile::tempdir().expect("temp dir");
    let bad_path = temp.path().join("bad.toml");
    fs::write(&bad_path, "name = \"broken\"\n[signaling\n").expect("write invalid toml");

    let output = run_relaycast(&["test", bad_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(stderr.contains("配置解析失败"), "unexpected stderr: {stderr}");
}

#[test]
fn relaycast_peer_rejects_missing_explicit_config() {
    let temp = tempfile::tempdir().expect("temp dir");
    let missing = temp.path().join("missing.toml");
    let output = run_relaycast(
        &[
            "peer",
            "--config",
            missing.to_str().expect("utf8 path"),
            "--server",
            "ws://127.0.0.1:1/ws",
        ],
        None,
    );
    assert!(!output.status.success(), "command should fail");
}
