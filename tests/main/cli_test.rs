//! CLI contract tests.

use assert_cmd::Command;

fn monitor() -> Command {
    let mut cmd = Command::cargo_bin("blp-monitor").expect("binary should build");
    cmd.env_remove("BLP_CONFIG_PATH")
        .env_remove("BLP_MODE")
        .env_remove("BLP_STORE")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn levels_prints_default_scale() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = monitor()
        .current_dir(dir.path())
        .arg("levels")
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.lines().collect::<Vec<_>>(),
        vec!["0\tUnclassified", "1\tConfidential", "2\tSecret", "3\tTop Secret"]
    );
}

#[test]
fn levels_reads_custom_scale_from_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[kernel]\nlevels = [\"Public\", \"Private\"]\n").expect("write");
    let output = monitor()
        .arg("levels")
        .arg("--config")
        .arg(&path)
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1\tPrivate"));
}

#[test]
fn check_config_reports_effective_settings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("blp-monitor.toml");
    std::fs::write(&path, "[kernel]\nmode = \"overridable\"\n").expect("write");
    let output = monitor()
        .current_dir(dir.path())
        .env("BLP_PORT", "6123")
        .arg("check-config")
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("overridable"));
    assert!(stdout.contains("127.0.0.1:6123"));
    assert!(stdout.contains("config OK"));
}

#[test]
fn check_config_rejects_empty_scale() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[kernel]\nlevels = []\n").expect("write");
    monitor()
        .arg("check-config")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn missing_explicit_config_fails() {
    monitor()
        .arg("check-config")
        .arg("--config")
        .arg("/nonexistent/blp-monitor.toml")
        .assert()
        .failure();
}
