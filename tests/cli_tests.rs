//! CLI integration tests using assert_cmd.
//!
//! These tests invoke the actual `pgbm` binary and verify its output.

use assert_cmd::Command;
use predicates::prelude::*;

#[allow(deprecated)]
fn pgbm_cmd() -> Command {
    Command::cargo_bin("pgbm").expect("binary should exist")
}

/// A port nothing listens on: bind, read the port, release it.
fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn test_version_flag() {
    pgbm_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_help_flag() {
    pgbm_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("PostgreSQL backup manager"))
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("backup"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("jobs"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_backup_help_shows_options() {
    pgbm_cmd()
        .args(["backup", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--no-data"))
        .stdout(predicate::str::contains("--no-schema"))
        .stdout(predicate::str::contains("--no-compress"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_jobs_add_help_shows_options() {
    pgbm_cmd()
        .args(["jobs", "add", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--name"))
        .stdout(predicate::str::contains("--schedule"))
        .stdout(predicate::str::contains("--label"))
        .stdout(predicate::str::contains("--disabled"));
}

#[test]
fn test_start_help() {
    pgbm_cmd()
        .args(["start", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--data-dir"));
}

#[test]
fn test_no_subcommand_shows_help() {
    pgbm_cmd()
        .assert()
        .success()
        .stdout(predicate::str::contains("PostgreSQL backup manager"));
}

#[test]
fn test_jobs_add_requires_schedule() {
    pgbm_cmd()
        .args(["jobs", "add", "--name", "nightly"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--schedule"));
}

#[test]
fn test_history_without_daemon_reports_connection_error() {
    let port = unused_port();
    pgbm_cmd()
        .args(["--port", &port.to_string(), "history"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not connect"))
        .stderr(predicate::str::contains("pgbm start"));
}

#[test]
fn test_status_without_daemon_reports_connection_error() {
    let port = unused_port();
    pgbm_cmd()
        .args(["--port", &port.to_string(), "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not connect"));
}

#[test]
fn test_backup_with_unsupported_storage_fails() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = tmp.path().join("config.json");
    std::fs::write(&config, r#"{"storage": {"type": "ftp"}}"#).unwrap();

    pgbm_cmd()
        .args([
            "backup",
            "--config",
            config.to_str().unwrap(),
            "--data-dir",
            tmp.path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported storage type"));
}

#[test]
fn test_backup_reads_config_from_data_dir() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("config.json"),
        r#"{"storage": {"type": "ftp"}}"#,
    )
    .unwrap();

    pgbm_cmd()
        .env_remove("PGBM_CONFIG_DIR")
        .args(["backup", "--data-dir", tmp.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported storage type"));
}
