//! CLI integration tests for yaml-db-sync.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for various error conditions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the yaml-db-sync binary.
fn cmd() -> Command {
    Command::cargo_bin("yaml-db-sync").unwrap()
}

/// Write a config file that refers to a connection with no credentials set.
fn config_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
connection:
  identifier: cli_test_unresolvable_connection
  region: eu-west-1
task_groups:
  - name: nightly
    execution_mode: parallel
    max_workers: 2
    tasks:
      - name: customers
        type: upsert
        config:
          source_table: staging.customers
          target_table: customers
          primary_key: id
          checksum_columns: [name, email]
      - name: refresh
        type: stored_procedure
        config:
          name: refresh_stats
  - name: cleanup
    enabled: false
    tasks:
      - name: purge
        config:
          query: DELETE FROM audit
"#
    )
    .unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("yaml-db-sync"));
}

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("[default: config.yaml]"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Exit Code Tests - Config Errors
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_1() {
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "validate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("IO error"));
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("YAML error"));
}

#[test]
fn test_missing_required_fields_lists_every_reason() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "connection:").unwrap();
    writeln!(file, "  identifier: \"\"").unwrap();
    writeln!(file, "task_groups: []").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("connection.identifier is required"))
        .stderr(predicate::str::contains("connection.region is required"))
        .stderr(predicate::str::contains("At least one task group is required"));
}

// =============================================================================
// Command Behaviour
// =============================================================================

#[test]
fn test_validate_prints_plan() {
    let file = config_file();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Group 'nightly' [parallel, max_workers=2]"))
        .stdout(predicate::str::contains("customers (upsert)"))
        .stdout(predicate::str::contains("refresh (stored_procedure)"))
        .stdout(predicate::str::contains("Group 'cleanup' [sequential] (disabled)"));
}

#[test]
fn test_run_with_unresolvable_connection_reports_failure() {
    let file = config_file();

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--output-json",
            "--verbosity",
            "error",
            "run",
        ])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"success\": false"))
        .stdout(predicate::str::contains("\"status\": \"failed\""))
        .stdout(predicate::str::contains("\"task_name\": \"customers\""))
        .stdout(predicate::str::contains("\"task_name\": \"refresh\""));
}

#[test]
fn test_health_check_without_credentials_fails() {
    let file = config_file();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAILED"));
}

#[test]
fn test_example_config_is_valid() {
    let example = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config.example.yaml");

    cmd()
        .args(["--config", example, "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Group 'staging_sync' [parallel, max_workers=4]"))
        .stdout(predicate::str::contains("rebuild_stats (stored_procedure)"))
        .stdout(predicate::str::contains("Group 'archive' [sequential] (disabled)"));
}

#[test]
fn test_validate_inline_yaml() {
    let yaml = r#"
connection:
  identifier: inline_db
  region: us-east-1
task_groups:
  - name: adhoc
    tasks:
      - name: ping
        config:
          query: SELECT 1
"#;

    cmd()
        .args(["--config-yaml", yaml, "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Group 'adhoc' [sequential]"))
        .stdout(predicate::str::contains("ping (sql_query)"));
}

#[test]
fn test_inline_yaml_conflicts_with_config_path() {
    let file = config_file();

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--config-yaml",
            "task_groups: []",
            "validate",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
}
