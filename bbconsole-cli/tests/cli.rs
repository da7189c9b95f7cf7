//! CLI smoke tests that run the real binary.
//!
//! Nothing here touches a Bluetooth adapter; only help, argument validation
//! and completion output are exercised.

use assert_cmd::Command;
use predicates::prelude::*;

fn bbconsole() -> Command {
    Command::cargo_bin("bbconsole").expect("binary builds")
}

#[test]
fn test_help_lists_subcommands() {
    bbconsole()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("console"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn test_version_flag() {
    bbconsole()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bbconsole"));
}

#[test]
fn test_no_subcommand_fails_with_usage() {
    bbconsole()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_completions_bash_emits_script() {
    bbconsole()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bbconsole"));
}

#[test]
fn test_completions_rejects_unknown_shell() {
    bbconsole()
        .args(["completions", "notashell"])
        .assert()
        .failure();
}

#[test]
fn test_scan_rejects_bad_timeout() {
    bbconsole()
        .args(["scan", "--timeout", "soon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}
