//! Integration tests for the spindle CLI.
//!
//! Only the offline surface is exercised here: argument validation,
//! error reporting, and help output. Anything that talks to a registry
//! is covered by the library tests with injected digests.

#![allow(deprecated)] // cargo_bin deprecation — macro replacement not yet stable

use assert_cmd::Command;
use predicates::prelude::*;

/// Convenience: get a `Command` for the `spindle` binary.
fn spindle() -> Command {
    Command::cargo_bin("spindle").expect("spindle binary not found")
}

#[test]
fn help_lists_subcommands() {
    spindle()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("images")
                .and(predicate::str::contains("package"))
                .and(predicate::str::contains("pull"))
                .and(predicate::str::contains("view")),
        );
}

#[test]
fn package_rejects_tagged_output_image() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.yaml"), "kind: Pod\n").unwrap();

    spindle()
        .args([
            "package",
            "-D",
            dir.path().to_str().unwrap(),
            "-O",
            "example.test/out:v1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("tag shouldn't be specified"));
}

#[test]
fn package_rejects_uppercase_output_image() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.yaml"), "kind: Pod\n").unwrap();

    spindle()
        .args([
            "package",
            "-D",
            dir.path().to_str().unwrap(),
            "-O",
            "example.test/Out",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("upper case"));
}

#[test]
fn images_fails_on_empty_directory() {
    let dir = tempfile::tempdir().unwrap();

    spindle()
        .args(["images", "-D", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no eligible manifest files"));
}

#[test]
fn images_fails_on_missing_directory() {
    spindle()
        .args(["images", "-D", "/nonexistent/spindle-test"])
        .assert()
        .failure();
}

#[test]
fn view_requires_image_flag() {
    spindle().arg("view").assert().failure().stderr(
        predicate::str::contains("--image").or(predicate::str::contains("required")),
    );
}

#[test]
fn pull_requires_image_and_dir() {
    spindle().arg("pull").assert().failure();
}

#[test]
fn log_level_flag_is_accepted_globally() {
    spindle()
        .args(["--log-level", "debug", "--help"])
        .assert()
        .success();
}
