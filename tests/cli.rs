use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn devsitter(data_dir: &Path, work_dir: &Path) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("devsitter").into();
    cmd.env("DEVSITTER_DATA_DIR", data_dir);
    cmd.current_dir(work_dir);
    cmd.timeout(Duration::from_secs(30));
    cmd
}

#[test]
fn test_help_mentions_supervision() {
    let dir = TempDir::new().unwrap();
    devsitter(&dir.path().join("data"), dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Supervises"));
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    devsitter(&dir.path().join("data"), dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("devsitter"));
}

#[test]
fn test_kill_rejects_malformed_pid_but_finishes_the_batch() {
    let dir = TempDir::new().unwrap();
    devsitter(&dir.path().join("data"), dir.path())
        .args(["kill", "12;rm -rf /", "4000000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("killed 1 of 2"))
        .stderr(predicate::str::contains("invalid pid"));
}

#[test]
fn test_kill_dead_pid_counts_as_killed() {
    // Terminating an already-dead process is success, not an error
    let dir = TempDir::new().unwrap();
    devsitter(&dir.path().join("data"), dir.path())
        .args(["kill", "4000000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("killed 1 of 1"));
}

#[test]
fn test_list_json_with_no_servers_is_empty_array() {
    let dir = TempDir::new().unwrap();
    devsitter(&dir.path().join("data"), dir.path())
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_run_outside_a_project_fails() {
    let dir = TempDir::new().unwrap();
    devsitter(&dir.path().join("data"), dir.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a project directory"));
}
