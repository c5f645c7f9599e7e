//! End-to-end CLI tests driving the built `grove` binary against real
//! plan directories on disk.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::tempdir;

fn grove() -> Command {
    Command::cargo_bin("grove").unwrap()
}

#[test]
fn init_creates_plan_config() {
    let dir = tempdir().unwrap();
    let plan_dir = dir.path().join("myplan");

    grove().arg("init").arg(&plan_dir).assert().success().stdout(predicate::str::contains("initialized plan"));

    assert!(plan_dir.join(".grove-plan.yml").exists());
}

#[test]
fn add_then_status_reports_pending_job() {
    let dir = tempdir().unwrap();
    let plan_dir = dir.path().join("myplan");

    grove().arg("init").arg(&plan_dir).assert().success();

    grove()
        .arg("add")
        .arg("--plan")
        .arg(&plan_dir)
        .arg("Write the README")
        .arg("--type")
        .arg("shell")
        .arg("--body")
        .arg("echo hi")
        .assert()
        .success()
        .stdout(predicate::str::contains("added"));

    grove()
        .arg("status")
        .arg("--plan")
        .arg(&plan_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("pending"));
}

#[test]
fn run_executes_shell_job_to_completion() {
    let dir = tempdir().unwrap();
    let plan_dir = dir.path().join("myplan");
    grove().arg("init").arg(&plan_dir).assert().success();
    grove()
        .arg("add")
        .arg("--plan")
        .arg(&plan_dir)
        .arg("Say hi")
        .arg("--type")
        .arg("shell")
        .arg("--body")
        .arg("echo hi")
        .assert()
        .success();

    grove()
        .arg("run")
        .arg(&plan_dir)
        .arg("--all")
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));

    grove()
        .arg("status")
        .arg("--plan")
        .arg(&plan_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));
}

// Touches the real active-plan pointer file under the user's data
// directory (there's no per-test override for it), so this must not
// interleave with another test doing the same.
#[test]
#[serial]
fn set_current_unset_round_trip() {
    let dir = tempdir().unwrap();
    let plan_dir = dir.path().join("myplan");
    grove().arg("init").arg(&plan_dir).assert().success();

    grove().arg("set").arg(&plan_dir).assert().success();
    grove().arg("current").assert().success();
    grove().arg("unset").assert().success().stdout(predicate::str::contains("cleared"));
}

#[test]
fn review_command_fires_on_review_hook() {
    let dir = tempdir().unwrap();
    let plan_dir = dir.path().join("myplan");
    grove().arg("init").arg(&plan_dir).assert().success();

    let marker = dir.path().join("reviewed.txt");
    std::fs::write(
        plan_dir.join(".grove-plan.yml"),
        format!("hooks:\n  on_review: \"echo {{{{plan_name}}}} > {}\"\n", marker.display()),
    )
    .unwrap();

    grove().arg("review").arg(&plan_dir).assert().success().stdout(predicate::str::contains("plan marked review"));

    let contents = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(contents.trim(), "myplan");
}

#[test]
fn run_on_empty_plan_reports_no_failures() {
    let dir = tempdir().unwrap();
    let plan_dir = dir.path().join("myplan");
    grove().arg("init").arg(&plan_dir).assert().success();

    grove().arg("run").arg(&plan_dir).arg("--all").assert().success();
}
