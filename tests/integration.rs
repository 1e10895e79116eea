//! Integration tests for the parafmt CLI.
//!
//! Every test runs the real binary against a scratch tree, so process
//! isolation re-executes the binary under test as its workers.

use assert_cmd::Command;
use nix::sys::signal::{Signal, kill};
use nix::sys::stat::Mode as FileMode;
use nix::unistd::{Pid, mkfifo};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::tempdir;

/// Get a command for the parafmt binary, isolated from the caller's env.
fn parafmt(dir: &Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("parafmt").unwrap();
    cmd.current_dir(dir)
        .env_remove("PARAFMT_CONCURRENCY")
        .env_remove("PARAFMT_ISOLATION")
        .env_remove("PARAFMT_LOG")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

/// Scratch tree with two files needing work and one already clean.
fn sample_tree(root: &Path) {
    fs::create_dir_all(root.join("src/nested")).unwrap();
    fs::write(root.join("src/dirty.rs"), "fn main() {  \n\tbody();\n}\n\n\n").unwrap();
    fs::write(root.join("src/nested/notes.md"), "# Title\r\n\r\n\r\n\r\ntext").unwrap();
    fs::write(root.join("src/clean.txt"), "already fine\n").unwrap();
}

#[test]
fn test_help_displays() {
    let tmp = tempdir().unwrap();
    parafmt(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--check"))
        .stdout(predicate::str::contains("--isolation"))
        .stdout(predicate::str::contains("internal-worker").not());
}

#[test]
fn test_version_displays() {
    let tmp = tempdir().unwrap();
    parafmt(tmp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("parafmt"));
}

#[test]
fn test_check_and_write_conflict() {
    let tmp = tempdir().unwrap();
    parafmt(tmp.path())
        .args(["--check", "--write"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_check_lists_files_and_fails() {
    let tmp = tempdir().unwrap();
    sample_tree(tmp.path());

    parafmt(tmp.path())
        .args(["--check", "src"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("dirty.rs"))
        .stdout(predicate::str::contains("nested/notes.md"))
        .stdout(predicate::str::contains("clean.txt").not());

    // Check never writes
    assert_eq!(
        fs::read_to_string(tmp.path().join("src/dirty.rs")).unwrap(),
        "fn main() {  \n\tbody();\n}\n\n\n"
    );
}

#[test]
fn test_check_passes_on_clean_tree() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("a.txt"), "one\n").unwrap();
    fs::write(tmp.path().join("b.txt"), "two\n").unwrap();

    parafmt(tmp.path())
        .arg("--check")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_write_rewrites_in_place_then_check_passes() {
    let tmp = tempdir().unwrap();
    sample_tree(tmp.path());

    parafmt(tmp.path())
        .args(["--write", "-j", "2", "--batch-size", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dirty.rs"));

    assert_eq!(
        fs::read_to_string(tmp.path().join("src/dirty.rs")).unwrap(),
        "fn main() {\n    body();\n}\n"
    );
    assert_eq!(
        fs::read_to_string(tmp.path().join("src/nested/notes.md")).unwrap(),
        "# Title\n\ntext\n"
    );

    // Formatting is idempotent
    parafmt(tmp.path()).arg("--check").assert().success();
}

#[test]
fn test_thread_isolation_matches_process_isolation() {
    let tmp = tempdir().unwrap();
    sample_tree(tmp.path());

    parafmt(tmp.path())
        .args(["--write", "--isolation", "thread"])
        .assert()
        .success();

    assert_eq!(
        fs::read_to_string(tmp.path().join("src/dirty.rs")).unwrap(),
        "fn main() {\n    body();\n}\n"
    );
    parafmt(tmp.path())
        .args(["--check", "--isolation", "process"])
        .assert()
        .success();
}

#[test]
fn test_isolation_from_env() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("a.txt"), "x  \n").unwrap();

    parafmt(tmp.path())
        .env("PARAFMT_ISOLATION", "thread")
        .arg("--check")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("a.txt"));
}

#[test]
fn test_print_mode_emits_formatted_content() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("only.txt"), "hello   \n\n\n\nworld").unwrap();

    for isolation in ["process", "thread"] {
        parafmt(tmp.path())
            .args(["--isolation", isolation, "only.txt"])
            .assert()
            .success()
            .stdout("hello\n\nworld\n");
    }

    // Print mode leaves the file alone
    assert_eq!(
        fs::read_to_string(tmp.path().join("only.txt")).unwrap(),
        "hello   \n\n\n\nworld"
    );
}

#[test]
fn test_failed_files_fail_the_run() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("good.txt"), "fine  \n").unwrap();
    fs::write(tmp.path().join("blob.txt"), b"bin\0ary").unwrap();

    parafmt(tmp.path())
        .arg("--write")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("blob.txt"));

    // The good file was still formatted
    assert_eq!(
        fs::read_to_string(tmp.path().join("good.txt")).unwrap(),
        "fine\n"
    );
}

#[test]
fn test_ignore_file_and_extensions() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("generated")).unwrap();
    fs::write(root.join("generated/out.rs"), "x  \n").unwrap();
    fs::write(root.join("keep.rs"), "y  \n").unwrap();
    fs::write(root.join("skip.log"), "z  \n").unwrap();
    fs::write(root.join(".parafmtignore"), "# build output\ngenerated/\n").unwrap();

    parafmt(root)
        .arg("--check")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("keep.rs"))
        .stdout(predicate::str::contains("out.rs").not())
        .stdout(predicate::str::contains("skip.log").not());

    parafmt(root)
        .args(["--check", "--ext", "log"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("skip.log"))
        .stdout(predicate::str::contains("keep.rs").not());
}

#[test]
fn test_local_config_applies() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join(".parafmt.json"), "{\"indent_width\": 2}\n").unwrap();
    fs::write(tmp.path().join("a.txt"), "\tx\n").unwrap();

    parafmt(tmp.path()).arg("--write").assert().success();
    assert_eq!(
        fs::read_to_string(tmp.path().join("a.txt")).unwrap(),
        "  x\n"
    );
}

#[test]
fn test_missing_path_is_fatal() {
    let tmp = tempdir().unwrap();
    parafmt(tmp.path())
        .args(["--check", "does-not-exist"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error"))
        .stderr(predicate::str::contains("does-not-exist"));
}

#[test]
fn test_quiet_still_lists_changed_files() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("a.txt"), "x  \n").unwrap();
    fs::write(tmp.path().join("b.txt"), "fine\n").unwrap();

    parafmt(tmp.path())
        .args(["--list-different", "-q"])
        .assert()
        .code(1)
        .stdout("a.txt\n");
}

#[test]
fn test_many_files_across_units() {
    let tmp = tempdir().unwrap();
    for i in 0..120 {
        fs::write(tmp.path().join(format!("f{i:03}.txt")), format!("line {i}   \n")).unwrap();
    }

    let output = parafmt(tmp.path())
        .args(["--check", "-j", "3", "--batch-size", "7"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let listed = String::from_utf8(output.stdout).unwrap();
    assert_eq!(listed.lines().count(), 120);
}

#[test]
fn test_piped_stderr_has_no_ansi_escapes() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("a.txt"), "x  \n").unwrap();

    parafmt(tmp.path())
        .env_remove("NO_COLOR")
        .args(["--check", "-vv", "--isolation", "thread"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Starting run"))
        .stderr(predicate::str::contains("\u{1b}[").not());
}

/// Pids whose parent is `parent`, read from `/proc`.
fn child_pids(parent: u32) -> Vec<i32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse::<i32>().ok())
        .filter(|pid| {
            fs::read_to_string(format!("/proc/{pid}/stat"))
                .ok()
                .and_then(|stat| {
                    // Fields after the parenthesized command name: state, ppid, ...
                    let rest = &stat[stat.rfind(')')? + 1..];
                    rest.split_whitespace().nth(1)?.parse::<u32>().ok()
                })
                == Some(parent)
        })
        .collect()
}

#[test]
fn test_killed_worker_process_aborts_run() {
    let tmp = tempdir().unwrap();
    // Reading a FIFO with no writer blocks, so the unit stays busy
    mkfifo(&tmp.path().join("stall.txt"), FileMode::S_IRWXU).unwrap();

    #[allow(deprecated)]
    let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin("parafmt"));
    let controller = cmd
        .current_dir(tmp.path())
        .env_remove("PARAFMT_ISOLATION")
        .env("NO_COLOR", "1")
        .args(["--check", "-j", "1", "stall.txt"])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let worker = loop {
        if let Some(pid) = child_pids(controller.id()).first().copied() {
            break pid;
        }
        assert!(Instant::now() < deadline, "worker process never started");
        std::thread::sleep(Duration::from_millis(20));
    };
    kill(Pid::from_raw(worker), Signal::SIGKILL).unwrap();

    let output = controller.wait_with_output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1), "stderr: {stderr}");
    assert!(stderr.contains("killed by signal SIGKILL"), "stderr: {stderr}");
    assert!(stderr.contains("an execution unit stopped"), "stderr: {stderr}");
}
