// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use isotest_metadata::IsotestExitCode;
use pretty_assertions::assert_eq;
use std::process::{Command, Output};
use test_case::test_case;

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn fixture_worker_command() -> String {
    format!("'{FIXTURE_WORKER}'")
}

#[test]
fn test_run_reports_each_test() {
    let worker_command = fixture_worker_command();
    let output = isotest_cli(&[
        "run",
        "--worker-command",
        &worker_command,
        "sample_ok",
        "sample_fail",
        "sample_skip",
    ]);
    let stderr = stderr(&output);

    assert_eq!(
        output.status.code(),
        Some(IsotestExitCode::TEST_RUN_FAILED),
        "stderr:\n{stderr}"
    );
    let status_lines: Vec<_> = stderr
        .lines()
        .filter(|line| line.contains("s] sample_"))
        .map(|line| {
            let (status, rest) = line.split_once(" [").unwrap();
            let (_, name) = rest.split_once("] ").unwrap();
            (status.trim(), name)
        })
        .collect();
    assert_eq!(
        status_lines,
        [
            ("PASS", "sample_ok"),
            ("FAIL", "sample_fail"),
            ("SKIP", "sample_skip"),
        ]
    );
    assert!(
        stderr.contains("--- DIAGNOSTICS: sample_fail ---\nassertion failed: expected 2, got 3\n"),
        "stderr:\n{stderr}"
    );
    assert!(
        stderr.contains("3 tests run: 1 passed, 1 failed, 1 skipped"),
        "stderr:\n{stderr}"
    );
}

#[test]
fn test_rerun_failed() {
    let worker_command = fixture_worker_command();
    let output = isotest_cli(&[
        "run",
        "--worker-command",
        &worker_command,
        "--rerun-failed",
        "sample_fail",
    ]);
    let stderr = stderr(&output);

    assert_eq!(
        output.status.code(),
        Some(IsotestExitCode::TEST_RUN_FAILED),
        "stderr:\n{stderr}"
    );
    assert!(stderr.contains("RETRY FAIL"), "stderr:\n{stderr}");
    assert!(
        stderr.contains("--- OUTPUT: sample_fail ---\nRe-running sample_fail in verbose mode\n"),
        "stderr:\n{stderr}"
    );
}

#[test]
fn test_run_without_tests() {
    let output = isotest_cli(&["run"]);
    assert_eq!(
        output.status.code(),
        Some(IsotestExitCode::NO_TESTS_RUN),
        "stderr:\n{}",
        stderr(&output)
    );
}

#[test]
fn test_bad_worker_command() {
    let output = isotest_cli(&["run", "--worker-command", "'unterminated", "sample_ok"]);
    let stderr = stderr(&output);

    assert_eq!(
        output.status.code(),
        Some(IsotestExitCode::SETUP_ERROR),
        "stderr:\n{stderr}"
    );
    assert!(
        stderr.contains("error: failed to parse worker command `'unterminated`"),
        "stderr:\n{stderr}"
    );
}

#[test_case(&[] ; "no arguments")]
#[test_case(&["{}", "{}"] ; "two arguments")]
fn test_worker_usage_error(args: &[&str]) {
    let output = Command::new(FIXTURE_WORKER).args(args).output().unwrap();
    assert_eq!(
        output.status.code(),
        Some(IsotestExitCode::WORKER_USAGE_ERROR)
    );
    assert!(stderr(&output).starts_with("usage: "));
}

#[test]
fn test_worker_rejects_malformed_job() {
    let output = Command::new(FIXTURE_WORKER)
        .arg("not a job")
        .output()
        .unwrap();
    assert_eq!(
        output.status.code(),
        Some(IsotestExitCode::WORKER_SETUP_FAILED),
        "stderr:\n{}",
        stderr(&output)
    );
}

/// Runs test programs with the default worker command, which re-executes the CLI itself.
#[cfg(unix)]
#[test]
fn test_run_test_programs() -> color_eyre::Result<()> {
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use std::os::unix::fs::PermissionsExt;

    let dir = Utf8TempDir::with_prefix("isotest-programs-")?;
    let programs = [
        ("test_pass", "exit 0"),
        ("test_fail", "echo 'expected 1, got 2' >&2\nexit 1"),
        ("test_skip", "exit 77"),
    ];
    for (name, body) in programs {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }

    let output = isotest_cli(&[
        "run",
        "--test-dir",
        dir.path().as_str(),
        "test_pass",
        "test_fail",
        "test_skip",
    ]);
    let stderr = stderr(&output);

    assert_eq!(
        output.status.code(),
        Some(IsotestExitCode::TEST_RUN_FAILED),
        "stderr:\n{stderr}"
    );
    assert!(
        stderr.contains(indoc! {"
            --- DIAGNOSTICS: test_fail ---
            test program exited with exit code 1
            --- OUTPUT: test_fail ---
            expected 1, got 2
        "}),
        "stderr:\n{stderr}"
    );
    assert!(
        stderr.contains("3 tests run: 1 passed, 1 failed, 1 skipped"),
        "stderr:\n{stderr}"
    );
    Ok(())
}
