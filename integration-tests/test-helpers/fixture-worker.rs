// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A worker binary with a fixed set of sample tests, used by the integration tests.
//!
//! Each sample exercises one way a test can finish: reporting a result, crashing, hanging, or
//! exiting without reporting anything.

use isotest_runner::{
    executor::{TestContext, TestOutcome, TestRegistry},
    setup::{StandardSetup, UNICODE_GUARD_ENV},
    worker::worker_main,
};
use std::{
    io::Write,
    process::{Command, Stdio},
    time::Duration,
};

/// The diagnostics reported by `sample_unicode_failure`.
const UNICODE_DIAGNOSTICS: &str = "échec: ошибка ✗ 失敗";

/// Sub-cases of `sample_cases`, filtered with the job's match and ignore patterns.
const CASES: [&str; 4] = [
    "test_getcwd",
    "test_chdir",
    "test_listdir",
    "Nested::test_getcwd_long",
];

fn main() {
    let mut registry = TestRegistry::new();
    registry
        .register("sample_ok", |_| TestOutcome::success())
        .register("sample_fail", |_| {
            TestOutcome::failure("assertion failed: expected 2, got 3")
        })
        .register("sample_skip", |_| TestOutcome::skipped("requires network"))
        .register("sample_panic", |_| panic!("sample panic"))
        .register("sample_hangs", sample_hangs)
        .register("sample_crash", |_| std::process::abort())
        .register("sample_exit_nonzero", |_| std::process::exit(3))
        .register("sample_exit_zero_silently", |_| std::process::exit(0))
        .register("sample_noisy", sample_noisy)
        .register("sample_unicode_failure", |_| {
            TestOutcome::failure(UNICODE_DIAGNOSTICS)
        })
        .register("sample_writes_artifact", sample_writes_artifact)
        .register("sample_cases", sample_cases)
        .register("sample_env", sample_env)
        .register("sample_detached_child", sample_detached_child)
        .register("sample_fds_closed", sample_fds_closed);

    worker_main(&registry, &StandardSetup::new());
}

/// Starts a long-running grandchild, prints its PID and then never returns.
fn sample_hangs(_cx: &TestContext<'_>) -> TestOutcome {
    if cfg!(unix) {
        match Command::new("sleep").arg("3600").stdin(Stdio::null()).spawn() {
            Ok(child) => println!("grandchild pid: {}", child.id()),
            Err(err) => return TestOutcome::error(format!("failed to spawn sleep: {err}")),
        }
    }
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

/// Writes more than a pipe buffer's worth of output to both streams.
fn sample_noisy(_cx: &TestContext<'_>) -> TestOutcome {
    let line = "x".repeat(1023);
    let mut stdout = std::io::stdout().lock();
    let mut stderr = std::io::stderr().lock();
    for _ in 0..256 {
        if writeln!(stdout, "{line}")
            .and_then(|()| writeln!(stderr, "{line}"))
            .is_err()
        {
            return TestOutcome::error("failed to write output");
        }
    }
    TestOutcome::success()
}

/// Creates a file in the current directory, failing if another worker already created it there.
fn sample_writes_artifact(cx: &TestContext<'_>) -> TestOutcome {
    println!("work dir: {}", cx.work_dir());
    let path = cx.work_dir().join("artifact.txt");
    if path.exists() {
        return TestOutcome::failure(format!("{path} already exists"));
    }
    if let Err(err) = std::fs::write("artifact.txt", cx.name()) {
        return TestOutcome::error(format!("failed to write artifact: {err}"));
    }
    // Give concurrently running workers a chance to see the file if directories were shared.
    std::thread::sleep(Duration::from_millis(200));
    TestOutcome::success()
}

fn sample_cases(cx: &TestContext<'_>) -> TestOutcome {
    let ran: Vec<_> = CASES
        .into_iter()
        .filter(|case| cx.should_run(case))
        .collect();
    println!("ran: {}", ran.join(", "));
    TestOutcome::success()
}

/// Checks the environment the worker was launched with.
fn sample_env(cx: &TestContext<'_>) -> TestOutcome {
    let mut problems = Vec::new();
    if std::env::var("ISOTEST").as_deref() != Ok("1") {
        problems.push("ISOTEST is not 1".to_owned());
    }
    if std::env::var("ISOTEST_TEST_NAME").as_deref() != Ok(cx.name()) {
        problems.push("ISOTEST_TEST_NAME does not name the test".to_owned());
    }
    if std::env::var_os(UNICODE_GUARD_ENV).is_none() {
        problems.push(format!("{UNICODE_GUARD_ENV} is not set"));
    }
    if let Some(seed) = cx.job().random_seed {
        let expected = seed.to_string();
        if std::env::var("ISOTEST_RANDOM_SEED").as_deref() != Ok(expected.as_str()) {
            problems.push("ISOTEST_RANDOM_SEED does not match the job".to_owned());
        }
    }
    if !cx.is_resource_enabled("network") {
        problems.push("network resource is not enabled".to_owned());
    }

    if problems.is_empty() {
        TestOutcome::success()
    } else {
        TestOutcome::failure(problems.join("\n"))
    }
}

/// Starts a grandchild that outlives the worker without holding on to its output.
fn sample_detached_child(_cx: &TestContext<'_>) -> TestOutcome {
    let spawned = Command::new("sleep")
        .arg("5")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(_) => TestOutcome::success(),
        Err(err) => TestOutcome::error(format!("failed to spawn sleep: {err}")),
    }
}

/// Fails if any descriptor named by the job's match patterns is open in this process.
fn sample_fds_closed(cx: &TestContext<'_>) -> TestOutcome {
    let mut open = Vec::new();
    for pattern in cx.job().match_tests.iter().flatten() {
        let Ok(fd) = pattern.parse::<i32>() else {
            return TestOutcome::error(format!("`{pattern}` is not a descriptor"));
        };
        if is_fd_open(fd) {
            open.push(pattern.as_str());
        }
    }
    if open.is_empty() {
        TestOutcome::success()
    } else {
        TestOutcome::failure(format!("descriptors open in worker: {}", open.join(", ")))
    }
}

#[cfg(unix)]
fn is_fd_open(fd: i32) -> bool {
    // SAFETY: F_GETFD only queries descriptor flags.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

#[cfg(not(unix))]
fn is_fd_open(_fd: i32) -> bool {
    false
}
