// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use isotest_metadata::{ChannelHandle, JobDescriptor};
use isotest_runner::{
    launcher::{Launcher, LauncherBuilder, WorkerCommand},
    supervisor::WorkerReport,
};
use std::{
    borrow::Cow,
    process::{Command, Output},
    time::Duration,
};

pub(crate) const FIXTURE_WORKER: &str = env!("CARGO_BIN_EXE_fixture-worker");
pub(crate) const ISOTEST_DUP: &str = env!("CARGO_BIN_EXE_isotest-dup");

/// Returns a launcher that starts the fixture worker, with a short grace period.
pub(crate) fn launcher() -> Launcher {
    let mut builder = LauncherBuilder::new();
    builder
        .set_worker_command(WorkerCommand::new(FIXTURE_WORKER, Vec::<String>::new()))
        .set_grace_period(Duration::from_millis(500));
    builder.build().unwrap()
}

/// Returns a job for `test_name`. The launcher fills in the result channel.
pub(crate) fn job(test_name: &str) -> JobDescriptor {
    JobDescriptor::new(test_name, ChannelHandle::new(-1))
}

/// Launches a fixture worker for `job` and waits for its report.
pub(crate) async fn run(job: JobDescriptor) -> WorkerReport {
    launcher().spawn(job).unwrap().wait().await
}

pub(crate) fn output_str(report: &WorkerReport) -> Cow<'_, str> {
    String::from_utf8_lossy(&report.output)
}

/// Extracts the PID printed by `sample_hangs`.
pub(crate) fn grandchild_pid(output: &str) -> u32 {
    output
        .lines()
        .find_map(|line| line.strip_prefix("grandchild pid: "))
        .unwrap_or_else(|| panic!("no grandchild pid in output:\n{output}"))
        .trim()
        .parse()
        .unwrap()
}

/// Polls until `pid` has exited, returning false if it is still alive after `timeout`.
#[cfg(unix)]
pub(crate) fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if !is_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

#[cfg(unix)]
fn is_alive(pid: u32) -> bool {
    let pid = libc::pid_t::try_from(pid).unwrap();
    // SAFETY: signal 0 only checks whether the process exists.
    if unsafe { libc::kill(pid, 0) } != 0 {
        return false;
    }
    // An exited process whose parent has not reaped it yet still exists as a zombie.
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !stat
            .rsplit_once(')')
            .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
        Err(_) => true,
    }
}

/// Runs the CLI with `args`.
pub(crate) fn isotest_cli(args: &[&str]) -> Output {
    Command::new(ISOTEST_DUP)
        .args(args)
        .env("ISOTEST_COLOR", "never")
        .output()
        .unwrap()
}
