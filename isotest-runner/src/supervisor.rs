// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Waits for workers, enforces their deadlines and decides their final results.
//!
//! A result reported over the result channel is only trusted if the worker also exited with
//! status 0 and the result names the test the worker was launched for. In every other case the
//! supervisor synthesizes a result: a missing result is never treated as success.

use crate::{
    capture::StreamAccumulator,
    config::WorkerConfig,
    errors::ChildFdError,
    helpers::{display_exited_with, output_tail},
    launcher::{TerminateResult, os},
    result_channel::ReceivedResult,
    time::{StopwatchStart, stopwatch},
};
use bytes::Bytes;
use chrono::{DateTime, Local};
use isotest_metadata::{IsotestExitCode, Outcome, WorkerResult};
use std::{error::Error, fmt, process::ExitStatus, sync::Arc, time::Duration};
use swrite::{SWrite, swrite};
use tokio::{process::Child, time::Instant};
use tracing::debug;

/// The amount of captured output included in synthesized diagnostics.
const DIAGNOSTIC_OUTPUT_LEN: usize = 4 * 1024;

/// A running worker process.
///
/// Dropping a worker without waiting for it kills the worker process.
pub struct Worker {
    test_name: String,
    child: Child,
    pid: Option<u32>,
    job: Option<os::Job>,
    acc: StreamAccumulator,
    timeout: Option<Duration>,
    grace_period: Duration,
    leak_timeout: Duration,
    started: Instant,
    stopwatch: StopwatchStart,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("test_name", &self.test_name)
            .field("pid", &self.pid)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Worker {
    pub(crate) fn new(
        test_name: String,
        child: Child,
        pid: Option<u32>,
        job: Option<os::Job>,
        acc: StreamAccumulator,
        timeout: Option<Duration>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            test_name,
            child,
            pid,
            job,
            acc,
            timeout,
            grace_period: config.grace_period,
            leak_timeout: config.leak_timeout,
            started: Instant::now(),
            stopwatch: stopwatch(),
        }
    }

    /// Returns the name of the test this worker runs.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Returns the process ID of the worker, which is also its process group ID on Unix.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Waits for the worker to finish, enforcing its timeout, and returns its report.
    ///
    /// The timeout counts from launch, not from the first call to this method.
    ///
    /// This never fails: I/O errors, crashes and timeouts are all reflected in the report.
    pub async fn wait(self) -> WorkerReport {
        let Self {
            test_name,
            mut child,
            pid,
            job,
            mut acc,
            timeout,
            grace_period,
            leak_timeout,
            started,
            stopwatch,
        } = self;

        let mut deadline = std::pin::pin!(async move {
            match timeout {
                Some(timeout) => tokio::time::sleep_until(started + timeout).await,
                None => std::future::pending().await,
            }
        });
        let mut timed_out = false;

        let exit_status = loop {
            tokio::select! {
                () = acc.fill_buf(), if !acc.is_done() => {}
                res = child.wait() => {
                    break res;
                }
                () = &mut deadline, if !timed_out => {
                    timed_out = true;
                    debug!(test_name, ?pid, ?timeout, "worker timed out, terminating");
                    let res = os::terminate_group(
                        &mut child,
                        &mut acc,
                        pid,
                        job.as_ref(),
                        grace_period,
                    )
                    .await;
                    if res == TerminateResult::Killed {
                        debug!(test_name, ?pid, "worker killed after grace period");
                    }
                }
            }
        };
        let exited_after = started.elapsed();
        let exit_status = match exit_status {
            Ok(status) => Some(status),
            Err(error) => {
                acc.push_error(ChildFdError::Wait(Arc::new(error)));
                None
            }
        };

        // Anything still in the group after a timeout or an abnormal exit is killed outright.
        let clean_exit = exit_status.is_some_and(|status| status.success());
        if timed_out || !clean_exit {
            os::kill_group(pid, job.as_ref());
        }

        // Descendants may still hold the output open after the worker itself has exited.
        let leaked = !drain(&mut acc, leak_timeout).await;
        if leaked {
            debug!(test_name, ?pid, "worker output still open after exit, killing group");
            os::kill_group(pid, job.as_ref());
            drain(&mut acc, leak_timeout).await;
        }

        let snapshot = stopwatch.snapshot();
        let (output, channel, errors) = acc.freeze();
        let received = ReceivedResult::parse(channel);
        let self_terminated = !timed_out
            && timeout.is_some_and(|timeout| exited_after >= timeout)
            && exit_status.is_some_and(is_deadline_exit);
        if self_terminated {
            debug!(test_name, ?pid, "worker terminated itself at its deadline");
        }
        let (result, source) = resolve_result(
            &test_name,
            ExitInfo {
                timed_out,
                self_terminated,
                timeout,
                exit_status,
            },
            received,
            &output,
            snapshot.duration,
        );
        debug!(
            test_name,
            outcome = %result.outcome,
            ?source,
            "worker finished",
        );

        WorkerReport {
            result,
            source,
            exit_status,
            output,
            leaked,
            start_time: snapshot.start_time,
            time_taken: snapshot.duration,
            errors,
        }
    }
}

/// Reads until every stream is closed or `timeout` elapses. Returns true if every stream closed.
async fn drain(acc: &mut StreamAccumulator, timeout: Duration) -> bool {
    let mut sleep = std::pin::pin!(tokio::time::sleep(timeout));
    while !acc.is_done() {
        tokio::select! {
            () = acc.fill_buf() => {}
            () = &mut sleep => return false,
        }
    }
    true
}

/// Returns true if `status` is how a worker's own deadline watchdog ends the worker.
fn is_deadline_exit(status: ExitStatus) -> bool {
    if status.code() == Some(IsotestExitCode::WORKER_DEADLINE_EXCEEDED) {
        return true;
    }
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use std::os::unix::process::ExitStatusExt;
            // The watchdog kills the whole process group, itself included.
            status.signal() == Some(libc::SIGKILL)
        } else {
            false
        }
    }
}

/// Everything the supervisor learned about a finished worker.
#[derive(Clone, Debug)]
pub struct WorkerReport {
    /// The final result, either reported by the worker or synthesized.
    pub result: WorkerResult,

    /// Where the result came from.
    pub source: ResultSource,

    /// The worker's exit status, if it could be observed.
    pub exit_status: Option<ExitStatus>,

    /// The worker's combined stdout and stderr.
    pub output: Bytes,

    /// True if processes spawned by the worker kept its output open after it exited.
    pub leaked: bool,

    /// When the worker was started.
    pub start_time: DateTime<Local>,

    /// How long the worker took, from launch to exit.
    pub time_taken: Duration,

    /// Errors encountered while reading the worker's output or result channel.
    pub errors: Vec<ChildFdError>,
}

/// Where a [`WorkerReport`]'s result came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResultSource {
    /// The worker reported the result over its result channel.
    Reported,

    /// The supervisor synthesized the result.
    Synthesized(SynthesizedReason),
}

/// Why the supervisor synthesized a result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SynthesizedReason {
    /// The worker exceeded its timeout.
    Timeout,

    /// The worker did not exit with status 0, or its exit status is unknown.
    AbnormalExit,

    /// The worker exited with status 0 without reporting a result.
    NoResult,

    /// The worker reported something that is not a valid result.
    Malformed,

    /// The worker reported a result for a different test.
    NameMismatch {
        /// The test name in the reported result.
        reported: String,
    },
}

#[derive(Clone, Copy, Debug)]
struct ExitInfo {
    // The supervisor terminated the worker after its timeout.
    timed_out: bool,
    // The worker's own deadline watchdog ended it.
    self_terminated: bool,
    timeout: Option<Duration>,
    exit_status: Option<ExitStatus>,
}

fn resolve_result(
    test_name: &str,
    exit: ExitInfo,
    received: ReceivedResult,
    output: &[u8],
    time_taken: Duration,
) -> (WorkerResult, ResultSource) {
    let exited_with = match exit.exit_status {
        Some(status) => display_exited_with(status),
        None => "exited with an unknown status".to_owned(),
    };

    let (outcome, reason, mut diagnostics) = if exit.timed_out || exit.self_terminated {
        let mut msg = match exit.timeout {
            Some(timeout) => format!(
                "test exceeded its timeout of {}",
                humantime::format_duration(timeout)
            ),
            None => "test exceeded its timeout".to_owned(),
        };
        if exit.self_terminated {
            swrite!(msg, "; worker stopped itself at its deadline and {exited_with}");
        } else {
            swrite!(msg, "; worker {exited_with}");
        }
        (Outcome::Timeout, SynthesizedReason::Timeout, msg)
    } else if !exit.exit_status.is_some_and(|status| status.success()) {
        let mut msg = format!("worker {exited_with}");
        if let ReceivedResult::Received(result) = &received {
            swrite!(msg, " after reporting `{}`", result.outcome);
        }
        (Outcome::Crashed, SynthesizedReason::AbnormalExit, msg)
    } else {
        match received {
            ReceivedResult::Received(result) if result.test_name == test_name => {
                return (result, ResultSource::Reported);
            }
            ReceivedResult::Received(result) => (
                Outcome::Crashed,
                SynthesizedReason::NameMismatch {
                    reported: result.test_name.clone(),
                },
                format!(
                    "worker reported a result for `{}`, but was launched for `{test_name}`",
                    result.test_name
                ),
            ),
            ReceivedResult::Empty => (
                Outcome::Crashed,
                SynthesizedReason::NoResult,
                format!("worker {exited_with} without reporting a result"),
            ),
            ReceivedResult::Malformed { error, .. } => {
                let mut msg = format!("worker reported a malformed result: {error}");
                let mut source = error.source();
                while let Some(err) = source {
                    swrite!(msg, ": {err}");
                    source = err.source();
                }
                (Outcome::Crashed, SynthesizedReason::Malformed, msg)
            }
        }
    };

    if !output.is_empty() {
        let (tail, truncated) = output_tail(output, DIAGNOSTIC_OUTPUT_LEN);
        if truncated {
            swrite!(diagnostics, "\n\n--- last {} bytes of output ---\n", tail.len());
        } else {
            diagnostics.push_str("\n\n--- output ---\n");
        }
        diagnostics.push_str(&tail);
    }

    let result = WorkerResult {
        test_name: test_name.to_owned(),
        outcome,
        duration: time_taken,
        diagnostics: Some(diagnostics),
    };
    (result, ResultSource::Synthesized(reason))
}
