// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TerminateResult;
use crate::capture::StreamAccumulator;
use libc::{SIGKILL, SIGTERM};
use std::{convert::Infallible, os::unix::process::CommandExt, time::Duration};
use tokio::process::Child;
use tracing::debug;

/// Makes the worker the leader of a new process group, so that it and everything it spawns can
/// be signalled together.
pub(super) fn set_process_group(cmd: &mut std::process::Command) {
    cmd.process_group(0);
}

#[derive(Debug)]
pub(crate) struct Job(());

pub(super) fn create_job() -> Result<Job, Infallible> {
    Ok(Job(()))
}

pub(super) fn assign_process_to_job(
    _child: &Child,
    _job: Option<&Job>,
) -> Result<(), Infallible> {
    Ok(())
}

/// Terminates a worker's process group: SIGTERM, then SIGKILL once the grace period elapses.
///
/// Output keeps being collected while waiting, so that a worker blocked on a full pipe can exit.
pub(crate) async fn terminate_group(
    child: &mut Child,
    acc: &mut StreamAccumulator,
    pgid: Option<u32>,
    _job: Option<&Job>,
    grace_period: Duration,
) -> TerminateResult {
    let Some(pgid) = pgid else {
        return TerminateResult::Exited;
    };
    if child.id().is_none() {
        return TerminateResult::Exited;
    }

    if grace_period.is_zero() {
        signal_group(pgid, SIGKILL);
        return TerminateResult::Killed;
    }

    signal_group(pgid, SIGTERM);

    let mut sleep = std::pin::pin!(tokio::time::sleep(grace_period));
    loop {
        tokio::select! {
            () = acc.fill_buf(), if !acc.is_done() => {}
            _ = child.wait() => {
                // The process exited.
                break TerminateResult::Exited;
            }
            _ = &mut sleep => {
                // The process didn't exit -- need to do a hard shutdown.
                signal_group(pgid, SIGKILL);
                break TerminateResult::Killed;
            }
        }
    }
}

/// Sends SIGKILL to every process left in the worker's process group.
pub(crate) fn kill_group(pgid: Option<u32>, _job: Option<&Job>) {
    if let Some(pgid) = pgid {
        signal_group(pgid, SIGKILL);
    }
}

fn signal_group(pgid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // Negative PIDs address the whole process group. ESRCH means the group is already gone.
    let ret = unsafe { libc::kill(-pgid, signal) };
    if ret == -1 {
        debug!(
            pgid,
            signal,
            error = %std::io::Error::last_os_error(),
            "signalling worker process group failed",
        );
    }
}
