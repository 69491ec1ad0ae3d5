// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TerminateResult;
use crate::capture::StreamAccumulator;
use std::{os::windows::process::CommandExt, time::Duration};
use tokio::process::Child;
pub(crate) use win32job::Job;
use win32job::JobError;
use windows_sys::Win32::System::{
    JobObjects::TerminateJobObject, Threading::CREATE_NEW_PROCESS_GROUP,
};

pub(super) fn set_process_group(cmd: &mut std::process::Command) {
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

pub(super) fn create_job() -> Result<Job, JobError> {
    Job::create_with_limit_info(win32job::ExtendedLimitInfo::new().limit_breakaway_ok())
}

pub(super) fn assign_process_to_job(child: &Child, job: Option<&Job>) -> Result<(), JobError> {
    // NOTE: Ideally we'd suspend the process before using ResumeThread for this, but that's currently
    // not possible due to https://github.com/rust-lang/rust/issues/96723 not being stable.
    if let Some(job) = job {
        let handle = match child.raw_handle() {
            Some(handle) => handle,
            None => {
                // If the handle is missing, the child has exited. Ignore this.
                return Ok(());
            }
        };

        job.assign_process(handle as isize)?;
    }

    Ok(())
}

/// Terminates a worker along with every process in its job object.
///
/// The grace period does not apply: Windows has no equivalent of SIGTERM for console processes
/// in another process group.
pub(crate) async fn terminate_group(
    child: &mut Child,
    _acc: &mut StreamAccumulator,
    _pid: Option<u32>,
    job: Option<&Job>,
    _grace_period: Duration,
) -> TerminateResult {
    kill_group(None, job);
    // Start killing the process directly for good measure.
    let _ = child.start_kill();
    TerminateResult::Killed
}

/// Terminates every process left in the worker's job object.
pub(crate) fn kill_group(_pid: Option<u32>, job: Option<&Job>) {
    if let Some(job) = job {
        let handle = job.handle();
        unsafe {
            // Ignore the error here -- it's likely due to the process exiting.
            // Note: 1 is the exit code returned by Windows.
            _ = TerminateJobObject(handle as _, 1);
        }
    }
}
