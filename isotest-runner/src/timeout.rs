// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker-side deadline.
//!
//! The supervisor enforces a test's timeout from the outside, but a worker also guards itself: if
//! the supervisor goes away, a hung test must still not outlive its deadline by much.

use isotest_metadata::IsotestExitCode;
use std::{
    io,
    sync::mpsc::{self, RecvTimeoutError},
    thread::JoinHandle,
    time::Duration,
};
use tracing::{debug, warn};

/// A watchdog that terminates the worker once a deadline passes.
///
/// Dropping the guard disarms it.
#[derive(Debug)]
pub struct DeadlineGuard {
    armed: Option<Armed>,
}

#[derive(Debug)]
struct Armed {
    // Dropping the sender wakes the watchdog thread up.
    disarm_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl DeadlineGuard {
    /// Arms a guard that terminates this process, and the process group it leads, once `deadline`
    /// elapses.
    ///
    /// With no deadline, the returned guard is inert.
    pub fn arm(deadline: Option<Duration>) -> io::Result<Self> {
        Self::arm_with(deadline, deadline_exceeded)
    }

    /// Arms a guard that calls `on_expiry` on the watchdog thread once `deadline` elapses.
    pub fn arm_with<F>(deadline: Option<Duration>, on_expiry: F) -> io::Result<Self>
    where
        F: FnOnce(Duration) + Send + 'static,
    {
        let Some(deadline) = deadline else {
            return Ok(Self { armed: None });
        };

        let (disarm_tx, disarm_rx) = mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("isotest-deadline".to_owned())
            .spawn(move || match disarm_rx.recv_timeout(deadline) {
                Err(RecvTimeoutError::Timeout) => on_expiry(deadline),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            })?;
        debug!(?deadline, "armed worker deadline");

        Ok(Self {
            armed: Some(Armed { disarm_tx, thread }),
        })
    }

    /// Returns true if the guard has a deadline.
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Disarms the guard, waiting for the watchdog thread to exit.
    pub fn disarm(mut self) {
        self.disarm_impl();
    }

    fn disarm_impl(&mut self) {
        if let Some(Armed { disarm_tx, thread }) = self.armed.take() {
            drop(disarm_tx);
            if thread.join().is_err() {
                warn!("worker deadline watchdog panicked");
            }
        }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.disarm_impl();
    }
}

fn deadline_exceeded(deadline: Duration) {
    eprintln!(
        "isotest worker: deadline of {} exceeded, terminating",
        humantime::format_duration(deadline)
    );

    #[cfg(unix)]
    {
        use nix::{
            sys::signal::{Signal, killpg, raise},
            unistd::{getpgrp, getpid},
        };

        // Only take the whole group down if it is ours.
        let pgrp = getpgrp();
        if pgrp == getpid() {
            let _ = killpg(pgrp, Signal::SIGKILL);
        } else {
            let _ = raise(Signal::SIGKILL);
        }
    }

    std::process::exit(IsotestExitCode::WORKER_DEADLINE_EXCEEDED);
}
