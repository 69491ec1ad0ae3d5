// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-process setup performed by a worker before it runs its test.

use crate::config::WorkerConfig;
use isotest_metadata::JobDescriptor;
use itertools::Itertools;
use std::{
    backtrace::Backtrace,
    ffi::OsString,
    fs::File,
    io::{self, Write},
    sync::{Once, OnceLock},
};
use tracing::{debug, warn};

/// The environment variable holding a value that cannot be represented in ASCII.
///
/// Tests use it to check that they handle environments which are not valid UTF-8.
pub const UNICODE_GUARD_ENV: &str = "ISOTEST_UNICODE_GUARD";

/// Environment variables exported to the test by [`StandardSetup`].
pub mod env {
    /// The random seed, if the job specifies one.
    pub const RANDOM_SEED: &str = "ISOTEST_RANDOM_SEED";
    /// The garbage collection threshold, if the job specifies one.
    pub const GC_THRESHOLD: &str = "ISOTEST_GC_THRESHOLD";
    /// Set to `1` in profile-guided optimization training mode.
    pub const PGO: &str = "ISOTEST_PGO";
    /// The verbosity level.
    pub const VERBOSE: &str = "ISOTEST_VERBOSE";
    /// Comma-separated resources the test may use.
    pub const USE_RESOURCES: &str = "ISOTEST_USE_RESOURCES";
}

/// Returns the value [`UNICODE_GUARD_ENV`] is set to when absent.
///
/// On Unix this is a byte that is not valid UTF-8. Elsewhere it is a non-ASCII character.
pub fn unicode_guard_value() -> OsString {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use std::os::unix::ffi::OsStringExt;
            OsString::from_vec(vec![0xff])
        } else {
            OsString::from("\u{e6}")
        }
    }
}

static ORIGINAL_STDOUT: OnceLock<File> = OnceLock::new();

/// Returns the duplicate of stdout recorded by [`StandardSetup`], if any.
///
/// Tests may redirect the process's stdout; this handle always refers to the stream the worker
/// was started with.
pub fn original_stdout() -> Option<&'static File> {
    ORIGINAL_STDOUT.get()
}

/// A hook to prepare the worker process before the test runs.
///
/// Errors are reported as an `error` outcome for the test.
pub trait ProcessSetup {
    /// Prepares the process to run the test described by `job`.
    fn setup_process(&self, job: &JobDescriptor) -> io::Result<()> {
        let _ = job;
        Ok(())
    }
}

/// A [`ProcessSetup`] that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSetup;

impl ProcessSetup for NoopSetup {}

/// The process setup used by isotest's own worker.
#[derive(Clone, Debug)]
pub struct StandardSetup {
    min_open_files: u64,
}

impl StandardSetup {
    /// Creates a new `StandardSetup` with the default settings.
    pub fn new() -> Self {
        Self::from_config(&WorkerConfig::default())
    }

    /// Creates a new `StandardSetup` from a worker configuration.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            min_open_files: config.min_open_files,
        }
    }

    /// Sets the open file limit raised to when the job does not specify one.
    pub fn with_min_open_files(mut self, min_open_files: u64) -> Self {
        self.min_open_files = min_open_files;
        self
    }
}

impl Default for StandardSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSetup for StandardSetup {
    fn setup_process(&self, job: &JobDescriptor) -> io::Result<()> {
        install_panic_hook();
        #[cfg(unix)]
        fatal_signal::install(job.test_name().unwrap_or("<unknown>"));

        let open_files = job.max_open_files.unwrap_or(self.min_open_files);
        if let Err(error) = raise_open_file_limit(open_files) {
            warn!(open_files, %error, "failed to raise open file limit");
        }

        if ORIGINAL_STDOUT.get().is_none() {
            // If another thread raced us here, its copy is just as good.
            let _ = ORIGINAL_STDOUT.set(duplicate_stdout()?);
        }

        if let Some(seed) = job.random_seed {
            debug!(seed, "using random seed");
        }
        if let Some(threshold) = job.gc_threshold {
            debug!(threshold, "using gc threshold");
        }

        let mut vars = vec![
            (env::VERBOSE, OsString::from(job.verbose.to_string())),
            (
                env::USE_RESOURCES,
                OsString::from(job.use_resources.iter().join(",")),
            ),
        ];
        if let Some(seed) = job.random_seed {
            vars.push((env::RANDOM_SEED, seed.to_string().into()));
        }
        if let Some(threshold) = job.gc_threshold {
            vars.push((env::GC_THRESHOLD, threshold.to_string().into()));
        }
        if job.pgo {
            vars.push((env::PGO, "1".into()));
        }
        if std::env::var_os(UNICODE_GUARD_ENV).is_none() {
            vars.push((UNICODE_GUARD_ENV, unicode_guard_value()));
        }

        for (key, value) in vars {
            // SAFETY: the worker runs setup before the test starts any threads, and the deadline
            // watchdog never reads the environment.
            unsafe { std::env::set_var(key, value) };
        }

        Ok(())
    }
}

static PANIC_HOOK: Once = Once::new();

/// Reports panics on every thread to stderr with a backtrace.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        std::panic::set_hook(Box::new(|info| {
            let thread = std::thread::current();
            let name = thread.name().unwrap_or("<unnamed>");
            let payload = info.payload_as_str().unwrap_or("Box<dyn Any>");
            let location = info
                .location()
                .map_or_else(|| "<unknown>".to_owned(), ToString::to_string);
            let backtrace = Backtrace::force_capture();

            let mut stderr = io::stderr().lock();
            let _ = writeln!(
                stderr,
                "thread '{name}' panicked at {location}:\n{payload}\nstack backtrace:\n{backtrace}"
            );
        }));
    });
}

/// Reports fatal signals such as SIGSEGV to stderr before the worker dies from them.
#[cfg(unix)]
mod fatal_signal {
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
    use std::sync::OnceLock;
    use tracing::warn;

    const SIGNALS: [Signal; 5] = [
        Signal::SIGSEGV,
        Signal::SIGBUS,
        Signal::SIGILL,
        Signal::SIGFPE,
        Signal::SIGABRT,
    ];

    // Formatted ahead of time: the handler may not allocate.
    static PREFIX: OnceLock<String> = OnceLock::new();

    pub(super) fn install(test_name: &str) {
        if PREFIX
            .set(format!("isotest worker: fatal signal in {test_name}: "))
            .is_err()
        {
            return;
        }

        // The disposition goes back to the default on entry, so re-raising from the handler
        // terminates the process with the original signal.
        let action = SigAction::new(
            SigHandler::Handler(report),
            SaFlags::SA_RESETHAND | SaFlags::SA_NODEFER | SaFlags::SA_ONSTACK,
            SigSet::empty(),
        );
        for signal in SIGNALS {
            // SAFETY: `report` only calls async-signal-safe functions.
            if let Err(error) = unsafe { sigaction(signal, &action) } {
                warn!(%signal, %error, "failed to install fatal signal handler");
            }
        }
    }

    extern "C" fn report(signal: libc::c_int) {
        let name: &[u8] = match signal {
            libc::SIGSEGV => b"SIGSEGV\n",
            libc::SIGBUS => b"SIGBUS\n",
            libc::SIGILL => b"SIGILL\n",
            libc::SIGFPE => b"SIGFPE\n",
            libc::SIGABRT => b"SIGABRT\n",
            _ => b"unknown signal\n",
        };
        let prefix = PREFIX.get().map_or(&b""[..], |prefix| prefix.as_bytes());
        for part in [prefix, name] {
            // SAFETY: write(2) and raise(3) are async-signal-safe, and `part` is a live buffer.
            unsafe {
                libc::write(libc::STDERR_FILENO, part.as_ptr().cast(), part.len());
            }
        }
        // SAFETY: see above.
        unsafe {
            libc::raise(signal);
        }
    }
}

#[cfg(unix)]
fn raise_open_file_limit(desired: u64) -> io::Result<()> {
    use nix::sys::resource::{Resource, getrlimit, setrlimit};

    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;
    let desired = libc::rlim_t::try_from(desired).unwrap_or(libc::rlim_t::MAX);
    let target = desired.min(hard);
    if soft >= target {
        return Ok(());
    }
    setrlimit(Resource::RLIMIT_NOFILE, target, hard)?;
    debug!(from = soft, to = target, "raised open file limit");
    Ok(())
}

#[cfg(not(unix))]
fn raise_open_file_limit(_desired: u64) -> io::Result<()> {
    Ok(())
}

fn duplicate_stdout() -> io::Result<File> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use std::os::fd::AsFd;
            Ok(File::from(io::stdout().as_fd().try_clone_to_owned()?))
        } else if #[cfg(windows)] {
            use std::os::windows::io::AsHandle;
            Ok(File::from(io::stdout().as_handle().try_clone_to_owned()?))
        } else {
            Err(io::Error::new(io::ErrorKind::Unsupported, "cannot duplicate stdout"))
        }
    }
}
