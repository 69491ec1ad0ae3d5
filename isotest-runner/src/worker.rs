// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker entry point.
//!
//! A worker process runs exactly one test. It is started with a serialized [`JobDescriptor`] as
//! its only argument and reports a single [`WorkerResult`] over the result channel named in the
//! job. Exit code 0 means that a result was written, not that the test passed.

use crate::{
    errors::WorkerError,
    executor::{FilterRules, TestContext, TestExecutor, TestOutcome},
    result_channel::ResultWriter,
    setup::ProcessSetup,
    time::{StopwatchStart, stopwatch},
    timeout::DeadlineGuard,
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use isotest_metadata::{IsotestExitCode, JobDescriptor, WorkerResult};
use itertools::Itertools;
use std::{
    any::Any,
    error::Error,
    io::{self, Write},
    panic::{AssertUnwindSafe, catch_unwind},
    time::Duration,
};
use swrite::{SWrite, swrite};
use tracing::{debug, warn};

/// The environment variable through which the launcher tells a worker how long past its timeout
/// it may run before terminating itself.
pub const EXIT_GRACE_ENV: &str = "ISOTEST_WORKER_EXIT_GRACE";

const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(30);

/// Runs the test described by `job_json` and writes its result to the job's result channel.
///
/// Failures that happen before the result channel is open are returned as errors. After that,
/// every failure is reported as the test's result, and `Ok(())` is returned.
pub fn run_worker(
    job_json: &str,
    executor: &dyn TestExecutor,
    setup: &dyn ProcessSetup,
) -> Result<(), WorkerError> {
    let job = JobDescriptor::from_json(job_json).map_err(WorkerError::ParseJob)?;
    let Some(test_name) = job.test_name() else {
        return Err(WorkerError::NoTests);
    };
    if job.tests.len() > 1 {
        debug!(
            test_name,
            ignored = ?&job.tests[1..],
            "worker runs only the first test in its job",
        );
    }

    let original_dir = current_dir().map_err(WorkerError::WorkDir)?;
    let writer = ResultWriter::open(job.result_channel)?;
    let stopwatch = stopwatch();

    let work_dir = match create_work_dir() {
        Ok(work_dir) => work_dir,
        Err(error) => {
            let outcome =
                TestOutcome::error(format!("error creating isolated worker directory: {error}"));
            return write_result(writer, test_name, outcome, &stopwatch);
        }
    };
    debug!(test_name, work_dir = %work_dir.path(), "created worker directory");

    let deadline = job.timeout.map(|timeout| timeout.saturating_add(exit_grace()));
    let res = match DeadlineGuard::arm(deadline) {
        Ok(guard) => {
            let test_dir = job
                .test_dir
                .as_deref()
                .map(|dir| absolutize(&original_dir, dir));
            let outcome = match setup.setup_process(&job) {
                Ok(()) => run_in_dir(&job, test_name, test_dir, work_dir.path(), executor),
                Err(error) => {
                    TestOutcome::error(format!("error setting up worker process: {error}"))
                }
            };
            // The guard stays armed until the result has been written.
            let res = write_result(writer, test_name, outcome, &stopwatch);
            drop(guard);
            res
        }
        Err(error) => write_result(
            writer,
            test_name,
            TestOutcome::error(format!("error starting deadline watchdog: {error}")),
            &stopwatch,
        ),
    };

    if let Err(error) = std::env::set_current_dir(&original_dir) {
        warn!(%original_dir, %error, "failed to restore original directory");
    }
    let work_dir_path = work_dir.path().to_owned();
    if let Err(error) = work_dir.close() {
        warn!(work_dir = %work_dir_path, %error, "failed to remove worker directory");
    }

    res
}

/// Runs `run_worker` with the process's arguments and exits.
///
/// The process must be invoked with exactly one argument: the serialized job descriptor.
pub fn worker_main(executor: &dyn TestExecutor, setup: &dyn ProcessSetup) -> ! {
    let args: Vec<_> = std::env::args_os().collect();
    let program = args
        .first()
        .map_or_else(|| "worker".into(), |arg| arg.to_string_lossy());
    let [_, job_json] = args.as_slice() else {
        eprintln!("usage: {program} <JOB>");
        std::process::exit(IsotestExitCode::WORKER_USAGE_ERROR);
    };
    let Some(job_json) = job_json.to_str() else {
        eprintln!("error: job descriptor is not valid UTF-8");
        std::process::exit(IsotestExitCode::WORKER_USAGE_ERROR);
    };

    match run_worker(job_json, executor, setup) {
        Ok(()) => std::process::exit(IsotestExitCode::OK),
        Err(error) => {
            display_error_chain(&error);
            std::process::exit(error.process_exit_code());
        }
    }
}

impl WorkerError {
    /// Returns the exit code the worker process exits with for this error.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::Channel(_) => IsotestExitCode::WORKER_CHANNEL_ERROR,
            Self::ParseJob(_) | Self::NoTests | Self::WorkDir(_) => {
                IsotestExitCode::WORKER_SETUP_FAILED
            }
        }
    }
}

fn display_error_chain(error: &dyn Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error: {error}");
    let mut source = error.source();
    while let Some(err) = source {
        let _ = writeln!(stderr, "  caused by: {err}");
        source = err.source();
    }
}

fn run_in_dir(
    job: &JobDescriptor,
    test_name: &str,
    test_dir: Option<Utf8PathBuf>,
    work_dir: &Utf8Path,
    executor: &dyn TestExecutor,
) -> TestOutcome {
    if let Err(error) = std::env::set_current_dir(work_dir) {
        return TestOutcome::error(format!(
            "error changing to worker directory `{work_dir}`: {error}"
        ));
    }
    let filter = match FilterRules::from_job(job) {
        Ok(filter) => filter,
        Err(error) => {
            let mut msg = error.to_string();
            if let Some(source) = error.source() {
                swrite!(msg, ": {source}");
            }
            return TestOutcome::error(msg);
        }
    };
    let cx = TestContext::new(test_name, job, test_dir, work_dir, filter);

    if job.rerun {
        let mut stdout = cx.original_stdout();
        let _ = writeln!(stdout, "{}", rerun_notice(job, test_name));
        let _ = stdout.flush();
    }

    match catch_unwind(AssertUnwindSafe(|| executor.run_test(&cx))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            TestOutcome::failure(format!("test panicked: {}", panic_message(&*payload)))
        }
    }
}

fn rerun_notice(job: &JobDescriptor, test_name: &str) -> String {
    match job.match_tests.as_deref() {
        Some(patterns) if !patterns.is_empty() => format!(
            "Re-running {test_name} in verbose mode (matching: {})",
            patterns.iter().join(", ")
        ),
        _ => format!("Re-running {test_name} in verbose mode"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "Box<dyn Any>"
    }
}

fn write_result(
    writer: ResultWriter,
    test_name: &str,
    outcome: TestOutcome,
    stopwatch: &StopwatchStart,
) -> Result<(), WorkerError> {
    let result = WorkerResult {
        test_name: test_name.to_owned(),
        outcome: outcome.outcome,
        duration: stopwatch.snapshot().duration,
        diagnostics: outcome.diagnostics,
    };
    debug!(test_name, outcome = %result.outcome, "writing worker result");
    writer.write_result(&result)?;
    Ok(())
}

fn exit_grace() -> Duration {
    let Some(value) = std::env::var_os(EXIT_GRACE_ENV) else {
        return DEFAULT_EXIT_GRACE;
    };
    match value.to_str().map(humantime::parse_duration) {
        Some(Ok(grace)) => grace,
        _ => {
            warn!(
                value = %value.to_string_lossy(),
                "invalid {EXIT_GRACE_ENV}, using default",
            );
            DEFAULT_EXIT_GRACE
        }
    }
}

fn current_dir() -> io::Result<Utf8PathBuf> {
    let dir = std::env::current_dir()?;
    Utf8PathBuf::try_from(dir).map_err(|err| err.into_io_error())
}

fn create_work_dir() -> io::Result<Utf8TempDir> {
    camino_tempfile::Builder::new()
        .prefix(&format!("isotest_worker_{}_", std::process::id()))
        .tempdir()
}

fn absolutize(base: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        base.join(path)
    }
}

// The success path of `run_worker` is covered end to end by integration-tests, since it changes
// the process's current directory.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::NoopSetup;
    use isotest_metadata::ChannelHandle;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(None, "Re-running test_os in verbose mode" ; "no patterns")]
    #[test_case(Some(vec![]), "Re-running test_os in verbose mode" ; "empty patterns")]
    #[test_case(
        Some(vec!["test_getcwd".to_owned(), "test_chdir".to_owned()]),
        "Re-running test_os in verbose mode (matching: test_getcwd, test_chdir)"
        ; "with patterns"
    )]
    fn rerun_notice_text(match_tests: Option<Vec<String>>, expected: &str) {
        let mut job = JobDescriptor::new("test_os", ChannelHandle::new(3));
        job.rerun = true;
        job.match_tests = match_tests;
        assert_eq!(rerun_notice(&job, "test_os"), expected);
    }

    #[test]
    fn panic_messages() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*payload), "static message");
        let payload: Box<dyn Any + Send> = Box::new(format!("formatted {}", 42));
        assert_eq!(panic_message(&*payload), "formatted 42");
        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(&*payload), "Box<dyn Any>");
    }

    #[test]
    fn malformed_job_is_a_setup_failure() {
        let err = run_worker("{\"tests\": [", &crate::executor::TestRegistry::new(), &NoopSetup)
            .expect_err("malformed job");
        assert!(matches!(err, WorkerError::ParseJob(_)), "{err:?}");
        assert_eq!(err.process_exit_code(), IsotestExitCode::WORKER_SETUP_FAILED);
    }

    #[test]
    fn empty_tests_is_a_setup_failure() {
        let job = JobDescriptor {
            tests: Vec::new(),
            ..JobDescriptor::new("unused", ChannelHandle::new(3))
        };
        let json = job.to_json().expect("job serializes");
        let err = run_worker(&json, &crate::executor::TestRegistry::new(), &NoopSetup)
            .expect_err("no tests");
        assert!(matches!(err, WorkerError::NoTests), "{err:?}");
    }

    #[test]
    fn invalid_handle_is_a_channel_error() {
        let json = JobDescriptor::new("test_os", ChannelHandle::new(-1))
            .to_json()
            .expect("job serializes");
        let err = run_worker(&json, &crate::executor::TestRegistry::new(), &NoopSetup)
            .expect_err("invalid handle");
        assert!(matches!(err, WorkerError::Channel(_)), "{err:?}");
        assert_eq!(err.process_exit_code(), IsotestExitCode::WORKER_CHANNEL_ERROR);
    }

    #[cfg(unix)]
    #[test]
    fn relative_test_dir_is_absolutized() {
        assert_eq!(
            absolutize(Utf8Path::new("/work"), Utf8Path::new("tests/bin")),
            "/work/tests/bin"
        );
        assert_eq!(
            absolutize(Utf8Path::new("/work"), Utf8Path::new("/opt/tests")),
            "/opt/tests"
        );
    }
}
