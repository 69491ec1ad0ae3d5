// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests
//!
//! Workers are started from the `fixture-worker` binary in this package, which registers a fixed
//! set of sample tests. CLI tests go through `isotest-dup`, a copy of isotest's main.rs, so that
//! they don't depend on the binary of another package being built.

use isotest_metadata::{Outcome, ParseError};
use isotest_runner::{
    errors::{ChannelError, LaunchError},
    launcher::{LauncherBuilder, WorkerCommand},
    result_channel::result_channel,
    supervisor::{ResultSource, SynthesizedReason},
};
use pretty_assertions::assert_eq;
use std::time::Duration;

mod cli;
mod fixtures;

use fixtures::*;

#[tokio::test]
async fn test_success_is_reported() {
    let report = run(job("sample_ok")).await;

    assert_eq!(report.result.test_name, "sample_ok");
    assert_eq!(report.result.outcome, Outcome::Success);
    assert_eq!(report.result.diagnostics, None);
    assert_eq!(report.source, ResultSource::Reported);
    assert!(report.exit_status.is_some_and(|status| status.success()));
    assert!(!report.leaked, "no handles leaked");
    assert_eq!(report.errors.len(), 0, "errors: {:?}", report.errors);
}

#[tokio::test]
async fn test_failure_and_skip_are_reported() {
    let report = run(job("sample_fail")).await;
    assert_eq!(report.result.outcome, Outcome::Failure);
    assert_eq!(report.source, ResultSource::Reported);
    assert_eq!(
        report.result.diagnostics.as_deref(),
        Some("assertion failed: expected 2, got 3")
    );

    let report = run(job("sample_skip")).await;
    assert_eq!(report.result.outcome, Outcome::Skipped);
    assert_eq!(report.result.diagnostics.as_deref(), Some("requires network"));
}

#[tokio::test]
async fn test_unknown_test_is_an_error() {
    let report = run(job("sample_missing")).await;
    assert_eq!(report.result.outcome, Outcome::Error);
    assert_eq!(report.source, ResultSource::Reported);
    assert_eq!(
        report.result.diagnostics.as_deref(),
        Some("unknown test `sample_missing`")
    );
}

#[tokio::test]
async fn test_panic_is_a_failure() {
    let report = run(job("sample_panic")).await;

    assert_eq!(report.result.outcome, Outcome::Failure);
    assert_eq!(report.source, ResultSource::Reported);
    assert_eq!(
        report.result.diagnostics.as_deref(),
        Some("test panicked: sample panic")
    );
    let output = output_str(&report);
    assert!(
        output.contains("thread 'main' panicked at"),
        "panic hook output:\n{output}"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_timeout_kills_process_group() {
    let mut job = job("sample_hangs");
    job.timeout = Some(Duration::from_secs(1));
    let report = run(job).await;

    assert_eq!(report.result.outcome, Outcome::Timeout);
    assert_eq!(
        report.source,
        ResultSource::Synthesized(SynthesizedReason::Timeout)
    );
    let diagnostics = report.result.diagnostics.as_deref().unwrap();
    assert!(
        diagnostics.starts_with("test exceeded its timeout of 1s; worker aborted with signal 15"),
        "diagnostics: {diagnostics}"
    );
    assert!(
        report.time_taken >= Duration::from_secs(1) && report.time_taken < Duration::from_secs(10),
        "time taken: {:?}",
        report.time_taken
    );

    let pid = grandchild_pid(&output_str(&report));
    assert!(
        wait_for_exit(pid, Duration::from_secs(5)),
        "grandchild {pid} outlived its timed-out worker"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_timeout_counts_from_launch() {
    let mut job = job("sample_hangs");
    job.timeout = Some(Duration::from_secs(2));
    let worker = launcher().spawn(job).unwrap();

    // The deadline has already passed by the time the worker is waited on.
    tokio::time::sleep(Duration::from_secs(3)).await;
    let waited = std::time::Instant::now();
    let report = worker.wait().await;

    assert_eq!(report.result.outcome, Outcome::Timeout);
    assert!(
        waited.elapsed() < Duration::from_millis(1500),
        "waited {:?} after the deadline had passed",
        waited.elapsed()
    );
    assert!(
        report.time_taken >= Duration::from_secs(3),
        "time taken: {:?}",
        report.time_taken
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_worker_deadline_is_a_timeout() {
    let mut builder = LauncherBuilder::new();
    builder
        .set_worker_command(WorkerCommand::new(FIXTURE_WORKER, Vec::<String>::new()))
        .set_exit_grace(Duration::ZERO);
    let launcher = builder.build().unwrap();

    let mut job = job("sample_hangs");
    job.timeout = Some(Duration::from_secs(1));
    let worker = launcher.spawn(job).unwrap();

    // Let the worker's own watchdog end it before the supervisor looks.
    tokio::time::sleep(Duration::from_secs(3)).await;
    let report = worker.wait().await;

    let output = output_str(&report);
    assert!(
        output.contains("isotest worker: deadline of 1s exceeded, terminating"),
        "output:\n{output}"
    );
    assert_eq!(
        report.result.outcome,
        Outcome::Timeout,
        "diagnostics: {:?}",
        report.result.diagnostics
    );
    assert_eq!(
        report.source,
        ResultSource::Synthesized(SynthesizedReason::Timeout)
    );

    let pid = grandchild_pid(&output);
    assert!(
        wait_for_exit(pid, Duration::from_secs(5)),
        "grandchild {pid} outlived the worker's deadline"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_crash_is_detected() {
    let report = run(job("sample_crash")).await;

    assert_eq!(report.result.outcome, Outcome::Crashed);
    assert_eq!(
        report.source,
        ResultSource::Synthesized(SynthesizedReason::AbnormalExit)
    );
    let diagnostics = report.result.diagnostics.as_deref().unwrap();
    assert!(
        diagnostics.starts_with("worker aborted with signal 6 (SIGABRT)"),
        "diagnostics: {diagnostics}"
    );
    let output = output_str(&report);
    assert!(
        output.contains("isotest worker: fatal signal in sample_crash: SIGABRT\n"),
        "output:\n{output}"
    );
}

#[tokio::test]
async fn test_nonzero_exit_is_a_crash() {
    let report = run(job("sample_exit_nonzero")).await;

    assert_eq!(report.result.outcome, Outcome::Crashed);
    assert_eq!(
        report.source,
        ResultSource::Synthesized(SynthesizedReason::AbnormalExit)
    );
    assert_eq!(
        report.exit_status.and_then(|status| status.code()),
        Some(3)
    );
}

#[tokio::test]
async fn test_exit_without_result_is_never_success() {
    let report = run(job("sample_exit_zero_silently")).await;

    assert!(report.exit_status.is_some_and(|status| status.success()));
    assert_eq!(report.result.outcome, Outcome::Crashed);
    assert_eq!(
        report.source,
        ResultSource::Synthesized(SynthesizedReason::NoResult)
    );
    assert_eq!(
        report.result.diagnostics.as_deref(),
        Some("worker exited with exit code 0 without reporting a result")
    );
}

#[tokio::test]
async fn test_large_output_does_not_block() {
    let report = run(job("sample_noisy")).await;

    assert_eq!(report.result.outcome, Outcome::Success);
    // stdout and stderr share one pipe, so both streams end up in the output.
    assert_eq!(report.output.len(), 2 * 256 * 1024);
}

#[tokio::test]
async fn test_unicode_diagnostics_round_trip() {
    let report = run(job("sample_unicode_failure")).await;

    assert_eq!(report.result.outcome, Outcome::Failure);
    assert_eq!(
        report.result.diagnostics.as_deref(),
        Some("échec: ошибка ✗ 失敗")
    );
}

#[tokio::test]
async fn test_match_and_ignore_patterns() {
    let mut job = job("sample_cases");
    job.match_tests = Some(vec!["test_getcwd*".to_owned(), "test_chdir".to_owned()]);
    job.ignore_tests = Some(vec!["*_long".to_owned()]);
    let report = run(job).await;

    assert_eq!(report.result.outcome, Outcome::Success);
    assert_eq!(output_str(&report), "ran: test_getcwd, test_chdir\n");
}

#[tokio::test]
async fn test_rerun_prints_notice() {
    let mut job = job("sample_ok");
    job.rerun = true;
    job.verbose = 1;
    job.match_tests = Some(vec!["test_a".to_owned(), "test_b".to_owned()]);
    let report = run(job).await;

    assert_eq!(report.result.outcome, Outcome::Success);
    assert_eq!(
        output_str(&report),
        "Re-running sample_ok in verbose mode (matching: test_a, test_b)\n"
    );
}

#[tokio::test]
async fn test_worker_environment() {
    let mut job = job("sample_env");
    job.random_seed = Some(1234);
    job.use_resources = vec!["network".to_owned()];
    let report = run(job).await;

    assert_eq!(
        report.result.outcome,
        Outcome::Success,
        "diagnostics: {:?}",
        report.result.diagnostics
    );
}

#[tokio::test]
async fn test_concurrent_workers_are_isolated() -> color_eyre::Result<()> {
    let launcher = launcher();
    let workers = (0..4)
        .map(|_| launcher.spawn(job("sample_writes_artifact")))
        .collect::<Result<Vec<_>, _>>()?;

    let mut work_dirs = Vec::new();
    for worker in workers {
        let report = worker.wait().await;
        assert_eq!(
            report.result.outcome,
            Outcome::Success,
            "diagnostics: {:?}",
            report.result.diagnostics
        );
        let output = output_str(&report);
        let work_dir = output
            .lines()
            .find_map(|line| line.strip_prefix("work dir: "))
            .unwrap()
            .to_owned();
        assert!(
            !std::path::Path::new(&work_dir).exists(),
            "work dir {work_dir} was removed"
        );
        work_dirs.push(work_dir);
    }

    work_dirs.sort();
    work_dirs.dedup();
    assert_eq!(work_dirs.len(), 4, "each worker had its own directory");
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_channel_not_inherited_by_grandchildren() {
    let report = run(job("sample_detached_child")).await;

    assert_eq!(report.result.outcome, Outcome::Success);
    assert!(
        !report.leaked,
        "grandchild held the result channel or output open"
    );
    assert!(
        report.time_taken < Duration::from_secs(4),
        "waited for grandchild: {:?}",
        report.time_taken
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_other_channels_not_inherited_by_worker() -> color_eyre::Result<()> {
    // A channel that belongs to some other worker.
    let (_other_receiver, other_sender) = result_channel()?;

    let mut job = job("sample_fds_closed");
    job.match_tests = Some(vec![other_sender.handle().to_string()]);
    let report = run(job).await;

    assert_eq!(
        report.result.outcome,
        Outcome::Success,
        "diagnostics: {:?}",
        report.result.diagnostics
    );
    Ok(())
}

#[tokio::test]
async fn test_mismatched_handle_is_rejected() -> color_eyre::Result<()> {
    let (receiver, sender) = result_channel()?;
    let job = job("sample_ok");

    let error = launcher().launch(&job, receiver, sender).unwrap_err();
    assert!(
        matches!(
            error,
            LaunchError::Channel(ChannelError::HandleMismatch { .. })
        ),
        "error: {error:?}"
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_job_is_rejected() {
    let mut job = job("sample_ok");
    job.tests.clear();

    let error = launcher().spawn(job).unwrap_err();
    assert!(
        matches!(error, LaunchError::InvalidJob(ParseError::NoTests)),
        "error: {error:?}"
    );
}

#[tokio::test]
async fn test_missing_worker_executable() {
    let mut builder = LauncherBuilder::new();
    builder.set_worker_command(WorkerCommand::new(
        "/nonexistent/isotest-worker",
        Vec::<String>::new(),
    ));
    let launcher = builder.build().unwrap();

    let error = launcher.spawn(job("sample_ok")).unwrap_err();
    assert!(
        matches!(error, LaunchError::Spawn { .. }),
        "error: {error:?}"
    );
}
