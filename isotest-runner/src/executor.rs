// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Executing a single test inside a worker process.
//!
//! A worker hands its test to a [`TestExecutor`]. Two executors are provided:
//!
//! * [`TestRegistry`] runs test functions registered in the worker binary itself.
//! * [`CommandExecutor`] runs each test as a program in the test directory.

use crate::{errors::FilterError, helpers::display_exited_with, setup};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use globset::{Glob, GlobSet, GlobSetBuilder};
use isotest_metadata::{JobDescriptor, Outcome};
use rand::{SeedableRng, rngs::StdRng};
use std::{
    collections::BTreeMap,
    io::{self, Write},
    process::{Command, Stdio},
};
use tracing::debug;

/// Runs a single named test.
pub trait TestExecutor {
    /// Runs the test described by `cx`.
    ///
    /// Panics are caught by the worker and reported as failures.
    fn run_test(&self, cx: &TestContext<'_>) -> TestOutcome;
}

/// The outcome of a test as determined by an executor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestOutcome {
    /// The outcome.
    pub outcome: Outcome,

    /// Free-form diagnostics, such as an error message.
    pub diagnostics: Option<String>,
}

impl TestOutcome {
    /// Creates a new outcome without diagnostics.
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            diagnostics: None,
        }
    }

    /// The test passed.
    pub fn success() -> Self {
        Self::new(Outcome::Success)
    }

    /// The test ran and failed.
    pub fn failure(diagnostics: impl Into<String>) -> Self {
        Self::new(Outcome::Failure).with_diagnostics(diagnostics)
    }

    /// The test could not be run.
    pub fn error(diagnostics: impl Into<String>) -> Self {
        Self::new(Outcome::Error).with_diagnostics(diagnostics)
    }

    /// The test was skipped.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::new(Outcome::Skipped).with_diagnostics(reason)
    }

    /// Attaches diagnostics to this outcome.
    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = Some(diagnostics.into());
        self
    }
}

/// Everything an executor knows about the test it runs.
#[derive(Debug)]
pub struct TestContext<'a> {
    name: &'a str,
    job: &'a JobDescriptor,
    test_dir: Option<Utf8PathBuf>,
    work_dir: &'a Utf8Path,
    filter: FilterRules,
}

impl<'a> TestContext<'a> {
    /// Creates a new context.
    ///
    /// `test_dir` must already be absolute, since the worker runs the test from `work_dir`.
    pub fn new(
        name: &'a str,
        job: &'a JobDescriptor,
        test_dir: Option<Utf8PathBuf>,
        work_dir: &'a Utf8Path,
        filter: FilterRules,
    ) -> Self {
        Self {
            name,
            job,
            test_dir,
            work_dir,
            filter,
        }
    }

    /// The name of the test.
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// The job this test is part of.
    pub fn job(&self) -> &'a JobDescriptor {
        self.job
    }

    /// The absolute directory tests are resolved from, if any.
    pub fn test_dir(&self) -> Option<&Utf8Path> {
        self.test_dir.as_deref()
    }

    /// The isolated directory the test runs in. It is removed after the test.
    pub fn work_dir(&self) -> &'a Utf8Path {
        self.work_dir
    }

    /// The sub-case filter for this test.
    pub fn filter(&self) -> &FilterRules {
        &self.filter
    }

    /// Returns true if the sub-case `case` should run.
    pub fn should_run(&self, case: &str) -> bool {
        self.filter.should_run(case)
    }

    /// The verbosity level. A re-run is always at least verbosity 1.
    pub fn verbose(&self) -> u8 {
        if self.job.rerun {
            self.job.verbose.max(1)
        } else {
            self.job.verbose
        }
    }

    /// Returns true if the test may use `resource`.
    pub fn is_resource_enabled(&self, resource: &str) -> bool {
        self.job
            .use_resources
            .iter()
            .any(|r| r == "all" || r == resource)
    }

    /// Whether the test should stop at its first failing sub-case.
    pub fn fail_fast(&self) -> bool {
        self.job.fail_fast
    }

    /// Returns a random number generator seeded from the job, or from the OS if the job has no
    /// seed.
    pub fn rng(&self) -> StdRng {
        match self.job.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    /// Returns a writer to the stdout the worker was started with.
    pub fn original_stdout(&self) -> Box<dyn Write + 'static> {
        match setup::original_stdout() {
            Some(file) => Box::new(file),
            None => Box::new(io::stdout()),
        }
    }
}

/// Glob patterns selecting sub-cases of a test.
///
/// A sub-case runs if no match patterns are given or any of them matches, and no ignore pattern
/// matches. A pattern matches a sub-case if it matches either the full name or the last
/// `::`-separated segment of it.
#[derive(Clone, Debug, Default)]
pub struct FilterRules {
    match_set: Option<GlobSet>,
    ignore_set: Option<GlobSet>,
}

impl FilterRules {
    /// Builds filter rules from match and ignore patterns.
    pub fn new(match_tests: &[String], ignore_tests: &[String]) -> Result<Self, FilterError> {
        Ok(Self {
            match_set: build_glob_set(match_tests)?,
            ignore_set: build_glob_set(ignore_tests)?,
        })
    }

    /// Builds filter rules from a job's patterns.
    pub fn from_job(job: &JobDescriptor) -> Result<Self, FilterError> {
        Self::new(
            job.match_tests.as_deref().unwrap_or_default(),
            job.ignore_tests.as_deref().unwrap_or_default(),
        )
    }

    /// Returns true if the sub-case `case` should run.
    pub fn should_run(&self, case: &str) -> bool {
        let matches = |set: &GlobSet| {
            set.is_match(case)
                || case
                    .rsplit_once("::")
                    .is_some_and(|(_, last)| set.is_match(last))
        };
        if self.ignore_set.as_ref().is_some_and(matches) {
            return false;
        }
        self.match_set.as_ref().is_none_or(matches)
    }
}

fn build_glob_set(patterns: &[String]) -> Result<Option<GlobSet>, FilterError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| FilterError::new(pattern, err))?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|err| FilterError::new(patterns.join(", "), err))
}

type TestFn = dyn Fn(&TestContext<'_>) -> TestOutcome + Send + Sync;

/// An executor for test functions compiled into the worker binary.
#[derive(Debug, Default)]
pub struct TestRegistry {
    tests: BTreeMap<String, DebugIgnore<Box<TestFn>>>,
}

impl TestRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a test function under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, test: F) -> &mut Self
    where
        F: Fn(&TestContext<'_>) -> TestOutcome + Send + Sync + 'static,
    {
        self.tests.insert(name.into(), DebugIgnore(Box::new(test)));
        self
    }

    /// Returns the names of all registered tests, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tests.keys().map(String::as_str)
    }
}

impl TestExecutor for TestRegistry {
    fn run_test(&self, cx: &TestContext<'_>) -> TestOutcome {
        match self.tests.get(cx.name()) {
            Some(test) => (test.0)(cx),
            None => TestOutcome::error(format!("unknown test `{}`", cx.name())),
        }
    }
}

/// An executor that runs each test as a program named after the test.
///
/// The program is looked up in the test directory, if the job has one. Match patterns are passed
/// as positional arguments and ignore patterns as `--skip <pattern>`.
///
/// Exit code 0 means success and [`CommandExecutor::SKIP_EXIT_CODE`] means the test was skipped.
/// Any other exit code is a failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    /// The exit code a test program uses to report that it skipped itself.
    pub const SKIP_EXIT_CODE: i32 = 77;

    fn command(cx: &TestContext<'_>) -> Command {
        let program = match cx.test_dir() {
            Some(dir) => dir.join(cx.name()),
            None => Utf8PathBuf::from(cx.name()),
        };
        let mut cmd = Command::new(program);
        let job = cx.job();
        if let Some(patterns) = &job.match_tests {
            cmd.args(patterns);
        }
        for pattern in job.ignore_tests.iter().flatten() {
            cmd.arg("--skip").arg(pattern);
        }
        cmd.current_dir(cx.work_dir()).stdin(Stdio::null());
        cmd
    }
}

impl TestExecutor for CommandExecutor {
    fn run_test(&self, cx: &TestContext<'_>) -> TestOutcome {
        let mut cmd = Self::command(cx);
        debug!(test_name = cx.name(), ?cmd, "running test program");

        let status = match cmd.status() {
            Ok(status) => status,
            Err(error) => {
                return TestOutcome::error(format!(
                    "failed to execute `{}`: {error}",
                    cmd.get_program().to_string_lossy()
                ));
            }
        };

        match status.code() {
            Some(0) => TestOutcome::success(),
            Some(Self::SKIP_EXIT_CODE) => TestOutcome::skipped("test program skipped itself"),
            Some(_) => TestOutcome::failure(format!(
                "test program {}",
                display_exited_with(status)
            )),
            None => TestOutcome::new(Outcome::Crashed)
                .with_diagnostics(format!("test program {}", display_exited_with(status))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use isotest_metadata::ChannelHandle;
    use pretty_assertions::assert_eq;
    use rand::Rng;
    use test_case::test_case;

    fn patterns(patterns: &[&str]) -> Vec<String> {
        patterns.iter().map(|&p| p.to_owned()).collect()
    }

    #[test_case(&[], &[], "test_os::test_getcwd", true ; "no patterns")]
    #[test_case(&["test_getcwd"], &[], "test_os::test_getcwd", true ; "match last segment")]
    #[test_case(&["test_os::*"], &[], "test_os::test_getcwd", true ; "match full name")]
    #[test_case(&["test_get*"], &[], "test_os::test_chdir", false ; "no match")]
    #[test_case(&[], &["*cwd"], "test_os::test_getcwd", false ; "ignored")]
    #[test_case(&["test_*"], &["test_chdir"], "test_os::test_getcwd", true ; "match and not ignored")]
    #[test_case(&["test_*"], &["test_chdir"], "test_os::test_chdir", false ; "ignore wins over match")]
    #[test_case(&["test_a", "test_b"], &[], "test_b", true ; "any match pattern")]
    fn filter_rules(match_tests: &[&str], ignore_tests: &[&str], case: &str, expected: bool) {
        let rules = FilterRules::new(&patterns(match_tests), &patterns(ignore_tests))
            .expect("valid patterns");
        assert_eq!(rules.should_run(case), expected);
    }

    #[test]
    fn invalid_filter_pattern() {
        let err = FilterRules::new(&patterns(&["test_[os"]), &[]).expect_err("invalid glob");
        assert_eq!(err.pattern(), "test_[os");
    }

    #[test]
    fn context_knobs() {
        let dir = tempdir().expect("created temp dir");
        let mut job = JobDescriptor::new("test_knobs", ChannelHandle::new(3));
        job.use_resources = vec!["network".to_owned()];
        job.random_seed = Some(42);
        job.rerun = true;

        let cx = TestContext::new("test_knobs", &job, None, dir.path(), FilterRules::default());
        assert!(cx.is_resource_enabled("network"));
        assert!(!cx.is_resource_enabled("cpu"));
        assert_eq!(cx.verbose(), 1, "re-runs are verbose");

        let a: u64 = cx.rng().random();
        let b: u64 = cx.rng().random();
        assert_eq!(a, b, "seeded rngs are deterministic");

        job.use_resources = vec!["all".to_owned()];
        let cx = TestContext::new("test_knobs", &job, None, dir.path(), FilterRules::default());
        assert!(cx.is_resource_enabled("cpu"));
    }

    #[test]
    fn registry_runs_registered_tests() {
        let dir = tempdir().expect("created temp dir");
        let mut registry = TestRegistry::new();
        registry
            .register("test_pass", |_| TestOutcome::success())
            .register("test_name", |cx| TestOutcome::failure(cx.name()));
        assert_eq!(registry.names().collect::<Vec<_>>(), ["test_name", "test_pass"]);

        let job = JobDescriptor::new("test_pass", ChannelHandle::new(3));
        let run = |name: &str| {
            let cx = TestContext::new(name, &job, None, dir.path(), FilterRules::default());
            registry.run_test(&cx)
        };
        assert_eq!(run("test_pass"), TestOutcome::success());
        assert_eq!(run("test_name"), TestOutcome::failure("test_name"));
        assert_eq!(
            run("test_missing"),
            TestOutcome::error("unknown test `test_missing`")
        );
    }

    #[cfg(unix)]
    #[test_case("exit 0", Outcome::Success ; "success")]
    #[test_case("exit 77", Outcome::Skipped ; "skipped")]
    #[test_case("exit 3", Outcome::Failure ; "failure")]
    #[test_case("kill -KILL $$", Outcome::Crashed ; "signal")]
    fn command_executor_exit_codes(script: &str, expected: Outcome) {
        use std::os::unix::fs::PermissionsExt;

        let test_dir = tempdir().expect("created test dir");
        let work_dir = tempdir().expect("created work dir");
        let program = test_dir.path().join("test_script");
        std::fs::write(&program, format!("#!/bin/sh\n{script}\n")).expect("wrote script");
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755))
            .expect("made script executable");

        let job = JobDescriptor::new("test_script", ChannelHandle::new(3));
        let cx = TestContext::new(
            "test_script",
            &job,
            Some(test_dir.path().to_owned()),
            work_dir.path(),
            FilterRules::default(),
        );
        assert_eq!(CommandExecutor.run_test(&cx).outcome, expected);
    }

    #[test]
    fn command_executor_missing_program() {
        let test_dir = tempdir().expect("created test dir");
        let job = JobDescriptor::new("test_missing", ChannelHandle::new(3));
        let cx = TestContext::new(
            "test_missing",
            &job,
            Some(test_dir.path().to_owned()),
            test_dir.path(),
            FilterRules::default(),
        );
        let outcome = CommandExecutor.run_test(&cx);
        assert_eq!(outcome.outcome, Outcome::Error);
    }
}
