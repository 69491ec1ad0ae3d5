// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts},
    reporter::{Reporter, RunStats},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Subcommand};
use isotest_metadata::{ChannelHandle, IsotestExitCode, JobDescriptor, Outcome};
use isotest_runner::{
    config::IsotestConfig,
    executor::CommandExecutor,
    launcher::{Launcher, LauncherBuilder, WORKER_SUBCOMMAND, WorkerCommand},
    setup::StandardSetup,
    worker::run_worker,
};
use std::{io::Write, time::Duration};
use tracing::{debug, warn};

/// Runs every test in its own isolated worker process.
#[derive(Debug, clap::Parser)]
#[command(
    version,
    styles = crate::output::clap_styles(),
    max_term_width = 100
)]
pub struct IsotestApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    #[clap(subcommand)]
    command: Command,
}

impl IsotestApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        match &self.command {
            Command::Run(_) => self.output.init(),
            Command::Worker(_) => OutputContext::color_never_init(),
        }
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        match self.command {
            Command::Run(opts) => opts.exec(&self.config_opts, output),
            Command::Worker(opts) => opts.exec(),
        }
    }
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: current-dir/.config/isotest.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn make_config(&self, workspace_root: &Utf8Path) -> Result<IsotestConfig> {
        Ok(IsotestConfig::from_sources(
            workspace_root,
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run tests, each in its own worker process
    Run(RunOpts),

    /// Private command: run a single test as a worker process.
    #[command(name = WORKER_SUBCOMMAND, hide = true)]
    Worker(WorkerOpts),
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Tests to run, resolved as programs in the test directory
    #[arg(value_name = "TESTS")]
    tests: Vec<String>,

    /// Run only sub-cases matching this glob pattern
    #[arg(
        long = "match",
        short = 'm',
        value_name = "PATTERN",
        help_heading = "FILTER OPTIONS"
    )]
    match_tests: Vec<String>,

    /// Skip sub-cases matching this glob pattern
    #[arg(
        long = "ignore",
        short = 'i',
        value_name = "PATTERN",
        help_heading = "FILTER OPTIONS"
    )]
    ignore_tests: Vec<String>,

    /// Time out each test after this duration, e.g. "30s" or "5m"
    #[arg(
        long,
        value_parser = humantime::parse_duration,
        value_name = "DURATION",
        help_heading = "RUNNER OPTIONS"
    )]
    timeout: Option<Duration>,

    /// Re-run failing tests once in verbose mode
    #[arg(long, help_heading = "RUNNER OPTIONS")]
    rerun_failed: bool,

    /// Directory test programs are resolved from [default: current directory]
    #[arg(long, value_name = "DIR", help_heading = "RUNNER OPTIONS")]
    test_dir: Option<Utf8PathBuf>,

    /// Directory workers use for temporary files
    #[arg(long, value_name = "DIR", help_heading = "RUNNER OPTIONS")]
    tmp_dir: Option<Utf8PathBuf>,

    /// Command used to start workers, split with shell quoting rules
    #[arg(long, value_name = "COMMAND", help_heading = "RUNNER OPTIONS")]
    worker_command: Option<String>,

    /// Resources tests may use, comma-separated ("all" enables every resource)
    #[arg(
        long = "use",
        short = 'u',
        value_delimiter = ',',
        value_name = "RESOURCES",
        help_heading = "TEST OPTIONS"
    )]
    use_resources: Vec<String>,

    /// Seed for the tests' randomness source
    #[arg(long, value_name = "SEED", help_heading = "TEST OPTIONS")]
    seed: Option<u64>,

    /// Garbage collection threshold passed to tests
    #[arg(long, value_name = "N", help_heading = "TEST OPTIONS")]
    gc_threshold: Option<u32>,

    /// Run tests in profile-guided optimization training mode
    #[arg(long, help_heading = "TEST OPTIONS")]
    pgo: bool,

    /// Open file limit for workers [default: worker.min-open-files from config]
    #[arg(long, value_name = "N", help_heading = "TEST OPTIONS")]
    max_open_files: Option<u64>,

    /// Stop each test at its first failing sub-case
    #[arg(long, help_heading = "TEST OPTIONS")]
    fail_fast: bool,

    /// Increase the verbosity passed to tests (may be repeated)
    #[arg(long, action = clap::ArgAction::Count, help_heading = "TEST OPTIONS")]
    verbose_tests: u8,
}

impl RunOpts {
    fn exec(self, config_opts: &ConfigOpts, output: OutputContext) -> Result<i32> {
        if self.tests.is_empty() {
            warn!("no tests to run");
            return Ok(IsotestExitCode::NO_TESTS_RUN);
        }

        let cwd = std::env::current_dir()
            .and_then(|dir| Utf8PathBuf::try_from(dir).map_err(|err| err.into_io_error()))
            .map_err(|err| ExpectedError::GetCurrentDirFailed { err })?;
        let config = config_opts.make_config(&cwd)?;

        let mut builder = LauncherBuilder::from_config(config.worker());
        builder.set_cwd(cwd.clone());
        if let Some(tmp_dir) = &self.tmp_dir {
            builder.set_tmp_dir(tmp_dir.clone());
        }
        if let Some(command) = &self.worker_command {
            let argv = shell_words::split(command).map_err(|err| {
                ExpectedError::WorkerCommandParseError {
                    command: command.clone(),
                    err,
                }
            })?;
            let command = WorkerCommand::from_argv(&argv)
                .map_err(|err| ExpectedError::launch_error(None, err))?;
            builder.set_worker_command(command);
        }
        let launcher = builder
            .build()
            .map_err(|err| ExpectedError::launch_error(None, err))?;
        debug!(worker_command = %launcher.worker_command(), "built launcher");

        let template = self.job_template(&cwd, config.worker().min_open_files);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| ExpectedError::TokioRuntimeCreateError { err })?;

        let mut reporter = Reporter::new(
            std::io::stderr(),
            output.stderr_styles(),
            output.verbose,
        );
        let stats = runtime.block_on(self.run_all(&launcher, &template, &mut reporter))?;

        Ok(if stats.not_passed() > 0 {
            IsotestExitCode::TEST_RUN_FAILED
        } else {
            IsotestExitCode::OK
        })
    }

    /// Returns a job descriptor with every field but the test name filled in.
    fn job_template(&self, cwd: &Utf8Path, min_open_files: u64) -> JobDescriptor {
        // The result channel is filled in by the launcher.
        let mut job = JobDescriptor::new(String::new(), ChannelHandle::new(-1));
        job.match_tests = (!self.match_tests.is_empty()).then(|| self.match_tests.clone());
        job.ignore_tests = (!self.ignore_tests.is_empty()).then(|| self.ignore_tests.clone());
        job.timeout = self.timeout;
        job.test_dir = Some(
            self.test_dir
                .as_ref()
                .map_or_else(|| cwd.to_owned(), |dir| cwd.join(dir)),
        );
        job.use_resources = self.use_resources.clone();
        job.verbose = self.verbose_tests;
        job.fail_fast = self.fail_fast;
        job.gc_threshold = self.gc_threshold;
        job.random_seed = self.seed;
        job.pgo = self.pgo;
        job.max_open_files = Some(self.max_open_files.unwrap_or(min_open_files));
        job
    }

    async fn run_all<W: Write>(
        &self,
        launcher: &Launcher,
        template: &JobDescriptor,
        reporter: &mut Reporter<W>,
    ) -> Result<RunStats> {
        let stopwatch = std::time::Instant::now();
        let mut stats = RunStats::default();
        let mut failed = Vec::new();

        for test_name in &self.tests {
            let mut job = template.clone();
            job.tests = vec![test_name.clone()];
            let outcome = run_one(launcher, job, reporter, false).await?;
            stats.record(outcome);
            if !outcome.is_pass() {
                failed.push((test_name, outcome));
            }
        }

        if self.rerun_failed {
            for (test_name, first) in failed {
                let mut job = template.clone();
                job.tests = vec![test_name.clone()];
                job.rerun = true;
                job.verbose = job.verbose.max(1);
                let outcome = run_one(launcher, job, reporter, true).await?;
                stats.record_rerun(first, outcome);
            }
        }

        reporter
            .report_summary(&stats, stopwatch.elapsed())
            .map_err(|err| ExpectedError::WriteOutputError { err })?;
        Ok(stats)
    }
}

async fn run_one<W: Write>(
    launcher: &Launcher,
    job: JobDescriptor,
    reporter: &mut Reporter<W>,
    rerun: bool,
) -> Result<Outcome> {
    let test_name = job.test_name().unwrap_or_default().to_owned();
    let worker = launcher
        .spawn(job)
        .map_err(|err| ExpectedError::launch_error(Some(&test_name), err))?;
    let report = worker.wait().await;
    reporter
        .report_finished(&report, rerun)
        .map_err(|err| ExpectedError::WriteOutputError { err })?;
    Ok(report.result.outcome)
}

#[derive(Debug, Args)]
struct WorkerOpts {
    /// The serialized job descriptor
    job: String,
}

impl WorkerOpts {
    fn exec(self) -> Result<i32> {
        run_worker(&self.job, &CommandExecutor, &StandardSetup::new())?;
        Ok(IsotestExitCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, Parser};
    use pretty_assertions::assert_eq;

    #[test]
    fn verify_app() {
        IsotestApp::command().debug_assert();
    }

    #[test]
    fn run_opts_become_job_template() {
        let app = IsotestApp::try_parse_from([
            "isotest",
            "run",
            "--match",
            "test_get*",
            "--timeout",
            "1m 30s",
            "--use",
            "network,cpu",
            "--seed",
            "42",
            "--verbose-tests",
            "--verbose-tests",
            "--test-dir",
            "bin",
            "test_os",
        ])
        .expect("arguments parse");
        let Command::Run(opts) = app.command else {
            panic!("expected run command");
        };
        assert_eq!(opts.tests, ["test_os"]);

        let job = opts.job_template(Utf8Path::new("/work"), 1024);
        assert_eq!(job.match_tests, Some(vec!["test_get*".to_owned()]));
        assert_eq!(job.ignore_tests, None);
        assert_eq!(job.timeout, Some(Duration::from_secs(90)));
        assert_eq!(job.use_resources, ["network", "cpu"]);
        assert_eq!(job.random_seed, Some(42));
        assert_eq!(job.verbose, 2);
        assert_eq!(job.test_dir.as_deref(), Some(Utf8Path::new("/work/bin")));
        assert_eq!(job.max_open_files, Some(1024));
    }

    #[test]
    fn worker_subcommand_is_hidden_and_takes_one_job() {
        let app = IsotestApp::try_parse_from(["isotest", WORKER_SUBCOMMAND, "{}"])
            .expect("arguments parse");
        assert!(matches!(app.command, Command::Worker(WorkerOpts { ref job }) if job == "{}"));

        IsotestApp::try_parse_from(["isotest", WORKER_SUBCOMMAND])
            .expect_err("job descriptor is required");
    }
}
