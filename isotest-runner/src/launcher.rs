// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Starts worker processes.
//!
//! The launcher turns a [`JobDescriptor`] into a running worker process: it builds the command
//! line, passes the result channel to the child, puts the child in its own process group and
//! returns a [`Worker`] handle without waiting for the worker to finish.

use crate::{
    capture::StreamAccumulator,
    config::WorkerConfig,
    errors::{ChannelError, LaunchError},
    result_channel::{self, ResultReceiver, ResultSender},
    setup::{UNICODE_GUARD_ENV, unicode_guard_value},
    supervisor::Worker,
    worker::EXIT_GRACE_ENV,
};
use camino::Utf8PathBuf;
use isotest_metadata::{JobDescriptor, ParseError};
use std::{ffi::OsString, fmt, process::Stdio, time::Duration};
use tracing::debug;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        #[path = "launcher/unix.rs"]
        pub(crate) mod unix;
        pub(crate) use unix as os;
    } else if #[cfg(windows)] {
        #[path = "launcher/windows.rs"]
        pub(crate) mod windows;
        pub(crate) use windows as os;
    } else {
        compile_error!("unsupported target platform");
    }
}

/// The name of the hidden subcommand that runs the worker entry point.
pub const WORKER_SUBCOMMAND: &str = "__worker";

/// Temporary directory environment variables, all set to the same path.
const TMP_DIR_ENV_VARS: [&str; 3] = ["TMPDIR", "TEMP", "TMP"];

/// The program and leading arguments used to start a worker.
///
/// The serialized job descriptor is always appended as the final argument.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkerCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl WorkerCommand {
    /// Creates a new worker command.
    pub fn new(
        program: impl Into<OsString>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns a worker command that re-executes the current binary with the
    /// [`WORKER_SUBCOMMAND`] subcommand.
    pub fn current_exe() -> Result<Self, LaunchError> {
        let program = std::env::current_exe().map_err(LaunchError::CurrentExe)?;
        Ok(Self::new(program, [WORKER_SUBCOMMAND]))
    }

    /// Creates a worker command from an argument vector, where the first element is the program.
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> Result<Self, LaunchError> {
        let (program, args) = argv.split_first().ok_or(LaunchError::EmptyWorkerCommand)?;
        Ok(Self::new(program.as_ref(), args.iter().map(|arg| arg.as_ref())))
    }

    /// Returns the program to execute.
    pub fn program(&self) -> &OsString {
        &self.program
    }

    /// Returns the arguments passed before the job descriptor.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Builder for a [`Launcher`].
#[derive(Debug, Default)]
pub struct LauncherBuilder {
    worker_command: Option<WorkerCommand>,
    cwd: Option<Utf8PathBuf>,
    config: WorkerConfig,
}

impl LauncherBuilder {
    /// Creates a new builder with the default worker settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new builder from a worker configuration.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            config: config.clone(),
            ..Self::default()
        }
    }

    /// Sets the command used to start workers.
    ///
    /// Defaults to [`WorkerCommand::current_exe`].
    pub fn set_worker_command(&mut self, command: WorkerCommand) -> &mut Self {
        self.worker_command = Some(command);
        self
    }

    /// Sets the directory workers are started in, unless a job names its own.
    ///
    /// Defaults to the current directory.
    pub fn set_cwd(&mut self, cwd: impl Into<Utf8PathBuf>) -> &mut Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets the directory workers use for temporary files.
    pub fn set_tmp_dir(&mut self, tmp_dir: impl Into<Utf8PathBuf>) -> &mut Self {
        self.config.tmp_dir = Some(tmp_dir.into());
        self
    }

    /// Sets how long a timed-out worker has between SIGTERM and SIGKILL.
    pub fn set_grace_period(&mut self, grace_period: Duration) -> &mut Self {
        self.config.grace_period = grace_period;
        self
    }

    /// Sets how long past its timeout a worker waits before terminating itself.
    pub fn set_exit_grace(&mut self, exit_grace: Duration) -> &mut Self {
        self.config.exit_grace = exit_grace;
        self
    }

    /// Sets how long to wait for descendants to close a worker's output after it exits.
    pub fn set_leak_timeout(&mut self, leak_timeout: Duration) -> &mut Self {
        self.config.leak_timeout = leak_timeout;
        self
    }

    /// Creates a new launcher.
    pub fn build(self) -> Result<Launcher, LaunchError> {
        let worker_command = match self.worker_command {
            Some(command) => command,
            None => WorkerCommand::current_exe()?,
        };
        Ok(Launcher {
            worker_command,
            cwd: self.cwd,
            config: self.config,
        })
    }
}

/// Starts worker processes.
///
/// Launching never blocks on the worker: it returns a [`Worker`] handle as soon as the process has
/// been spawned.
#[derive(Clone, Debug)]
pub struct Launcher {
    worker_command: WorkerCommand,
    cwd: Option<Utf8PathBuf>,
    config: WorkerConfig,
}

impl Launcher {
    /// Returns the default worker command.
    pub fn worker_command(&self) -> &WorkerCommand {
        &self.worker_command
    }

    /// Creates a result channel for `job` and launches a worker for it.
    ///
    /// The job's result channel handle is overwritten with the new channel's.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn(&self, mut job: JobDescriptor) -> Result<Worker, LaunchError> {
        let (receiver, sender) = result_channel::result_channel()?;
        job.result_channel = sender.handle();
        self.launch(&job, receiver, sender)
    }

    /// Launches a worker for `job`, passing it the channel `sender` belongs to.
    ///
    /// `job.result_channel` must name `sender`'s handle, and `receiver` must be the other end of
    /// the same channel. The supervisor's copy of `sender` is closed once the worker has started.
    ///
    /// Must be called within a Tokio runtime.
    pub fn launch(
        &self,
        job: &JobDescriptor,
        receiver: ResultReceiver,
        sender: ResultSender,
    ) -> Result<Worker, LaunchError> {
        let Some(test_name) = job.test_name() else {
            return Err(LaunchError::InvalidJob(ParseError::NoTests));
        };
        if job.result_channel != sender.handle() {
            return Err(ChannelError::HandleMismatch {
                job: job.result_channel,
                sender: sender.handle(),
            }
            .into());
        }
        result_channel::check_handle(sender.handle())?;

        let json = job.to_json().map_err(LaunchError::Serialize)?;
        let worker_command = match &job.worker_command {
            Some(argv) => WorkerCommand::from_argv(argv)?,
            None => self.worker_command.clone(),
        };

        let mut cmd = std::process::Command::new(&worker_command.program);
        cmd.args(&worker_command.args).arg(&json);

        if let Some(dir) = job.working_dir.as_ref().or(self.cwd.as_ref()) {
            cmd.current_dir(dir);
        }
        if let Some(tmp_dir) = &self.config.tmp_dir {
            for var in TMP_DIR_ENV_VARS {
                cmd.env(var, tmp_dir);
            }
        }
        cmd.env("ISOTEST", "1")
            .env("ISOTEST_TEST_NAME", test_name)
            .env(
                EXIT_GRACE_ENV,
                humantime::format_duration(self.config.exit_grace).to_string(),
            );
        if std::env::var_os(UNICODE_GUARD_ENV).is_none() {
            cmd.env(UNICODE_GUARD_ENV, unicode_guard_value());
        }

        // stdout and stderr share a single pipe so that their relative order is preserved.
        cmd.stdin(Stdio::null());
        let (output_reader, output_writer) =
            std::io::pipe().map_err(LaunchError::CaptureSetup)?;
        let stderr_writer = output_writer
            .try_clone()
            .map_err(LaunchError::CaptureSetup)?;
        cmd.stdout(output_writer).stderr(stderr_writer);

        os::set_process_group(&mut cmd);
        #[cfg(unix)]
        result_channel::pass_to_child(&mut cmd, &sender);

        // If creating a job fails, we might be on an old system. Ignore this -- job objects are a
        // best-effort thing.
        let job_object = os::create_job().ok();

        let mut cmd = tokio::process::Command::from(cmd);
        cmd.kill_on_drop(true);

        let spawn_res = {
            #[cfg(windows)]
            let _inherit = result_channel::InheritGuard::new(&sender)?;
            cmd.spawn()
        };
        // Close our copies of the child's ends, so that EOF is observed once the worker and its
        // descendants exit.
        drop(cmd);
        drop(sender);

        let child = spawn_res.map_err(|err| LaunchError::Spawn {
            program: worker_command.to_string(),
            err,
        })?;
        let pid = child.id();
        debug!(test_name, ?pid, command = %worker_command, "launched worker");

        // If assigning the child to the job fails, ignore this. This can happen if the process has
        // exited.
        let _ = os::assign_process_to_job(&child, job_object.as_ref());

        let acc = StreamAccumulator::new(
            tokio::fs::File::from_std(result_channel::pipe_reader_to_file(output_reader)),
            tokio::fs::File::from_std(receiver.into_file()),
        );
        Ok(Worker::new(
            test_name.to_owned(),
            child,
            pid,
            job_object,
            acc,
            job.timeout,
            &self.config,
        ))
    }
}

/// Whether terminating a worker required killing it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TerminateResult {
    /// The worker exited within the grace period.
    Exited,

    /// The worker had to be killed.
    Killed,
}
