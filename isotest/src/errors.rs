// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use isotest_metadata::IsotestExitCode;
use isotest_runner::errors::{ConfigParseError, LaunchError, WorkerError};
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An expected error that isotest reports and exits with a documented exit code for.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine current directory")]
    GetCurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("worker command parse error")]
    WorkerCommandParseError {
        command: String,
        #[source]
        err: shell_words::ParseError,
    },
    #[error("failed to create Tokio runtime")]
    TokioRuntimeCreateError {
        #[source]
        err: std::io::Error,
    },
    #[error("launch error")]
    LaunchError {
        test_name: Option<String>,
        #[source]
        err: LaunchError,
    },
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
    #[error("worker error")]
    WorkerError {
        #[from]
        err: WorkerError,
    },
}

impl ExpectedError {
    pub(crate) fn launch_error(test_name: Option<&str>, err: LaunchError) -> Self {
        Self::LaunchError {
            test_name: test_name.map(ToOwned::to_owned),
            err,
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::GetCurrentDirFailed { .. }
            | Self::ConfigParseError { .. }
            | Self::WorkerCommandParseError { .. }
            | Self::TokioRuntimeCreateError { .. } => IsotestExitCode::SETUP_ERROR,
            Self::LaunchError { .. } => IsotestExitCode::LAUNCH_FAILED,
            Self::WriteOutputError { .. } => IsotestExitCode::WRITE_OUTPUT_ERROR,
            Self::WorkerError { err } => err.process_exit_code(),
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::GetCurrentDirFailed { err } => {
                error!("could not determine current directory");
                Some(err as &dyn Error)
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse isotest config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::WorkerCommandParseError { command, err } => {
                error!(
                    "failed to parse worker command `{}`",
                    command.style(styles.bold)
                );
                Some(err as &dyn Error)
            }
            Self::TokioRuntimeCreateError { err } => {
                error!("failed to create Tokio runtime");
                Some(err as &dyn Error)
            }
            Self::LaunchError { test_name, err } => {
                match test_name {
                    Some(test_name) => {
                        error!("failed to launch worker for `{}`", test_name.style(styles.bold))
                    }
                    None => error!("failed to set up worker launcher"),
                }
                Some(err as &dyn Error)
            }
            Self::WriteOutputError { err } => {
                error!("error writing output");
                Some(err as &dyn Error)
            }
            Self::WorkerError { err } => {
                error!("{err}");
                err.source()
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
