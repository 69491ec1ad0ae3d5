// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by isotest.

use camino::Utf8PathBuf;
use config::ConfigError;
use isotest_metadata::{ChannelHandle, ParseError};
use std::{io, sync::Arc};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse isotest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }
}

/// An error that occurred while creating, passing or using a result channel.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChannelError {
    /// Creating the underlying pipe failed.
    #[error("error creating result channel")]
    Create(#[source] io::Error),

    /// The handle does not refer to an open descriptor or handle in this process.
    #[error("result channel handle {handle} is not valid in this process")]
    InvalidHandle {
        /// The handle that was checked.
        handle: ChannelHandle,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The job descriptor names a different handle from the sender passed in.
    #[error("job descriptor names result channel {job}, but the sender's handle is {sender}")]
    HandleMismatch {
        /// The handle in the job descriptor.
        job: ChannelHandle,

        /// The handle of the sender.
        sender: ChannelHandle,
    },

    /// Changing whether the handle is inherited by child processes failed.
    #[error("error configuring inheritance for result channel handle {handle}")]
    ConfigureInheritance {
        /// The handle being configured.
        handle: ChannelHandle,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// Serializing the result failed.
    #[error("error serializing worker result")]
    Serialize(#[source] serde_json::Error),

    /// Writing the result to the channel failed.
    #[error("error writing worker result to result channel {handle}")]
    Write {
        /// The handle being written to.
        handle: ChannelHandle,

        /// The underlying error.
        #[source]
        err: io::Error,
    },
}

/// An error that occurred while launching a worker process.
///
/// These are the only errors that propagate to the caller of the launcher: anything that goes
/// wrong after the worker starts is reported as a [`WorkerResult`](isotest_metadata::WorkerResult).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// The job descriptor cannot be executed.
    #[error("invalid job descriptor")]
    InvalidJob(#[source] ParseError),

    /// Serializing the job descriptor failed.
    #[error("error serializing job descriptor")]
    Serialize(#[source] serde_json::Error),

    /// The result channel could not be set up or passed to the worker.
    #[error("error setting up result channel")]
    Channel(#[from] ChannelError),

    /// Setting up output capture for the worker failed.
    #[error("error setting up output capture for worker")]
    CaptureSetup(#[source] io::Error),

    /// The current executable could not be determined, so no default worker command exists.
    #[error("error determining current executable for worker command")]
    CurrentExe(#[source] io::Error),

    /// The worker command is empty.
    #[error("worker command is empty")]
    EmptyWorkerCommand,

    /// Spawning the worker process failed.
    #[error("error spawning worker process `{program}`")]
    Spawn {
        /// The program that was executed.
        program: String,

        /// The underlying error.
        #[source]
        err: io::Error,
    },
}

/// An error that occurred inside a worker process before it could write a result.
///
/// Once the result channel is open, failures are written to it as results instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerError {
    /// The job descriptor could not be decoded.
    #[error("error decoding job descriptor")]
    ParseJob(#[source] ParseError),

    /// The job descriptor does not name a test.
    #[error("job descriptor does not name any tests")]
    NoTests,

    /// The result channel could not be opened or written to.
    #[error("result channel error")]
    Channel(#[from] ChannelError),

    /// Preparing the isolated working directory failed.
    #[error("error preparing worker directory")]
    WorkDir(#[source] io::Error),
}

/// An error that occurred while building the sub-case filter for a test.
#[derive(Debug, Error)]
#[error("invalid test filter pattern `{pattern}`")]
pub struct FilterError {
    pattern: String,
    #[source]
    err: globset::Error,
}

impl FilterError {
    pub(crate) fn new(pattern: impl Into<String>, err: globset::Error) -> Self {
        Self {
            pattern: pattern.into(),
            err,
        }
    }

    /// Returns the pattern that failed to compile.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// An error that occurred while reading from a child's output or its result channel.
#[derive(Clone, Debug, Error)]
pub enum ChildFdError {
    /// An error occurred while reading combined stdout and stderr.
    #[error("error reading combined stream")]
    ReadCombined(#[source] Arc<io::Error>),

    /// An error occurred while reading the result channel.
    #[error("error reading result channel")]
    ReadChannel(#[source] Arc<io::Error>),

    /// An error occurred while waiting for the child to exit.
    #[error("error waiting for worker to exit")]
    Wait(#[source] Arc<io::Error>),
}
