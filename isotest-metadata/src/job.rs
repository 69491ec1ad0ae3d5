// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{DocumentKind, ParseError};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// A description of a single test run, handed to a worker process as its only argument.
///
/// A job descriptor is immutable once serialized: the worker consumes it exactly once and never
/// sends it back.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobDescriptor {
    /// The tests to run. A worker executes only the first entry.
    pub tests: Vec<String>,

    /// Glob patterns selecting sub-cases within the test.
    #[serde(default)]
    pub match_tests: Option<Vec<String>>,

    /// Glob patterns excluding sub-cases within the test.
    #[serde(default)]
    pub ignore_tests: Option<Vec<String>>,

    /// The wall-clock deadline for the test. `None` means no deadline.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Whether this is a verbose re-execution of a previously failing test.
    #[serde(default)]
    pub rerun: bool,

    /// The platform handle the worker writes its result to.
    pub result_channel: ChannelHandle,

    /// The directory tests are resolved from.
    #[serde(default)]
    pub test_dir: Option<Utf8PathBuf>,

    /// Overrides the program and leading arguments used to start the worker.
    ///
    /// The serialized job descriptor is appended as the final argument.
    #[serde(default)]
    pub worker_command: Option<Vec<String>>,

    /// The directory the worker process is started in.
    #[serde(default)]
    pub working_dir: Option<Utf8PathBuf>,

    /// Resources the test is allowed to use. `"all"` enables every resource.
    #[serde(default)]
    pub use_resources: Vec<String>,

    /// The verbosity level passed to the test.
    #[serde(default)]
    pub verbose: u8,

    /// Whether the test should stop at its first failing sub-case.
    #[serde(default)]
    pub fail_fast: bool,

    /// A garbage collection threshold forwarded to the process setup hook.
    #[serde(default)]
    pub gc_threshold: Option<u32>,

    /// The seed for the worker's randomness source.
    #[serde(default)]
    pub random_seed: Option<u64>,

    /// Whether the test runs in profile-guided optimization training mode.
    #[serde(default)]
    pub pgo: bool,

    /// The desired ceiling for open file descriptors in the worker.
    #[serde(default)]
    pub max_open_files: Option<u64>,
}

impl JobDescriptor {
    /// Creates a new job descriptor for a single test, with every option at its default.
    pub fn new(test_name: impl Into<String>, result_channel: ChannelHandle) -> Self {
        Self {
            tests: vec![test_name.into()],
            match_tests: None,
            ignore_tests: None,
            timeout: None,
            rerun: false,
            result_channel,
            test_dir: None,
            worker_command: None,
            working_dir: None,
            use_resources: Vec::new(),
            verbose: 0,
            fail_fast: false,
            gc_threshold: None,
            random_seed: None,
            pgo: false,
            max_open_files: None,
        }
    }

    /// Returns the name of the test this job runs, if any.
    pub fn test_name(&self) -> Option<&str> {
        self.tests.first().map(|s| s.as_str())
    }

    /// Checks that the job can be executed by a worker.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.tests.is_empty() {
            return Err(ParseError::NoTests);
        }
        Ok(())
    }

    /// Serializes this job descriptor to a single-line JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes a job descriptor from JSON.
    ///
    /// This does not call [`Self::validate`].
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        serde_json::from_str(json).map_err(|err| ParseError::Json {
            kind: DocumentKind::Job,
            err,
        })
    }
}

/// The platform representation of a result channel endpoint.
///
/// On Unix this is a file descriptor number; on Windows it is the numeric value of a handle.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelHandle(i64);

impl ChannelHandle {
    /// Creates a new channel handle from its raw value.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw value of this handle.
    pub const fn as_raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
