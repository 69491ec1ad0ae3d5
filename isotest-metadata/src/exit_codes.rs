// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `isotest` and its worker processes.
///
/// `isotest` runs may fail for a variety of reasons. This structure documents the exit codes
/// that may occur in case of expected failures.
///
/// For worker processes, exit code [`OK`](Self::OK) means that a result was written to the result
/// channel. It never means that the test passed: the outcome lives in the result itself.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum IsotestExitCode {}

impl IsotestExitCode {
    /// No errors occurred and isotest exited normally.
    ///
    /// For a worker, this means a result was written.
    pub const OK: i32 = 0;

    /// The worker was invoked with the wrong number of arguments.
    pub const WORKER_USAGE_ERROR: i32 = 2;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// The worker could not decode its job descriptor or prepare to run the test.
    pub const WORKER_SETUP_FAILED: i32 = 70;

    /// The worker could not open or write to its result channel.
    pub const WORKER_CHANNEL_ERROR: i32 = 71;

    /// The worker's own deadline expired and it terminated itself.
    pub const WORKER_DEADLINE_EXCEEDED: i32 = 72;

    /// A user issue happened while setting up an isotest invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// One or more tests failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// A worker process could not be launched.
    pub const LAUNCH_FAILED: i32 = 103;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
