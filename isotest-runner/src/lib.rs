// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for isotest, a test supervisor that runs every test in its own worker
//! process.
//!
//! The basic flow of operations is:
//!
//! 1. An orchestrator describes a test run with a
//!    [`JobDescriptor`](isotest_metadata::JobDescriptor) and hands it to a
//!    [`Launcher`](launcher::Launcher).
//! 2. The launcher creates a private [result channel](result_channel), starts a worker process in
//!    its own process group and returns a [`Worker`](supervisor::Worker) handle immediately.
//! 3. The worker process runs [`run_worker`](worker::run_worker), which executes exactly one test
//!    through a [`TestExecutor`](executor::TestExecutor) and writes a single
//!    [`WorkerResult`](isotest_metadata::WorkerResult) to the result channel.
//! 4. [`Worker::wait`](supervisor::Worker::wait) collects the worker's output, enforces its
//!    timeout and decides the final result, synthesizing one if the worker crashed, hung or
//!    reported nothing.

mod capture;
pub mod config;
pub mod errors;
pub mod executor;
pub mod helpers;
pub mod launcher;
pub mod result_channel;
pub mod setup;
pub mod supervisor;
mod time;
pub mod timeout;
pub mod worker;
