// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs every test in its own isolated worker process.
//!
//! `isotest run` launches one worker per test, enforces timeouts and reports each test's outcome.
//! Workers are this same binary, re-executed with a hidden subcommand.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;
mod reporter;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{Color, LOG_ENV, OutputContext, StderrStyles};
