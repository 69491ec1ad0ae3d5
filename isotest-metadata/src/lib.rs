// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Wire types shared between the isotest supervisor and its worker processes.
//!
//! A supervisor describes a single test run with a [`JobDescriptor`], serializes it to JSON and
//! passes it to a worker process as its only argument. The worker executes exactly one test and
//! writes a [`WorkerResult`] back over a private channel identified by a [`ChannelHandle`].
//!
//! Both documents are plain JSON with kebab-case keys and durations encoded as
//! [humantime](https://docs.rs/humantime) strings.

mod errors;
mod exit_codes;
mod job;
#[cfg(any(test, feature = "proptest1"))]
mod proptest_helpers;
mod result;

pub use errors::*;
pub use exit_codes::*;
pub use job::*;
pub use result::*;
