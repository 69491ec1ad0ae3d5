// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The private channel a worker writes its result to.
//!
//! A result channel is an anonymous pipe. The supervisor keeps the read end, and the write end is
//! passed to exactly one worker process. Both ends are created non-inheritable: the launcher makes
//! the write end inheritable only for the worker it is meant for, using whatever mechanism the
//! platform provides.
//!
//! The channel carries a single JSON-encoded [`WorkerResult`]. It never shares a stream with the
//! worker's stdout or stderr, so test output cannot corrupt the result.

use crate::errors::ChannelError;
use bytes::Bytes;
use isotest_metadata::{ChannelHandle, ParseError, WorkerResult};
use std::{
    fs::File,
    io::{PipeReader, PipeWriter, Write},
};
use tracing::debug;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        #[path = "result_channel/unix.rs"]
        mod unix;
        use unix as os;
        pub(crate) use unix::pass_to_child;
    } else if #[cfg(windows)] {
        #[path = "result_channel/windows.rs"]
        mod windows;
        use windows as os;
        pub(crate) use windows::InheritGuard;
    } else {
        compile_error!("unsupported target platform");
    }
}

/// Creates a new result channel.
///
/// Returns the supervisor's end and the end meant for the worker.
pub fn result_channel() -> Result<(ResultReceiver, ResultSender), ChannelError> {
    let (reader, writer) = std::io::pipe().map_err(ChannelError::Create)?;
    let sender = ResultSender { writer };
    debug!(handle = %sender.handle(), "created result channel");
    Ok((ResultReceiver { reader }, sender))
}

/// The worker's end of a result channel, as held by the supervisor before launch.
///
/// The launcher consumes this, passes it to the worker process and closes the supervisor's copy.
#[derive(Debug)]
pub struct ResultSender {
    writer: PipeWriter,
}

impl ResultSender {
    /// Returns the handle the worker will see for this channel.
    pub fn handle(&self) -> ChannelHandle {
        os::handle_of(&self.writer)
    }

    pub(crate) fn writer(&self) -> &PipeWriter {
        &self.writer
    }
}

/// The supervisor's end of a result channel.
#[derive(Debug)]
pub struct ResultReceiver {
    reader: PipeReader,
}

impl ResultReceiver {
    pub(crate) fn into_file(self) -> File {
        pipe_reader_to_file(self.reader)
    }
}

/// Converts the read end of a pipe into a file that tokio can read from.
pub(crate) fn pipe_reader_to_file(rx: PipeReader) -> File {
    os::pipe_reader_to_file(rx)
}

/// The worker side of a result channel: an inherited handle, opened for writing.
#[derive(Debug)]
pub struct ResultWriter {
    handle: ChannelHandle,
    file: File,
}

impl ResultWriter {
    /// Opens the result channel this process inherited.
    ///
    /// The handle is checked before it is adopted, and it is made non-inheritable again so that
    /// processes spawned by the test do not hold the channel open.
    pub fn open(handle: ChannelHandle) -> Result<Self, ChannelError> {
        let file = os::open_inherited(handle)?;
        Ok(Self { handle, file })
    }

    /// Returns the handle this writer was opened from.
    pub fn handle(&self) -> ChannelHandle {
        self.handle
    }

    /// Writes the result and closes the channel.
    pub fn write_result(mut self, result: &WorkerResult) -> Result<(), ChannelError> {
        let json = result.to_json().map_err(ChannelError::Serialize)?;
        let handle = self.handle;
        self.file
            .write_all(json.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|err| ChannelError::Write { handle, err })
    }
}

/// Checks that a handle refers to an open descriptor or handle in this process.
pub fn check_handle(handle: ChannelHandle) -> Result<(), ChannelError> {
    os::check_handle(handle).map(|_| ())
}

/// What the supervisor read from a result channel.
#[derive(Debug)]
pub enum ReceivedResult {
    /// A well-formed result.
    Received(WorkerResult),

    /// The channel was closed without any data being written.
    Empty,

    /// Data was written, but it is not a valid result.
    Malformed {
        /// The raw bytes read from the channel.
        raw: Bytes,

        /// The parse error.
        error: ParseError,
    },
}

impl ReceivedResult {
    /// Interprets the bytes read from a result channel.
    pub fn parse(raw: Bytes) -> Self {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Self::Empty;
        }
        match WorkerResult::from_json_slice(&raw) {
            Ok(result) => Self::Received(result),
            Err(error) => Self::Malformed { raw, error },
        }
    }
}
