// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collects a worker's combined output and its result channel concurrently.

use crate::errors::ChildFdError;
use bytes::{Bytes, BytesMut};
use std::{io, sync::Arc};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncRead, BufReader},
};

/// The size of each buffered reader's buffer, and the size at which we grow the accumulators.
///
/// This size is not totally arbitrary, but rather the (normal) page size on most systems.
const CHUNK_SIZE: usize = 4 * 1024;

/// A `BufReader` over an `AsyncRead` that tracks the state of the reader and
/// whether it is done.
pub(crate) struct FusedBufReader<R> {
    reader: BufReader<R>,
    done: bool,
}

impl<R: AsyncRead + Unpin> FusedBufReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(CHUNK_SIZE, reader),
            done: false,
        }
    }

    pub(crate) async fn fill_buf(&mut self, acc: &mut BytesMut) -> Result<(), io::Error> {
        if self.done {
            return Ok(());
        }

        let res = self.reader.fill_buf().await;
        match res {
            Ok(buf) => {
                acc.extend_from_slice(buf);
                if buf.is_empty() {
                    self.done = true;
                }
                let len = buf.len();
                self.reader.consume(len);
                Ok(())
            }
            Err(error) => {
                self.done = true;
                Err(error)
            }
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }
}

/// Output and result accumulator for a worker process.
///
/// The worker's stdout and stderr share one pipe, so their relative ordering is preserved. The
/// result channel is a separate pipe and is accumulated separately.
pub(crate) struct StreamAccumulator {
    output: FusedBufReader<File>,
    channel: FusedBufReader<File>,
    output_acc: BytesMut,
    channel_acc: BytesMut,
    errors: Vec<ChildFdError>,
}

impl StreamAccumulator {
    pub(crate) fn new(output: File, channel: File) -> Self {
        Self {
            output: FusedBufReader::new(output),
            channel: FusedBufReader::new(channel),
            output_acc: BytesMut::with_capacity(CHUNK_SIZE),
            channel_acc: BytesMut::new(),
            errors: Vec::new(),
        }
    }

    /// Makes progress on whichever stream has data available.
    ///
    /// This operation is cancel-safe, since the underlying [`AsyncBufReadExt::fill_buf`] operation
    /// is cancel-safe.
    pub(crate) async fn fill_buf(&mut self) {
        let res = tokio::select! {
            res = self.output.fill_buf(&mut self.output_acc), if !self.output.is_done() => {
                res.map_err(|error| ChildFdError::ReadCombined(Arc::new(error)))
            }
            res = self.channel.fill_buf(&mut self.channel_acc), if !self.channel.is_done() => {
                res.map_err(|error| ChildFdError::ReadChannel(Arc::new(error)))
            }
            // If both are done, do nothing.
            else => Ok(()),
        };
        if let Err(error) = res {
            self.errors.push(error);
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.output.is_done() && self.channel.is_done()
    }

    pub(crate) fn push_error(&mut self, error: ChildFdError) {
        self.errors.push(error);
    }

    /// Marks the collection as done, returning (output, channel contents, errors).
    pub(crate) fn freeze(self) -> (Bytes, Bytes, Vec<ChildFdError>) {
        (
            self.output_acc.freeze(),
            self.channel_acc.freeze(),
            self.errors,
        )
    }
}
