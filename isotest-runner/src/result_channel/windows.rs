// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::ResultSender;
use crate::errors::ChannelError;
use isotest_metadata::ChannelHandle;
use std::{
    fs::File,
    io::{self, PipeReader, PipeWriter},
    os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle},
};
use tracing::warn;
use windows_sys::Win32::Foundation::{
    GetHandleInformation, HANDLE, HANDLE_FLAG_INHERIT, SetHandleInformation,
};

pub(super) fn handle_of(writer: &PipeWriter) -> ChannelHandle {
    ChannelHandle::new(writer.as_raw_handle() as i64)
}

pub(super) fn pipe_reader_to_file(rx: PipeReader) -> File {
    File::from(OwnedHandle::from(rx))
}

pub(super) fn check_handle(handle: ChannelHandle) -> Result<HANDLE, ChannelError> {
    let raw = handle.as_raw() as HANDLE;
    let mut flags = 0;
    // SAFETY: GetHandleInformation fails cleanly on handles that aren't open.
    if unsafe { GetHandleInformation(raw, &mut flags) } == 0 {
        return Err(ChannelError::InvalidHandle {
            handle,
            err: io::Error::last_os_error(),
        });
    }
    Ok(raw)
}

fn set_inherit(handle: ChannelHandle, raw: HANDLE, inherit: bool) -> Result<(), ChannelError> {
    let flags = if inherit { HANDLE_FLAG_INHERIT } else { 0 };
    // SAFETY: Win32 call, the handle was checked or is owned by the caller.
    if unsafe { SetHandleInformation(raw, HANDLE_FLAG_INHERIT, flags) } == 0 {
        Err(ChannelError::ConfigureInheritance {
            handle,
            err: io::Error::last_os_error(),
        })
    } else {
        Ok(())
    }
}

pub(super) fn open_inherited(handle: ChannelHandle) -> Result<File, ChannelError> {
    let raw = check_handle(handle)?;
    // SAFETY: the launcher passes this handle to the worker for its exclusive use, and
    // check_handle verified that it is open.
    let file = unsafe { File::from_raw_handle(raw as RawHandle) };
    set_inherit(handle, raw, false)?;
    Ok(file)
}

/// Marks a result channel inheritable for as long as the guard is alive.
///
/// Create this immediately before spawning the worker and drop it immediately after spawn
/// returns, so that no other process started in between inherits the channel.
pub(crate) struct InheritGuard<'a> {
    sender: &'a ResultSender,
}

impl<'a> InheritGuard<'a> {
    pub(crate) fn new(sender: &'a ResultSender) -> Result<Self, ChannelError> {
        let raw = sender.writer().as_raw_handle() as HANDLE;
        set_inherit(sender.handle(), raw, true)?;
        Ok(Self { sender })
    }
}

impl Drop for InheritGuard<'_> {
    fn drop(&mut self) {
        let raw = self.sender.writer().as_raw_handle() as HANDLE;
        if let Err(error) = set_inherit(self.sender.handle(), raw, false) {
            warn!("{error}");
        }
    }
}
