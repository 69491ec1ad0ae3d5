// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::ResultSender;
use crate::errors::ChannelError;
use isotest_metadata::ChannelHandle;
use std::{
    fs::File,
    io::{self, PipeReader, PipeWriter},
    os::{
        fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
        unix::process::CommandExt,
    },
};

/// Descriptors at or above this number are not scanned in the child.
const MAX_SCANNED_FD: RawFd = 65536;

pub(super) fn handle_of(writer: &PipeWriter) -> ChannelHandle {
    ChannelHandle::new(writer.as_raw_fd().into())
}

pub(super) fn pipe_reader_to_file(rx: PipeReader) -> File {
    File::from(OwnedFd::from(rx))
}

pub(super) fn check_handle(handle: ChannelHandle) -> Result<RawFd, ChannelError> {
    let invalid = |err| ChannelError::InvalidHandle { handle, err };

    let fd = RawFd::try_from(handle.as_raw()).map_err(|_| {
        invalid(io::Error::new(
            io::ErrorKind::InvalidInput,
            "handle is out of range for a file descriptor",
        ))
    })?;
    if fd <= libc::STDERR_FILENO {
        return Err(invalid(io::Error::new(
            io::ErrorKind::InvalidInput,
            "standard streams cannot be used as a result channel",
        )));
    }

    // SAFETY: F_GETFD only reads descriptor flags, and fails with EBADF on closed descriptors.
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
        return Err(invalid(io::Error::last_os_error()));
    }
    Ok(fd)
}

pub(super) fn open_inherited(handle: ChannelHandle) -> Result<File, ChannelError> {
    let fd = check_handle(handle)?;

    // SAFETY: the launcher passes this descriptor to the worker for its exclusive use, and
    // check_handle verified that it is open.
    let file = unsafe { File::from_raw_fd(fd) };

    // SAFETY: fd is owned by `file` and open.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
        return Err(ChannelError::ConfigureInheritance {
            handle,
            err: io::Error::last_os_error(),
        });
    }
    Ok(file)
}

/// Arranges for `sender` to be the only descriptor besides stdio that survives into the child.
///
/// Every other descriptor is marked close-on-exec in the child after fork. They are not closed
/// outright: the standard library's exec error pipe must stay open until exec.
pub(crate) fn pass_to_child(cmd: &mut std::process::Command, sender: &ResultSender) {
    let channel_fd = sender.writer().as_raw_fd();
    let max_fd = max_scanned_fd();

    // SAFETY: the closure only calls fcntl, which is async-signal-safe, and allocates nothing.
    unsafe {
        cmd.pre_exec(move || {
            for fd in (libc::STDERR_FILENO + 1)..max_fd {
                if fd != channel_fd {
                    // EBADF for descriptors that aren't open is expected.
                    libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
                }
            }

            let flags = libc::fcntl(channel_fd, libc::F_GETFD);
            if flags == -1 {
                return Err(io::Error::last_os_error());
            }
            if libc::fcntl(channel_fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

// Computed before fork: getrlimit is not guaranteed to be async-signal-safe.
fn max_scanned_fd() -> RawFd {
    match nix::sys::resource::getrlimit(nix::sys::resource::Resource::RLIMIT_NOFILE) {
        Ok((soft, _)) => RawFd::try_from(soft)
            .unwrap_or(MAX_SCANNED_FD)
            .min(MAX_SCANNED_FD),
        Err(_) => MAX_SCANNED_FD,
    }
}
