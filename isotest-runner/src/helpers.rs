// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::process::ExitStatus;

/// How a process was aborted, if it didn't exit normally.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AbortStatus {
    /// The process was terminated by a signal on Unix.
    #[cfg(unix)]
    UnixSignal(i32),

    /// The process exited with an NTSTATUS that has the error bits set on Windows.
    #[cfg(windows)]
    WindowsNtStatus(i32),
}

impl AbortStatus {
    /// Extracts the abort status from an exit status, if the process was aborted.
    pub fn extract(exit_status: ExitStatus) -> Option<Self> {
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::process::ExitStatusExt;
                exit_status.signal().map(AbortStatus::UnixSignal)
            } else if #[cfg(windows)] {
                exit_status.code().and_then(|code| {
                    // 0xC0000000 and above are NTSTATUS error codes.
                    (code < 0).then_some(AbortStatus::WindowsNtStatus(code))
                })
            } else {
                None
            }
        }
    }
}

/// Displays how a process exited, for example "exited with exit code 1".
pub fn display_exited_with(exit_status: ExitStatus) -> String {
    match AbortStatus::extract(exit_status) {
        Some(abort_status) => display_abort_status(abort_status),
        None => match exit_status.code() {
            Some(code) => format!("exited with exit code {code}"),
            None => "exited with an unknown error".to_owned(),
        },
    }
}

/// Displays the abort status.
pub fn display_abort_status(abort_status: AbortStatus) -> String {
    match abort_status {
        #[cfg(unix)]
        AbortStatus::UnixSignal(sig) => match signal_str(sig) {
            Some(s) => format!("aborted with signal {sig} (SIG{s})"),
            None => format!("aborted with signal {sig}"),
        },
        #[cfg(windows)]
        AbortStatus::WindowsNtStatus(nt_status) => {
            format!("aborted with code {nt_status:#010x}")
        }
    }
}

#[cfg(unix)]
pub(crate) fn signal_str(signal: i32) -> Option<&'static str> {
    // These signal numbers are the same on at least Linux, macOS, FreeBSD and illumos.
    match signal {
        1 => Some("HUP"),
        2 => Some("INT"),
        3 => Some("QUIT"),
        4 => Some("ILL"),
        5 => Some("TRAP"),
        6 => Some("ABRT"),
        8 => Some("FPE"),
        9 => Some("KILL"),
        11 => Some("SEGV"),
        13 => Some("PIPE"),
        14 => Some("ALRM"),
        15 => Some("TERM"),
        _ => None,
    }
}

/// Returns the last `max_len` bytes of `output` as text, starting on a line boundary if one is
/// close by.
pub(crate) fn output_tail(output: &[u8], max_len: usize) -> (String, bool) {
    if output.len() <= max_len {
        return (String::from_utf8_lossy(output).into_owned(), false);
    }
    let mut tail = &output[output.len() - max_len..];
    if let Some(pos) = tail.iter().position(|&b| b == b'\n') {
        tail = &tail[pos + 1..];
    }
    (String::from_utf8_lossy(tail).into_owned(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[cfg(unix)]
    #[test]
    fn exited_with() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(
            display_exited_with(ExitStatus::from_raw(3 << 8)),
            "exited with exit code 3"
        );
        assert_eq!(
            display_exited_with(ExitStatus::from_raw(libc::SIGSEGV)),
            "aborted with signal 11 (SIGSEGV)"
        );
        assert_eq!(
            display_exited_with(ExitStatus::from_raw(libc::SIGKILL)),
            "aborted with signal 9 (SIGKILL)"
        );
    }

    #[test]
    fn tail_of_output() {
        assert_eq!(output_tail(b"short", 10), ("short".to_owned(), false));
        assert_eq!(
            output_tail(b"line one\nline two\nline three\n", 16),
            ("line three\n".to_owned(), true)
        );
        assert_eq!(
            output_tail(b"0123456789abcdef", 4),
            ("cdef".to_owned(), true)
        );
    }
}
