// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt};

/// An error that occurs while decoding or validating an isotest wire document.
#[derive(Debug)]
pub enum ParseError {
    /// The input was not valid JSON for the expected document.
    Json {
        /// The kind of document being decoded.
        kind: DocumentKind,

        /// The underlying error.
        err: serde_json::Error,
    },

    /// A job descriptor did not name any tests.
    NoTests,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Json { kind, .. } => write!(f, "error parsing {kind} JSON"),
            Self::NoTests => write!(f, "job descriptor does not name any tests"),
        }
    }
}

impl error::Error for ParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Json { err, .. } => Some(err),
            Self::NoTests => None,
        }
    }
}

/// The kind of document a [`ParseError`] refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DocumentKind {
    /// A [`JobDescriptor`](crate::JobDescriptor).
    Job,

    /// A [`WorkerResult`](crate::WorkerResult).
    Result,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Job => write!(f, "job descriptor"),
            Self::Result => write!(f, "worker result"),
        }
    }
}
