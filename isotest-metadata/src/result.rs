// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{DocumentKind, ParseError};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// The result of running a single test in a worker process.
///
/// Exactly one result is produced per worker invocation. If the worker dies before writing one,
/// the supervisor synthesizes it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerResult {
    /// The name of the test that was run.
    pub test_name: String,

    /// The outcome of the test.
    pub outcome: Outcome,

    /// How long the test took.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Free-form diagnostic text, for example a failure message.
    #[serde(default)]
    pub diagnostics: Option<String>,
}

impl WorkerResult {
    /// Serializes this result to a single-line JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes a result from JSON bytes.
    pub fn from_json_slice(json: &[u8]) -> Result<Self, ParseError> {
        serde_json::from_slice(json).map_err(|err| ParseError::Json {
            kind: DocumentKind::Result,
            err,
        })
    }
}

/// The outcome of a test.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// The test passed.
    Success,

    /// The test ran and failed.
    Failure,

    /// The test could not be run, for example because it was not found.
    Error,

    /// The test exceeded its deadline.
    Timeout,

    /// The test decided not to run.
    Skipped,

    /// The worker died without reporting a result, or reported one that could not be trusted.
    Crashed,
}

impl Outcome {
    /// Returns true if this outcome counts as passing.
    ///
    /// Skipped tests count as passing.
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }

    /// Returns the name of this outcome as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(Outcome::Success, "success")]
    #[test_case(Outcome::Failure, "failure")]
    #[test_case(Outcome::Error, "error")]
    #[test_case(Outcome::Timeout, "timeout")]
    #[test_case(Outcome::Skipped, "skipped")]
    #[test_case(Outcome::Crashed, "crashed")]
    fn outcome_wire_names(outcome: Outcome, name: &str) {
        assert_eq!(
            serde_json::to_string(&outcome).expect("serialization succeeds"),
            format!("\"{name}\"")
        );
        assert_eq!(outcome.as_str(), name);
    }

    #[test]
    fn unicode_diagnostics() {
        let result = WorkerResult {
            test_name: "test_unicode".to_owned(),
            outcome: Outcome::Failure,
            duration: Duration::from_millis(1500),
            diagnostics: Some("assertion failed: 'ü' != 'ü' (╯°□°)╯︵ ┻━┻".to_owned()),
        };
        let json = result.to_json().expect("serialization succeeds");
        assert!(json.contains("\"duration\":\"1s 500ms\""), "json: {json}");
        let parsed = WorkerResult::from_json_slice(json.as_bytes()).expect("round trip");
        assert_eq!(parsed, result);
    }

    #[test]
    fn truncated_json_is_an_error() {
        let err = WorkerResult::from_json_slice(br#"{"test-name": "test_os", "outc"#)
            .expect_err("truncated input fails");
        assert!(matches!(
            err,
            ParseError::Json {
                kind: DocumentKind::Result,
                ..
            }
        ));
    }
}
