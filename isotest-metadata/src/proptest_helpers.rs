// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Proptest support for wire types.

use crate::{ChannelHandle, JobDescriptor, Outcome, WorkerResult};
use camino::Utf8PathBuf;
use proptest::{collection::vec, option, prelude::*};
use std::time::Duration;

/// Durations up to roughly ten years, with nanosecond precision.
fn arb_duration() -> impl Strategy<Value = Duration> {
    (0u64..315_000_000, 0u32..1_000_000_000).prop_map(|(secs, nanos)| Duration::new(secs, nanos))
}

fn arb_path() -> impl Strategy<Value = Utf8PathBuf> {
    "(/[a-zA-Z0-9_. -]{1,12}){1,4}".prop_map(Utf8PathBuf::from)
}

fn arb_patterns() -> impl Strategy<Value = Option<Vec<String>>> {
    option::of(vec("[a-zA-Z0-9_:*?.]{0,16}", 0..4))
}

impl Arbitrary for ChannelHandle {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        any::<i64>().prop_map(ChannelHandle::new).boxed()
    }
}

impl Arbitrary for Outcome {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            Just(Outcome::Success),
            Just(Outcome::Failure),
            Just(Outcome::Error),
            Just(Outcome::Timeout),
            Just(Outcome::Skipped),
            Just(Outcome::Crashed),
        ]
        .boxed()
    }
}

impl Arbitrary for JobDescriptor {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        // Test lists include the empty list, which is representable but fails validation.
        let selection = (
            vec(any::<String>(), 0..64),
            arb_patterns(),
            arb_patterns(),
            option::of(arb_duration()),
            any::<bool>(),
            any::<ChannelHandle>(),
        );
        let environment = (
            option::of(arb_path()),
            option::of(vec(any::<String>(), 1..4)),
            option::of(arb_path()),
            vec("[a-z]{1,10}", 0..4),
        );
        let knobs = (
            any::<u8>(),
            any::<bool>(),
            option::of(any::<u32>()),
            option::of(any::<u64>()),
            any::<bool>(),
            option::of(any::<u64>()),
        );

        (selection, environment, knobs)
            .prop_map(
                |(
                    (tests, match_tests, ignore_tests, timeout, rerun, result_channel),
                    (test_dir, worker_command, working_dir, use_resources),
                    (verbose, fail_fast, gc_threshold, random_seed, pgo, max_open_files),
                )| JobDescriptor {
                    tests,
                    match_tests,
                    ignore_tests,
                    timeout,
                    rerun,
                    result_channel,
                    test_dir,
                    worker_command,
                    working_dir,
                    use_resources,
                    verbose,
                    fail_fast,
                    gc_threshold,
                    random_seed,
                    pgo,
                    max_open_files,
                },
            )
            .boxed()
    }
}

impl Arbitrary for WorkerResult {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<String>(),
            any::<Outcome>(),
            arb_duration(),
            option::of(any::<String>()),
        )
            .prop_map(|(test_name, outcome, duration, diagnostics)| WorkerResult {
                test_name,
                outcome,
                duration,
                diagnostics,
            })
            .boxed()
    }
}
