// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Status lines and summaries for `isotest run`.

use crate::output::StderrStyles;
use isotest_metadata::Outcome;
use isotest_runner::supervisor::{ResultSource, WorkerReport};
use owo_colors::{OwoColorize, Style};
use std::{
    io::{self, Write},
    time::Duration,
};

/// Counts of finished tests by outcome.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct RunStats {
    pub(crate) run: usize,
    pub(crate) passed: usize,
    pub(crate) failed: usize,
    pub(crate) errored: usize,
    pub(crate) timed_out: usize,
    pub(crate) skipped: usize,
    pub(crate) crashed: usize,
    pub(crate) flaky: usize,
}

impl RunStats {
    pub(crate) fn record(&mut self, outcome: Outcome) {
        self.run += 1;
        match outcome {
            Outcome::Success => self.passed += 1,
            Outcome::Failure => self.failed += 1,
            Outcome::Error => self.errored += 1,
            Outcome::Timeout => self.timed_out += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Crashed => self.crashed += 1,
        }
    }

    /// Records the outcome of a re-run of a test that did not pass the first time.
    pub(crate) fn record_rerun(&mut self, first: Outcome, rerun: Outcome) {
        if !rerun.is_pass() {
            return;
        }
        match first {
            Outcome::Success | Outcome::Skipped => return,
            Outcome::Failure => self.failed -= 1,
            Outcome::Error => self.errored -= 1,
            Outcome::Timeout => self.timed_out -= 1,
            Outcome::Crashed => self.crashed -= 1,
        }
        self.flaky += 1;
    }

    pub(crate) fn not_passed(&self) -> usize {
        self.failed + self.errored + self.timed_out + self.crashed
    }
}

pub(crate) struct Reporter<W> {
    writer: W,
    styles: StderrStyles,
    verbose: bool,
}

impl<W: Write> Reporter<W> {
    pub(crate) fn new(writer: W, styles: StderrStyles, verbose: bool) -> Self {
        Self {
            writer,
            styles,
            verbose,
        }
    }

    pub(crate) fn report_finished(&mut self, report: &WorkerReport, rerun: bool) -> io::Result<()> {
        let outcome = report.result.outcome;
        let (status, style) = self.status_str(outcome, rerun);
        write!(
            self.writer,
            "{:>12} {} {}",
            status.style(style),
            format_duration(report.time_taken),
            report.result.test_name.style(self.styles.bold),
        )?;
        if report.leaked {
            write!(self.writer, " {}", "(leaked handles)".style(self.styles.skip))?;
        }
        writeln!(self.writer)?;

        let show_details = self.verbose || !outcome.is_pass();
        if !show_details {
            return Ok(());
        }

        // Synthesized diagnostics already include the tail of the output.
        if let Some(diagnostics) = &report.result.diagnostics {
            self.write_section("DIAGNOSTICS", &report.result.test_name, style)?;
            writeln!(self.writer, "{}", diagnostics.trim_end())?;
        }
        if matches!(report.source, ResultSource::Reported) && !report.output.is_empty() {
            self.write_section("OUTPUT", &report.result.test_name, style)?;
            self.writer.write_all(&report.output)?;
            if !report.output.ends_with(b"\n") {
                writeln!(self.writer)?;
            }
        }
        for error in &report.errors {
            writeln!(
                self.writer,
                "{}: {error}",
                "warning".style(self.styles.skip)
            )?;
        }
        Ok(())
    }

    pub(crate) fn report_summary(&mut self, stats: &RunStats, elapsed: Duration) -> io::Result<()> {
        let style = if stats.not_passed() > 0 {
            self.styles.fail
        } else {
            self.styles.pass
        };
        write!(
            self.writer,
            "{:>12} {} {} {} run: {} passed",
            "Summary".style(style),
            format_duration(elapsed),
            stats.run.style(self.styles.count),
            if stats.run == 1 { "test" } else { "tests" },
            stats.passed.style(self.styles.count),
        )?;
        for (count, label) in [
            (stats.flaky, "flaky"),
            (stats.failed, "failed"),
            (stats.errored, "errored"),
            (stats.timed_out, "timed out"),
            (stats.crashed, "crashed"),
            (stats.skipped, "skipped"),
        ] {
            if count > 0 {
                write!(self.writer, ", {} {label}", count.style(self.styles.count))?;
            }
        }
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn write_section(&mut self, name: &str, test_name: &str, style: Style) -> io::Result<()> {
        writeln!(
            self.writer,
            "{}",
            format!("--- {name}: {test_name} ---").style(style)
        )
    }

    fn status_str(&self, outcome: Outcome, rerun: bool) -> (&'static str, Style) {
        let (status, style) = match outcome {
            Outcome::Success => ("PASS", self.styles.pass),
            Outcome::Failure => ("FAIL", self.styles.fail),
            Outcome::Error => ("ERROR", self.styles.fail),
            Outcome::Timeout => ("TIMEOUT", self.styles.fail),
            Outcome::Skipped => ("SKIP", self.styles.skip),
            Outcome::Crashed => ("CRASH", self.styles.fail),
        };
        match (rerun, status) {
            (true, "PASS") => ("RETRY PASS", style),
            (true, _) => ("RETRY FAIL", style),
            (false, _) => (status, style),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    format!("[{:>9.3}s]", duration.as_secs_f64())
}
