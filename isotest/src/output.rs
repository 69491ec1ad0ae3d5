// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Color selection, logging setup and styles for the supervisor's stderr output.

use clap::{
    Args, ValueEnum,
    builder::{
        Styles,
        styling::{AnsiColor, Effects},
    },
};
use owo_colors::{OwoColorize, Style, style};
use std::{fmt, sync::OnceLock};
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    level_filters::LevelFilter,
};
use tracing_subscriber::{
    Layer,
    filter::Targets,
    fmt::{FmtContext, FormatEvent, FormatFields, format},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// The environment variable used to configure logging, as a `tracing_subscriber` targets string.
pub const LOG_ENV: &str = "ISOTEST_LOG";

/// Log events with this target are printed without a level prefix.
pub(crate) const NO_HEADING_TARGET: &str = "isotest::no_heading";

/// Styles for `--help` and clap's own errors.
pub(crate) const fn clap_styles() -> Styles {
    let emphasis = AnsiColor::Green.on_default().effects(Effects::BOLD);
    let literal = AnsiColor::Cyan.on_default().effects(Effects::BOLD);
    Styles::styled()
        .header(emphasis)
        .usage(emphasis)
        .literal(literal)
        .placeholder(AnsiColor::Cyan.on_default())
        .error(AnsiColor::Red.on_default().effects(Effects::BOLD))
        .valid(literal)
        .invalid(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
}

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Verbose output: show captured output for passing tests too
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN",
        env = "ISOTEST_COLOR"
    )]
    color: Color,
}

impl OutputOpts {
    pub(crate) fn init(self) -> OutputContext {
        init_logging(self.color);
        OutputContext {
            verbose: self.verbose,
            color: self.color,
        }
    }
}

/// Output settings shared by every command.
#[derive(Copy, Clone, Debug)]
#[must_use]
pub struct OutputContext {
    pub(crate) verbose: bool,
    pub(crate) color: Color,
}

impl OutputContext {
    /// Output settings for worker processes, whose output is captured by the supervisor and so
    /// never colorized.
    pub(crate) fn color_never_init() -> Self {
        init_logging(Color::Never);
        Self {
            verbose: false,
            color: Color::Never,
        }
    }

    /// Returns the stylesheet for stderr under this context's color setting.
    pub fn stderr_styles(&self) -> StderrStyles {
        StderrStyles::for_color(self.color)
    }
}

/// When to produce color output.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
#[must_use]
pub enum Color {
    /// Colorize if stderr supports it.
    #[default]
    Auto,
    /// Always colorize.
    Always,
    /// Never colorize.
    Never,
}

impl Color {
    fn colorizes_stderr(self) -> bool {
        match self {
            Color::Auto => supports_color::on_cached(supports_color::Stream::Stderr).is_some(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

static LOGGER: OnceLock<()> = OnceLock::new();

/// Installs the global logger. Only the first call has any effect.
fn init_logging(color: Color) {
    LOGGER.get_or_init(|| {
        // An unset, empty or unparseable ISOTEST_LOG falls back to info.
        let targets = std::env::var(LOG_ENV)
            .ok()
            .filter(|value| !value.is_empty())
            .and_then(|value| value.parse::<Targets>().ok())
            .unwrap_or_else(|| Targets::new().with_default(LevelFilter::INFO));

        let layer = tracing_subscriber::fmt::layer()
            .event_format(LogFormatter {
                styles: StderrStyles::for_color(color),
            })
            .with_writer(std::io::stderr)
            .with_filter(targets);
        tracing_subscriber::registry().with(layer).init();
    });
}

/// Prints each event as `level: message`, dropping every field but the message.
struct LogFormatter {
    styles: StderrStyles,
}

impl LogFormatter {
    fn heading(&self, level: Level) -> (&'static str, Style) {
        match level {
            Level::ERROR => ("error", self.styles.fail),
            Level::WARN => ("warning", self.styles.skip),
            Level::INFO => ("info", self.styles.bold),
            Level::DEBUG => ("debug", self.styles.bold),
            Level::TRACE => ("trace", self.styles.dimmed),
        }
    }
}

impl<S, N> FormatEvent<S, N> for LogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        if metadata.target() != NO_HEADING_TARGET {
            let (heading, style) = self.heading(*metadata.level());
            write!(writer, "{}: ", heading.style(style))?;
        }

        let mut message = MessageVisitor::default();
        event.record(&mut message);
        writeln!(writer, "{}", message.0)
    }
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// Styles for everything isotest prints to stderr, including log headings.
#[derive(Clone, Debug, Default)]
pub struct StderrStyles {
    pub(crate) bold: Style,
    pub(crate) dimmed: Style,
    pub(crate) pass: Style,
    pub(crate) fail: Style,
    pub(crate) skip: Style,
    pub(crate) count: Style,
}

impl StderrStyles {
    fn for_color(color: Color) -> Self {
        if !color.colorizes_stderr() {
            return Self::default();
        }
        Self {
            bold: style().bold(),
            dimmed: style().dimmed(),
            pass: style().green().bold(),
            fail: style().red().bold(),
            skip: style().yellow().bold(),
            count: style().bold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn never_is_unstyled() {
        let styles = StderrStyles::for_color(Color::Never);
        assert_eq!(format!("{}", "PASS".style(styles.pass)), "PASS");

        let styles = StderrStyles::for_color(Color::Always);
        assert_ne!(format!("{}", "PASS".style(styles.pass)), "PASS");
    }
}
