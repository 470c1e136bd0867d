// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-readable status lines for a test run.

use super::events::{Outcome, RunStats, TestEvent, TestEventKind};
use crate::helpers::plural;
use owo_colors::{OwoColorize, Style};
use std::{
    io::{self, Write},
    time::Duration,
};

/// Where a [`TestDisplayer`] writes its output.
#[derive(Debug)]
pub enum DisplayerOutput<'a> {
    /// Write to standard output.
    Stdout,

    /// Write to a buffer.
    Buffer(&'a mut Vec<u8>),
}

/// Writes status lines for test events.
#[derive(Debug)]
pub struct TestDisplayer<'a> {
    output: DisplayerOutput<'a>,
    styles: Box<Styles>,
}

impl<'a> TestDisplayer<'a> {
    /// Creates a displayer that writes uncolored output.
    pub fn new(output: DisplayerOutput<'a>) -> Self {
        Self {
            output,
            styles: Box::default(),
        }
    }

    /// Colorizes output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Reports a test event.
    pub fn write_event(&mut self, event: &TestEvent<'_>) -> io::Result<()> {
        match &mut self.output {
            DisplayerOutput::Stdout => {
                // Write the whole event at once so lines from concurrent output don't interleave.
                let mut buf = Vec::new();
                write_event_impl(&self.styles, event, &mut buf)?;
                let mut stdout = io::stdout().lock();
                stdout.write_all(&buf)?;
                stdout.flush()
            }
            DisplayerOutput::Buffer(buf) => write_event_impl(&self.styles, event, &mut **buf),
        }
    }
}

fn write_event_impl(styles: &Styles, event: &TestEvent<'_>, mut writer: impl Write) -> io::Result<()> {
    match &event.kind {
        TestEventKind::RunStarted {
            group_count,
            test_count,
            filtered_out,
        } => {
            write!(writer, "{:>12} ", "Starting".style(styles.pass))?;
            write!(
                writer,
                "{} {} across {} {}",
                test_count.style(styles.count),
                plural::tests_str(*test_count),
                group_count.style(styles.count),
                plural::groups_str(*group_count),
            )?;
            if *filtered_out > 0 {
                write!(
                    writer,
                    " ({} filtered out)",
                    filtered_out.style(styles.count)
                )?;
            }
            writeln!(writer)?;
        }
        TestEventKind::GroupStarted { group, test_count } => {
            writeln!(
                writer,
                "{:>12} {} ({} {})",
                "GROUP".style(styles.count),
                group.style(styles.group),
                test_count.style(styles.count),
                plural::tests_str(*test_count),
            )?;
        }
        TestEventKind::HookFailed {
            group,
            hook,
            outcome,
        } => {
            writeln!(
                writer,
                "{:>12} [         ] {} {}",
                "HOOK-FAIL".style(styles.fail),
                group.style(styles.group),
                hook,
            )?;
            write_message(styles.fail_output, outcome.message(), &mut writer)?;
        }
        TestEventKind::GroupSkipped {
            group,
            test_count,
            message,
        } => {
            writeln!(
                writer,
                "{:>12} [         ] {} ({} {} not run)",
                "SKIP".style(styles.skip),
                group.style(styles.group),
                test_count.style(styles.count),
                plural::tests_str(*test_count),
            )?;
            write_message(styles.skip_output, Some(message), &mut writer)?;
        }
        TestEventKind::TestStarted {
            group,
            test,
            isolated,
        } => {
            write!(writer, "{:>12} [         ] ", "START".style(styles.pass))?;
            write_name(styles, group, test, &mut writer)?;
            if *isolated {
                write!(writer, " (isolated)")?;
            }
            writeln!(writer)?;
        }
        TestEventKind::TestFinished {
            group,
            test,
            outcome,
            time_taken,
            ..
        } => {
            let (status, style, output_style) = match outcome {
                Outcome::Passed { .. } => ("PASS", styles.pass, styles.pass_output),
                Outcome::Failed { .. } => ("FAIL", styles.fail, styles.fail_output),
                Outcome::Skipped { .. } => ("SKIP", styles.skip, styles.skip_output),
            };
            write!(writer, "{:>12} ", status.style(style))?;
            write_duration(*time_taken, &mut writer)?;
            write_name(styles, group, test, &mut writer)?;
            if let Some(kind) = outcome.failure_kind() {
                write!(writer, " ({kind})")?;
            }
            writeln!(writer)?;
            write_message(output_style, outcome.message(), &mut writer)?;
        }
        TestEventKind::GroupFinished { .. } => {}
        TestEventKind::RunFinished { run_stats, elapsed } => {
            write_summary(styles, run_stats, *elapsed, &mut writer)?;
        }
    }
    Ok(())
}

fn write_name(styles: &Styles, group: &str, test: &str, mut writer: impl Write) -> io::Result<()> {
    write!(
        writer,
        "{}:{}",
        group.style(styles.group),
        test.style(styles.test_name)
    )
}

fn write_duration(duration: Duration, mut writer: impl Write) -> io::Result<()> {
    // * > means right-align.
    // * 8 is the number of characters to pad to.
    // * .3 means print three digits after the decimal point.
    write!(writer, "[{:>8.3?}s] ", duration.as_secs_f64())
}

/// Writes each line of a message, indented under its status line.
fn write_message(style: Style, message: Option<&str>, mut writer: impl Write) -> io::Result<()> {
    let Some(message) = message else {
        return Ok(());
    };
    for line in message.lines() {
        writeln!(writer, "    {}", line.style(style))?;
    }
    Ok(())
}

fn write_summary(
    styles: &Styles,
    stats: &RunStats,
    elapsed: Duration,
    mut writer: impl Write,
) -> io::Result<()> {
    let summary_style = if stats.is_success() {
        styles.pass
    } else {
        styles.fail
    };
    write!(writer, "{:>12} ", "Summary".style(summary_style))?;
    write_duration(elapsed, &mut writer)?;

    write!(writer, "{}", stats.ran.style(styles.count))?;
    if stats.ran != stats.initial_run_count {
        write!(writer, "/{}", stats.initial_run_count.style(styles.count))?;
    }
    write!(
        writer,
        " {} run: {} {}, ",
        plural::tests_str(stats.initial_run_count),
        stats.passed.style(styles.count),
        "passed".style(styles.pass),
    )?;
    if stats.failed > 0 {
        write!(
            writer,
            "{} {}, ",
            stats.failed.style(styles.count),
            "failed".style(styles.fail),
        )?;
    }
    write!(
        writer,
        "{} {}",
        stats.skipped.style(styles.count),
        "skipped".style(styles.skip),
    )?;
    if stats.failed_groups > 0 {
        write!(
            writer,
            ", {} {} {}",
            stats.failed_groups.style(styles.count),
            plural::groups_str(stats.failed_groups),
            "failed".style(styles.fail),
        )?;
    }
    if stats.skipped_groups > 0 {
        write!(
            writer,
            ", {} {} {}",
            stats.skipped_groups.style(styles.count),
            plural::groups_str(stats.skipped_groups),
            "skipped".style(styles.skip),
        )?;
    }
    writeln!(writer)
}

#[derive(Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    pass_output: Style,
    fail_output: Style,
    skip_output: Style,
    group: Style,
    test_name: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.pass_output = Style::new().green();
        self.fail_output = Style::new().magenta();
        self.skip_output = Style::new().yellow();
        self.group = Style::new().magenta().bold();
        self.test_name = Style::new().blue().bold();
    }
}
