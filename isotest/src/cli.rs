// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line interface for test programs.

use crate::output::{Color, clap_styles};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use isotest_runner::{
    config::{DefaultConfigWarnings, RunnerConfig},
    errors::{ConfigParseError, DisplayErrorChain, FilterError, WriteReportError},
    registry::TestRegistry,
    reporter::{DisplayerOutput, JunitReporter, ReportOptions, Reporter, TestDisplayer},
    runner::{SilenceGuard, TestRunnerBuilder},
    test_filter::TestFilter,
};
use std::{ffi::OsString, io, time::Duration};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Options accepted by a test program.
#[derive(Debug, Parser)]
#[command(
    about = "Runs the tests registered in this program",
    styles = clap_styles::style(),
    disable_version_flag = true
)]
pub struct Opts {
    /// Run only tests whose `group:test` name matches PATTERN (a regular expression).
    ///
    /// Prefix the pattern with `-` to exclude matching tests instead. May be repeated.
    #[arg(
        short = 'p',
        long = "pattern",
        value_name = "PATTERN",
        allow_hyphen_values = true
    )]
    pub patterns: Vec<String>,

    /// Default timeout for tests that don't set their own, in milliseconds
    #[arg(short = 't', long = "timeout", value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Disable colored output
    #[arg(short = 'c', long)]
    pub no_color: bool,

    /// Ignore skip requests and run every test to completion
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Run every test in its own child process
    #[arg(short = 'j', long)]
    pub job_isolation: bool,

    /// Suppress all output while tests run
    #[arg(short = 's', long)]
    pub silent: bool,

    /// Write a JUnit report, merging with any report already at FILE
    ///
    /// Without FILE, the configured `report-path` is used (`test_report.xml` by default).
    #[arg(short = 'r', long, value_name = "FILE", num_args = 0..=1)]
    pub report: Option<Option<Utf8PathBuf>>,

    /// Config file [default: .config/isotest.toml if it exists]
    #[arg(long, value_name = "PATH", env = RunnerConfig::CONFIG_ENV)]
    pub config_file: Option<Utf8PathBuf>,
}

/// An error that stops a test program before or after its tests run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CliError {
    /// The config could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigParseError),

    /// A `-p` pattern was invalid.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Output could not be redirected for silent mode.
    #[error("error redirecting output for silent mode")]
    Silence(#[source] io::Error),

    /// The JUnit report could not be written.
    #[error(transparent)]
    Report(#[from] WriteReportError),
}

/// Parses `args` and runs the selected tests from `registry`.
///
/// The first element of `args` is the program name. Returns the exit code for the process: 0 if
/// no test failed (or help was printed), 1 otherwise.
pub fn run_all_tests<I, T>(registry: &TestRegistry, args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let opts = match Opts::try_parse_from(args) {
        Ok(opts) => opts,
        Err(error) => {
            // Help goes to stdout and isn't a failure; everything else is.
            let _ = error.print();
            return if error.use_stderr() { 1 } else { 0 };
        }
    };

    match opts.exec(registry) {
        Ok(code) => code,
        Err(error) => {
            error!("{}", DisplayErrorChain::new(error));
            1
        }
    }
}

impl Opts {
    /// Runs the selected tests and returns the exit code.
    pub fn exec(self, registry: &TestRegistry) -> Result<i32, CliError> {
        let color = if self.no_color {
            Color::Never
        } else {
            Color::Auto
        };
        color.init_logger();

        let config = RunnerConfig::from_sources(
            Utf8Path::new("."),
            self.config_file.as_deref(),
            &mut DefaultConfigWarnings,
        )?;
        let filter = self.make_filter()?;

        let mut builder = TestRunnerBuilder::default();
        builder.set_force(self.force).set_filter(filter);
        if let Some(timeout_ms) = self.timeout_ms {
            builder.set_default_timeout(Duration::from_millis(timeout_ms));
        }
        if self.job_isolation {
            builder.set_job_isolation(true);
        }
        if self.silent {
            builder.set_echo_child_output(false);
        }
        let runner = builder.build(registry, &config);
        debug!(
            selected = runner.selected_count(),
            "built runner with {config:?}"
        );

        let mut displayer = (!self.silent).then(|| {
            let mut displayer = TestDisplayer::new(DisplayerOutput::Stdout);
            if color.should_colorize(supports_color::Stream::Stdout) {
                displayer.colorize();
            }
            displayer
        });

        let report = {
            let _silence = if self.silent {
                Some(SilenceGuard::new().map_err(CliError::Silence)?)
            } else {
                None
            };

            let mut write_failed = false;
            runner.execute(|event| {
                let Some(displayer) = &mut displayer else {
                    return;
                };
                if let Err(error) = displayer.write_event(&event) {
                    if !write_failed {
                        warn!("error writing test output: {error}");
                        write_failed = true;
                    }
                }
            })
        };

        if let Some(path) = self.report {
            let path = path.unwrap_or(config.report_path);
            JunitReporter::new().on_complete(&report, &ReportOptions::new(path))?;
        }

        Ok(if report.stats.is_success() { 0 } else { 1 })
    }

    fn make_filter(&self) -> Result<TestFilter, FilterError> {
        let (exclude, include): (Vec<&str>, Vec<&str>) = self
            .patterns
            .iter()
            .map(String::as_str)
            .partition(|pattern| pattern.starts_with('-'));
        let exclude: Vec<&str> = exclude
            .into_iter()
            .filter_map(|pattern| pattern.strip_prefix('-'))
            .collect();
        TestFilter::new(&include, &exclude)
    }
}
