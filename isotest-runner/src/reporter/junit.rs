// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JUnit XML reports.
//!
//! Reports accumulate: results already present in the file are loaded, the new results are
//! appended after them, and the whole set is written back grouped by suite.

use super::aggregator::{RunReport, TestResult};
use crate::errors::WriteReportError;
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use std::{io::Write, time::Duration};
use tracing::debug;

/// Writes the results of a finished run somewhere.
pub trait Reporter {
    /// Called once, after the last test has finished.
    fn on_complete(
        &mut self,
        report: &RunReport,
        options: &ReportOptions,
    ) -> Result<(), WriteReportError>;
}

/// Options passed to a [`Reporter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReportOptions {
    /// The file to write.
    pub path: Utf8PathBuf,

    /// The name of the top-level `<testsuites>` element.
    pub report_name: String,
}

impl ReportOptions {
    /// The report path used when none is configured.
    pub const DEFAULT_PATH: &'static str = "test_report.xml";

    /// Creates options for a report at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            report_name: "isotest".to_owned(),
        }
    }
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PATH)
    }
}

/// A [`Reporter`] that merges results into a JUnit XML file.
#[derive(Clone, Copy, Debug, Default)]
pub struct JunitReporter;

impl JunitReporter {
    /// Creates a new JUnit reporter.
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for JunitReporter {
    fn on_complete(
        &mut self,
        report: &RunReport,
        options: &ReportOptions,
    ) -> Result<(), WriteReportError> {
        let path = report_path(&options.path);

        let mut entries = load_existing(&path)?;
        debug!(
            %path,
            existing = entries.len(),
            new = report.results.len(),
            "merging JUnit report"
        );
        entries.extend(report.results.iter().map(ReportEntry::from_result));

        let xml = build_report(&options.report_name, entries)
            .to_string()
            .map_err(|error| WriteReportError::Write {
                path: path.clone(),
                error: Box::new(error),
            })?;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|error| WriteReportError::CreateDir {
                path: dir.to_owned(),
                error,
            })?;
        }

        AtomicFile::new(&path, OverwriteBehavior::AllowOverwrite)
            .write(|f| f.write_all(xml.as_bytes()))
            .map_err(|error| WriteReportError::Write {
                path,
                error: Box::new(error),
            })
    }
}

/// Relative paths without a directory are anchored at the current directory, so the temporary
/// file used for the atomic write has a place to live.
fn report_path(path: &Utf8Path) -> Utf8PathBuf {
    match path.parent() {
        Some(parent) if parent.as_str().is_empty() => Utf8Path::new(".").join(path),
        _ => path.to_owned(),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EntryStatus {
    Passed,
    Failed,
    Skipped,
}

/// One `<testcase>`, from either a previous report or this run.
#[derive(Clone, Debug, Eq, PartialEq)]
struct ReportEntry {
    suite: String,
    name: String,
    status: EntryStatus,
    message: Option<String>,
    ty: Option<String>,
    time: Option<Duration>,
}

impl ReportEntry {
    fn from_result(result: &TestResult) -> Self {
        let status = if result.is_failure() {
            EntryStatus::Failed
        } else if result.is_skipped() {
            EntryStatus::Skipped
        } else {
            EntryStatus::Passed
        };
        Self {
            suite: result.suite.clone(),
            name: result.name.clone(),
            status,
            message: result.message().map(ToOwned::to_owned),
            ty: result.outcome.failure_kind().map(|kind| kind.as_str().to_owned()),
            time: Some(result.time_taken),
        }
    }

    fn to_test_case(&self) -> TestCase {
        let status = match self.status {
            EntryStatus::Passed => TestCaseStatus::success(),
            EntryStatus::Failed => {
                let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                if let Some(message) = &self.message {
                    status.set_message(message.clone());
                }
                if let Some(ty) = &self.ty {
                    status.set_type(ty.clone());
                }
                status
            }
            EntryStatus::Skipped => {
                let mut status = TestCaseStatus::skipped();
                if let Some(message) = &self.message {
                    status.set_message(message.clone());
                }
                status
            }
        };

        let mut test_case = TestCase::new(self.name.clone(), status);
        test_case.set_classname(self.suite.clone());
        if let Some(time) = self.time {
            test_case.set_time(time);
        }
        if let (EntryStatus::Passed, Some(message)) = (self.status, &self.message) {
            test_case.set_system_out(message.clone());
        }
        test_case
    }
}

fn build_report(name: &str, entries: Vec<ReportEntry>) -> Report {
    let mut suites: IndexMap<String, TestSuite> = IndexMap::new();
    for entry in entries {
        suites
            .entry(entry.suite.clone())
            .or_insert_with(|| TestSuite::new(entry.suite.clone()))
            .add_test_case(entry.to_test_case());
    }

    let mut report = Report::new(name.to_owned());
    report.add_test_suites(suites.into_values());
    report
}

/// Loads the test cases of an existing report. A missing file has none.
fn load_existing(path: &Utf8Path) -> Result<Vec<ReportEntry>, WriteReportError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => {
            return Err(WriteReportError::Read {
                path: path.to_owned(),
                error,
            });
        }
    };
    parse_entries(&contents).map_err(|error| WriteReportError::Parse {
        path: path.to_owned(),
        error,
    })
}

fn parse_entries(contents: &str) -> Result<Vec<ReportEntry>, quick_xml::Error> {
    let mut reader = Reader::from_str(contents);
    reader.config_mut().trim_text(true);

    let mut parser = EntryParser::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => parser.open(&e, false)?,
            Event::Empty(e) => parser.open(&e, true)?,
            Event::End(e) => parser.close(e.name().as_ref()),
            Event::Text(text) => parser.text(&text.unescape()?),
            Event::CData(data) => parser.text(&String::from_utf8_lossy(&data.into_inner())),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(parser.entries)
}

#[derive(Debug, Default)]
struct EntryParser {
    entries: Vec<ReportEntry>,
    suite: Option<String>,
    current: Option<ReportEntry>,
    in_system_out: bool,
}

impl EntryParser {
    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), quick_xml::Error> {
        match e.name().as_ref() {
            b"testsuite" => {
                self.suite = attribute(e, b"name")?;
            }
            b"testcase" => {
                let name = attribute(e, b"name")?.unwrap_or_default();
                let classname = attribute(e, b"classname")?;
                let time = attribute(e, b"time")?
                    .and_then(|time| time.parse::<f64>().ok())
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
                let entry = ReportEntry {
                    suite: self.suite.clone().or(classname).unwrap_or_default(),
                    name,
                    status: EntryStatus::Passed,
                    message: None,
                    ty: None,
                    time,
                };
                if empty {
                    self.entries.push(entry);
                } else {
                    self.current = Some(entry);
                }
            }
            b"failure" | b"error" => {
                if let Some(current) = &mut self.current {
                    current.status = EntryStatus::Failed;
                    current.message = attribute(e, b"message")?;
                    current.ty = attribute(e, b"type")?.filter(|ty| !ty.is_empty());
                }
            }
            b"skipped" => {
                if let Some(current) = &mut self.current {
                    current.status = EntryStatus::Skipped;
                    current.message = attribute(e, b"message")?;
                }
            }
            b"system-out" if !empty => {
                self.in_system_out = self.current.is_some();
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"testcase" => {
                if let Some(entry) = self.current.take() {
                    self.entries.push(entry);
                }
            }
            b"testsuite" => self.suite = None,
            b"system-out" => self.in_system_out = false,
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if !self.in_system_out {
            return;
        }
        if let Some(current) = &mut self.current {
            if current.message.is_none() {
                current.message = Some(text.to_owned());
            }
        }
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
