// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collects the results of a run into a [`RunReport`].

use super::events::{Outcome, RunStats, TestEvent, TestEventKind};
use std::time::Duration;

/// The result of one executed test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestResult {
    /// The group the test belongs to.
    pub suite: String,

    /// The test name.
    pub name: String,

    /// The final outcome.
    pub outcome: Outcome,

    /// The time the test took.
    pub time_taken: Duration,
}

impl TestResult {
    /// Returns true if the test failed.
    pub fn is_failure(&self) -> bool {
        self.outcome.is_failed()
    }

    /// Returns true if the test was skipped.
    pub fn is_skipped(&self) -> bool {
        self.outcome.is_skipped()
    }

    /// The outcome message, if any.
    pub fn message(&self) -> Option<&str> {
        self.outcome.message()
    }
}

/// Every result of a run, along with its summary counts.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunReport {
    /// Results in execution order.
    pub results: Vec<TestResult>,

    /// Summary counts.
    pub stats: RunStats,
}

/// Accumulates [`TestResult`]s from a stream of events.
#[derive(Debug, Default)]
pub(crate) struct ResultAggregator {
    report: RunReport,
}

impl ResultAggregator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_event(&mut self, event: &TestEvent<'_>) {
        match &event.kind {
            TestEventKind::TestFinished {
                group,
                test,
                outcome,
                time_taken,
                ..
            } => self.report.results.push(TestResult {
                suite: (*group).to_owned(),
                name: (*test).to_owned(),
                outcome: outcome.clone(),
                time_taken: *time_taken,
            }),
            TestEventKind::RunFinished { run_stats, .. } => self.report.stats = *run_stats,
            _ => {}
        }
    }

    pub(crate) fn into_report(self) -> RunReport {
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::events::FailureKind;
    use pretty_assertions::assert_eq;

    fn event(kind: TestEventKind<'_>) -> TestEvent<'_> {
        TestEvent {
            elapsed: Duration::ZERO,
            kind,
        }
    }

    #[test]
    fn collects_finished_tests_and_final_stats() {
        let mut aggregator = ResultAggregator::new();
        aggregator.on_event(&event(TestEventKind::TestStarted {
            group: "G",
            test: "a",
            isolated: false,
        }));
        aggregator.on_event(&event(TestEventKind::TestFinished {
            group: "G",
            test: "a",
            outcome: Outcome::failed(FailureKind::Assertion, "boom"),
            time_taken: Duration::from_millis(3),
            pid: None,
        }));
        let stats = RunStats {
            initial_run_count: 1,
            ran: 1,
            failed: 1,
            failed_groups: 1,
            ..RunStats::default()
        };
        aggregator.on_event(&event(TestEventKind::RunFinished {
            run_stats: stats,
            elapsed: Duration::from_millis(4),
        }));

        let report = aggregator.into_report();
        assert_eq!(report.stats, stats);
        assert_eq!(report.results.len(), 1);
        let result = &report.results[0];
        assert_eq!((result.suite.as_str(), result.name.as_str()), ("G", "a"));
        assert!(result.is_failure());
        assert_eq!(result.message(), Some("boom"));
    }
}
