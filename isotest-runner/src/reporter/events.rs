// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events produced while tests run, and the outcomes they carry.

use std::{fmt, time::Duration};

/// A test event.
///
/// Events are produced by a [`TestRunner`](crate::runner::TestRunner) and consumed by the
/// callback passed to [`TestRunner::execute`](crate::runner::TestRunner::execute).
#[derive(Clone, Debug)]
pub struct TestEvent<'a> {
    /// The amount of time elapsed since the start of the test run.
    pub elapsed: Duration,

    /// The kind of test event this is.
    pub kind: TestEventKind<'a>,
}

/// The kind of test event this is.
///
/// Forms part of [`TestEvent`].
#[derive(Clone, Debug)]
pub enum TestEventKind<'a> {
    /// The test run started.
    RunStarted {
        /// The number of groups with at least one selected test.
        group_count: usize,

        /// The number of tests selected to run.
        test_count: usize,

        /// The number of registered tests filtered out.
        filtered_out: usize,
    },

    /// A group started.
    GroupStarted {
        /// The group name.
        group: &'a str,

        /// The number of selected tests in this group.
        test_count: usize,
    },

    /// A suite-level hook failed. The group is marked failed, but its tests still run.
    HookFailed {
        /// The group name.
        group: &'a str,

        /// Which hook failed.
        hook: HookKind,

        /// The failure.
        outcome: Outcome,
    },

    /// `BeforeAll` asked to skip: none of the group's tests run, and neither does `AfterAll`.
    GroupSkipped {
        /// The group name.
        group: &'a str,

        /// The number of selected tests that will not run.
        test_count: usize,

        /// The skip message.
        message: String,
    },

    /// A test started.
    TestStarted {
        /// The group name.
        group: &'a str,

        /// The test name.
        test: &'a str,

        /// True if the test runs in a child process.
        isolated: bool,
    },

    /// A test finished.
    TestFinished {
        /// The group name.
        group: &'a str,

        /// The test name.
        test: &'a str,

        /// The final outcome, after expected-failure inversion.
        outcome: Outcome,

        /// The time the test took, including its `BeforeEach` and `AfterEach` hooks.
        time_taken: Duration,

        /// The process ID of the child, for isolated tests. The child has been reaped by the time
        /// this event is sent.
        pid: Option<u32>,
    },

    /// A group finished.
    GroupFinished {
        /// The group name.
        group: &'a str,

        /// True if any test or hook in the group failed.
        failed: bool,
    },

    /// The test run finished.
    RunFinished {
        /// Statistics for the run.
        run_stats: RunStats,

        /// The total time taken by the run.
        elapsed: Duration,
    },
}

/// The hooks a group can define.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HookKind {
    /// Runs once before the group's tests.
    BeforeAll,

    /// Runs once after the group's tests.
    AfterAll,

    /// Runs before each test.
    BeforeEach,

    /// Runs after each test.
    AfterEach,
}

impl HookKind {
    /// The name of the hook.
    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::BeforeAll => "BeforeAll",
            HookKind::AfterAll => "AfterAll",
            HookKind::BeforeEach => "BeforeEach",
            HookKind::AfterEach => "AfterEach",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of a test or hook.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The test passed.
    Passed {
        /// Output of an isolated test, or the expected-failure note.
        message: Option<String>,
    },

    /// The test failed.
    Failed {
        /// The category of failure.
        kind: FailureKind,

        /// A description of the failure.
        message: String,
    },

    /// The test was skipped.
    Skipped {
        /// Why the test was skipped.
        message: String,
    },
}

impl Outcome {
    /// A pass without a message.
    pub fn passed() -> Self {
        Outcome::Passed { message: None }
    }

    /// A failure of the given kind.
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Outcome::Failed {
            kind,
            message: message.into(),
        }
    }

    /// A skip.
    pub fn skipped(message: impl Into<String>) -> Self {
        Outcome::Skipped {
            message: message.into(),
        }
    }

    /// Returns true if this outcome is a pass.
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed { .. })
    }

    /// Returns true if this outcome is a failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    /// Returns true if this outcome is a skip.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }

    /// The failure kind, if this outcome is a failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Failed { kind, .. } => Some(*kind),
            Outcome::Passed { .. } | Outcome::Skipped { .. } => None,
        }
    }

    /// The message attached to this outcome, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Passed { message } => message.as_deref(),
            Outcome::Failed { message, .. } | Outcome::Skipped { message } => Some(message),
        }
    }

    /// Applies an expected-failure declaration.
    ///
    /// A failure becomes a pass, a pass becomes a failure, and a skip stays a skip.
    pub fn invert_expected_failure(self) -> Self {
        match self {
            Outcome::Failed { .. } => Outcome::Passed {
                message: Some(EXPECTED_FAIL_AND_FAILED.to_owned()),
            },
            Outcome::Passed { .. } => {
                Outcome::failed(FailureKind::UnexpectedPass, EXPECTED_FAIL_BUT_PASSED)
            }
            skipped @ Outcome::Skipped { .. } => skipped,
        }
    }
}

/// The message of an expected failure that did fail.
pub const EXPECTED_FAIL_AND_FAILED: &str = "Expected fail and failed.";

/// The message of an expected failure that passed instead.
pub const EXPECTED_FAIL_BUT_PASSED: &str = "Expected fail but passed.";

/// The category of a [`Outcome::Failed`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum FailureKind {
    /// The deadline elapsed before the test completed.
    Timeout,

    /// A fatal assertion failed.
    Assertion,

    /// One or more non-fatal conditions failed.
    Condition,

    /// The body or a hook panicked.
    Panic,

    /// The body or a hook returned an error.
    Error,

    /// An isolated child was terminated by a signal.
    Signal,

    /// An isolated child exited with a failing exit code.
    Exit,

    /// The test was expected to fail, but passed.
    UnexpectedPass,

    /// The runner itself could not execute the test.
    Internal,
}

impl FailureKind {
    /// A short, lowercase description of the failure kind.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Assertion => "assertion",
            FailureKind::Condition => "condition",
            FailureKind::Panic => "panic",
            FailureKind::Error => "error",
            FailureKind::Signal => "signal",
            FailureKind::Exit => "exit",
            FailureKind::UnexpectedPass => "unexpected pass",
            FailureKind::Internal => "internal error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics for a test run.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// The total number of tests that were selected at the beginning.
    ///
    /// Tests in groups whose `BeforeAll` skipped are included here but not in `ran`.
    pub initial_run_count: usize,

    /// The number of tests that were executed.
    pub ran: usize,

    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that failed.
    pub failed: usize,

    /// The number of tests that were skipped.
    pub skipped: usize,

    /// The number of groups with a failed test or hook.
    pub failed_groups: usize,

    /// The number of groups whose `BeforeAll` skipped.
    pub skipped_groups: usize,
}

impl RunStats {
    /// Returns true if this run is considered a success: no test failed.
    ///
    /// Suite-level hook failures show up in `failed_groups` but do not by themselves fail the run.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub(crate) fn on_test_finished(&mut self, outcome: &Outcome) {
        self.ran += 1;
        match outcome {
            Outcome::Passed { .. } => self.passed += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
    }
}
