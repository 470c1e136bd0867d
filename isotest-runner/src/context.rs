// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-test context handed to test bodies and hooks.
//!
//! Every invocation receives a [`TestContext`]. It is created fresh for each test, so condition
//! failures and expected-failure declarations never leak from one test into the next, even when a
//! previous test timed out and its helper thread is still running.

use crossbeam_channel::Sender;
use isotest_shm::ShmError;
use std::{
    error, fmt, io,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};
use thiserror::Error;

/// The result type returned by test bodies and hooks.
pub type BodyResult = Result<(), TestError>;

/// An error returned from a test body or hook.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestError {
    /// The test asked to be skipped.
    ///
    /// Produced by [`TestContext::skip`]; in force mode that method returns `Ok(())` instead.
    #[error("skipped: {0}")]
    Skip(String),

    /// A fatal assertion failed.
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),

    /// The test failed with a message.
    #[error("{0}")]
    Failed(String),

    /// Any other error.
    #[error(transparent)]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl TestError {
    /// Creates a [`TestError::Failed`] from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Wraps an arbitrary error.
    pub fn other(error: impl Into<Box<dyn error::Error + Send + Sync>>) -> Self {
        Self::Other(error.into())
    }
}

impl From<ShmError> for TestError {
    fn from(error: ShmError) -> Self {
        Self::Other(Box::new(error))
    }
}

impl From<io::Error> for TestError {
    fn from(error: io::Error) -> Self {
        Self::Other(Box::new(error))
    }
}

/// A failed assertion, with the location it was raised at.
///
/// Usually created by the [`ensure!`](crate::ensure), [`ensure_eq!`](crate::ensure_eq) and
/// [`ensure_ne!`](crate::ensure_ne) macros.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{file}:{line}: {message}")]
pub struct AssertionFailure {
    /// The source file of the assertion.
    pub file: &'static str,

    /// The line of the assertion.
    pub line: u32,

    /// A description of what was expected and what happened instead.
    pub message: String,
}

impl AssertionFailure {
    /// Creates a new assertion failure.
    pub fn new(file: &'static str, line: u32, message: impl Into<String>) -> Self {
        Self {
            file,
            line,
            message: message.into(),
        }
    }

    /// Creates an assertion failure for a failed `left op right` comparison.
    pub fn comparison(
        file: &'static str,
        line: u32,
        op: &str,
        (left_expr, left): (&str, &dyn fmt::Debug),
        (right_expr, right): (&str, &dyn fmt::Debug),
    ) -> Self {
        Self::new(
            file,
            line,
            format!(
                "Expected: ({left_expr} {op} {right_expr})\n    Actual: ({left:?} {op} {right:?})"
            ),
        )
    }
}

/// Run-wide flags every context carries.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct ContextFlags {
    pub(crate) force: bool,
    pub(crate) job_isolation: bool,
}

/// The context for one test or hook invocation.
///
/// Cheap to clone: clones share the same condition state, so a body can hand a clone to a thread
/// it spawns.
#[derive(Clone)]
pub struct TestContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    group: String,
    test_name: Option<String>,
    flags: ContextFlags,
    isolated_child: bool,
    expect_failure: AtomicBool,
    conditions: Mutex<Vec<String>>,
}

impl TestContext {
    pub(crate) fn new(
        group: &str,
        test_name: Option<&str>,
        flags: ContextFlags,
        isolated_child: bool,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                group: group.to_owned(),
                test_name: test_name.map(ToOwned::to_owned),
                flags,
                isolated_child,
                expect_failure: AtomicBool::new(false),
                conditions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a detached context for exercising bodies outside a run, e.g. in unit tests.
    pub fn standalone(group: &str, test_name: &str) -> Self {
        Self::new(group, Some(test_name), ContextFlags::default(), false)
    }

    /// Requests that the current test be skipped.
    ///
    /// Returns `Err(TestError::Skip)`, to be propagated with `?`. In force mode this is a no-op
    /// that returns `Ok(())` and the body continues.
    pub fn skip(&self, message: impl Into<String>) -> BodyResult {
        if self.inner.flags.force {
            tracing::debug!(
                group = %self.inner.group,
                test = ?self.inner.test_name,
                "ignoring skip request in force mode"
            );
            return Ok(());
        }
        Err(TestError::Skip(message.into()))
    }

    /// Declares that the current test is expected to fail.
    ///
    /// A failure then counts as a pass, and a pass counts as a failure.
    pub fn expect_failure(&self) {
        self.inner.expect_failure.store(true, Ordering::Release);
    }

    pub(crate) fn expects_failure(&self) -> bool {
        self.inner.expect_failure.load(Ordering::Acquire)
    }

    /// Records a non-fatal condition failure. The body keeps running, but the test fails.
    pub fn record_failure(&self, message: impl Into<String>) {
        self.inner
            .conditions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.into());
    }

    pub(crate) fn take_conditions(&self) -> Vec<String> {
        std::mem::take(
            &mut *self
                .inner
                .conditions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Returns true if skip requests are being ignored for this run.
    pub fn is_force(&self) -> bool {
        self.inner.flags.force
    }

    /// Returns true if every test in this run is isolated in its own process.
    pub fn is_job_isolated(&self) -> bool {
        self.inner.flags.job_isolation
    }

    /// Returns true if this code is running inside an isolated child process.
    pub fn is_isolated_child(&self) -> bool {
        self.inner.isolated_child
    }

    /// The name of the group being run.
    pub fn group(&self) -> &str {
        &self.inner.group
    }

    /// The name of the test being run, or `None` inside `BeforeAll` and `AfterAll`.
    pub fn test_name(&self) -> Option<&str> {
        self.inner.test_name.as_deref()
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("group", &self.inner.group)
            .field("test_name", &self.inner.test_name)
            .field("flags", &self.inner.flags)
            .field("isolated_child", &self.inner.isolated_child)
            .finish_non_exhaustive()
    }
}

/// How a governed body signaled that it is finished.
#[derive(Debug)]
pub(crate) enum Completion {
    /// The body returned or panicked (panic message in `Err`).
    Returned(Result<BodyResult, String>),

    /// An explicit-completion body called [`Done::complete`].
    Completed,
}

/// The completion handle passed to explicit-completion ("async") bodies.
///
/// The test finishes when [`complete`](Self::complete) is called on any clone, from any thread.
/// If every clone is dropped without completing, the test fails.
#[derive(Clone, Debug)]
pub struct Done {
    sender: Sender<Completion>,
}

impl Done {
    pub(crate) fn new(sender: Sender<Completion>) -> Self {
        Self { sender }
    }

    /// Marks the test as finished. Calls after the first one have no effect.
    pub fn complete(&self) {
        // The receiver is gone once the test finished or timed out.
        let _ = self.sender.send(Completion::Completed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn context(force: bool) -> TestContext {
        TestContext::new(
            "Group",
            Some("test"),
            ContextFlags {
                force,
                job_isolation: false,
            },
            false,
        )
    }

    #[test]
    fn skip_returns_error_unless_forced() {
        let error = context(false).skip("not today").expect_err("skip is an error");
        assert!(matches!(error, TestError::Skip(message) if message == "not today"));

        context(true).skip("not today").expect("skip is ignored in force mode");
    }

    #[test]
    fn conditions_are_shared_across_clones_and_taken_once() {
        let cx = context(false);
        let clone = cx.clone();
        cx.record_failure("first");
        clone.record_failure("second");

        assert_eq!(cx.take_conditions(), vec!["first".to_owned(), "second".to_owned()]);
        assert!(cx.take_conditions().is_empty());
    }

    #[test]
    fn expect_failure_is_visible_through_clones() {
        let cx = context(false);
        assert!(!cx.expects_failure());
        cx.clone().expect_failure();
        assert!(cx.expects_failure());
    }

    #[test]
    fn comparison_failures_show_both_sides() {
        let failure =
            AssertionFailure::comparison("src/lib.rs", 12, "==", ("x", &4), ("3", &3));
        assert_eq!(
            failure.to_string(),
            "src/lib.rs:12: Expected: (x == 3)\n    Actual: (4 == 3)"
        );
    }
}
