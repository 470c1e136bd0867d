// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running one body under a wall-clock deadline.
//!
//! The body runs on a named helper thread and the caller blocks until the body completes or the
//! deadline passes. A body that misses its deadline is not stopped: the helper thread is detached
//! and keeps running in the background. Tests that may misbehave after a timeout should be
//! isolated in a child process instead.

use crate::{
    context::{BodyResult, Completion, Done, TestContext, TestError},
    errors::DisplayErrorChain,
    helpers::panic_message,
    registry::{Hook, TestBody},
    reporter::events::{FailureKind, Outcome},
};
use crossbeam_channel::RecvTimeoutError;
use std::{
    panic::{self, AssertUnwindSafe},
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

/// Runs `body` on a helper thread, waiting at most `deadline` (forever if `None`).
pub(super) fn run_governed(body: TestBody, cx: &TestContext, deadline: Option<Duration>) -> Outcome {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let explicit_completion = matches!(body, TestBody::ExplicitCompletion(_));
    let thread_cx = cx.clone();
    let thread_sender = sender.clone();
    let done = Done::new(sender);

    let spawned = thread::Builder::new()
        .name(thread_name(cx))
        .spawn(move || {
            let result = catch_body(|| match &body {
                TestBody::RunToCompletion(f) => f(&thread_cx),
                TestBody::ExplicitCompletion(f) => f(&thread_cx, done),
            });
            if explicit_completion && matches!(result, Ok(Ok(()))) {
                // Completion is up to the Done handle from here on.
                return;
            }
            // The receiver is gone if the caller already timed out.
            let _ = thread_sender.send(Completion::Returned(result));
        });
    if let Err(error) = spawned {
        return Outcome::failed(
            FailureKind::Internal,
            format!("failed to spawn test thread: {error}"),
        );
    }

    let started = Instant::now();
    let received = match deadline {
        Some(deadline) => receiver.recv_timeout(deadline),
        None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };

    match received {
        Ok(Completion::Returned(result)) => outcome_from_result(result),
        Ok(Completion::Completed) => Outcome::passed(),
        Err(RecvTimeoutError::Timeout) => {
            debug!(
                group = cx.group(),
                test = ?cx.test_name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "deadline passed, detaching helper thread"
            );
            Outcome::failed(FailureKind::Timeout, timeout_message(deadline))
        }
        Err(RecvTimeoutError::Disconnected) => {
            if explicit_completion {
                Outcome::failed(
                    FailureKind::Error,
                    "completion handle dropped without calling complete()",
                )
            } else {
                Outcome::failed(FailureKind::Internal, "test thread exited without a result")
            }
        }
    }
}

/// Runs a run-to-completion body on the current thread.
///
/// Explicit-completion bodies still need a helper thread to wait on, so they are governed without
/// a deadline.
pub(super) fn run_inline(body: &TestBody, cx: &TestContext) -> Outcome {
    match body {
        TestBody::RunToCompletion(f) => outcome_from_result(catch_body(|| f(cx))),
        TestBody::ExplicitCompletion(_) => run_governed(body.clone(), cx, None),
    }
}

/// Runs a hook on the current thread.
pub(super) fn run_hook_inline(hook: &Hook, cx: &TestContext) -> Outcome {
    outcome_from_result(catch_body(|| hook(cx)))
}

/// Converts an error returned by a body or hook into an outcome.
pub(crate) fn outcome_from_error(error: TestError) -> Outcome {
    match error {
        TestError::Skip(message) => Outcome::skipped(message),
        TestError::Assertion(failure) => {
            Outcome::failed(FailureKind::Assertion, failure.to_string())
        }
        TestError::Failed(message) => Outcome::failed(FailureKind::Error, message),
        TestError::Other(error) => Outcome::failed(
            FailureKind::Error,
            DisplayErrorChain::new(&*error).to_string(),
        ),
    }
}

fn outcome_from_result(result: Result<BodyResult, String>) -> Outcome {
    match result {
        Ok(Ok(())) => Outcome::passed(),
        Ok(Err(error)) => outcome_from_error(error),
        Err(message) => Outcome::failed(FailureKind::Panic, format!("panicked: {message}")),
    }
}

fn catch_body(f: impl FnOnce() -> BodyResult) -> Result<BodyResult, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(&*payload))
}

fn thread_name(cx: &TestContext) -> String {
    match cx.test_name() {
        Some(test) => format!("isotest:{}:{}", cx.group(), test),
        None => format!("isotest:{}", cx.group()),
    }
}

fn timeout_message(deadline: Option<Duration>) -> String {
    match deadline {
        Some(deadline) => format!("Timeout: did not complete within {} ms", deadline.as_millis()),
        // recv() without a deadline never times out.
        None => "Timeout".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    fn sync_body(f: impl Fn(&TestContext) -> BodyResult + Send + Sync + 'static) -> TestBody {
        TestBody::RunToCompletion(Arc::new(f))
    }

    fn async_body(
        f: impl Fn(&TestContext, Done) -> BodyResult + Send + Sync + 'static,
    ) -> TestBody {
        TestBody::ExplicitCompletion(Arc::new(f))
    }

    fn cx() -> TestContext {
        TestContext::standalone("Governor", "test")
    }

    const DEADLINE: Option<Duration> = Some(Duration::from_millis(2_000));

    #[test]
    fn returning_body_passes() {
        let outcome = run_governed(sync_body(|_| Ok(())), &cx(), DEADLINE);
        assert_eq!(outcome, Outcome::passed());
    }

    #[test]
    fn slow_body_times_out_and_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let finished_in_body = finished.clone();
        let body = sync_body(move |_| {
            thread::sleep(Duration::from_millis(300));
            finished_in_body.store(true, Ordering::SeqCst);
            Ok(())
        });

        let outcome = run_governed(body, &cx(), Some(Duration::from_millis(50)));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(
            outcome.message(),
            Some("Timeout: did not complete within 50 ms")
        );
        assert!(!finished.load(Ordering::SeqCst), "caller returned before the body finished");

        // The detached helper thread is not stopped.
        let waited = Instant::now();
        while !finished.load(Ordering::SeqCst) && waited.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(finished.load(Ordering::SeqCst), "helper thread kept running");
    }

    #[test]
    fn panics_and_errors_are_classified() {
        let outcome = run_governed(sync_body(|_| panic!("kaboom")), &cx(), DEADLINE);
        assert_eq!(
            outcome,
            Outcome::failed(FailureKind::Panic, "panicked: kaboom")
        );

        let outcome = run_governed(
            sync_body(|_| Err(TestError::failed("went wrong"))),
            &cx(),
            DEADLINE,
        );
        assert_eq!(outcome, Outcome::failed(FailureKind::Error, "went wrong"));

        let outcome = run_governed(sync_body(|cx| cx.skip("not here")), &cx(), DEADLINE);
        assert_eq!(outcome, Outcome::skipped("not here"));
    }

    #[test]
    fn explicit_completion_from_another_thread() {
        let body = async_body(|_, done| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                done.complete();
            });
            Ok(())
        });
        assert_eq!(run_governed(body, &cx(), DEADLINE), Outcome::passed());
    }

    #[test]
    fn explicit_completion_never_signaled_times_out() {
        let body = async_body(|_, done| {
            // Keep the handle alive without ever completing it.
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(500));
                drop(done);
            });
            Ok(())
        });
        let outcome = run_governed(body, &cx(), Some(Duration::from_millis(50)));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
    }

    #[test]
    fn dropped_completion_handle_fails() {
        let body = async_body(|_, done| {
            drop(done);
            Ok(())
        });
        let outcome = run_governed(body, &cx(), DEADLINE);
        assert_eq!(
            outcome,
            Outcome::failed(
                FailureKind::Error,
                "completion handle dropped without calling complete()"
            )
        );
    }

    #[test]
    fn explicit_completion_body_error_fails_immediately() {
        let body = async_body(|_, _done| Err(TestError::failed("setup failed")));
        let outcome = run_governed(body, &cx(), DEADLINE);
        assert_eq!(outcome, Outcome::failed(FailureKind::Error, "setup failed"));
    }

    #[test]
    fn no_deadline_waits_for_completion() {
        let body = sync_body(|_| {
            thread::sleep(Duration::from_millis(30));
            Ok(())
        });
        assert_eq!(run_governed(body, &cx(), None), Outcome::passed());
    }

    #[test]
    fn inline_bodies_run_on_the_current_thread() {
        let caller = thread::current().id();
        let body = sync_body(move |_| {
            if thread::current().id() == caller {
                Ok(())
            } else {
                Err(TestError::failed("ran on another thread"))
            }
        });
        assert_eq!(run_inline(&body, &cx()), Outcome::passed());
    }
}
