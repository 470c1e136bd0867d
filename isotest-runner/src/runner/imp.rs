// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    governor::{run_governed, run_hook_inline, run_inline},
    unix::{ProcessSettings, run_isolated},
};
use crate::{
    config::RunnerConfig,
    context::{ContextFlags, TestContext},
    helpers::join_messages,
    registry::{Group, Hook, TestBody, TestCase, TestRegistry},
    reporter::{
        aggregator::{ResultAggregator, RunReport},
        events::{FailureKind, HookKind, Outcome, RunStats, TestEvent, TestEventKind},
    },
    test_filter::TestFilter,
};
use debug_ignore::DebugIgnore;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    default_timeout: Option<Duration>,
    force: bool,
    job_isolation: Option<bool>,
    echo_child_output: Option<bool>,
    filter: Option<TestFilter>,
}

impl TestRunnerBuilder {
    /// Overrides the configured default timeout.
    pub fn set_default_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Sets force mode: skip requests are ignored and bodies keep running.
    pub fn set_force(&mut self, force: bool) -> &mut Self {
        self.force = force;
        self
    }

    /// Overrides whether every test runs in its own child process.
    pub fn set_job_isolation(&mut self, job_isolation: bool) -> &mut Self {
        self.job_isolation = Some(job_isolation);
        self
    }

    /// Overrides whether output from isolated children is echoed while they run.
    pub fn set_echo_child_output(&mut self, echo: bool) -> &mut Self {
        self.echo_child_output = Some(echo);
        self
    }

    /// Sets the filter selecting which tests run. The registry's exclusion rules are always added
    /// on top.
    pub fn set_filter(&mut self, filter: TestFilter) -> &mut Self {
        self.filter = Some(filter);
        self
    }

    /// Creates a new test runner.
    pub fn build<'a>(self, registry: &'a TestRegistry, config: &RunnerConfig) -> TestRunner<'a> {
        let filter = self
            .filter
            .unwrap_or_else(TestFilter::any)
            .with_exclude_rules(registry.exclude_rules());

        TestRunner {
            registry: DebugIgnore(registry),
            filter,
            default_timeout: self.default_timeout.unwrap_or(config.default_timeout),
            flags: ContextFlags {
                force: self.force,
                job_isolation: self.job_isolation.unwrap_or(config.job_isolation),
            },
            process: ProcessSettings {
                grace_period: config.process_grace_period,
                poll_interval: config.poll_interval,
                echo_output: self.echo_child_output.unwrap_or(config.echo_child_output),
            },
        }
    }
}

/// Context for running tests.
///
/// Groups run in registration order and tests within a group run one at a time. Created with a
/// [`TestRunnerBuilder`].
#[derive(Debug)]
pub struct TestRunner<'a> {
    registry: DebugIgnore<&'a TestRegistry>,
    filter: TestFilter,
    default_timeout: Duration,
    flags: ContextFlags,
    process: ProcessSettings,
}

impl<'a> TestRunner<'a> {
    /// Executes the selected tests.
    ///
    /// The callback is called with each test event as it happens. Failures in tests and hooks
    /// never escape: they are all reported as outcomes.
    pub fn execute<F>(&self, callback: F) -> RunReport
    where
        F: FnMut(TestEvent<'a>),
    {
        let plan = self.plan();
        let test_count = plan.iter().map(|(_, tests)| tests.len()).sum();
        let mut ctx = CallbackContext::new(callback, test_count);

        ctx.emit(TestEventKind::RunStarted {
            group_count: plan.len(),
            test_count,
            filtered_out: self.registry.test_count() - test_count,
        });

        for (group, tests) in plan {
            self.run_group(&mut ctx, group, &tests);
        }

        ctx.run_finished()
    }

    /// The number of tests this runner will execute.
    pub fn selected_count(&self) -> usize {
        self.plan().iter().map(|(_, tests)| tests.len()).sum()
    }

    // ---
    // Helper methods
    // ---

    /// Groups with at least one selected test, along with those tests.
    fn plan(&self) -> Vec<(&'a Group, Vec<&'a TestCase>)> {
        let registry: &'a TestRegistry = *self.registry;
        registry
            .groups()
            .filter_map(|group| {
                let tests: Vec<_> = group
                    .tests()
                    .iter()
                    .filter(|test| {
                        let filter_match = self.filter.filter_match(group.name(), test.name());
                        if !filter_match.is_match() {
                            debug!(
                                group = group.name(),
                                test = test.name(),
                                ?filter_match,
                                "test not selected"
                            );
                        }
                        filter_match.is_match()
                    })
                    .collect();
                (!tests.is_empty()).then_some((group, tests))
            })
            .collect()
    }

    fn run_group<F>(&self, ctx: &mut CallbackContext<F>, group: &'a Group, tests: &[&'a TestCase])
    where
        F: FnMut(TestEvent<'a>),
    {
        let name = group.name();
        ctx.emit(TestEventKind::GroupStarted {
            group: name,
            test_count: tests.len(),
        });

        let mut failed = false;

        if let Some(hook) = &group.before_all {
            match self.run_suite_hook(name, hook) {
                Outcome::Skipped { message } => {
                    info!(group = name, %message, "group skipped by BeforeAll");
                    ctx.run_stats.skipped_groups += 1;
                    ctx.emit(TestEventKind::GroupSkipped {
                        group: name,
                        test_count: tests.len(),
                        message,
                    });
                    ctx.emit(TestEventKind::GroupFinished {
                        group: name,
                        failed: false,
                    });
                    return;
                }
                outcome @ Outcome::Failed { .. } => {
                    failed = true;
                    ctx.emit(TestEventKind::HookFailed {
                        group: name,
                        hook: HookKind::BeforeAll,
                        outcome,
                    });
                }
                Outcome::Passed { .. } => {}
            }
        }

        for &test in tests {
            failed |= self.run_test(ctx, group, test);
        }

        if let Some(hook) = &group.after_all {
            match self.run_suite_hook(name, hook) {
                outcome @ Outcome::Failed { .. } => {
                    failed = true;
                    ctx.emit(TestEventKind::HookFailed {
                        group: name,
                        hook: HookKind::AfterAll,
                        outcome,
                    });
                }
                Outcome::Skipped { message } => {
                    debug!(group = name, %message, "ignoring skip request from AfterAll");
                }
                Outcome::Passed { .. } => {}
            }
        }

        if failed {
            ctx.run_stats.failed_groups += 1;
        }
        ctx.emit(TestEventKind::GroupFinished {
            group: name,
            failed,
        });
    }

    /// Runs `BeforeAll` or `AfterAll` under the default deadline.
    fn run_suite_hook(&self, group: &str, hook: &Hook) -> Outcome {
        let cx = TestContext::new(group, None, self.flags, false);
        let outcome = run_governed(
            TestBody::RunToCompletion(Hook::clone(hook)),
            &cx,
            Some(self.default_timeout),
        );
        apply_conditions(outcome, cx.take_conditions())
    }

    /// Runs one test and returns true if it failed.
    fn run_test<F>(&self, ctx: &mut CallbackContext<F>, group: &'a Group, test: &'a TestCase) -> bool
    where
        F: FnMut(TestEvent<'a>),
    {
        let isolated = test.is_isolated() || self.flags.job_isolation;
        let timeout = test.timeout().unwrap_or(self.default_timeout);
        debug!(
            group = group.name(),
            test = test.name(),
            isolated,
            inline = test.is_inline(),
            timeout_ms = timeout.as_millis() as u64,
            "running test"
        );

        ctx.emit(TestEventKind::TestStarted {
            group: group.name(),
            test: test.name(),
            isolated,
        });

        let start_time = Instant::now();
        let (outcome, pid) = if isolated {
            let isolated = run_isolated(group, test, self.flags, timeout, &self.process);
            (isolated.outcome, isolated.pid)
        } else {
            let cx = TestContext::new(group.name(), Some(test.name()), self.flags, false);
            let deadline = (!test.is_inline()).then_some(timeout);
            (run_test_sequence(group, test, &cx, deadline), None)
        };
        let time_taken = start_time.elapsed();

        let failed = outcome.is_failed();
        ctx.run_stats.on_test_finished(&outcome);
        ctx.emit(TestEventKind::TestFinished {
            group: group.name(),
            test: test.name(),
            outcome,
            time_taken,
            pid,
        });
        failed
    }
}

/// Runs `BeforeEach`, the body and `AfterEach`, and folds their outcomes into one.
///
/// A `BeforeEach` that fails or skips suppresses the body, but `AfterEach` always runs. Failures
/// take precedence over skips, and condition failures recorded anywhere in the sequence fail the
/// test. The expected-failure declaration is applied last.
pub(crate) fn run_test_sequence(
    group: &Group,
    test: &TestCase,
    cx: &TestContext,
    deadline: Option<Duration>,
) -> Outcome {
    let before = group
        .before_each
        .as_ref()
        .map(|hook| label_hook_failure(HookKind::BeforeEach, run_hook_inline(hook, cx)));

    let outcome = match before {
        Some(before @ (Outcome::Failed { .. } | Outcome::Skipped { .. })) => before,
        _ if test.is_inline() => run_inline(test.body(), cx),
        _ => run_governed(test.body().clone(), cx, deadline),
    };

    let outcome = match &group.after_each {
        Some(hook) => merge_after_each(
            outcome,
            label_hook_failure(HookKind::AfterEach, run_hook_inline(hook, cx)),
        ),
        None => outcome,
    };

    let outcome = apply_conditions(outcome, cx.take_conditions());
    if test.expects_failure() || cx.expects_failure() {
        outcome.invert_expected_failure()
    } else {
        outcome
    }
}

fn label_hook_failure(hook: HookKind, outcome: Outcome) -> Outcome {
    match outcome {
        Outcome::Failed { kind, message } => Outcome::failed(kind, format!("{hook}: {message}")),
        other => other,
    }
}

fn merge_after_each(outcome: Outcome, after: Outcome) -> Outcome {
    match (outcome, after) {
        (outcome, Outcome::Passed { .. }) => outcome,
        (Outcome::Failed { kind, message }, Outcome::Failed { message: after, .. }) => {
            Outcome::failed(kind, join_messages([&*message, &*after]))
        }
        (outcome @ Outcome::Failed { .. }, Outcome::Skipped { .. }) => outcome,
        (_, after) => after,
    }
}

/// Folds non-fatal condition failures into an outcome.
fn apply_conditions(outcome: Outcome, conditions: Vec<String>) -> Outcome {
    if conditions.is_empty() {
        return outcome;
    }
    let conditions = join_messages(conditions.iter().map(String::as_str));
    match outcome {
        Outcome::Failed { kind, message } => {
            Outcome::failed(kind, join_messages([&*message, &*conditions]))
        }
        Outcome::Passed { .. } | Outcome::Skipped { .. } => {
            Outcome::failed(FailureKind::Condition, conditions)
        }
    }
}

struct CallbackContext<F> {
    callback: F,
    start_time: Instant,
    run_stats: RunStats,
    aggregator: ResultAggregator,
}

impl<'a, F> CallbackContext<F>
where
    F: FnMut(TestEvent<'a>),
{
    fn new(callback: F, initial_run_count: usize) -> Self {
        Self {
            callback,
            start_time: Instant::now(),
            run_stats: RunStats {
                initial_run_count,
                ..RunStats::default()
            },
            aggregator: ResultAggregator::new(),
        }
    }

    fn emit(&mut self, kind: TestEventKind<'a>) {
        let event = TestEvent {
            elapsed: self.start_time.elapsed(),
            kind,
        };
        self.aggregator.on_event(&event);
        (self.callback)(event);
    }

    fn run_finished(mut self) -> RunReport {
        let elapsed = self.start_time.elapsed();
        self.emit(TestEventKind::RunFinished {
            run_stats: self.run_stats,
            elapsed,
        });
        self.aggregator.into_report()
    }
}
