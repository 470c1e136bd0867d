// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduling behavior seen through the public API, without process isolation.

use color_eyre::eyre::Result;
use isotest_runner::{
    check_eq,
    config::RunnerConfig,
    ensure, ensure_eq,
    registry::{TestOpts, TestRegistry},
    reporter::{FailureKind, Outcome, RunReport, TestEventKind},
    runner::TestRunnerBuilder,
    test_filter::TestFilter,
};
use pretty_assertions::assert_eq;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

fn run(registry: &TestRegistry, builder: TestRunnerBuilder) -> RunReport {
    builder
        .build(registry, &RunnerConfig::default_config())
        .execute(|_| {})
}

fn outcome<'r>(report: &'r RunReport, group: &str, test: &str) -> &'r Outcome {
    &report
        .results
        .iter()
        .find(|result| result.suite == group && result.name == test)
        .unwrap_or_else(|| panic!("no result for {group}:{test}"))
        .outcome
}

#[test]
fn suite_hooks_share_state_with_tests() -> Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut registry = TestRegistry::new();

    let (setup, first, second, teardown) = (
        counter.clone(),
        counter.clone(),
        counter.clone(),
        counter.clone(),
    );
    registry
        .group("Counter")
        .before_all(move |_| {
            setup.store(1, Ordering::SeqCst);
            Ok(())
        })
        .after_all(move |_| {
            ensure_eq!(teardown.load(Ordering::SeqCst), 3);
            Ok(())
        })
        .test("first", move |_| {
            first.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?
        .test("second", move |_| {
            second.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;

    let mut hook_failures = 0;
    let report = TestRunnerBuilder::default()
        .build(&registry, &RunnerConfig::default_config())
        .execute(|event| {
            if let TestEventKind::HookFailed { .. } = event.kind {
                hook_failures += 1;
            }
        });

    assert_eq!(hook_failures, 0, "AfterAll saw counter == 3");
    assert_eq!(
        (report.stats.ran, report.stats.failed, report.stats.skipped),
        (2, 0, 0)
    );
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn expected_failure_turns_an_assertion_into_a_pass() -> Result<()> {
    let mut registry = TestRegistry::new();
    registry.group("Expect").test_with(
        "fails",
        TestOpts::new().expect_failure(),
        |_| {
            ensure!(1 + 1 == 3, "arithmetic is broken");
            Ok(())
        },
    )?;
    registry.group("Expect").test("declared at runtime", |cx| {
        cx.expect_failure();
        Ok(())
    })?;

    let report = run(&registry, TestRunnerBuilder::default());

    assert_eq!(
        outcome(&report, "Expect", "fails"),
        &Outcome::Passed {
            message: Some("Expected fail and failed.".to_owned())
        }
    );
    assert_eq!(
        outcome(&report, "Expect", "declared at runtime"),
        &Outcome::failed(FailureKind::UnexpectedPass, "Expected fail but passed.")
    );
    assert_eq!(
        (report.stats.ran, report.stats.passed, report.stats.failed),
        (2, 1, 1)
    );
    Ok(())
}

#[test]
fn per_test_hooks_run_once_per_executed_test() -> Result<()> {
    let before = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));
    let mut registry = TestRegistry::new();

    let (b, a) = (before.clone(), after.clone());
    registry
        .group("Each")
        .before_each(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .after_each(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .test("one", |_| Ok(()))?
        .test("two", |_| panic!("boom"))?
        .test_with("three", TestOpts::new().timeout_ms(20), |_| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })?
        .test("filtered", |_| Ok(()))?;

    let mut builder = TestRunnerBuilder::default();
    builder.set_filter(TestFilter::new(&[] as &[&str], &["filtered"])?);
    let report = run(&registry, builder);

    assert_eq!(before.load(Ordering::SeqCst), 3);
    assert_eq!(after.load(Ordering::SeqCst), 3);
    assert_eq!(
        outcome(&report, "Each", "two"),
        &Outcome::failed(FailureKind::Panic, "panicked: boom")
    );
    assert_eq!(
        outcome(&report, "Each", "three").failure_kind(),
        Some(FailureKind::Timeout)
    );
    Ok(())
}

#[test]
fn skipped_before_all_runs_nothing_else() -> Result<()> {
    let ran = Arc::new(AtomicUsize::new(0));
    let mut registry = TestRegistry::new();
    let (test, after_all) = (ran.clone(), ran.clone());
    registry
        .group("Skipper")
        .before_all(|cx| cx.skip("not on this machine"))
        .after_all(move |_| {
            after_all.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .test("body", move |_| {
            test.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;

    let report = run(&registry, TestRunnerBuilder::default());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(report.results.is_empty());
    assert_eq!(report.stats.skipped_groups, 1);

    // In force mode the skip request is ignored and the group runs.
    let mut builder = TestRunnerBuilder::default();
    builder.set_force(true);
    let report = run(&registry, builder);
    assert_eq!(ran.load(Ordering::SeqCst), 2, "body and AfterAll ran");
    assert_eq!(report.stats.passed, 1);
    Ok(())
}

#[test]
fn exclusion_is_a_substring_match() -> Result<()> {
    let mut registry = TestRegistry::new();
    registry.group("Foo").test("bar", |_| Ok(()))?;
    registry.group("BarFoo").test("baz", |_| Ok(()))?;
    registry.group("Kept").test("qux", |_| Ok(()))?;
    registry.exclude("Foo");

    let report = run(&registry, TestRunnerBuilder::default());
    let ran: Vec<_> = report
        .results
        .iter()
        .map(|result| format!("{}:{}", result.suite, result.name))
        .collect();
    assert_eq!(ran, vec!["Kept:qux"]);
    Ok(())
}

#[test]
fn conditions_and_explicit_completion() -> Result<()> {
    let mut registry = TestRegistry::new();
    registry
        .group("Mixed")
        .test("checks", |cx| {
            check_eq!(cx, 2 * 2, 5);
            check_eq!(cx, 2 * 2, 4);
            Ok(())
        })?
        .test_async("completes later", |_, done| {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                done.complete();
            });
            Ok(())
        })?
        .test_inline("inline", |cx| {
            ensure!(cx.test_name() == Some("inline"));
            Ok(())
        })?;

    let report = run(&registry, TestRunnerBuilder::default());
    assert_eq!(
        outcome(&report, "Mixed", "checks").failure_kind(),
        Some(FailureKind::Condition)
    );
    assert!(outcome(&report, "Mixed", "completes later").is_passed());
    assert!(outcome(&report, "Mixed", "inline").is_passed());
    assert_eq!(report.stats.failed, 1);
    Ok(())
}
