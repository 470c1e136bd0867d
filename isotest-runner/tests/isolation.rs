// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process isolation end to end.
//!
//! Everything here forks, so it all runs from a single test function: forking while other test
//! threads hold locks could deadlock the child.

use color_eyre::eyre::Result;
use isotest_runner::{
    config::RunnerConfig,
    ensure, ensure_eq,
    registry::{TestOpts, TestRegistry},
    reporter::{FailureKind, Outcome, RunReport, TestEventKind},
    runner::TestRunnerBuilder,
};
use isotest_shm::SharedRegion;
use nix::{errno::Errno, sys::signal::kill, unistd::Pid};
use pretty_assertions::assert_eq;
use std::{
    io::Write,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

fn counter_name() -> String {
    format!("/ist-{}-iso", std::process::id())
}

fn registry() -> Result<TestRegistry> {
    let mut registry = TestRegistry::new();
    registry
        .group("Isolated")
        .test_isolated("exits with skip", |_| {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "no GPU available")?;
            stdout.flush()?;
            std::process::exit(2);
        })?
        .test_with(
            "sleeps past deadline",
            TestOpts::new().isolated().timeout_ms(500),
            |_| {
                std::thread::sleep(Duration::from_secs(30));
                Ok(())
            },
        )?
        .test_isolated("aborts", |_| std::process::abort())?
        .test_with(
            "expected to fail",
            TestOpts::new().isolated().expect_failure(),
            |_| {
                ensure_eq!(1, 2);
                Ok(())
            },
        )?
        .test_isolated("knows it is isolated", |cx| {
            ensure!(cx.is_isolated_child());
            Ok(())
        })?;
    Ok(registry)
}

/// Tests whose outcome must not depend on whether they run in a child.
///
/// `counter` is named by the parent: a forked child has a pid of its own.
fn deterministic_registry(counter: &str) -> Result<TestRegistry> {
    let (first, second) = (counter.to_owned(), counter.to_owned());
    let mut registry = TestRegistry::new();
    registry
        .group("Deterministic")
        .test("increments", move |_| {
            let counter = SharedRegion::<AtomicU64>::attach(first.clone())?;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?
        .test("increments then fails", move |_| {
            let counter = SharedRegion::<AtomicU64>::attach(second.clone())?;
            counter.fetch_add(10, Ordering::SeqCst);
            ensure_eq!(counter.load(Ordering::SeqCst) % 2, 3);
            Ok(())
        })?
        .test("skips", |cx| cx.skip("not today"))?;
    Ok(registry)
}

fn run(registry: &TestRegistry, job_isolation: bool) -> (RunReport, Vec<u32>) {
    let mut builder = TestRunnerBuilder::default();
    builder
        .set_job_isolation(job_isolation)
        .set_echo_child_output(false);
    let mut pids = Vec::new();
    let report = builder
        .build(registry, &RunnerConfig::default_config())
        .execute(|event| {
            if let TestEventKind::TestFinished { pid: Some(pid), .. } = event.kind {
                pids.push(pid);
            }
        });
    (report, pids)
}

fn outcome<'r>(report: &'r RunReport, test: &str) -> &'r Outcome {
    &report
        .results
        .iter()
        .find(|result| result.name == test)
        .unwrap_or_else(|| panic!("no result for {test}"))
        .outcome
}

fn status(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Passed { .. } => "passed",
        Outcome::Failed { .. } => "failed",
        Outcome::Skipped { .. } => "skipped",
    }
}

fn assert_reaped(pid: u32) {
    let pid = Pid::from_raw(pid as i32);
    assert_eq!(kill(pid, None), Err(Errno::ESRCH), "child {pid} was reaped");
}

#[test]
fn isolated_tests() -> Result<()> {
    // Exit codes, signals and deadlines.
    let registry = registry()?;
    let started = Instant::now();
    let (report, pids) = run(&registry, false);

    assert_eq!(
        outcome(&report, "exits with skip"),
        &Outcome::skipped("no GPU available")
    );

    let timed_out = outcome(&report, "sleeps past deadline");
    assert_eq!(timed_out.failure_kind(), Some(FailureKind::Timeout));
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "the sleeping child was killed, not waited for"
    );

    let aborted = outcome(&report, "aborts");
    assert_eq!(aborted.failure_kind(), Some(FailureKind::Signal));
    assert!(
        aborted.message().is_some_and(|message| message.contains("SIGABRT")),
        "signal is named: {aborted:?}"
    );

    assert_eq!(
        outcome(&report, "expected to fail").message(),
        Some("Expected fail and failed.")
    );
    assert!(outcome(&report, "expected to fail").is_passed());
    assert!(outcome(&report, "knows it is isolated").is_passed());

    assert_eq!(pids.len(), 5, "every isolated test reports a pid");
    for pid in pids {
        assert_reaped(pid);
    }

    // The same tests behave the same with and without job isolation.
    let name = counter_name();
    let counter = SharedRegion::<AtomicU64>::create(name.clone())?;
    let registry = deterministic_registry(&name)?;

    let (in_process, pids) = run(&registry, false);
    assert!(pids.is_empty());
    let in_process_delta = counter.swap(0, Ordering::SeqCst);

    let (isolated, pids) = run(&registry, true);
    assert_eq!(pids.len(), 3);
    let isolated_delta = counter.swap(0, Ordering::SeqCst);

    assert_eq!(in_process_delta, 11);
    assert_eq!(isolated_delta, in_process_delta);
    for test in ["increments", "increments then fails", "skips"] {
        assert_eq!(
            status(outcome(&in_process, test)),
            status(outcome(&isolated, test)),
            "{test} has the same outcome"
        );
    }
    assert_eq!(in_process.stats.failed, isolated.stats.failed);
    assert_eq!(isolated.stats.failed, 1, "only the parity check fails");
    assert!(
        outcome(&isolated, "increments").is_passed(),
        "children attached to the parent's counter: {:?}",
        outcome(&isolated, "increments")
    );

    counter.remove()?;
    Ok(())
}
