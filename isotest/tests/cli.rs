// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs registries through the command-line entry point.
//!
//! Silent mode redirects the whole process's stdout and stderr, so everything runs from a single
//! test function.

use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::Result;
use isotest::{ensure_eq, registry::TestRegistry, run_all_tests};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn passing() -> Result<TestRegistry> {
    let mut registry = TestRegistry::new();
    registry
        .group("Good")
        .test("passes", |_| Ok(()))?
        .test("skips", |cx| cx.skip("not needed"))?;
    Ok(registry)
}

fn failing() -> Result<TestRegistry> {
    let mut registry = TestRegistry::new();
    registry
        .group("Bad")
        .test("fails", |_| {
            ensure_eq!(1 + 1, 3);
            Ok(())
        })?
        .test("passes too", |_| Ok(()))?;
    Ok(registry)
}

#[test]
fn exit_codes_and_reports() -> Result<()> {
    let passing = passing()?;
    let failing = failing()?;

    assert_eq!(run_all_tests(&passing, ["prog", "-s", "-c"]), 0);
    assert_eq!(run_all_tests(&failing, ["prog", "-s", "-c"]), 1);

    // Filtering out the failure makes the run succeed.
    assert_eq!(
        run_all_tests(&failing, ["prog", "-s", "-c", "-p", "-fails"]),
        0
    );

    // Reports from separate runs merge into one file.
    let dir = Utf8TempDir::new()?;
    let report = dir.path().join("nested").join("report.xml");
    assert_eq!(
        run_all_tests(&passing, ["prog", "-s", "-r", report.as_str()]),
        0
    );
    assert_eq!(
        run_all_tests(&failing, ["prog", "-s", "-r", report.as_str()]),
        1
    );

    let xml = std::fs::read_to_string(&report)?;
    assert_eq!(xml.matches("<testcase ").count(), 4, "report:\n{xml}");
    for name in ["passes", "skips", "fails", "passes too"] {
        assert!(
            xml.contains(&format!("name=\"{name}\"")),
            "{name} is in the report:\n{xml}"
        );
    }
    assert!(xml.contains("<failure"), "report:\n{xml}");
    assert!(xml.contains("<skipped"), "report:\n{xml}");

    // A config file named by the environment lowers the default timeout and moves the report.
    let mut slow = TestRegistry::new();
    slow.group("Slow").test("sleeps", |_| {
        std::thread::sleep(Duration::from_millis(500));
        Ok(())
    })?;
    assert_eq!(run_all_tests(&slow, ["prog", "-s"]), 0);

    let config_file = dir.path().join("isotest.toml");
    let env_report = dir.path().join("from-config.xml");
    std::fs::write(
        &config_file,
        format!("default-timeout = \"50ms\"\nreport-path = \"{env_report}\"\n"),
    )?;
    // SAFETY: this is the only test in this binary, and no other thread reads the environment.
    unsafe { std::env::set_var("ISOTEST_CONFIG", &config_file) };
    let code = run_all_tests(&slow, ["prog", "-s", "-r"]);
    // SAFETY: as above.
    unsafe { std::env::remove_var("ISOTEST_CONFIG") };

    assert_eq!(code, 1, "the test timed out under the configured default");
    let xml = std::fs::read_to_string(&env_report)?;
    assert!(xml.contains("type=\"timeout\""), "report:\n{xml}");

    Ok(())
}
