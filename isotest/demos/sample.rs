// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A sample test program showing each kind of test and hook.
//!
//! Run with `cargo run --example sample -- -h` to see the options. Some tests here fail on
//! purpose, so the program exits with code 1.

use color_eyre::eyre::Result;
use isotest::{
    check_eq, ensure, ensure_eq,
    registry::{TestOpts, TestRegistry},
    shm::SharedRegion,
};
use std::{
    io::Write,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

fn shared_name() -> String {
    format!("/ist-{}-sample", std::process::id())
}

fn say(line: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let global = Arc::new(AtomicU32::new(0));
    let mut registry = TestRegistry::new();

    let (setup, check) = (global.clone(), global.clone());
    registry
        .group("Subject")
        .before_all(move |_| {
            say("before all");
            setup.store(1, Ordering::SeqCst);
            Ok(())
        })
        .after_all(|_| {
            say("after all");
            Ok(())
        })
        .before_each(|cx| {
            say(&format!("before each: {}", cx.test_name().unwrap_or("?")));
            Ok(())
        })
        .after_each(|cx| {
            say(&format!("after each: {}", cx.test_name().unwrap_or("?")));
            Ok(())
        })
        .test("sees the global", move |_| {
            ensure_eq!(check.load(Ordering::SeqCst), 1);
            Ok(())
        })?
        .test_with("times out", TestOpts::new().timeout_ms(1000), |_| {
            std::thread::sleep(Duration::from_secs(2));
            Ok(())
        })?
        .test_inline("runs inline", |cx| {
            check_eq!(cx, 2 + 2, 4);
            Ok(())
        })?
        .test("skips", |cx| cx.skip("nothing to do here"))?
        .test_async("completes later", |_, done| {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                done.complete();
            });
            Ok(())
        })?
        .test_async_with(
            "never completes",
            TestOpts::new().timeout_ms(200),
            |_, _done| Ok(()),
        )?
        .test_async("skips asynchronously", |cx, _done| {
            cx.skip("skipped before completing")
        })?;

    registry
        .group("Isolated")
        .before_all(|_| {
            SharedRegion::<AtomicU32>::create(shared_name())?.store(7, Ordering::SeqCst);
            Ok(())
        })
        .after_all(|_| {
            isotest::shm::unlink(&shared_name())?;
            Ok(())
        })
        .test_isolated("reads parent state", |cx| {
            ensure!(cx.is_isolated_child());
            let shared = SharedRegion::<AtomicU32>::attach(shared_name())?;
            ensure_eq!(shared.fetch_add(1, Ordering::SeqCst), 7);
            Ok(())
        })?
        .test_isolated("crashes", |_| std::process::abort())?
        .test_with(
            "fails as expected",
            TestOpts::new().isolated().expect_failure(),
            |_| {
                ensure!(false, "this was always going to fail");
                Ok(())
            },
        )?;

    std::process::exit(isotest::run_all_tests(&registry, std::env::args_os()));
}
