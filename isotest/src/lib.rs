// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! A test harness for programs that need per-test timeouts, process isolation and shared memory
//! fixtures.
//!
//! Tests are registered into named groups on a [`TestRegistry`](registry::TestRegistry), then
//! [`run_all_tests`] parses the command line, runs the selected tests and returns the process
//! exit code.
//!
//! # Examples
//!
//! ```no_run
//! use isotest::{ensure_eq, registry::TestRegistry};
//!
//! let mut registry = TestRegistry::new();
//! registry
//!     .group("Math")
//!     .test("adds", |_| {
//!         ensure_eq!(1 + 1, 2);
//!         Ok(())
//!     })
//!     .expect("test names are unique");
//!
//! std::process::exit(isotest::run_all_tests(&registry, std::env::args_os()));
//! ```
//!
//! Run the program with `-h` to list the command-line options.

mod cli;
mod output;

pub use cli::{CliError, Opts, run_all_tests};
pub use isotest_runner::{
    check, check_eq, check_ne, config, context, ensure, ensure_eq, ensure_ne, errors, registry,
    reporter, runner, test_filter,
};
pub use output::LOG_ENV;

/// Shared memory primitives for tests that run in isolated processes.
pub use isotest_shm as shm;
