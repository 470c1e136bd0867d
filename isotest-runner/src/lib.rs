// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [isotest](https://crates.io/crates/isotest): test registration, the
//! scheduler, process isolation and reporting.
//!
//! Most users want the `isotest` crate, which wraps this one in a command-line interface.

#[cfg(not(unix))]
compile_error!("isotest-runner requires a Unix platform: process isolation is built on fork(2)");

// Declared first so the macros are available to every module below.
mod macros;

pub mod config;
pub mod context;
pub mod errors;
mod helpers;
pub mod registry;
pub mod reporter;
pub mod runner;
pub mod test_filter;

pub use helpers::plural;
