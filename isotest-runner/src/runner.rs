// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`TestRunner`]. Tests run one at a time, each either on a
//! helper thread under a deadline or in a forked child process.

mod governor;
mod imp;
mod unix;

pub use imp::*;
pub use unix::SilenceGuard;
