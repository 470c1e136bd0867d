// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for isotest.
//!
//! The main structure in this module is [`RunnerConfig`]: the embedded default config, layered
//! under an optional user-provided TOML file.

mod imp;

pub use imp::*;
