// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reporting of test events and results.
//!
//! [`TestDisplayer`] writes human-readable status lines as events arrive. Once the run has
//! finished, the collected [`RunReport`] can be written out by a [`Reporter`] such as
//! [`JunitReporter`].

pub mod aggregator;
mod displayer;
pub mod events;
mod junit;

pub use aggregator::{RunReport, TestResult};
pub use displayer::{DisplayerOutput, TestDisplayer};
pub use events::*;
pub use junit::{JunitReporter, ReportOptions, Reporter};
