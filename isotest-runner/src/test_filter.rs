// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selecting which tests run.
//!
//! Tests are identified by the string `group:test`. Include and exclude patterns are regular
//! expressions searched anywhere in that string; they are not anchored. Registry-level
//! [`ExcludeRule`]s are matched the same way, as escaped literals, so a short group name also
//! excludes every identifier that contains it.

use crate::errors::FilterError;
use regex::Regex;
use std::fmt;

/// A registry-level exclusion of a group or of a single test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExcludeRule {
    group: String,
    test: Option<String>,
}

impl ExcludeRule {
    /// Parses `"Group"` or `"Group:test"`.
    pub fn parse(rule: &str) -> Self {
        match rule.split_once(':') {
            Some((group, test)) => Self {
                group: group.to_owned(),
                test: Some(test.to_owned()),
            },
            None => Self {
                group: rule.to_owned(),
                test: None,
            },
        }
    }

    /// The group part of the rule.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The test part of the rule, if any.
    pub fn test(&self) -> Option<&str> {
        self.test.as_deref()
    }

    fn to_regex(&self) -> Regex {
        // An escaped literal is always a valid pattern.
        Regex::new(&regex::escape(&self.to_string()))
            .unwrap_or_else(|error| unreachable!("escaped literal failed to compile: {error}"))
    }
}

impl fmt::Display for ExcludeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.test {
            Some(test) => write!(f, "{}:{}", self.group, test),
            None => write!(f, "{}", self.group),
        }
    }
}

/// A filter for tests.
#[derive(Clone, Debug, Default)]
pub struct TestFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl TestFilter {
    /// Creates a new `TestFilter` from include and exclude patterns.
    ///
    /// If `include` is empty, every test not excluded matches.
    pub fn new(
        include: &[impl AsRef<str>],
        exclude: &[impl AsRef<str>],
    ) -> Result<Self, FilterError> {
        Ok(Self {
            include: compile_all(include)?,
            exclude: compile_all(exclude)?,
        })
    }

    /// Creates a new `TestFilter` that matches every test.
    pub fn any() -> Self {
        Self::default()
    }

    /// Adds registry-level exclusion rules to this filter.
    pub fn with_exclude_rules<'a>(mut self, rules: impl IntoIterator<Item = &'a ExcludeRule>) -> Self {
        self.exclude.extend(rules.into_iter().map(ExcludeRule::to_regex));
        self
    }

    /// Returns an enum describing the match status of this filter.
    pub fn filter_match(&self, group: &str, test: &str) -> FilterMatch {
        let id = format!("{group}:{test}");
        if self.exclude.iter().any(|regex| regex.is_match(&id)) {
            return FilterMatch::Mismatch {
                reason: MismatchReason::Excluded,
            };
        }
        if !self.include.is_empty() && !self.include.iter().any(|regex| regex.is_match(&id)) {
            return FilterMatch::Mismatch {
                reason: MismatchReason::NotIncluded,
            };
        }
        FilterMatch::Matches
    }
}

fn compile_all(patterns: &[impl AsRef<str>]) -> Result<Vec<Regex>, FilterError> {
    patterns
        .iter()
        .map(|pattern| {
            let pattern = pattern.as_ref();
            Regex::new(pattern).map_err(|error| FilterError {
                pattern: pattern.to_owned(),
                error,
            })
        })
        .collect()
}

/// An enum describing whether a test matches a filter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FilterMatch {
    /// This test matches this filter.
    Matches,

    /// This test does not match this filter.
    Mismatch {
        /// Describes the reason this filter isn't matched.
        reason: MismatchReason,
    },
}

impl FilterMatch {
    /// Returns true if the filter matches.
    pub fn is_match(&self) -> bool {
        matches!(self, FilterMatch::Matches)
    }
}

/// The reason for why a test doesn't match a filter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum MismatchReason {
    /// No include pattern matched.
    NotIncluded,

    /// An exclude pattern or rule matched.
    Excluded,
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchReason::NotIncluded => write!(f, "does not match include patterns"),
            MismatchReason::Excluded => write!(f, "matches an exclude pattern"),
        }
    }
}
