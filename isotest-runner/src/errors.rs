// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by isotest.

use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error, fmt};
use thiserror::Error;

/// An error that occurred while registering tests.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistryError {
    /// A test with the same name was already registered in this group.
    #[error("test `{group}:{test}` is registered more than once")]
    DuplicateTest {
        /// The group name.
        group: String,

        /// The test name.
        test: String,
    },

    /// A group or test name was empty.
    #[error("empty {kind} name in group `{group}`")]
    EmptyName {
        /// The group the name belongs to.
        group: String,

        /// Either `group` or `test`.
        kind: &'static str,
    },
}

/// An error that occurred while building a [`TestFilter`](crate::test_filter::TestFilter).
#[derive(Clone, Debug, Error)]
#[error("invalid test pattern `{pattern}`")]
#[non_exhaustive]
pub struct FilterError {
    /// The pattern that failed to compile.
    pub pattern: String,

    /// The underlying regex error.
    #[source]
    pub error: regex::Error,
}

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse isotest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of [`ConfigParseError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while reading or merging config sources.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// A value could not be deserialized.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// An error that occurred while writing a test report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteReportError {
    /// An existing report could not be read.
    #[error("error reading existing report at `{path}`")]
    Read {
        /// The path to the report.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// An existing report could not be parsed.
    #[error("error parsing existing report at `{path}`")]
    Parse {
        /// The path to the report.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: quick_xml::Error,
    },

    /// The parent directory of the report could not be created.
    #[error("error creating directory `{path}`")]
    CreateDir {
        /// The directory that could not be created.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The report could not be serialized or written.
    #[error("error writing report to `{path}`")]
    Write {
        /// The path to the report.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: Box<dyn error::Error + Send + Sync>,
    },
}

/// Displays an error along with its chain of sources, one per line.
pub struct DisplayErrorChain<E>(E);

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E> fmt::Display for DisplayErrorChain<E>
where
    E: error::Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut current = self.0.source();
        while let Some(source) = current {
            write!(f, "\n  caused by:\n  - {source}")?;
            current = source.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn error_chain_lists_sources() {
        let error = WriteReportError::Read {
            path: "out/report.xml".into(),
            error: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied"),
        };
        assert_eq!(
            DisplayErrorChain::new(error).to_string(),
            "error reading existing report at `out/report.xml`\n  caused by:\n  - access denied"
        );
    }
}
