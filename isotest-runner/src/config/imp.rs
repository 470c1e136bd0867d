// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use swrite::{SWrite, swrite};
use tracing::warn;

/// Trait for handling configuration warnings.
///
/// The default implementation logs them; tests collect them instead.
pub trait ConfigWarnings {
    /// Handle unknown configuration keys found in a config file.
    fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>);
}

/// Default implementation of [`ConfigWarnings`] that logs warnings using the tracing crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>) {
        let mut unknown_str = String::new();
        let mut keys = unknown.iter();
        match (keys.next(), unknown.len()) {
            (Some(key), 1) => {
                // Print this on the same line.
                unknown_str.push_str("key: ");
                unknown_str.push_str(key);
            }
            _ => {
                unknown_str.push_str("keys:\n");
                for ignored_key in unknown {
                    swrite!(unknown_str, "\n  - {ignored_key}");
                }
            }
        }

        warn!("in config file {config_file}, ignoring unknown configuration {unknown_str}");
    }
}

/// Settings for a test run.
///
/// Command-line flags are applied on top of these by overwriting the public fields.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RunnerConfig {
    /// The time a test may take unless it overrides it.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Extra time an isolated child gets past its timeout before it is killed.
    #[serde(with = "humantime_serde")]
    pub process_grace_period: Duration,

    /// The sleep between checks on a running child.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Whether output from isolated children is echoed to stdout while they run.
    pub echo_child_output: bool,

    /// Whether every test runs in its own child process.
    pub job_isolation: bool,

    /// The default path for JUnit reports.
    pub report_path: Utf8PathBuf,
}

impl RunnerConfig {
    /// The path to the user config, relative to the directory the test program runs from.
    pub const CONFIG_PATH: &'static str = ".config/isotest.toml";

    /// The environment variable naming an alternative config file.
    pub const CONFIG_ENV: &'static str = "ISOTEST_CONFIG";

    /// Contains the default config as a TOML file.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Reads the config, layering `config_file` (required if given) or the optional default file
    /// under `root` on top of the embedded defaults.
    pub fn from_sources(
        root: &Utf8Path,
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (
                file.to_owned(),
                File::new(file.as_str(), FileFormat::Toml),
            ),
            None => {
                let config_file = root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(config_file.clone(), kind))?;
        if !unknown.is_empty() {
            warnings.unknown_config_keys(&config_file, &unknown);
        }
        Ok(config)
    }

    /// Parses a config from a TOML string layered over the defaults.
    pub fn from_toml_str(
        contents: &str,
        source_name: &str,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let builder =
            Self::make_default_config().add_source(File::from_str(contents, FileFormat::Toml));
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(source_name, kind))?;
        if !unknown.is_empty() {
            warnings.unknown_config_keys(Utf8Path::new(source_name), &unknown);
        }
        Ok(config)
    }

    /// Returns the default config.
    pub fn default_config() -> Self {
        // The embedded default config is checked by the tests below.
        Self::build_and_deserialize_config(&Self::make_default_config())
            .map(|(config, _)| config)
            .unwrap_or_else(|error| panic!("default config is always valid: {error}"))
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(Self, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: Self = serde_path_to_error::deserialize(ignored_de).map_err(|error| {
            // Both serde_path_to_error and the config crate report the key. Drop the key from the
            // config error for consistency.
            let path = error.path().clone();
            let config_error = error.into_inner();
            let error = match config_error {
                ConfigError::At { error, .. } => *error,
                other => other,
            };
            ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                path, error,
            )))
        })?;

        Ok((config, ignored))
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::default_config()
    }
}
