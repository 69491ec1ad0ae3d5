// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for isotest.
//!
//! Configuration is read from an embedded default config, overlaid with `.config/isotest.toml`
//! in the workspace root or an explicitly specified file.

use crate::errors::ConfigParseError;
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use tracing::warn;

/// Overall configuration for isotest.
#[derive(Clone, Debug)]
pub struct IsotestConfig {
    workspace_root: Utf8PathBuf,
    worker: WorkerConfig,
}

impl IsotestConfig {
    /// The default location of the config within the workspace root.
    pub const CONFIG_PATH: &'static str = ".config/isotest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from the given file, or if not specified from `.config/isotest.toml` in
    /// the workspace root.
    ///
    /// An explicitly specified file must exist. If no file is specified and the workspace doesn't
    /// have `.config/isotest.toml`, the default config is used.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_impl(workspace_root, config_file, |config_file, unknown| {
            let mut unknown_str = String::new();
            if unknown.len() == 1 {
                // Print this on the same line.
                unknown_str.push(' ');
                unknown_str.extend(unknown.iter().map(|s| s.as_str()));
            } else {
                for ignored_key in unknown {
                    unknown_str.push_str("\n  - ");
                    unknown_str.push_str(ignored_key);
                }
            }

            warn!("ignoring unknown configuration keys in config file {config_file}:{unknown_str}")
        })
    }

    // A custom unknown_callback can be passed in while testing.
    fn from_sources_impl(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        mut unknown_callback: impl FnMut(&Utf8Path, &BTreeSet<String>),
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();

        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (deserialized, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|err| ConfigParseError::new(&config_file, err))?;
        if !unknown.is_empty() {
            unknown_callback(&config_file, &unknown);
        }

        let mut worker = deserialized.worker;
        if let Some(tmp_dir) = &mut worker.tmp_dir {
            if tmp_dir.is_relative() {
                *tmp_dir = workspace_root.join(&*tmp_dir);
            }
        }

        Ok(Self {
            workspace_root,
            worker,
        })
    }

    /// Returns the workspace root this config was read for.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the worker configuration.
    pub fn worker(&self) -> &WorkerConfig {
        &self.worker
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(IsotestConfigDeserialize, BTreeSet<String>), config::ConfigError> {
        let config = builder.build_cloned()?;

        let mut ignored = BTreeSet::new();
        let config: IsotestConfigDeserialize =
            serde_ignored::deserialize(config, |path: serde_ignored::Path| {
                ignored.insert(path.to_string());
            })?;

        Ok((config, ignored))
    }
}

/// Settings that govern how workers are launched and supervised.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerConfig {
    /// How long a timed-out worker's process group has between SIGTERM and SIGKILL.
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,

    /// How much time past its timeout a worker waits before terminating its own process group.
    #[serde(with = "humantime_serde")]
    pub exit_grace: Duration,

    /// How long to wait for descendants to close the worker's output after the worker exits.
    #[serde(with = "humantime_serde")]
    pub leak_timeout: Duration,

    /// The minimum soft limit on open file descriptors in a worker.
    pub min_open_files: u64,

    /// The directory workers use for temporary files.
    #[serde(default)]
    pub tmp_dir: Option<Utf8PathBuf>,
}

impl Default for WorkerConfig {
    /// Matches the values in the embedded default config.
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            exit_grace: Duration::from_secs(30),
            leak_timeout: Duration::from_millis(100),
            min_open_files: 1024,
            tmp_dir: None,
        }
    }
}

// This is the form of `IsotestConfig` that gets deserialized.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct IsotestConfigDeserialize {
    worker: WorkerConfig,
}
