// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for presubmit.

use crate::errors::{ConfigParseError, ConfigParseErrorKind, TestThreadsParseError};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{
    cmp::Ordering, collections::BTreeSet, fmt, str::FromStr, sync::LazyLock, time::Duration,
};
use tracing::warn;
use url::Url;

/// Gets the number of available CPUs and caches the value.
#[inline]
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Overall configuration for presubmit.
///
/// Values that differ per invocation (the build number, the refs under test, credentials) are not
/// part of this config: they are passed in through
/// [`ResultParams`](crate::aggregate::ResultParams) and [`RunParams`](crate::shard::RunParams).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PresubmitConfig {
    /// The CI server.
    pub ci: CiConfig,

    /// The code review server.
    pub review: ReviewConfig,

    /// Baseline resolution.
    pub baseline: BaselineConfig,

    /// Shard execution.
    pub runner: RunnerConfig,

    /// The build cop rotation.
    #[serde(default)]
    pub build_cop: BuildCopConfig,
}

impl PresubmitConfig {
    /// The default location of the config within a repository: `.config/presubmit.toml`.
    pub const CONFIG_PATH: &'static str = ".config/presubmit.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the presubmit config from the given file, or if not specified from
    /// `.config/presubmit.toml` in the repository root.
    ///
    /// If no config file is specified and the repository doesn't have `.config/presubmit.toml`,
    /// uses the default config options.
    pub fn from_sources(
        repo_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = repo_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(config_file, kind))
    }

    /// Parses a config from a TOML string layered over the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigParseError> {
        let builder =
            Self::make_default_config().add_source(File::from_str(contents, FileFormat::Toml));
        Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(Utf8PathBuf::from("<inline>"), kind))
    }

    /// Returns the default presubmit config.
    pub fn default_config() -> Self {
        Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid")
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<Self, ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        serde_path_to_error::deserialize(config)
            .map_err(|error| ConfigParseErrorKind::DeserializeError(Box::new(error)))
    }
}

/// CI server configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CiConfig {
    /// The base URL of the CI server.
    #[serde(deserialize_with = "deserialize_base_url")]
    pub url: Url,

    /// The job that runs presubmit and collects shard results.
    pub presubmit_job: String,

    /// Jobs sharded across executor labels.
    pub multi_configuration_jobs: BTreeSet<String>,

    /// The base URL for test report links.
    #[serde(deserialize_with = "deserialize_base_url")]
    pub report_url: Url,
}

impl CiConfig {
    /// Returns true if builds of this job are addressed per executor label.
    pub fn is_multi_configuration_job(&self, job: &str) -> bool {
        self.multi_configuration_jobs.contains(job)
    }
}

/// Deserializes a URL that paths can be appended to, such as `https://ci.example.com/jenkins`.
fn deserialize_base_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let url = Url::deserialize(deserializer)?;
    if url.cannot_be_a_base() {
        return Err(serde::de::Error::custom(format!(
            "`{url}` cannot be used as a base URL"
        )));
    }
    Ok(url)
}

/// Code review server configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReviewConfig {
    /// The base URL of the review server.
    pub url: String,

    /// The label that carries the presubmit vote.
    pub vote_label: String,

    /// The query for changes that may accept the vote label.
    pub query: String,
}

/// Baseline resolution configuration.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BaselineConfig {
    /// The maximum number of builds inspected per baseline lookup.
    pub max_lookback: usize,
}

/// Shard execution configuration.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunnerConfig {
    /// The number of scripts to run simultaneously.
    pub test_threads: TestThreads,

    /// The time after which a script is stopped.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// The build cop rotation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildCopConfig {
    /// Shifts, in any order.
    #[serde(default)]
    pub rotation: Vec<BuildCopShift>,
}

impl BuildCopConfig {
    /// Returns the primary build cop on duty at `now`: the one whose shift started most recently
    /// at or before `now`.
    pub fn current(&self, now: DateTime<Utc>) -> Option<&str> {
        self.rotation
            .iter()
            .filter(|shift| shift.start <= now)
            .max_by_key(|shift| shift.start)
            .map(|shift| shift.primary.as_str())
    }
}

/// A single shift in the build cop rotation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct BuildCopShift {
    /// The primary build cop for this shift.
    pub primary: String,

    /// The start of this shift.
    pub start: DateTime<Utc>,
}

/// Type for the test-threads config key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestThreads {
    /// Run scripts with a specified number of threads.
    Count(usize),

    /// Run scripts with a number of threads equal to the logical CPU count.
    NumCpus,
}

impl TestThreads {
    /// Gets the actual number of test threads computed at runtime.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(threads) => threads,
            Self::NumCpus => get_num_cpus(),
        }
    }
}

impl FromStr for TestThreads {
    type Err = TestThreadsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "num-cpus" {
            return Ok(Self::NumCpus);
        }

        match s.parse::<isize>() {
            Err(e) => Err(TestThreadsParseError::new(format!("{s} ({e})"))),
            Ok(0) => Err(TestThreadsParseError::new("0 (threads may not be 0)")),
            Ok(j) if j < 0 => Ok(TestThreads::Count(
                (get_num_cpus() as isize + j).max(1) as usize,
            )),
            Ok(j) => Ok(TestThreads::Count(j as usize)),
        }
    }
}

impl fmt::Display for TestThreads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(threads) => write!(f, "{threads}"),
            Self::NumCpus => write!(f, "num-cpus"),
        }
    }
}

impl<'de> Deserialize<'de> for TestThreads {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = TestThreads;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "an integer or the string \"num-cpus\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "num-cpus" {
                    Ok(TestThreads::NumCpus)
                } else {
                    Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &self,
                    ))
                }
            }

            // TOML integers are i64.
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v.cmp(&0) {
                    Ordering::Greater => Ok(TestThreads::Count(v as usize)),
                    Ordering::Less => Ok(TestThreads::Count(
                        (get_num_cpus() as i64 + v).max(1) as usize,
                    )),
                    Ordering::Equal => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Signed(v),
                        &self,
                    )),
                }
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match i64::try_from(v) {
                    Ok(v) => self.visit_i64(v),
                    Err(_) => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Unsigned(v),
                        &self,
                    )),
                }
            }
        }

        deserializer.deserialize_any(V)
    }
}
