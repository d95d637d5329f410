// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolving the postsubmit baseline for a shard.
//!
//! The baseline for a shard is the most recent completed postsubmit build of the same test (and,
//! for multi-configuration jobs, the same executor label) that started at or before the time the
//! change was submitted. Its failing tests are what the shard's failures are classified against.

use crate::{
    config::PresubmitConfig,
    errors::{CiError, DisplayErrorChain},
    xunit::TestCase,
};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, fmt};
use tracing::{debug, warn};

/// The build result string CI servers use for successful builds.
pub const SUCCESS_RESULT: &str = "SUCCESS";

/// The build result string CI servers use for failed builds.
pub const FAILURE_RESULT: &str = "FAILURE";

/// Identifies a CI job, and for multi-configuration jobs, one of its configurations.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct JobSpec {
    job: String,
    executor_label: Option<String>,
}

impl JobSpec {
    /// Creates a spec for a plain job.
    pub fn job(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            executor_label: None,
        }
    }

    /// Creates the spec for a shard's test, using the executor label only if the job is a
    /// multi-configuration job.
    pub fn for_test(config: &PresubmitConfig, test_name: &str, executor_label: &str) -> Self {
        if config.ci.is_multi_configuration_job(test_name) {
            Self {
                job: test_name.to_owned(),
                executor_label: Some(executor_label.to_owned()),
            }
        } else {
            Self::job(test_name)
        }
    }

    /// Returns the job name.
    pub fn job_name(&self) -> &str {
        &self.job
    }

    /// Returns the executor label, for multi-configuration jobs.
    pub fn executor_label(&self) -> Option<&str> {
        self.executor_label.as_deref()
    }
}

impl fmt::Display for JobSpec {
    /// Formats the spec as a CI path: `job` or `job/L=label`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.executor_label {
            Some(label) => write!(f, "{}/L={}", self.job, label),
            None => write!(f, "{}", self.job),
        }
    }
}

/// Metadata about a single CI build.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildInfo {
    /// The build number.
    pub number: u64,

    /// The time the build started.
    pub timestamp: DateTime<Utc>,

    /// The build result, e.g. `SUCCESS` or `FAILURE`. `None` while the build is running.
    pub result: Option<String>,
}

impl BuildInfo {
    /// Returns true if the build succeeded.
    pub fn is_success(&self) -> bool {
        self.result.as_deref() == Some(SUCCESS_RESULT)
    }
}

/// The lookups the report pass needs from a CI server.
pub trait CiServer {
    /// Returns the last completed build of the job.
    fn last_completed_build(&self, spec: &JobSpec) -> Result<BuildInfo, CiError>;

    /// Returns a specific build of the job.
    fn build_info(&self, spec: &JobSpec, number: u64) -> Result<BuildInfo, CiError>;

    /// Returns the failing test cases of a build: those the CI test report marks as `FAILED` or
    /// `REGRESSION`.
    fn failed_test_cases(&self, spec: &JobSpec, number: u64) -> Result<Vec<TestCase>, CiError>;
}

impl<T: CiServer + ?Sized> CiServer for &T {
    fn last_completed_build(&self, spec: &JobSpec) -> Result<BuildInfo, CiError> {
        (**self).last_completed_build(spec)
    }

    fn build_info(&self, spec: &JobSpec, number: u64) -> Result<BuildInfo, CiError> {
        (**self).build_info(spec, number)
    }

    fn failed_test_cases(&self, spec: &JobSpec, number: u64) -> Result<Vec<TestCase>, CiError> {
        (**self).failed_test_cases(spec, number)
    }
}

/// The baseline for one (test name, executor label) pair.
#[derive(Debug)]
pub enum BaselineSnapshot {
    /// A baseline build was found.
    Known {
        /// The baseline build.
        build: BuildInfo,

        /// The failing test cases of the baseline build.
        failures: Vec<TestCase>,
    },

    /// No baseline could be determined.
    Unknown {
        /// Why not.
        reason: BaselineUnknownReason,
    },
}

impl BaselineSnapshot {
    /// Returns the baseline failures, or an empty slice if the baseline is unknown.
    pub fn failures(&self) -> &[TestCase] {
        match self {
            Self::Known { failures, .. } => failures,
            Self::Unknown { .. } => &[],
        }
    }

    /// Returns the outcome of the baseline build, for the summary line.
    pub fn outcome(&self) -> BaselineOutcome {
        match self {
            Self::Known { build, .. } if build.is_success() => BaselineOutcome::Passed,
            Self::Known { .. } => BaselineOutcome::Failed,
            Self::Unknown { .. } => BaselineOutcome::Unknown,
        }
    }
}

/// Why a baseline could not be determined.
#[derive(Debug)]
#[non_exhaustive]
pub enum BaselineUnknownReason {
    /// Every build of the job started after the cutoff.
    NoBuildBeforeCutoff,

    /// The configured number of builds was inspected without finding one before the cutoff.
    LookbackExhausted {
        /// The number of builds inspected.
        max_lookback: usize,
    },

    /// A CI lookup failed.
    Lookup(CiError),
}

impl fmt::Display for BaselineUnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBuildBeforeCutoff => write!(f, "no build started before the change"),
            Self::LookbackExhausted { max_lookback } => {
                write!(f, "no build before the change within the last {max_lookback} builds")
            }
            Self::Lookup(error) => write!(f, "{}", DisplayErrorChain::new(error)),
        }
    }
}

/// The outcome of a baseline build, as shown in the summary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BaselineOutcome {
    /// The baseline build succeeded.
    Passed,

    /// The baseline build did not succeed.
    Failed,

    /// The baseline is unknown.
    Unknown,
}

/// Resolves baselines, at most once per (test name, executor label) pair.
///
/// A resolver lives for a single report pass. Lookup failures are logged and resolve to
/// [`BaselineSnapshot::Unknown`].
#[derive(Debug)]
pub struct BaselineResolver<'a, C: ?Sized> {
    config: &'a PresubmitConfig,
    ci: &'a C,
    cache: HashMap<(String, String), BaselineSnapshot>,
}

impl<'a, C: CiServer + ?Sized> BaselineResolver<'a, C> {
    /// Creates a new resolver.
    pub fn new(config: &'a PresubmitConfig, ci: &'a C) -> Self {
        Self {
            config,
            ci,
            cache: HashMap::new(),
        }
    }

    /// Returns the baseline for the given test and executor label, relative to `cutoff`.
    pub fn resolve(
        &mut self,
        test_name: &str,
        executor_label: &str,
        cutoff: DateTime<Utc>,
    ) -> &BaselineSnapshot {
        let (config, ci) = (self.config, self.ci);
        self.cache
            .entry((test_name.to_owned(), executor_label.to_owned()))
            .or_insert_with(|| {
                let spec = JobSpec::for_test(config, test_name, executor_label);
                let snapshot = find_baseline(ci, &spec, cutoff, config.baseline.max_lookback);
                match &snapshot {
                    BaselineSnapshot::Known { build, failures } => debug!(
                        "baseline for {spec} is build {} ({} failures)",
                        build.number,
                        failures.len()
                    ),
                    BaselineSnapshot::Unknown { reason } => {
                        warn!("baseline for {spec} is unknown: {reason}")
                    }
                }
                snapshot
            })
    }
}

fn find_baseline<C: CiServer + ?Sized>(
    ci: &C,
    spec: &JobSpec,
    cutoff: DateTime<Utc>,
    max_lookback: usize,
) -> BaselineSnapshot {
    match find_baseline_build(ci, spec, cutoff, max_lookback) {
        Ok(Ok(build)) => match ci.failed_test_cases(spec, build.number) {
            Ok(failures) => BaselineSnapshot::Known { build, failures },
            Err(error) => BaselineSnapshot::Unknown {
                reason: BaselineUnknownReason::Lookup(error),
            },
        },
        Ok(Err(reason)) => BaselineSnapshot::Unknown { reason },
        Err(error) => BaselineSnapshot::Unknown {
            reason: BaselineUnknownReason::Lookup(error),
        },
    }
}

// Walks builds from the last completed one downwards.
fn find_baseline_build<C: CiServer + ?Sized>(
    ci: &C,
    spec: &JobSpec,
    cutoff: DateTime<Utc>,
    max_lookback: usize,
) -> Result<Result<BuildInfo, BaselineUnknownReason>, CiError> {
    let mut build = ci.last_completed_build(spec)?;
    let mut inspected = 0;
    loop {
        debug!("checking build {} of {spec}", build.number);
        if build.timestamp <= cutoff {
            return Ok(Ok(build));
        }
        inspected += 1;
        if build.number <= 1 {
            return Ok(Err(BaselineUnknownReason::NoBuildBeforeCutoff));
        }
        if inspected >= max_lookback {
            return Ok(Err(BaselineUnknownReason::LookbackExhausted { max_lookback }));
        }
        build = ci.build_info(spec, build.number - 1)?;
    }
}
