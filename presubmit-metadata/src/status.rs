// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// The overall outcome of one presubmit shard.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ShardStatus {
    /// Every test in the shard passed.
    Passed,

    /// At least one test in the shard failed.
    Failed,

    /// The shard did not finish within its timeout.
    TimedOut,

    /// The shard was not run for this change.
    Skipped,

    /// The change under test could not be merged, so nothing was run.
    MergeConflict,
}

impl ShardStatus {
    /// Returns true if this status represents a failed shard.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut | Self::MergeConflict)
    }

    /// Returns the string representation used in status records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::TimedOut => "timed-out",
            Self::Skipped => "skipped",
            Self::MergeConflict => "merge-conflict",
        }
    }
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status record written by a shard at the end of its run.
///
/// This is stored as `status_<test_name>.json` in the shard's result directory, next to the
/// xUnit report (see [`report_file_name`]).
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ShardStatusRecord {
    /// The overall outcome.
    pub status: ShardStatus,

    /// The name of the CI test (job) this shard ran.
    pub test_name: String,

    /// The executor label the shard ran on, e.g. `linux-slave`. Empty if unknown.
    #[serde(default)]
    pub executor_label: String,

    /// The time the shard's change was submitted for testing.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// The timeout that was hit, for [`ShardStatus::TimedOut`].
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    /// The change that failed to merge, for [`ShardStatus::MergeConflict`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_conflict_change: Option<String>,
}

impl ShardStatusRecord {
    /// Parses a status record from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes this status record to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Returns the file stem shared by a test's status record and xUnit report.
///
/// For a test named `this-is-a-test` this is `this_is_a_test`.
pub fn file_stem(test_name: &str) -> String {
    test_name.replace('-', "_")
}

/// Returns the name of the status record file for the given test.
pub fn status_file_name(test_name: &str) -> String {
    format!("status_{}.json", file_stem(test_name))
}

/// Returns the name of the xUnit report file for the given test.
pub fn report_file_name(test_name: &str) -> String {
    format!("tests_{}.xml", file_stem(test_name))
}

/// Returns the name of the directory the presubmit master job collects a shard's files into.
pub fn shard_dir_name(test_name: &str, executor_label: &str) -> String {
    format!("L={executor_label},TEST={test_name}")
}
