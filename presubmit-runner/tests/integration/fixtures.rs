// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8Path;
use chrono::{DateTime, TimeZone, Utc};
use presubmit_metadata::{report_file_name, shard_dir_name, status_file_name};
use presubmit_runner::{
    baseline::{BuildInfo, CiServer, JobSpec},
    errors::{CiError, ReviewError},
    publish::ReviewServer,
    xunit::TestCase,
};
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, HashMap},
};

pub(crate) const PRESUBMIT_JOB: &str = "presubmit-test";
pub(crate) const BUILD_NUMBER: u64 = 45;

pub(crate) fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

#[derive(Clone, Debug)]
pub(crate) struct FakeBuild {
    pub(crate) number: u64,
    pub(crate) started: i64,
    pub(crate) result: &'static str,
    pub(crate) failures: Vec<TestCase>,
}

impl FakeBuild {
    pub(crate) fn new(number: u64, started: i64, failures: Vec<TestCase>) -> Self {
        let result = if failures.is_empty() { "SUCCESS" } else { "UNSTABLE" };
        Self {
            number,
            started,
            result,
            failures,
        }
    }

    fn info(&self) -> BuildInfo {
        BuildInfo {
            number: self.number,
            timestamp: ts(self.started),
            result: Some(self.result.to_owned()),
        }
    }
}

/// An in-memory CI server. Builds are keyed by job spec, e.g. `vanadium-go-test/L=linux-slave`.
#[derive(Debug, Default)]
pub(crate) struct FakeCi {
    pub(crate) master_result: Option<&'static str>,
    pub(crate) builds: HashMap<String, Vec<FakeBuild>>,
    pub(crate) report_lookups: RefCell<Vec<(String, u64)>>,
}

impl FakeCi {
    pub(crate) fn with_job(mut self, spec: &str, builds: Vec<FakeBuild>) -> Self {
        self.builds.insert(spec.to_owned(), builds);
        self
    }

    fn find(&self, spec: &JobSpec, number: u64) -> Result<&FakeBuild, CiError> {
        self.builds
            .get(&spec.to_string())
            .and_then(|builds| builds.iter().find(|build| build.number == number))
            .ok_or_else(|| CiError::BuildNotFound {
                spec: spec.to_string(),
                number,
            })
    }
}

impl CiServer for FakeCi {
    fn last_completed_build(&self, spec: &JobSpec) -> Result<BuildInfo, CiError> {
        self.builds
            .get(&spec.to_string())
            .and_then(|builds| builds.iter().max_by_key(|build| build.number))
            .map(FakeBuild::info)
            .ok_or_else(|| CiError::BuildNotFound {
                spec: spec.to_string(),
                number: 0,
            })
    }

    fn build_info(&self, spec: &JobSpec, number: u64) -> Result<BuildInfo, CiError> {
        if spec.job_name() == PRESUBMIT_JOB {
            return match self.master_result {
                Some(result) => Ok(BuildInfo {
                    number,
                    timestamp: ts(0),
                    result: Some(result.to_owned()),
                }),
                None => Err(CiError::BuildNotFound {
                    spec: spec.to_string(),
                    number,
                }),
            };
        }
        self.find(spec, number).map(FakeBuild::info)
    }

    fn failed_test_cases(&self, spec: &JobSpec, number: u64) -> Result<Vec<TestCase>, CiError> {
        self.report_lookups
            .borrow_mut()
            .push((spec.to_string(), number));
        self.find(spec, number).map(|build| build.failures.clone())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Post {
    pub(crate) change_ref: String,
    pub(crate) message: String,
    pub(crate) labels: BTreeMap<String, i32>,
}

/// An in-memory review server that records every call.
#[derive(Debug, Default)]
pub(crate) struct FakeReview {
    pub(crate) accepting: BTreeSet<String>,
    pub(crate) queries: RefCell<usize>,
    pub(crate) posts: RefCell<Vec<Post>>,
}

impl ReviewServer for FakeReview {
    fn changes_accepting_label(&self, _label: &str) -> Result<BTreeSet<String>, ReviewError> {
        *self.queries.borrow_mut() += 1;
        Ok(self.accepting.clone())
    }

    fn post_review(
        &self,
        change_ref: &str,
        message: &str,
        labels: &BTreeMap<String, i32>,
    ) -> Result<(), ReviewError> {
        self.posts.borrow_mut().push(Post {
            change_ref: change_ref.to_owned(),
            message: message.to_owned(),
            labels: labels.clone(),
        });
        Ok(())
    }
}

/// Writes a shard's status file, and its report if given, the way the presubmit master job
/// collects them.
pub(crate) fn write_shard(
    results_dir: &Utf8Path,
    test_name: &str,
    label: &str,
    status: &str,
    submitted: i64,
    report: Option<&str>,
) {
    let dir = results_dir.join(shard_dir_name(test_name, label));
    std::fs::create_dir_all(&dir).unwrap();
    let status_json = serde_json::json!({
        "status": status,
        "test-name": test_name,
        "executor-label": label,
        "timestamp": submitted * 1000,
    });
    std::fs::write(dir.join(status_file_name(test_name)), status_json.to_string()).unwrap();
    if let Some(report) = report {
        std::fs::write(dir.join(report_file_name(test_name)), report).unwrap();
    }
}
