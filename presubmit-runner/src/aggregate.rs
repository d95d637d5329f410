// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The report pass: turning shard results into a report and publishing it.
//!
//! A pass runs once per presubmit build, after every shard has finished:
//!
//! 1. If no shard produced results, nothing is reported.
//! 2. If a shard hit a merge conflict, only that is reported.
//! 3. If the presubmit master build failed, only a retry notice is reported.
//! 4. Otherwise, every shard's baseline is resolved, failures are classified against it, and the
//!    full report is rendered.

use crate::{
    baseline::{BaselineResolver, CiServer, FAILURE_RESULT, JobSpec},
    classify::{FailureKind, classify},
    config::PresubmitConfig,
    errors::{DisplayErrorChain, PublishError},
    helpers::{join_segments, short_executor_label, with_query},
    identity::{LinkTarget, SeenTestCounter, display_name},
    publish::{Publisher, ReviewServer},
    render::{
        ClassificationGroups, FullReport, GroupEntry, RenderedReport, ReportInput, RerunLinks,
        SummaryLine, render,
    },
    shard::{TestRunResult, results_dir},
};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use presubmit_metadata::ShardStatus;
use tracing::{debug, info, warn};
use url::Url;

/// Per-invocation parameters for the report pass.
#[derive(Clone, Debug)]
pub struct ResultParams {
    /// The CI workspace the shard results were collected into.
    pub workspace: Utf8PathBuf,

    /// The presubmit master build number.
    pub build_number: u64,

    /// The refs of the changes under test.
    pub refs: Vec<String>,

    /// The projects the changes belong to.
    pub projects: Vec<String>,

    /// Every test the presubmit build ran.
    pub tests: Vec<String>,

    /// The current time, used to pick the build cop.
    pub now: DateTime<Utc>,
}

impl ResultParams {
    /// Returns the directory this build's shard results were collected into.
    pub fn results_dir(&self) -> Utf8PathBuf {
        results_dir(&self.workspace, self.build_number)
    }
}

/// What a report pass did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResultOutcome {
    /// No shard produced results, so nothing was posted.
    NothingToReport,

    /// A report was posted.
    Posted(RenderedReport),
}

/// A single report pass over one presubmit build.
#[derive(Debug)]
pub struct ResultPass<'a, C: ?Sized> {
    config: &'a PresubmitConfig,
    ci: &'a C,
    params: &'a ResultParams,
}

impl<'a, C: CiServer + ?Sized> ResultPass<'a, C> {
    /// Creates a new report pass.
    pub fn new(config: &'a PresubmitConfig, ci: &'a C, params: &'a ResultParams) -> Self {
        Self { config, ci, params }
    }

    /// Renders the report for `results`. Returns `None` if there is nothing to report.
    pub fn report(&self, results: &[TestRunResult]) -> Option<RenderedReport> {
        render(&self.report_input(results))
    }

    /// Renders the report for `results` and posts it to every change under test.
    pub fn report_and_publish<R: ReviewServer>(
        &self,
        results: &[TestRunResult],
        publisher: &Publisher<R>,
    ) -> Result<ResultOutcome, PublishError> {
        let Some(report) = self.report(results) else {
            info!("no test results for build {}, not posting", self.params.build_number);
            return Ok(ResultOutcome::NothingToReport);
        };
        info!(
            "posting {:?} report to {} changes",
            report.kind,
            self.params.refs.len()
        );
        publisher.publish(&self.params.refs, &report)?;
        Ok(ResultOutcome::Posted(report))
    }

    /// Gathers everything the report for `results` needs.
    pub fn report_input(&self, results: &[TestRunResult]) -> ReportInput {
        if results.is_empty() {
            return ReportInput::NoResults;
        }

        if let Some(result) = results
            .iter()
            .find(|result| result.status == ShardStatus::MergeConflict)
        {
            let change = result
                .merge_conflict_change
                .clone()
                .unwrap_or_else(|| result.test_name.clone());
            info!("{} reported a merge conflict with {change}", result.test_name);
            return ReportInput::MergeConflict { change };
        }

        if self.master_build_failed() {
            return ReportInput::RetryingFailedBuild;
        }

        ReportInput::Full(self.full_report(results))
    }

    fn master_build_failed(&self) -> bool {
        let spec = JobSpec::job(&self.config.ci.presubmit_job);
        match self.ci.build_info(&spec, self.params.build_number) {
            Ok(build) => {
                debug!("presubmit build {} result: {:?}", build.number, build.result);
                build.result.as_deref() == Some(FAILURE_RESULT)
            }
            Err(error) => {
                warn!(
                    "failed to check presubmit build {}: {}",
                    self.params.build_number,
                    DisplayErrorChain::new(error)
                );
                false
            }
        }
    }

    fn full_report(&self, results: &[TestRunResult]) -> FullReport {
        let mut resolver = BaselineResolver::new(self.config, self.ci);

        let build_cop = self.config.build_cop.current(self.params.now);
        if build_cop.is_none() {
            debug!("no build cop on duty at {}", self.params.now);
        }

        let mut summary = Vec::with_capacity(results.len());
        let mut failed_tests = Vec::new();
        for result in results {
            if result.status == ShardStatus::Skipped {
                summary.push(SummaryLine::Skipped {
                    test_name: result.test_name.clone(),
                });
                continue;
            }

            let baseline = resolver
                .resolve(&result.test_name, &result.executor_label, result.timestamp)
                .outcome();
            let passed = result.status == ShardStatus::Passed;
            if !passed {
                failed_tests.push(result.test_name.as_str());
            }
            let label = self
                .config
                .ci
                .is_multi_configuration_job(&result.test_name)
                .then(|| short_executor_label(&result.executor_label));
            let timed_out_after = (result.status == ShardStatus::TimedOut)
                .then(|| result.timeout.unwrap_or(self.config.runner.timeout));

            summary.push(SummaryLine::Ran {
                baseline,
                passed,
                test_name: result.test_name.clone(),
                label,
                timed_out_after,
            });
        }

        let groups = if failed_tests.is_empty() {
            ClassificationGroups::default()
        } else {
            self.classification_groups(&mut resolver, results)
        };

        let has_unclassified_failure = results.iter().any(|result| {
            result.status.is_failure() && result.test_cases.is_none()
        });

        let rerun = (!failed_tests.is_empty()).then(|| RerunLinks {
            failed_only: self.rerun_link(&failed_tests.join(" ")),
            everything: self.rerun_link(&self.params.tests.join(" ")),
        });

        FullReport {
            build_cop: build_cop.map(str::to_owned),
            summary,
            groups,
            details_url: self.details_url(),
            rerun,
            has_unclassified_failure,
        }
    }

    fn classification_groups(
        &self,
        resolver: &mut BaselineResolver<'_, C>,
        results: &[TestRunResult],
    ) -> ClassificationGroups {
        let mut groups = ClassificationGroups::default();
        let mut counter = SeenTestCounter::new();

        for result in results {
            let Some(test_cases) = &result.test_cases else {
                debug!(
                    "no xUnit report for {} [{}], not classifying",
                    result.test_name, result.executor_label
                );
                continue;
            };

            let occurrences: Vec<usize> = test_cases
                .iter()
                .map(|test_case| {
                    counter.record(
                        &display_name(&test_case.class_name, &test_case.name),
                        &result.executor_label,
                    )
                })
                .collect();

            let target = LinkTarget {
                report_url: &self.config.ci.report_url,
                build_number: self.params.build_number,
                executor_label: &result.executor_label,
                test_name: &result.test_name,
            };
            let baseline = resolver
                .resolve(&result.test_name, &result.executor_label, result.timestamp)
                .failures();
            let classification = classify(test_cases, baseline);

            for (kind, failures) in [
                (FailureKind::New, &classification.new),
                (FailureKind::Known, &classification.known),
            ] {
                groups.get_mut(kind).extend(failures.iter().map(|failure| {
                    let test_case = failure.test_case;
                    GroupEntry {
                        display_name: display_name(&test_case.class_name, &test_case.name),
                        link: Some(target.test_link(
                            &test_case.class_name,
                            &test_case.name,
                            occurrences[failure.index],
                        )),
                    }
                }));
            }
            groups
                .fixed
                .extend(classification.fixed.iter().map(|test_case| GroupEntry {
                    display_name: display_name(&test_case.class_name, &test_case.name),
                    link: None,
                }));
        }

        info!(
            "classified failures: {}",
            FailureKind::ALL
                .iter()
                .map(|kind| format!("{} {kind}", groups.get(*kind).len()))
                .join(", ")
        );
        groups
    }

    /// Returns the presubmit job's URL with `path` appended.
    fn job_url(&self, path: &[&str]) -> Url {
        let job = ["job", self.config.ci.presubmit_job.as_str()];
        join_segments(&self.config.ci.url, job.into_iter().chain(path.iter().copied()))
    }

    fn details_url(&self) -> String {
        let build_number = self.params.build_number.to_string();
        self.job_url(&[build_number.as_str(), ""]).into()
    }

    fn rerun_link(&self, tests: &str) -> String {
        let refs = self.params.refs.join(":");
        let projects = self.params.projects.join(":");
        with_query(
            self.job_url(&["parambuild", ""]),
            [
                ("REFS", refs.as_str()),
                ("PROJECTS", projects.as_str()),
                ("TESTS", tests),
            ],
        )
        .into()
    }
}

/// Splits a `:`-separated list, as CI parameters pass refs and projects.
pub fn split_list(list: &str) -> Vec<String> {
    list.split(':')
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}
