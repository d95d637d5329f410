// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shard results: loading what shards wrote, and writing a shard's own outputs.
//!
//! The presubmit master job collects every shard's files into
//!
//! ```text
//! <workspace>/test_results/<build>/L=<label>,TEST=<test>/status_<test>.json
//! <workspace>/test_results/<build>/L=<label>,TEST=<test>/tests_<test>.xml
//! ```
//!
//! where `<test>` in file names has `-` replaced by `_`.

use crate::{
    config::PresubmitConfig,
    errors::{DisplayErrorChain, ShardRunError, StatusFileError, WriteReportError},
    runner::{ScriptJob, ScriptOutcome, ScriptResult, ScriptRunner},
    signal::SignalHandlerKind,
    xunit::{self, TestCase},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use presubmit_metadata::{ShardStatus, ShardStatusRecord, report_file_name, status_file_name};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// The results of one shard, as loaded by the report pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestRunResult {
    /// The shard's overall status.
    pub status: ShardStatus,

    /// The name of the CI test the shard ran.
    pub test_name: String,

    /// The executor label the shard ran on.
    pub executor_label: String,

    /// When the change under test was submitted.
    pub timestamp: DateTime<Utc>,

    /// The timeout that was hit, for timed-out shards.
    pub timeout: Option<Duration>,

    /// The change that could not be merged, for merge conflicts.
    pub merge_conflict_change: Option<String>,

    /// The test cases of the shard's xUnit report, or `None` if the report was missing or
    /// malformed.
    pub test_cases: Option<Vec<TestCase>>,
}

impl TestRunResult {
    /// Creates a result from a status record and the test cases of its report.
    pub fn new(record: ShardStatusRecord, test_cases: Option<Vec<TestCase>>) -> Self {
        Self {
            status: record.status,
            test_name: record.test_name,
            executor_label: record.executor_label,
            timestamp: record.timestamp,
            timeout: record.timeout,
            merge_conflict_change: record.merge_conflict_change,
            test_cases,
        }
    }
}

/// Returns the directory the presubmit master job collects a build's shard files into.
pub fn results_dir(workspace: &Utf8Path, build_number: u64) -> Utf8PathBuf {
    workspace
        .join("test_results")
        .join(build_number.to_string())
}

/// Loads every shard result under `dir`, sorted by status file path.
///
/// Status files that can't be read or parsed are logged and skipped, as are reports. A missing
/// directory yields no results.
pub fn load_test_results(dir: &Utf8Path) -> Vec<TestRunResult> {
    if !dir.exists() {
        info!("results directory `{dir}` does not exist");
        return Vec::new();
    }

    let mut status_files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                let error = StatusFileError::Walk {
                    dir: dir.to_owned(),
                    error,
                };
                warn!("{}", DisplayErrorChain::new(error));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(path) = Utf8Path::from_path(entry.path()) else {
            let error = StatusFileError::NonUtf8Path {
                dir: dir.to_owned(),
                path: entry.path().to_owned(),
            };
            warn!("{error}");
            continue;
        };
        if let Some(file_name) = path.file_name() {
            if file_name.starts_with("status_") && file_name.ends_with(".json") {
                status_files.push(path.to_owned());
            }
        }
    }
    status_files.sort();

    status_files
        .iter()
        .filter_map(|path| match read_status_file(path) {
            Ok(record) => {
                let test_cases = read_report(path, &record.test_name);
                Some(TestRunResult::new(record, test_cases))
            }
            Err(error) => {
                warn!("skipping shard: {}", DisplayErrorChain::new(error));
                None
            }
        })
        .collect()
}

/// Reads and parses a single status file.
pub fn read_status_file(path: &Utf8Path) -> Result<ShardStatusRecord, StatusFileError> {
    let contents = std::fs::read_to_string(path).map_err(|error| StatusFileError::Read {
        path: path.to_owned(),
        error,
    })?;
    ShardStatusRecord::from_json(&contents).map_err(|error| StatusFileError::Parse {
        path: path.to_owned(),
        error,
    })
}

// The report is expected next to its status file.
fn read_report(status_file: &Utf8Path, test_name: &str) -> Option<Vec<TestCase>> {
    let report_path = status_file
        .parent()
        .unwrap_or(Utf8Path::new(""))
        .join(report_file_name(test_name));
    let contents = match std::fs::read(&report_path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            debug!("no xUnit report for {test_name} at `{report_path}`");
            return None;
        }
        Err(error) => {
            warn!("failed to read xUnit report `{report_path}`: {error}");
            return None;
        }
    };
    match xunit::parse_report(&contents) {
        Ok(test_cases) => Some(test_cases),
        Err(error) => {
            warn!(
                "ignoring xUnit report `{report_path}`: {}",
                DisplayErrorChain::new(error)
            );
            None
        }
    }
}

/// Writes a shard's status record and xUnit report into `dir`.
pub fn write_shard_outputs(
    dir: &Utf8Path,
    record: &ShardStatusRecord,
    report: &quick_junit::Report,
) -> Result<(), WriteReportError> {
    std::fs::create_dir_all(dir).map_err(|error| WriteReportError::CreateDir {
        dir: dir.to_owned(),
        error,
    })?;

    let status_json = record
        .to_json()
        .map_err(|error| WriteReportError::SerializeStatus {
            test_name: record.test_name.clone(),
            error,
        })?;
    let report_xml = report
        .to_string()
        .map_err(|error| WriteReportError::SerializeReport {
            test_name: record.test_name.clone(),
            error,
        })?;

    for (file_name, contents) in [
        (status_file_name(&record.test_name), status_json),
        (report_file_name(&record.test_name), report_xml),
    ] {
        let path = dir.join(file_name);
        std::fs::write(&path, contents)
            .map_err(|error| WriteReportError::Write { path, error })?;
    }
    Ok(())
}

/// Per-invocation parameters for running a shard.
#[derive(Clone, Debug)]
pub struct RunParams {
    /// The name of the CI test this shard runs.
    pub test_name: String,

    /// The executor label this shard runs on.
    pub executor_label: String,

    /// When the change under test was submitted.
    pub timestamp: DateTime<Utc>,

    /// The directory to write the status record and xUnit report into.
    pub output_dir: Utf8PathBuf,

    /// The scripts to run.
    pub scripts: Vec<ScriptJob>,
}

/// Runs a shard's scripts and writes its status record and xUnit report.
///
/// Returns the status record that was written. If the run is interrupted, nothing is written.
pub fn run_shard(
    config: &PresubmitConfig,
    params: &RunParams,
    signal_handler: SignalHandlerKind,
) -> Result<ShardStatusRecord, ShardRunError> {
    let runner = ScriptRunner::new(
        config.runner.test_threads.compute(),
        config.runner.timeout,
        signal_handler,
    );
    let results = runner.run(params.scripts.clone())?;

    let record = shard_status(params, &results);
    let report = script_report(&params.test_name, &results);
    write_shard_outputs(&params.output_dir, &record, &report)?;
    info!(
        "{} {}: wrote results to `{}`",
        params.test_name, record.status, params.output_dir
    );
    Ok(record)
}

/// Writes the status record and report for a shard whose change could not be merged.
pub fn record_merge_conflict(
    params: &RunParams,
    change: &str,
) -> Result<ShardStatusRecord, WriteReportError> {
    let record = ShardStatusRecord {
        status: ShardStatus::MergeConflict,
        test_name: params.test_name.clone(),
        executor_label: params.executor_label.clone(),
        timestamp: params.timestamp,
        timeout: None,
        merge_conflict_change: Some(change.to_owned()),
    };
    let report = xunit::merge_conflict_report(&params.test_name, change);
    write_shard_outputs(&params.output_dir, &record, &report)?;
    Ok(record)
}

fn shard_status(params: &RunParams, results: &[ScriptResult]) -> ShardStatusRecord {
    let timeout = results.iter().find_map(|result| match result.outcome {
        ScriptOutcome::TimedOut { timeout } => Some(timeout),
        _ => None,
    });
    let status = if timeout.is_some() {
        ShardStatus::TimedOut
    } else if results.iter().all(|result| result.outcome.is_success()) {
        ShardStatus::Passed
    } else {
        ShardStatus::Failed
    };

    ShardStatusRecord {
        status,
        test_name: params.test_name.clone(),
        executor_label: params.executor_label.clone(),
        timestamp: params.timestamp,
        timeout,
        merge_conflict_change: None,
    }
}

/// Builds the xUnit report for a shard's script results: one test case per script.
pub fn script_report(test_name: &str, results: &[ScriptResult]) -> quick_junit::Report {
    use quick_junit::{NonSuccessKind, TestCaseStatus};

    let mut suite = quick_junit::TestSuite::new(test_name);
    for result in results {
        let status = match &result.outcome {
            ScriptOutcome::Passed => TestCaseStatus::success(),
            ScriptOutcome::Failed { exit_code, output } => {
                let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                let message = match exit_code {
                    Some(code) => format!("exited with code {code}"),
                    None => "terminated by signal".to_owned(),
                };
                status.set_message(message).set_description(output.as_str());
                status
            }
            ScriptOutcome::TimedOut { timeout } => {
                let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                status.set_message(format!(
                    "timed out after {}",
                    humantime::format_duration(*timeout)
                ));
                status
            }
            ScriptOutcome::ExecFailed { error } => {
                let mut status = TestCaseStatus::non_success(NonSuccessKind::Error);
                status
                    .set_message("failed to execute")
                    .set_description(error.as_str());
                status
            }
        };
        let mut test_case = quick_junit::TestCase::new(result.name.as_str(), status);
        test_case.set_classname(test_name).set_time(result.duration);
        suite.add_test_case(test_case);
    }

    let mut report = quick_junit::Report::new(test_name);
    report.add_test_suite(suite);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use chrono::TimeZone;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use presubmit_metadata::shard_dir_name;

    fn write_shard(
        results_dir: &Utf8Path,
        test_name: &str,
        label: &str,
        status: &str,
        report: Option<&str>,
    ) {
        let dir = results_dir.join(shard_dir_name(test_name, label));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(status_file_name(test_name)),
            format!(
                r#"{{"status": "{status}", "test-name": "{test_name}", "executor-label": "{label}", "timestamp": 1000}}"#
            ),
        )
        .unwrap();
        if let Some(report) = report {
            std::fs::write(dir.join(report_file_name(test_name)), report).unwrap();
        }
    }

    fn params(output_dir: Utf8PathBuf) -> RunParams {
        RunParams {
            test_name: "vanadium-go-test".to_owned(),
            executor_label: "linux-slave".to_owned(),
            timestamp: Utc.timestamp_millis_opt(1_000).unwrap(),
            output_dir,
            scripts: Vec::new(),
        }
    }

    #[test]
    fn load_sorted_results() {
        let workspace = tempdir().unwrap();
        let dir = results_dir(workspace.path(), 45);
        write_shard(
            &dir,
            "vanadium-go-test",
            "mac-slave",
            "failed",
            Some(indoc! {r#"
                <testsuites><testsuite name="s">
                  <testcase classname="pkg" name="T1"><failure>boom</failure></testcase>
                </testsuite></testsuites>
            "#}),
        );
        write_shard(&dir, "vanadium-go-build", "linux-slave", "passed", None);
        write_shard(
            &dir,
            "vanadium-go-test",
            "linux-slave",
            "failed",
            Some("<testsuites><testsuite"),
        );
        std::fs::write(dir.join("status_garbage.json"), "not json").unwrap();
        std::fs::write(dir.join("unrelated.txt"), "ignored").unwrap();

        let results = load_test_results(&dir);
        let shards: Vec<_> = results
            .iter()
            .map(|r| (r.test_name.as_str(), r.executor_label.as_str()))
            .collect();
        assert_eq!(
            shards,
            [
                ("vanadium-go-build", "linux-slave"),
                ("vanadium-go-test", "linux-slave"),
                ("vanadium-go-test", "mac-slave"),
            ]
        );
        assert_eq!(results[0].test_cases, None, "missing report");
        assert_eq!(results[1].test_cases, None, "malformed report");
        assert_eq!(
            results[2].test_cases,
            Some(vec![TestCase::failed("pkg", "T1", "boom")])
        );
        assert_eq!(results[2].timestamp, Utc.timestamp_millis_opt(1_000).unwrap());
    }

    #[test]
    fn missing_results_dir_is_empty() {
        let workspace = tempdir().unwrap();
        assert!(load_test_results(&results_dir(workspace.path(), 1)).is_empty());
    }

    #[test]
    fn shard_status_from_results() {
        let params = params(Utf8PathBuf::from("out"));
        let result = |name: &str, outcome| ScriptResult {
            name: name.to_owned(),
            outcome,
            duration: Duration::from_secs(1),
        };

        let passed = shard_status(&params, &[result("a", ScriptOutcome::Passed)]);
        assert_eq!(passed.status, ShardStatus::Passed);
        assert_eq!(passed.timeout, None);

        let failed = shard_status(
            &params,
            &[
                result("a", ScriptOutcome::Passed),
                result(
                    "b",
                    ScriptOutcome::Failed {
                        exit_code: Some(1),
                        output: String::new(),
                    },
                ),
            ],
        );
        assert_eq!(failed.status, ShardStatus::Failed);

        let timed_out = shard_status(
            &params,
            &[
                result(
                    "a",
                    ScriptOutcome::ExecFailed {
                        error: "not found".to_owned(),
                    },
                ),
                result(
                    "b",
                    ScriptOutcome::TimedOut {
                        timeout: Duration::from_secs(600),
                    },
                ),
            ],
        );
        assert_eq!(timed_out.status, ShardStatus::TimedOut);
        assert_eq!(timed_out.timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn written_outputs_load_back() {
        let workspace = tempdir().unwrap();
        let dir = results_dir(workspace.path(), 7);
        let output_dir = dir.join(shard_dir_name("vanadium-go-test", "linux-slave"));

        let results = [
            ScriptResult {
                name: "unit.sh".to_owned(),
                outcome: ScriptOutcome::Passed,
                duration: Duration::from_millis(10),
            },
            ScriptResult {
                name: "integration.sh".to_owned(),
                outcome: ScriptOutcome::Failed {
                    exit_code: Some(2),
                    output: "FAIL: TestRoundTrip".to_owned(),
                },
                duration: Duration::from_millis(20),
            },
        ];
        let params = params(output_dir);
        let record = shard_status(&params, &results);
        write_shard_outputs(
            &params.output_dir,
            &record,
            &script_report(&params.test_name, &results),
        )
        .unwrap();

        let loaded = load_test_results(&dir);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, ShardStatus::Failed);
        assert_eq!(
            loaded[0].test_cases,
            Some(vec![
                TestCase::passed("vanadium-go-test", "unit.sh"),
                TestCase::failed("vanadium-go-test", "integration.sh", "FAIL: TestRoundTrip"),
            ])
        );
    }

    #[test]
    fn merge_conflict_outputs() {
        let workspace = tempdir().unwrap();
        let params = params(workspace.path().join("shard"));
        let record = record_merge_conflict(&params, "http://go/vcl/1234").unwrap();
        assert_eq!(record.status, ShardStatus::MergeConflict);

        let loaded = load_test_results(workspace.path());
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded[0].merge_conflict_change.as_deref(),
            Some("http://go/vcl/1234")
        );
    }
}
