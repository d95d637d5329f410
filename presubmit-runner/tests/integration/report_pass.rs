// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::Result;
use indoc::indoc;
use presubmit_metadata::shard_dir_name;
use presubmit_runner::{
    aggregate::{ResultOutcome, ResultParams, ResultPass},
    config::PresubmitConfig,
    publish::Publisher,
    render::ReportKind,
    shard::{RunParams, load_test_results, record_merge_conflict},
    xunit::TestCase,
};
use pretty_assertions::assert_eq;
use std::collections::{BTreeMap, BTreeSet};

const CHANGE_A: &str = "refs/changes/34/1234/2";
const CHANGE_B: &str = "refs/changes/56/3456/1";

const PASS_AND_FAIL: &str = indoc! {r#"
    <?xml version="1.0" encoding="UTF-8"?>
    <testsuites>
      <testsuite name="pkg" tests="2" failures="1">
        <testcase classname="pkg" name="T1" time="0.01"/>
        <testcase classname="pkg" name="T2" time="0.02">
          <failure message="failed">assert false</failure>
        </testcase>
      </testsuite>
    </testsuites>
"#};

const ONE_FAILURE: &str = indoc! {r#"
    <testsuite name="js" tests="1" failures="1">
      <testcase classname="js" name="T3"><failure>timeout</failure></testcase>
    </testsuite>
"#};

fn config(extra: &str) -> PresubmitConfig {
    PresubmitConfig::from_toml_str(&format!(
        "[ci]\nurl = \"http://ci\"\nreport-url = \"http://ci/job/presubmit-test\"\n{extra}"
    ))
    .unwrap()
}

fn params(workspace: &Utf8TempDir) -> ResultParams {
    ResultParams {
        workspace: workspace.path().to_owned(),
        build_number: BUILD_NUMBER,
        refs: vec![CHANGE_A.to_owned(), CHANGE_B.to_owned()],
        projects: vec!["release.go.core".to_owned()],
        tests: vec![
            "vanadium-go-test".to_owned(),
            "vanadium-js-test".to_owned(),
            "vanadium-www".to_owned(),
        ],
        now: ts(1_000),
    }
}

fn review() -> FakeReview {
    FakeReview {
        accepting: BTreeSet::from([CHANGE_A.to_owned()]),
        ..Default::default()
    }
}

#[test]
fn known_and_new_failures() -> Result<()> {
    let workspace = camino_tempfile::tempdir()?;
    let params = params(&workspace);
    let results_dir = params.results_dir();
    write_shard(
        &results_dir,
        "vanadium-go-test",
        "linux-slave",
        "failed",
        200,
        Some(PASS_AND_FAIL),
    );
    write_shard(
        &results_dir,
        "vanadium-js-test",
        "linux-slave",
        "failed",
        200,
        Some(ONE_FAILURE),
    );

    let config = config("");
    let ci = FakeCi {
        master_result: Some("SUCCESS"),
        ..Default::default()
    }
    .with_job(
        "vanadium-go-test",
        vec![FakeBuild::new(10, 100, vec![TestCase::failed("pkg", "T2", "")])],
    )
    .with_job("vanadium-js-test", vec![FakeBuild::new(5, 100, vec![])]);
    let review = review();

    let results = load_test_results(&results_dir);
    let outcome = ResultPass::new(&config, &ci, &params)
        .report_and_publish(&results, &Publisher::new(&review, "Verified"))?;

    let ResultOutcome::Posted(report) = outcome else {
        panic!("expected a report to be posted");
    };
    assert_eq!(report.kind, ReportKind::Full);
    assert!(!report.success, "a new failure fails the vote");
    assert_eq!(
        report.message,
        indoc! {"
            Test results:
            ✖ ➔ ✖: vanadium-go-test
            ✔ ➔ ✖: vanadium-js-test

            NEW FAILURE:
            - js::T3
            http://ci/job/presubmit-test/45/L=linux-slave,TEST=vanadium-js-test/testReport/(root)/js/T3


            KNOWN FAILURE:
            - pkg::T2
            http://ci/job/presubmit-test/45/L=linux-slave,TEST=vanadium-go-test/testReport/(root)/pkg/T2


            More details at:
            http://ci/job/presubmit-test/45/

            To re-run FAILED TESTS ONLY without uploading a new patch set:
            (click Proceed button on the next screen)
            http://ci/job/presubmit-test/parambuild/?REFS=refs%2Fchanges%2F34%2F1234%2F2%3Arefs%2Fchanges%2F56%2F3456%2F1&PROJECTS=release.go.core&TESTS=vanadium-go-test+vanadium-js-test

            To re-run presubmit tests without uploading a new patch set:
            (click Proceed button on the next screen)
            http://ci/job/presubmit-test/parambuild/?REFS=refs%2Fchanges%2F34%2F1234%2F2%3Arefs%2Fchanges%2F56%2F3456%2F1&PROJECTS=release.go.core&TESTS=vanadium-go-test+vanadium-js-test+vanadium-www
        "}
    );

    let posts = review.posts.borrow();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].change_ref, CHANGE_A);
    assert_eq!(posts[0].labels, BTreeMap::from([("Verified".to_owned(), -1)]));
    assert_eq!(posts[1].change_ref, CHANGE_B);
    assert!(posts[1].labels.is_empty(), "change B doesn't accept the label");
    assert_eq!(posts[1].message, report.message);
    Ok(())
}

#[test]
fn baseline_is_last_build_before_submission() -> Result<()> {
    let workspace = camino_tempfile::tempdir()?;
    let params = params(&workspace);
    let results_dir = params.results_dir();
    write_shard(
        &results_dir,
        "vanadium-go-test",
        "linux-slave",
        "failed",
        200,
        Some(PASS_AND_FAIL),
    );

    let config = config("multi-configuration-jobs = [\"vanadium-go-test\"]");
    let ci = FakeCi::default().with_job(
        "vanadium-go-test/L=linux-slave",
        vec![
            FakeBuild::new(10, 100, vec![TestCase::failed("pkg", "T2", "")]),
            FakeBuild::new(11, 250, vec![TestCase::failed("pkg", "T8", "")]),
            FakeBuild::new(12, 300, vec![TestCase::failed("pkg", "T9", "")]),
        ],
    );

    let results = load_test_results(&results_dir);
    let report = ResultPass::new(&config, &ci, &params)
        .report(&results)
        .expect("a report is rendered");

    assert!(report.success, "the only failure is known");
    assert!(report.message.contains("✖ ➔ ✖: vanadium-go-test [linux]\n"));
    assert!(report.message.contains("\nKNOWN FAILURE:\n- pkg::T2\n"));
    assert!(!report.message.contains("FIXED"), "later builds are ignored");
    assert_eq!(
        *ci.report_lookups.borrow(),
        [("vanadium-go-test/L=linux-slave".to_owned(), 10)]
    );
    Ok(())
}

#[test]
fn merge_conflict_reports_only_the_conflict() -> Result<()> {
    let workspace = camino_tempfile::tempdir()?;
    let params = params(&workspace);
    let results_dir = params.results_dir();
    write_shard(
        &results_dir,
        "vanadium-js-test",
        "linux-slave",
        "failed",
        200,
        Some(ONE_FAILURE),
    );
    record_merge_conflict(
        &RunParams {
            test_name: "vanadium-go-test".to_owned(),
            executor_label: "linux-slave".to_owned(),
            timestamp: ts(200),
            output_dir: results_dir.join(shard_dir_name("vanadium-go-test", "linux-slave")),
            scripts: Vec::new(),
        },
        "https://review/c/1234",
    )?;

    let config = config("");
    let ci = FakeCi::default();
    let review = review();
    let results = load_test_results(&results_dir);
    assert_eq!(results.len(), 2);

    let outcome = ResultPass::new(&config, &ci, &params)
        .report_and_publish(&results, &Publisher::new(&review, "Verified"))?;
    let ResultOutcome::Posted(report) = outcome else {
        panic!("expected a report to be posted");
    };
    assert_eq!(report.kind, ReportKind::MergeConflict);
    assert_eq!(
        report.message,
        "Possible merge conflict detected in https://review/c/1234.\n\
         Presubmit tests will be executed after a new patchset that resolves the conflicts is \
         submitted."
    );
    assert!(ci.report_lookups.borrow().is_empty());
    assert_eq!(
        review.posts.borrow()[0].labels,
        BTreeMap::from([("Verified".to_owned(), -1)])
    );
    Ok(())
}

#[test]
fn no_results_posts_nothing() -> Result<()> {
    let workspace = camino_tempfile::tempdir()?;
    let params = params(&workspace);
    let config = config("");
    let ci = FakeCi::default();
    let review = review();

    let results = load_test_results(&params.results_dir());
    let outcome = ResultPass::new(&config, &ci, &params)
        .report_and_publish(&results, &Publisher::new(&review, "Verified"))?;

    assert_eq!(outcome, ResultOutcome::NothingToReport);
    assert_eq!(*review.queries.borrow(), 0);
    assert!(review.posts.borrow().is_empty());
    Ok(())
}

#[test]
fn failed_master_build_is_retried() -> Result<()> {
    let workspace = camino_tempfile::tempdir()?;
    let params = params(&workspace);
    write_shard(
        &params.results_dir(),
        "vanadium-go-test",
        "linux-slave",
        "passed",
        200,
        None,
    );
    let config = config("");
    let ci = FakeCi {
        master_result: Some("FAILURE"),
        ..Default::default()
    };

    let report = ResultPass::new(&config, &ci, &params)
        .report(&load_test_results(&params.results_dir()))
        .expect("a report is rendered");
    assert_eq!(report.kind, ReportKind::RetryingFailedBuild);
    assert_eq!(report.message, "SOME TESTS FAILED TO RUN.\nRetrying...\n");
    Ok(())
}

#[test]
fn malformed_report_fails_without_groups() -> Result<()> {
    let workspace = camino_tempfile::tempdir()?;
    let params = params(&workspace);
    let results_dir = params.results_dir();
    write_shard(
        &results_dir,
        "vanadium-go-test",
        "linux-slave",
        "failed",
        200,
        Some("<testsuites><testsuite name=\"pkg\"><testcase"),
    );
    write_shard(
        &results_dir,
        "vanadium-js-test",
        "linux-slave",
        "failed",
        200,
        Some(ONE_FAILURE),
    );

    let config = config("");
    let ci = FakeCi::default()
        .with_job(
            "vanadium-js-test",
            vec![FakeBuild::new(5, 100, vec![TestCase::failed("js", "T3", "")])],
        );
    let results = load_test_results(&results_dir);
    assert_eq!(results[0].test_cases, None);

    let report = ResultPass::new(&config, &ci, &params)
        .report(&results)
        .expect("a report is rendered");
    assert!(
        !report.success,
        "a failed shard that couldn't be classified fails the vote"
    );
    assert!(report.message.contains("? ➔ ✖: vanadium-go-test\n"));
    assert!(report.message.contains("\nKNOWN FAILURE:\n- js::T3\n"));
    assert!(!report.message.contains("NEW FAILURE"));
    Ok(())
}
