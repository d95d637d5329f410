// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::ts;
use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::Result;
use presubmit_metadata::{ShardStatus, shard_dir_name};
use presubmit_runner::{
    config::PresubmitConfig,
    runner::ScriptJob,
    shard::{RunParams, load_test_results, results_dir, run_shard},
    signal::SignalHandlerKind,
    xunit::TestOutcome,
};
use std::{os::unix::fs::PermissionsExt, time::Duration};

fn write_script(dir: &Utf8Path, name: &str, body: &str) -> Result<Utf8PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

fn run_params(workspace: &Utf8Path, scripts: Vec<ScriptJob>) -> RunParams {
    RunParams {
        test_name: "vanadium-go-test".to_owned(),
        executor_label: "linux-slave".to_owned(),
        timestamp: ts(200),
        output_dir: results_dir(workspace, 45)
            .join(shard_dir_name("vanadium-go-test", "linux-slave")),
        scripts,
    }
}

#[test]
fn failing_script_fails_the_shard() -> Result<()> {
    let workspace = camino_tempfile::tempdir()?;
    let scripts = vec![
        ScriptJob::from_path(write_script(workspace.path(), "build.sh", "exit 0")?),
        ScriptJob::from_path(write_script(
            workspace.path(),
            "test.sh",
            "echo 'assertion failed'\nexit 3",
        )?),
    ];
    let config = PresubmitConfig::from_toml_str("[runner]\ntest-threads = 2")?;

    let record = run_shard(
        &config,
        &run_params(workspace.path(), scripts),
        SignalHandlerKind::Noop,
    )?;
    assert_eq!(record.status, ShardStatus::Failed);
    assert_eq!(record.timeout, None);

    let results = load_test_results(&results_dir(workspace.path(), 45));
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.status, ShardStatus::Failed);
    assert_eq!(result.timestamp, ts(200));

    let cases = result.test_cases.as_ref().expect("report was written");
    let outcomes: Vec<_> = cases
        .iter()
        .map(|case| (case.class_name.as_str(), case.name.as_str(), case.is_failure()))
        .collect();
    assert_eq!(
        outcomes,
        [
            ("vanadium-go-test", "build.sh", false),
            ("vanadium-go-test", "test.sh", true),
        ]
    );
    let TestOutcome::Failed { detail } = &cases[1].outcome else {
        panic!("expected test.sh to fail, got {:?}", cases[1].outcome);
    };
    assert!(
        detail.contains("assertion failed"),
        "failure detail carries the script's output: {detail}"
    );
    Ok(())
}

#[test]
fn slow_script_times_out() -> Result<()> {
    let workspace = camino_tempfile::tempdir()?;
    let scripts = vec![ScriptJob::from_path(write_script(
        workspace.path(),
        "slow.sh",
        "exec sleep 30",
    )?)];
    let config = PresubmitConfig::from_toml_str("[runner]\ntimeout = \"200ms\"")?;

    let record = run_shard(
        &config,
        &run_params(workspace.path(), scripts),
        SignalHandlerKind::Noop,
    )?;
    assert_eq!(record.status, ShardStatus::TimedOut);
    assert_eq!(record.timeout, Some(Duration::from_millis(200)));

    let results = load_test_results(&results_dir(workspace.path(), 45));
    assert_eq!(results[0].status, ShardStatus::TimedOut);
    assert_eq!(results[0].timeout, Some(Duration::from_millis(200)));
    Ok(())
}

#[test]
fn passing_scripts_pass_the_shard() -> Result<()> {
    let workspace = camino_tempfile::tempdir()?;
    let scripts = (0..4)
        .map(|i| {
            write_script(workspace.path(), &format!("step{i}.sh"), "true").map(ScriptJob::from_path)
        })
        .collect::<Result<Vec<_>>>()?;
    let config = PresubmitConfig::from_toml_str("[runner]\ntest-threads = 1")?;

    let record = run_shard(
        &config,
        &run_params(workspace.path(), scripts),
        SignalHandlerKind::Noop,
    )?;
    assert_eq!(record.status, ShardStatus::Passed);

    let results = load_test_results(&results_dir(workspace.path(), 45));
    let cases = results[0].test_cases.as_ref().expect("report was written");
    assert_eq!(cases.len(), 4);
    assert!(cases.iter().all(|case| !case.is_failure()));
    Ok(())
}
