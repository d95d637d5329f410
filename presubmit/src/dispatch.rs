// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use owo_colors::OwoColorize;
use presubmit_metadata::{ShardStatus, shard_dir_name};
use presubmit_runner::{
    aggregate::{ResultOutcome, ResultParams, ResultPass, split_list},
    config::{PresubmitConfig, TestThreads},
    publish::Publisher,
    remote::{GerritClient, GerritCredentials, JenkinsClient},
    runner::ScriptJob,
    shard::{RunParams, load_test_results, record_merge_conflict, results_dir, run_shard},
    signal::SignalHandlerKind,
};
use std::{io::Write, time::Duration};
use tracing::{info, warn};

/// Runs presubmit test shards and reports their results to code review.
///
/// Each shard of a presubmit build runs `presubmit run` (or `presubmit record-merge-conflict` if
/// the changes under test could not be merged). Once every shard has finished, the presubmit
/// master job runs `presubmit result` to classify failures against postsubmit and post the report
/// to every change under test.
#[derive(Debug, clap::Parser)]
#[command(
    version,
    bin_name = "presubmit",
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct PresubmitApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    #[clap(subcommand)]
    command: Command,
}

impl PresubmitApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let config = self.config_opts.make_config()?;
        match self.command {
            Command::Result(opts) => opts.exec(&config, output),
            Command::Run(opts) => opts.exec(config, output),
            Command::RecordMergeConflict(opts) => opts.exec(),
        }
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Config options")]
struct ConfigOpts {
    /// Config file [default: <root>/.config/presubmit.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// The repository root to look for .config/presubmit.toml in
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    root: Utf8PathBuf,
}

impl ConfigOpts {
    fn make_config(&self) -> Result<PresubmitConfig> {
        let config = PresubmitConfig::from_sources(&self.root, self.config_file.as_deref())?;
        Ok(config)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify the results of a presubmit build and post the report.
    ///
    /// Shard results are read from <WORKSPACE>/test_results/<BUILD_NUMBER>. Each failure is
    /// compared against the postsubmit build that was current when the changes were submitted,
    /// and reported as new, known or fixed.
    Result(Box<ResultOpts>),

    /// Run a shard's test scripts and write its status record and xUnit report.
    ///
    /// Exits with a non-zero code if any script failed or timed out.
    Run(Box<RunOpts>),

    /// Record that a shard's changes could not be merged.
    RecordMergeConflict(Box<RecordMergeConflictOpts>),
}

#[derive(Debug, Args)]
struct ResultOpts {
    /// The CI workspace shard results were collected into
    #[arg(long, env = "WORKSPACE", value_name = "DIR")]
    workspace: Utf8PathBuf,

    /// The presubmit master build number
    #[arg(long, env = "BUILD_NUMBER", value_name = "N")]
    build_number: u64,

    /// Colon-separated refs of the changes under test
    #[arg(long, env = "REFS", value_name = "REFS")]
    refs: String,

    /// Colon-separated projects the changes belong to
    #[arg(long, env = "PROJECTS", value_name = "PROJECTS", default_value = "")]
    projects: String,

    /// Colon-separated tests the presubmit build ran
    #[arg(long, env = "TESTS", value_name = "TESTS", default_value = "")]
    tests: String,

    /// Print the report without posting it
    #[arg(long)]
    dry_run: bool,

    #[clap(flatten)]
    credentials: CredentialOpts,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Credentials")]
struct CredentialOpts {
    /// Username for the review server
    #[arg(
        long,
        env = "PRESUBMIT_REVIEW_USER",
        value_name = "USER",
        requires = "review_password"
    )]
    review_user: Option<String>,

    /// HTTP password for the review server
    #[arg(
        long,
        env = "PRESUBMIT_REVIEW_PASSWORD",
        value_name = "PASSWORD",
        hide_env_values = true
    )]
    review_password: Option<String>,

    /// API token for the CI server
    #[arg(
        long,
        env = "PRESUBMIT_CI_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true
    )]
    ci_token: Option<String>,
}

impl CredentialOpts {
    fn review_credentials(&self) -> Option<GerritCredentials> {
        match (&self.review_user, &self.review_password) {
            (Some(username), Some(password)) => Some(GerritCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

impl ResultOpts {
    fn result_params(&self, now: DateTime<Utc>) -> ResultParams {
        ResultParams {
            workspace: self.workspace.clone(),
            build_number: self.build_number,
            refs: split_list(&self.refs),
            projects: split_list(&self.projects),
            tests: split_list(&self.tests),
            now,
        }
    }

    fn exec(self, config: &PresubmitConfig, output: OutputContext) -> Result<i32> {
        let params = self.result_params(Utc::now());
        let results_dir = params.results_dir();
        let results = load_test_results(&results_dir);
        info!(
            "loaded {} shard results from `{results_dir}`",
            results.len()
        );

        let ci = JenkinsClient::new(&config.ci.url, self.credentials.ci_token.clone());
        let pass = ResultPass::new(config, &ci, &params);

        let report = if self.dry_run {
            pass.report(&results)
        } else {
            if params.refs.is_empty() {
                warn!("no refs to post to");
            }
            let review = GerritClient::new(
                &config.review.url,
                config.review.query.clone(),
                self.credentials.review_credentials(),
            );
            let publisher = Publisher::new(&review, config.review.vote_label.clone());
            match pass.report_and_publish(&results, &publisher)? {
                ResultOutcome::NothingToReport => None,
                ResultOutcome::Posted(report) => Some(report),
            }
        };

        let Some(report) = report else {
            info!("no test results to report");
            return Ok(0);
        };

        let styles = output.stderr_styles();
        let verdict = if report.success {
            "success".style(styles.success).to_string()
        } else {
            "failure".style(styles.failure).to_string()
        };
        info!("{:?} report ({verdict})", report.kind);

        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(report.message.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(|err| ExpectedError::StdoutWriteError { err })?;
        Ok(0)
    }
}

/// Where a shard is and where its outputs go.
#[derive(Debug, Args)]
#[command(next_help_heading = "Shard options")]
struct ShardOpts {
    /// The CI test this shard runs
    #[arg(long, env = "TEST", value_name = "NAME")]
    test_name: String,

    /// The executor label this shard runs on
    #[arg(long, env = "L", value_name = "LABEL")]
    executor_label: String,

    /// When the changes under test were submitted (RFC 3339) [default: now]
    #[arg(long, env = "PRESUBMIT_SUBMITTED_AT", value_name = "TIME")]
    submitted_at: Option<DateTime<Utc>>,

    /// The CI workspace to write results under
    #[arg(long, env = "WORKSPACE", value_name = "DIR")]
    workspace: Utf8PathBuf,

    /// The presubmit build number
    #[arg(long, env = "BUILD_NUMBER", value_name = "N")]
    build_number: u64,

    /// Directory to write results into [default:
    /// <WORKSPACE>/test_results/<BUILD_NUMBER>/L=<LABEL>,TEST=<NAME>]
    #[arg(long, value_name = "DIR")]
    output_dir: Option<Utf8PathBuf>,
}

impl ShardOpts {
    fn output_dir(&self) -> Utf8PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            default_output_dir(
                &self.workspace,
                self.build_number,
                &self.test_name,
                &self.executor_label,
            )
        })
    }

    fn run_params(&self, scripts: Vec<ScriptJob>) -> RunParams {
        RunParams {
            test_name: self.test_name.clone(),
            executor_label: self.executor_label.clone(),
            timestamp: self.submitted_at.unwrap_or_else(Utc::now),
            output_dir: self.output_dir(),
            scripts,
        }
    }
}

fn default_output_dir(
    workspace: &Utf8Path,
    build_number: u64,
    test_name: &str,
    executor_label: &str,
) -> Utf8PathBuf {
    results_dir(workspace, build_number).join(shard_dir_name(test_name, executor_label))
}

#[derive(Debug, Args)]
struct RunOpts {
    #[clap(flatten)]
    shard: ShardOpts,

    /// Number of scripts to run simultaneously [possible values: integer or "num-cpus"]
    /// [default: from config]
    #[arg(
        long,
        short = 'j',
        value_name = "N",
        env = "PRESUBMIT_TEST_THREADS",
        allow_negative_numbers = true
    )]
    test_threads: Option<TestThreads>,

    /// Stop scripts that run for longer than this [default: from config]
    #[arg(long, value_name = "DURATION", value_parser = non_zero_duration)]
    timeout: Option<Duration>,

    /// The test scripts to run
    #[arg(required = true, value_name = "SCRIPT")]
    scripts: Vec<Utf8PathBuf>,
}

impl RunOpts {
    fn exec(self, mut config: PresubmitConfig, output: OutputContext) -> Result<i32> {
        if let Some(test_threads) = self.test_threads {
            config.runner.test_threads = test_threads;
        }
        if let Some(timeout) = self.timeout {
            config.runner.timeout = timeout;
        }

        let scripts = self
            .scripts
            .into_iter()
            .map(ScriptJob::from_path)
            .collect();
        let params = self.shard.run_params(scripts);
        let record = run_shard(&config, &params, SignalHandlerKind::Standard)?;

        if record.status != ShardStatus::Passed {
            return Err(ExpectedError::shard_failed(
                record.test_name,
                record.status,
                params.output_dir,
            ));
        }
        if output.verbose {
            info!(
                "{} {}",
                record.test_name,
                record.status.style(output.stderr_styles().success)
            );
        }
        Ok(0)
    }
}

fn non_zero_duration(input: &str) -> std::result::Result<Duration, String> {
    let duration = humantime::parse_duration(input).map_err(|error| error.to_string())?;
    if duration.is_zero() {
        Err("duration must be non-zero".to_owned())
    } else {
        Ok(duration)
    }
}

#[derive(Debug, Args)]
struct RecordMergeConflictOpts {
    #[clap(flatten)]
    shard: ShardOpts,

    /// The change that could not be merged, as shown in the report
    #[arg(long, value_name = "CHANGE")]
    change: String,
}

impl RecordMergeConflictOpts {
    fn exec(self) -> Result<i32> {
        let params = self.shard.run_params(Vec::new());
        record_merge_conflict(&params, &self.change)?;
        warn!(
            "{}: merge conflict in {}, results written to `{}`",
            params.test_name, self.change, params.output_dir
        );
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, Parser, error::ErrorKind};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    const SHARD_ARGS: &str =
        "--test-name vanadium-go-test --executor-label linux-slave --workspace /ws --build-number 45";

    fn parse(args: &str) -> std::result::Result<PresubmitApp, clap::Error> {
        PresubmitApp::try_parse_from(
            std::iter::once("presubmit").chain(args.split_whitespace()),
        )
    }

    #[test]
    fn verify_app() {
        PresubmitApp::command().debug_assert();
    }

    #[test_case("result --workspace /ws --build-number 45 --refs refs/changes/34/1234/2 --dry-run"; "dry run")]
    #[test_case("result --workspace /ws --build-number 45 --refs a:b --review-user u --review-password p"; "credentials")]
    #[test_case("--color never result --workspace /ws --build-number 45 --refs a"; "global before subcommand")]
    #[test_case("run --test-name t --executor-label l --workspace /ws --build-number 1 -j 4 --timeout 5m a.sh b.sh"; "run")]
    #[test_case("run --test-name t --executor-label l --workspace /ws --build-number 1 -j -2 a.sh"; "negative threads")]
    #[test_case("record-merge-conflict --test-name t --executor-label l --workspace /ws --build-number 1 --change 1234"; "merge conflict")]
    fn valid_arguments(args: &str) {
        if let Err(error) = parse(args) {
            panic!("`{args}` should have parsed: {error}");
        }
    }

    #[test_case("run --test-name t --executor-label l --workspace /ws --build-number 1 --timeout 0s a.sh", ErrorKind::ValueValidation; "zero timeout")]
    #[test_case("run --test-name t --executor-label l --workspace /ws --build-number 1 -j many a.sh", ErrorKind::ValueValidation; "bad threads")]
    #[test_case("result --workspace /ws --build-number 45 --refs a --review-user u --review-password p --bogus", ErrorKind::UnknownArgument; "unknown argument")]
    fn invalid_arguments(args: &str, kind: ErrorKind) {
        match parse(args) {
            Ok(_) => panic!("`{args}` should have failed to parse"),
            Err(error) => assert_eq!(error.kind(), kind, "for `{args}`"),
        }
    }

    #[test]
    fn shard_output_dir() {
        let app = parse(&format!("record-merge-conflict {SHARD_ARGS} --change 1234")).unwrap();
        let Command::RecordMergeConflict(opts) = app.command else {
            panic!("expected record-merge-conflict");
        };
        assert_eq!(
            opts.shard.output_dir(),
            "/ws/test_results/45/L=linux-slave,TEST=vanadium-go-test"
        );

        let app = parse(&format!(
            "record-merge-conflict {SHARD_ARGS} --change 1234 --output-dir /out"
        ))
        .unwrap();
        let Command::RecordMergeConflict(opts) = app.command else {
            panic!("expected record-merge-conflict");
        };
        assert_eq!(opts.shard.output_dir(), "/out");
    }

    #[test]
    fn result_lists_are_colon_separated() {
        let app = parse(
            "result --workspace /ws --build-number 45 --refs refs/changes/34/1234/2:refs/changes/56/3456/1 --projects release.go.core --tests vanadium-go-test:vanadium-www",
        )
        .unwrap();
        let Command::Result(opts) = app.command else {
            panic!("expected result");
        };
        let params = opts.result_params(Utc::now());
        assert_eq!(
            params.refs,
            ["refs/changes/34/1234/2", "refs/changes/56/3456/1"]
        );
        assert_eq!(params.projects, ["release.go.core"]);
        assert_eq!(params.tests, ["vanadium-go-test", "vanadium-www"]);
        assert_eq!(params.results_dir(), "/ws/test_results/45");
    }
}
