// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running a shard's test scripts.
//!
//! Scripts run on a pool with a fixed number of workers. The pool returns once every script has
//! produced a result, or as soon as an interrupt or termination signal arrives. In the latter case
//! the scripts that hadn't finished are reported and their processes are killed as they're
//! dropped.

use crate::{errors::ShardRunError, signal::SignalHandlerKind};
use camino::Utf8PathBuf;
use futures::prelude::*;
use std::{
    process::Stdio,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

/// A script to run as part of a shard.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptJob {
    /// The name of the script, used as its test case name.
    pub name: String,

    /// The program to execute.
    pub program: Utf8PathBuf,

    /// Arguments to pass to the program.
    pub args: Vec<String>,
}

impl ScriptJob {
    /// Creates a job for a script path, named after its file name.
    pub fn from_path(program: impl Into<Utf8PathBuf>) -> Self {
        let program = program.into();
        let name = program.file_name().unwrap_or(program.as_str()).to_owned();
        Self {
            name,
            program,
            args: Vec::new(),
        }
    }
}

/// The result of running a [`ScriptJob`].
#[derive(Clone, Debug)]
pub struct ScriptResult {
    /// The name of the script.
    pub name: String,

    /// How the script finished.
    pub outcome: ScriptOutcome,

    /// How long the script ran for.
    pub duration: Duration,
}

/// How a script finished.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptOutcome {
    /// The script exited successfully.
    Passed,

    /// The script exited unsuccessfully.
    Failed {
        /// The exit code, if the script wasn't killed by a signal.
        exit_code: Option<i32>,

        /// The script's standard output and standard error.
        output: String,
    },

    /// The script was stopped after running for longer than the timeout.
    TimedOut {
        /// The timeout.
        timeout: Duration,
    },

    /// The script could not be started.
    ExecFailed {
        /// The error that occurred.
        error: String,
    },
}

impl ScriptOutcome {
    /// Returns true if the script passed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Runs scripts on a bounded pool.
#[derive(Clone, Debug)]
pub struct ScriptRunner {
    threads: usize,
    timeout: Duration,
    signal_handler: SignalHandlerKind,
}

impl ScriptRunner {
    /// Creates a new runner. `threads` is clamped to at least 1.
    pub fn new(threads: usize, timeout: Duration, signal_handler: SignalHandlerKind) -> Self {
        Self {
            threads: threads.max(1),
            timeout,
            signal_handler,
        }
    }

    /// Runs every job and returns their results in job order.
    pub fn run(&self, jobs: Vec<ScriptJob>) -> Result<Vec<ScriptResult>, ShardRunError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("presubmit-runner-worker")
            .build()
            .map_err(ShardRunError::RuntimeCreate)?;
        runtime.block_on(self.run_async(jobs))
    }

    async fn run_async(&self, jobs: Vec<ScriptJob>) -> Result<Vec<ScriptResult>, ShardRunError> {
        let mut shutdown = self.signal_handler.listen()?;

        let names: Vec<String> = jobs.iter().map(|job| job.name.clone()).collect();
        let mut results: Vec<Option<ScriptResult>> = vec![None; jobs.len()];
        info!(
            "running {} scripts with {} threads (timeout {})",
            jobs.len(),
            self.threads,
            humantime::format_duration(self.timeout),
        );

        let timeout = self.timeout;
        let mut stream = stream::iter(jobs.into_iter().enumerate())
            .map(|(index, job)| async move { (index, run_script(job, timeout).await) })
            .buffer_unordered(self.threads);

        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some((index, result)) => {
                        debug!("{} finished: {:?}", result.name, result.outcome);
                        results[index] = Some(result);
                    }
                    None => break,
                },
                signal = shutdown.recv() => {
                    let mut unfinished: Vec<_> = results
                        .iter()
                        .zip(&names)
                        .filter(|(result, _)| result.is_none())
                        .map(|(_, name)| name.clone())
                        .collect();
                    unfinished.sort_unstable();
                    warn!("received {signal}, stopping {} unfinished scripts", unfinished.len());
                    return Err(ShardRunError::Interrupted { unfinished });
                }
            }
        }

        Ok(results.into_iter().flatten().collect())
    }
}

async fn run_script(job: ScriptJob, timeout: Duration) -> ScriptResult {
    let start = Instant::now();
    let mut command = tokio::process::Command::new(job.program.as_std_path());
    command
        .args(&job.args)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let outcome = match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => ScriptOutcome::TimedOut { timeout },
        Ok(Err(error)) => ScriptOutcome::ExecFailed {
            error: error.to_string(),
        },
        Ok(Ok(output)) if output.status.success() => ScriptOutcome::Passed,
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            ScriptOutcome::Failed {
                exit_code: output.status.code(),
                output: combined,
            }
        }
    };

    ScriptResult {
        name: job.name,
        outcome,
        duration: start.elapsed(),
    }
}
