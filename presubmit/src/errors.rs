// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use presubmit_metadata::{PresubmitExitCode, ShardStatus};
use presubmit_runner::errors::{ConfigParseError, PublishError, ShardRunError, WriteReportError};
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are meant to be printed with display_to_stderr,
// which colorizes them.

/// An error that presubmit knows how to report.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("shard run error")]
    ShardRunError {
        #[from]
        err: ShardRunError,
    },
    #[error("failed to write shard outputs")]
    WriteReportError {
        #[from]
        err: WriteReportError,
    },
    #[error("shard failed")]
    ShardFailed {
        test_name: String,
        status: ShardStatus,
        output_dir: Utf8PathBuf,
    },
    #[error("failed to publish report")]
    PublishError {
        #[from]
        err: PublishError,
    },
    #[error("failed to write report to stdout")]
    StdoutWriteError {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn shard_failed(
        test_name: impl Into<String>,
        status: ShardStatus,
        output_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self::ShardFailed {
            test_name: test_name.into(),
            status,
            output_dir: output_dir.into(),
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::ConfigParseError { .. } => PresubmitExitCode::SETUP_ERROR,
            Self::ShardRunError { err } => match err {
                ShardRunError::Interrupted { .. } => PresubmitExitCode::INTERRUPTED,
                ShardRunError::WriteOutput(_) => PresubmitExitCode::WRITE_OUTPUT_ERROR,
                _ => PresubmitExitCode::SETUP_ERROR,
            },
            Self::WriteReportError { .. } | Self::StdoutWriteError { .. } => {
                PresubmitExitCode::WRITE_OUTPUT_ERROR
            }
            Self::ShardFailed { .. } => PresubmitExitCode::SHARD_FAILED,
            Self::PublishError { .. } => PresubmitExitCode::PUBLISH_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse presubmit config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::ShardRunError { err } => match err {
                ShardRunError::Interrupted { unfinished } => {
                    error!(
                        "interrupted before {} scripts finished: {}",
                        unfinished.len().style(styles.bold),
                        unfinished.join(", ")
                    );
                    None
                }
                other => {
                    error!("{other}");
                    other.source()
                }
            },
            Self::WriteReportError { err } => {
                error!("{err}");
                err.source()
            }
            Self::ShardFailed {
                test_name,
                status,
                output_dir,
            } => {
                error!(
                    "{} {} (results written to `{output_dir}`)",
                    test_name.style(styles.bold),
                    status.style(styles.failure)
                );
                None
            }
            Self::PublishError { err } => {
                error!("{err}");
                err.source()
            }
            Self::StdoutWriteError { err } => {
                error!("failed to write report to stdout");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {err}");
            next_error = err.source();
        }
    }
}
