// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by presubmit.

use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error::Error, fmt};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse presubmit config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// Error returned while parsing a [`TestThreads`](crate::config::TestThreads) value.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for test-threads: {input}")]
pub struct TestThreadsParseError {
    /// The input that failed to parse.
    pub input: String,
}

impl TestThreadsParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurred while decoding an xUnit report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportParseError {
    /// The document is not well-formed XML.
    #[error("malformed xUnit report at byte {position}")]
    Xml {
        /// The byte offset the reader had reached.
        position: u64,

        /// The underlying error.
        #[source]
        error: quick_xml::Error,
    },

    /// The document has no `<testsuites>` or `<testsuite>` root.
    #[error("xUnit report has no <testsuites> or <testsuite> element")]
    MissingRoot,

    /// The document ended with unclosed elements.
    #[error("xUnit report ends before its root element is closed")]
    Truncated,

    /// A `<testcase>` element is missing its `name` attribute.
    #[error("<testcase> element at byte {position} has no `name` attribute")]
    MissingTestName {
        /// The byte offset of the element.
        position: u64,
    },
}

/// An error that occurred while reading a shard status record.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StatusFileError {
    /// The status file could not be read.
    #[error("failed to read status file `{path}`")]
    Read {
        /// The path to the status file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The status file is not a valid status record.
    #[error("failed to parse status file `{path}`")]
    Parse {
        /// The path to the status file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// A path under the results directory is not valid UTF-8.
    #[error("path under `{dir}` is not valid UTF-8: {}", .path.display())]
    NonUtf8Path {
        /// The results directory being walked.
        dir: Utf8PathBuf,

        /// The offending path.
        path: std::path::PathBuf,
    },

    /// Walking the results directory failed.
    #[error("failed to walk results directory `{dir}`")]
    Walk {
        /// The results directory being walked.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: walkdir::Error,
    },
}

/// An error returned by a CI server lookup.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CiError {
    /// The HTTP request failed.
    #[error("request to `{url}` failed")]
    Request {
        /// The URL requested, without credentials.
        url: String,

        /// The underlying error.
        #[source]
        error: Box<ureq::Error>,
    },

    /// The response was not valid JSON of the expected shape.
    #[error("failed to decode response from `{url}`")]
    Decode {
        /// The URL requested, without credentials.
        url: String,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The response was valid JSON but structurally inconsistent.
    #[error("unexpected response from `{url}`: {message}")]
    Schema {
        /// The URL requested, without credentials.
        url: String,

        /// A description of the inconsistency.
        message: String,
    },

    /// The requested build does not exist.
    #[error("build {number} of `{spec}` not found")]
    BuildNotFound {
        /// The job spec that was queried.
        spec: String,

        /// The build number.
        number: u64,
    },
}

/// An error returned by a code review server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReviewError {
    /// The HTTP request failed.
    #[error("request to `{url}` failed")]
    Request {
        /// The URL requested.
        url: String,

        /// The underlying error.
        #[source]
        error: Box<ureq::Error>,
    },

    /// The response was not valid JSON of the expected shape.
    #[error("failed to decode response from `{url}`")]
    Decode {
        /// The URL requested.
        url: String,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The request body could not be encoded.
    #[error("failed to encode request to `{url}`")]
    Encode {
        /// The URL requested.
        url: String,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// A change reference could not be understood.
    #[error("invalid change reference `{reference}` (expected refs/changes/NN/CHANGE/PATCHSET)")]
    InvalidRef {
        /// The reference.
        reference: String,
    },
}

/// An error that occurred while posting a report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PublishError {
    /// Looking up which changes accept the vote label failed.
    #[error("failed to query changes accepting the `{label}` label")]
    Query {
        /// The vote label.
        label: String,

        /// The underlying error.
        #[source]
        error: ReviewError,
    },

    /// Posting the review to a change failed.
    #[error("failed to post review for `{change_ref}`")]
    Post {
        /// The change the review was posted to.
        change_ref: String,

        /// The underlying error.
        #[source]
        error: ReviewError,
    },
}

/// An error that occurred while writing a shard's status record or xUnit report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteReportError {
    /// The output directory could not be created.
    #[error("failed to create output directory `{dir}`")]
    CreateDir {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The status record could not be serialized.
    #[error("failed to serialize status record for `{test_name}`")]
    SerializeStatus {
        /// The test the record is for.
        test_name: String,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The xUnit report could not be serialized.
    #[error("failed to serialize xUnit report for `{test_name}`")]
    SerializeReport {
        /// The test the report is for.
        test_name: String,

        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },

    /// A file could not be written.
    #[error("failed to write `{path}`")]
    Write {
        /// The file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error that occurred while running a shard's scripts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShardRunError {
    /// The async runtime could not be created.
    #[error("failed to create async runtime")]
    RuntimeCreate(#[source] std::io::Error),

    /// Signal handlers could not be installed.
    #[error(transparent)]
    SignalHandlerSetup(#[from] SignalHandlerSetupError),

    /// A signal was received before every script finished.
    #[error("interrupted with {} unfinished scripts: {}", .unfinished.len(), .unfinished.join(", "))]
    Interrupted {
        /// The scripts that had not finished, sorted.
        unfinished: Vec<String>,
    },

    /// The shard's results could not be written.
    #[error(transparent)]
    WriteOutput(#[from] WriteReportError),
}

/// An error occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] std::io::Error);

/// Displays an error along with every error in its `source` chain.
///
/// Used when an error is logged rather than returned.
pub struct DisplayErrorChain<E>(E);

impl<E: Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut next = self.0.source();
        if next.is_some() {
            write!(f, "\n  caused by:")?;
        }
        while let Some(err) = next {
            write!(f, "\n  - {err}")?;
            next = err.source();
        }
        Ok(())
    }
}
