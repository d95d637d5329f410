// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `presubmit` failures.
///
/// `presubmit` invocations may fail for a variety of reasons. This structure documents the exit
/// codes that may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum PresubmitExitCode {}

impl PresubmitExitCode {
    /// No errors occurred and presubmit exited normally.
    pub const OK: i32 = 0;

    /// One or more shard scripts failed or timed out.
    pub const SHARD_FAILED: i32 = 100;

    /// The run was interrupted by a signal before all shard scripts finished.
    pub const INTERRUPTED: i32 = 101;

    /// The report could not be posted to the review server.
    pub const PUBLISH_FAILED: i32 = 102;

    /// Shard status or xUnit report files could not be written.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// A user issue happened while setting up a presubmit invocation.
    pub const SETUP_ERROR: i32 = 96;
}
