// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the report pass and shard runs.

mod fixtures;
mod report_pass;
#[cfg(unix)]
mod shard_run;
