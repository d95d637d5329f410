// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable formats shared between the presubmit tools.
//!
//! Each presubmit shard writes a JSON status record next to its xUnit report. The presubmit
//! master job collects those files, and `presubmit result` reads them back to build the report
//! that is posted to the review thread.

mod exit_codes;
mod status;

pub use exit_codes::*;
pub use status::*;
