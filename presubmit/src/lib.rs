// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `presubmit` command-line tool.
//!
//! `presubmit run` executes a shard's test scripts, `presubmit record-merge-conflict` records a
//! shard whose changes could not be merged, and `presubmit result` classifies every shard's
//! failures against postsubmit and posts the report to code review.
//!
//! The logic lives in `presubmit-runner`; this crate only parses arguments and sets up output.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
