// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for presubmit: running test shards, and turning their results into a
//! report on the changes under test.
//!
//! A report pass loads every shard's status record and xUnit report ([`shard`]), resolves each
//! shard's postsubmit baseline ([`baseline`]), classifies failures as new, known or fixed
//! ([`classify`]), and renders ([`render`]) and posts ([`publish`]) the result. [`aggregate`]
//! ties these together.

pub mod aggregate;
pub mod baseline;
pub mod classify;
pub mod config;
pub mod errors;
mod helpers;
pub mod identity;
pub mod publish;
pub mod remote;
pub mod render;
pub mod runner;
pub mod shard;
pub mod signal;
pub mod xunit;
