// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP clients for the CI and code review servers.
//!
//! The report pass only depends on the [`CiServer`](crate::baseline::CiServer) and
//! [`ReviewServer`](crate::publish::ReviewServer) traits. The clients here implement them against
//! Jenkins-style and Gerrit-style JSON APIs.

mod gerrit;
mod jenkins;

pub use gerrit::{ChangeRef, GerritClient, GerritCredentials};
pub use jenkins::JenkinsClient;

use std::time::Duration;
use ureq::Agent;

/// The timeout applied to every request, from connecting to reading the body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn new_agent() -> Agent {
    Agent::config_builder()
        .timeout_global(Some(REQUEST_TIMEOUT))
        .build()
        .into()
}
