// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Posting reports to code review.

use crate::{
    errors::{DisplayErrorChain, PublishError, ReviewError},
    render::RenderedReport,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info};

/// The operations the publisher needs from a code review server.
pub trait ReviewServer {
    /// Returns the refs of the changes (matching the configured query) that accept `label`.
    fn changes_accepting_label(&self, label: &str) -> Result<BTreeSet<String>, ReviewError>;

    /// Posts a review with a message and label votes to the change at `change_ref`.
    fn post_review(
        &self,
        change_ref: &str,
        message: &str,
        labels: &BTreeMap<String, i32>,
    ) -> Result<(), ReviewError>;
}

impl<T: ReviewServer + ?Sized> ReviewServer for &T {
    fn changes_accepting_label(&self, label: &str) -> Result<BTreeSet<String>, ReviewError> {
        (**self).changes_accepting_label(label)
    }

    fn post_review(
        &self,
        change_ref: &str,
        message: &str,
        labels: &BTreeMap<String, i32>,
    ) -> Result<(), ReviewError> {
        (**self).post_review(change_ref, message, labels)
    }
}

/// Posts rendered reports, voting on the changes that accept the vote label.
///
/// Publishing is not idempotent: publishing the same report twice posts it twice.
#[derive(Debug)]
pub struct Publisher<R> {
    server: R,
    vote_label: String,
}

impl<R: ReviewServer> Publisher<R> {
    /// Creates a new publisher.
    pub fn new(server: R, vote_label: impl Into<String>) -> Self {
        Self {
            server,
            vote_label: vote_label.into(),
        }
    }

    /// Returns the vote label.
    pub fn vote_label(&self) -> &str {
        &self.vote_label
    }

    /// Posts `report` to every change in `refs`, stopping at the first failure.
    ///
    /// Changes that accept the vote label get `+1` for a successful report and `-1` otherwise.
    /// Other changes get the message with no vote.
    pub fn publish(&self, refs: &[String], report: &RenderedReport) -> Result<(), PublishError> {
        let accepting = self
            .server
            .changes_accepting_label(&self.vote_label)
            .map_err(|error| PublishError::Query {
                label: self.vote_label.clone(),
                error,
            })?;
        let vote = if report.success { 1 } else { -1 };

        for change_ref in refs {
            let mut labels = BTreeMap::new();
            if accepting.contains(change_ref) {
                labels.insert(self.vote_label.clone(), vote);
            }
            if let Err(error) = self.server.post_review(change_ref, &report.message, &labels) {
                let error = PublishError::Post {
                    change_ref: change_ref.clone(),
                    error,
                };
                error!("{}", DisplayErrorChain::new(&error));
                return Err(error);
            }
            info!("review posted for {change_ref} with labels {labels:?}");
        }
        Ok(())
    }
}
