// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rendering the report that gets posted to code review.
//!
//! Rendering is a pure function of a [`ReportInput`]: every lookup has already happened by the
//! time a report is rendered.

use crate::{baseline::BaselineOutcome, classify::FailureKind};
use std::time::Duration;
use swrite::{SWrite, swrite, swriteln};

/// Everything needed to render a report.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReportInput {
    /// No shard produced any results. Nothing is rendered.
    NoResults,

    /// A shard could not merge the change under test.
    MergeConflict {
        /// The change that could not be merged.
        change: String,
    },

    /// The presubmit master build itself failed, so shards are being retried.
    RetryingFailedBuild,

    /// A complete report.
    Full(FullReport),
}

/// The contents of a complete report.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FullReport {
    /// The current build cop, if known.
    pub build_cop: Option<String>,

    /// One line per shard, in shard order.
    pub summary: Vec<SummaryLine>,

    /// Classified failures. Empty if no shard failed.
    pub groups: ClassificationGroups,

    /// The presubmit master build page.
    pub details_url: String,

    /// Links to re-run the presubmit, present when some shard failed.
    pub rerun: Option<RerunLinks>,

    /// True if some shard failed but its failures could not be classified, for example because
    /// its xUnit report was missing.
    pub has_unclassified_failure: bool,
}

/// A summary line for one shard.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SummaryLine {
    /// The shard was skipped.
    Skipped {
        /// The test name.
        test_name: String,
    },

    /// The shard ran.
    Ran {
        /// The outcome of the shard's baseline build.
        baseline: BaselineOutcome,

        /// True if the shard passed.
        passed: bool,

        /// The test name.
        test_name: String,

        /// The executor label, shown for multi-configuration jobs.
        label: Option<String>,

        /// The timeout, for timed-out shards.
        timed_out_after: Option<Duration>,
    },
}

/// Classified failures across every shard, in shard order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClassificationGroups {
    /// Failures absent from their baseline.
    pub new: Vec<GroupEntry>,

    /// Failures present in their baseline.
    pub known: Vec<GroupEntry>,

    /// Baseline failures that no longer fail.
    pub fixed: Vec<GroupEntry>,
}

impl ClassificationGroups {
    /// Returns the entries of a group.
    pub fn get(&self, kind: FailureKind) -> &[GroupEntry] {
        match kind {
            FailureKind::New => &self.new,
            FailureKind::Known => &self.known,
            FailureKind::Fixed => &self.fixed,
        }
    }

    /// Returns the entries of a group, mutably.
    pub fn get_mut(&mut self, kind: FailureKind) -> &mut Vec<GroupEntry> {
        match kind {
            FailureKind::New => &mut self.new,
            FailureKind::Known => &mut self.known,
            FailureKind::Fixed => &mut self.fixed,
        }
    }

    /// Returns true if there are no entries in any group.
    pub fn is_empty(&self) -> bool {
        FailureKind::ALL.iter().all(|kind| self.get(*kind).is_empty())
    }
}

/// One entry in a classification group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GroupEntry {
    /// The display name of the test.
    pub display_name: String,

    /// The test's report page, if it has one in this build.
    pub link: Option<String>,
}

/// Links that start a new presubmit build for the same changes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RerunLinks {
    /// Re-runs only the tests that failed.
    pub failed_only: String,

    /// Re-runs every test.
    pub everything: String,
}

/// What kind of report was rendered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReportKind {
    /// The merge conflict notice.
    MergeConflict,

    /// The retry notice.
    RetryingFailedBuild,

    /// A complete report.
    Full,
}

/// A rendered report, ready to be published.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderedReport {
    /// What kind of report this is.
    pub kind: ReportKind,

    /// The message text.
    pub message: String,

    /// Whether the report should vote in favor of the changes.
    pub success: bool,
}

/// Renders a report. Returns `None` if there is nothing to report.
pub fn render(input: &ReportInput) -> Option<RenderedReport> {
    match input {
        ReportInput::NoResults => None,
        ReportInput::MergeConflict { change } => Some(RenderedReport {
            kind: ReportKind::MergeConflict,
            message: format!(
                "Possible merge conflict detected in {change}.\n\
                 Presubmit tests will be executed after a new patchset that resolves the \
                 conflicts is submitted."
            ),
            success: false,
        }),
        ReportInput::RetryingFailedBuild => Some(RenderedReport {
            kind: ReportKind::RetryingFailedBuild,
            message: "SOME TESTS FAILED TO RUN.\nRetrying...\n".to_owned(),
            success: false,
        }),
        ReportInput::Full(report) => Some(RenderedReport {
            kind: ReportKind::Full,
            message: render_full(report),
            success: report.groups.new.is_empty() && !report.has_unclassified_failure,
        }),
    }
}

fn render_full(report: &FullReport) -> String {
    let mut out = String::new();

    if let Some(build_cop) = &report.build_cop {
        swrite!(out, "\nCurrent Build Cop: {build_cop}\n\n");
    }

    out.push_str("Test results:\n");
    for line in &report.summary {
        write_summary_line(&mut out, line);
    }

    for kind in FailureKind::ALL {
        let entries = report.groups.get(kind);
        if entries.is_empty() {
            continue;
        }
        swrite!(out, "\n{}:\n", kind.header(entries.len()));
        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            swrite!(out, "- {}", entry.display_name);
            if let Some(link) = &entry.link {
                swrite!(out, "\n{link}");
            }
        }
        out.push_str("\n\n");
    }

    swrite!(out, "\nMore details at:\n{}\n", report.details_url);
    if let Some(rerun) = &report.rerun {
        swrite!(
            out,
            "\nTo re-run FAILED TESTS ONLY without uploading a new patch set:\n\
             (click Proceed button on the next screen)\n{}\n",
            rerun.failed_only
        );
        swrite!(
            out,
            "\nTo re-run presubmit tests without uploading a new patch set:\n\
             (click Proceed button on the next screen)\n{}\n",
            rerun.everything
        );
    }

    out
}

fn write_summary_line(out: &mut String, line: &SummaryLine) {
    match line {
        SummaryLine::Skipped { test_name } => {
            swriteln!(out, "skipped {test_name}");
        }
        SummaryLine::Ran {
            baseline,
            passed,
            test_name,
            label,
            timed_out_after,
        } => {
            let current = if *passed { "✔" } else { "✖" };
            swrite!(out, "{} ➔ {current}: {test_name}", baseline_symbol(*baseline));
            if let Some(label) = label {
                swrite!(out, " [{label}]");
            }
            if let Some(timeout) = timed_out_after {
                swrite!(
                    out,
                    " [TIMED OUT after {}]",
                    humantime::format_duration(*timeout)
                );
            }
            out.push('\n');
        }
    }
}

fn baseline_symbol(outcome: BaselineOutcome) -> &'static str {
    match outcome {
        BaselineOutcome::Passed => "✔",
        BaselineOutcome::Failed => "✖",
        BaselineOutcome::Unknown => "?",
    }
}
