// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Classifying failures against a baseline.
//!
//! A failing test is *new* if the baseline build doesn't also fail it, and *known* if it does. A
//! baseline failure that doesn't fail in the current report is *fixed*. Tests are matched by exact
//! class name and test name.

use crate::xunit::TestCase;
use std::fmt;

/// The kind of a classified failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum FailureKind {
    /// Fails now, but not in the baseline.
    New,

    /// Fails now and in the baseline.
    Known,

    /// Fails in the baseline, but not now.
    Fixed,
}

impl FailureKind {
    /// All kinds, in report order.
    pub const ALL: [FailureKind; 3] = [FailureKind::New, FailureKind::Known, FailureKind::Fixed];

    /// Returns the group header for `count` failures of this kind, e.g. `NEW FAILURES`.
    pub fn header(self, count: usize) -> String {
        if count > 1 {
            format!("{self}S")
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "NEW FAILURE"),
            Self::Known => write!(f, "KNOWN FAILURE"),
            Self::Fixed => write!(f, "FIXED FAILURE"),
        }
    }
}

/// A current failure, with its position in the report it came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CurrentFailure<'a> {
    /// The index of the test case within the report.
    pub index: usize,

    /// The test case.
    pub test_case: &'a TestCase,
}

/// The result of [`classify`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Classification<'a> {
    /// Current failures absent from the baseline, in report order.
    pub new: Vec<CurrentFailure<'a>>,

    /// Current failures present in the baseline, in report order.
    pub known: Vec<CurrentFailure<'a>>,

    /// Baseline failures absent from the current failures, in baseline order.
    pub fixed: Vec<&'a TestCase>,
}

/// Classifies the failures of one report against a set of baseline failures.
///
/// `current` is every test case of the report, in order; passing and skipped cases are ignored.
/// `baseline` is the failing set of the baseline build. Pass an empty baseline when it isn't
/// known: every current failure is then new, and nothing is fixed.
pub fn classify<'a>(current: &'a [TestCase], baseline: &'a [TestCase]) -> Classification<'a> {
    let mut classification = Classification::default();

    for (index, test_case) in current.iter().enumerate() {
        if !test_case.is_failure() {
            continue;
        }
        let failure = CurrentFailure { index, test_case };
        if baseline.iter().any(|b| b.same_test(test_case)) {
            classification.known.push(failure);
        } else {
            classification.new.push(failure);
        }
    }

    classification.fixed = baseline
        .iter()
        .filter(|b| {
            !current
                .iter()
                .any(|test_case| test_case.is_failure() && test_case.same_test(b))
        })
        .collect();

    classification
}
