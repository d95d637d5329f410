// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Display names and report links for test cases.
//!
//! CI test report pages are addressed as
//! `<report-url>/<build>/L=<label>,TEST=<test>/testReport/<package>/<class>/<case>`, where the
//! package is everything before the last `.` of the class name. The same test can show up more
//! than once in a build (for example when a suite is run twice), in which case later pages get a
//! `_2`, `_3`, ... suffix.

use crate::helpers::join_segments;
use regex::Regex;
use std::{borrow::Cow, collections::HashMap, sync::LazyLock};
use url::Url;

/// The package name used when a class name has no `.`.
pub const ROOT_PACKAGE: &str = "(root)";

static CLASS_UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|]"#).expect("valid regex"));
static TEST_UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9A-Za-z_$]").expect("valid regex"));

/// Returns the display name of a test: `class.name` with every `.` replaced by `::`.
///
/// The display name never contains a `.`, so that review tools don't turn it into a link.
pub fn display_name(class_name: &str, name: &str) -> String {
    format!("{class_name}.{name}").replace('.', "::")
}

/// Makes a package or class name safe for use as a report URL segment.
pub fn safe_class_segment(name: &str) -> Cow<'_, str> {
    CLASS_UNSAFE_CHARS.replace_all(name, "_")
}

/// Makes a test name safe for use as a report URL segment.
///
/// This is stricter than [`safe_class_segment`]: everything other than ASCII letters, digits,
/// `_` and `$` is replaced.
pub fn safe_test_segment(name: &str) -> Cow<'_, str> {
    TEST_UNSAFE_CHARS.replace_all(name, "_")
}

/// Splits a class name into its package and class parts at the last `.`.
pub fn split_class_name(class_name: &str) -> (&str, &str) {
    match class_name.rsplit_once('.') {
        Some((package, class)) => (package, class),
        None => (ROOT_PACKAGE, class_name),
    }
}

/// The shard a link points into.
#[derive(Clone, Copy, Debug)]
pub struct LinkTarget<'a> {
    /// The base URL for test report pages.
    pub report_url: &'a Url,

    /// The presubmit build number.
    pub build_number: u64,

    /// The shard's executor label.
    pub executor_label: &'a str,

    /// The shard's test name.
    pub test_name: &'a str,
}

impl LinkTarget<'_> {
    /// Returns the link to a test case's report page.
    ///
    /// `occurrence` is the value returned by [`SeenTestCounter::record`] for this case. Occurrences
    /// above 1 get a `_<occurrence>` suffix.
    pub fn test_link(&self, class_name: &str, name: &str, occurrence: usize) -> String {
        let (package, class) = split_class_name(class_name);
        let build_number = self.build_number.to_string();
        let configuration = format!("L={},TEST={}", self.executor_label, self.test_name);
        let mut page = safe_test_segment(name).into_owned();
        if occurrence > 1 {
            page = format!("{page}_{occurrence}");
        }
        join_segments(
            self.report_url,
            [
                build_number.as_str(),
                configuration.as_str(),
                "testReport",
                &*safe_class_segment(package),
                &*safe_class_segment(class),
                page.as_str(),
            ],
        )
        .into()
    }
}

/// Counts how many times each test has been seen during one report pass.
///
/// Every test case of every shard is recorded, whether it passed or not, in shard order. The
/// count for a failing case picks the suffix of its report link.
#[derive(Clone, Debug, Default)]
pub struct SeenTestCounter {
    counts: HashMap<String, usize>,
}

impl SeenTestCounter {
    /// Creates a new, empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more occurrence of the test and returns its occurrence number, starting at 1.
    pub fn record(&mut self, display_name: &str, executor_label: &str) -> usize {
        let key = if executor_label.is_empty() {
            display_name.to_owned()
        } else {
            format!("{display_name}-{executor_label}")
        };
        let count = self.counts.entry(key).or_insert(0);
        *count += 1;
        *count
    }
}
