// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reading and writing xUnit reports.
//!
//! Shards write their reports with [`quick_junit`]. Reports are read back with a small
//! [`quick_xml`] event loop that only keeps what classification needs: the class name, the test
//! name and whether the case failed or was skipped.

use crate::errors::ReportParseError;
use quick_xml::{
    Reader,
    escape::resolve_html5_entity,
    events::{BytesStart, Event},
};
use std::borrow::Cow;

/// A single test case read from an xUnit report, or from a CI server's test report.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestCase {
    /// The class name. Falls back to the enclosing suite's name when the report omits it.
    pub class_name: String,

    /// The test name.
    pub name: String,

    /// The outcome of the test.
    pub outcome: TestOutcome,
}

impl TestCase {
    /// Creates a new passing test case.
    pub fn passed(class_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            name: name.into(),
            outcome: TestOutcome::Passed,
        }
    }

    /// Creates a new failing test case with the given failure detail.
    pub fn failed(
        class_name: impl Into<String>,
        name: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            name: name.into(),
            outcome: TestOutcome::Failed {
                detail: detail.into(),
            },
        }
    }

    /// Creates a new skipped test case.
    pub fn skipped(class_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            name: name.into(),
            outcome: TestOutcome::Skipped,
        }
    }

    /// Returns true if this test case failed.
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TestOutcome::Failed { .. })
    }

    /// Returns true if both test cases have the same class name and test name.
    ///
    /// Outcomes are not compared.
    pub fn same_test(&self, other: &TestCase) -> bool {
        self.class_name == other.class_name && self.name == other.name
    }
}

/// The outcome of a [`TestCase`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestOutcome {
    /// The test passed.
    Passed,

    /// The test failed or errored. `detail` may be empty.
    Failed {
        /// The failure text.
        detail: String,
    },

    /// The test was skipped.
    Skipped,
}

/// Parses an xUnit report into its test cases, in document order.
///
/// The root may be either `<testsuites>` or a single `<testsuite>`.
pub fn parse_report(input: &[u8]) -> Result<Vec<TestCase>, ReportParseError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut saw_root = false;
    let mut suite_name = String::new();
    let mut current: Option<PendingCase> = None;
    let mut in_failure = false;
    let mut depth = 0usize;
    let mut test_cases = Vec::new();

    loop {
        let position = reader.buffer_position() as u64;
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|error| ReportParseError::Xml { position, error })?;
        let xml_error = |error: quick_xml::Error| ReportParseError::Xml { position, error };

        match event {
            Event::Start(e) => {
                depth += 1;
                match e.name().as_ref() {
                    b"testsuites" => saw_root = true,
                    b"testsuite" => {
                        saw_root = true;
                        suite_name = attribute(&e, b"name")
                            .map_err(xml_error)?
                            .unwrap_or_default();
                    }
                    b"testcase" => {
                        current = Some(PendingCase::new(&e, &suite_name, position)?);
                    }
                    b"failure" | b"error" => {
                        if let Some(case) = &mut current {
                            case.start_failure(&e).map_err(xml_error)?;
                            in_failure = true;
                        }
                    }
                    b"skipped" => {
                        if let Some(case) = &mut current {
                            case.skipped = true;
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => match e.name().as_ref() {
                b"testsuites" | b"testsuite" => saw_root = true,
                b"testcase" => {
                    let case = PendingCase::new(&e, &suite_name, position)?;
                    test_cases.push(case.finish());
                }
                b"failure" | b"error" => {
                    if let Some(case) = &mut current {
                        case.start_failure(&e).map_err(xml_error)?;
                    }
                }
                b"skipped" => {
                    if let Some(case) = &mut current {
                        case.skipped = true;
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if in_failure {
                    if let Some(case) = &mut current {
                        case.push_failure_text(&t.unescape().map_err(xml_error)?);
                    }
                }
            }
            Event::CData(c) => {
                if in_failure {
                    if let Some(case) = &mut current {
                        case.push_failure_text(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                match e.name().as_ref() {
                    b"testcase" => {
                        if let Some(case) = current.take() {
                            test_cases.push(case.finish());
                        }
                        in_failure = false;
                    }
                    b"failure" | b"error" => in_failure = false,
                    b"testsuite" => suite_name.clear(),
                    _ => {}
                }
            }
            Event::Eof if depth > 0 => return Err(ReportParseError::Truncated),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(ReportParseError::MissingRoot);
    }
    Ok(test_cases)
}

/// The class name used for the single case of a merge conflict report.
pub const MERGE_CONFLICT_CLASS_NAME: &str = "merge conflict";

/// Builds the xUnit report for a shard whose change could not be merged.
///
/// The report has one failing case so that the conflict is visible in CI's own test report pages.
pub fn merge_conflict_report(test_name: &str, change: &str) -> quick_junit::Report {
    let mut status = quick_junit::TestCaseStatus::non_success(quick_junit::NonSuccessKind::Failure);
    status
        .set_message("merge conflict")
        .set_description(format!("possible merge conflict detected in {change}"));

    let mut test_case = quick_junit::TestCase::new(test_name, status);
    test_case.set_classname(MERGE_CONFLICT_CLASS_NAME);

    let mut suite = quick_junit::TestSuite::new(MERGE_CONFLICT_CLASS_NAME);
    suite.add_test_case(test_case);

    let mut report = quick_junit::Report::new(test_name);
    report.add_test_suite(suite);
    report
}

/// Undoes a second level of entity escaping in a class or test name.
///
/// Names are sometimes escaped twice by the tools that produce reports, so after XML decoding
/// they can still contain entities like `&lt;`. Each named or numeric character reference is
/// resolved on its own. A `&` that doesn't start a known reference is kept as text.
pub fn unescape_name(name: &str) -> Cow<'_, str> {
    if !name.contains('&') {
        return Cow::Borrowed(name);
    }

    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp + 1..];
        let resolved = rest
            .find(';')
            .filter(|&end| push_character_reference(&mut out, &rest[..end]));
        match resolved {
            Some(end) => rest = &rest[end + 1..],
            None => out.push('&'),
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Appends the text for `reference` (the part between `&` and `;`) to `out`. Returns false
/// without writing anything if it isn't a known reference.
fn push_character_reference(out: &mut String, reference: &str) -> bool {
    if let Some(number) = reference.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) if is_digits(hex, |c| c.is_ascii_hexdigit()) => {
                u32::from_str_radix(hex, 16).ok()
            }
            None if is_digits(number, |c| c.is_ascii_digit()) => number.parse().ok(),
            _ => None,
        };
        return match code.and_then(char::from_u32) {
            Some(c) if c != '\0' => {
                out.push(c);
                true
            }
            _ => false,
        };
    }

    match resolve_html5_entity(reference) {
        Some(text) => {
            out.push_str(text);
            true
        }
        None => false,
    }
}

fn is_digits(s: &str, is_digit: impl Fn(char) -> bool) -> bool {
    !s.is_empty() && s.chars().all(is_digit)
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

#[derive(Debug)]
struct PendingCase {
    class_name: String,
    name: String,
    failure: Option<PendingFailure>,
    skipped: bool,
}

#[derive(Debug)]
struct PendingFailure {
    message: Option<String>,
    text: String,
}

impl PendingCase {
    fn new(e: &BytesStart<'_>, suite_name: &str, position: u64) -> Result<Self, ReportParseError> {
        let xml_error = |error: quick_xml::Error| ReportParseError::Xml { position, error };
        let name = attribute(e, b"name")
            .map_err(xml_error)?
            .ok_or(ReportParseError::MissingTestName { position })?;
        let class_name = attribute(e, b"classname")
            .map_err(xml_error)?
            .filter(|class_name| !class_name.is_empty())
            .unwrap_or_else(|| suite_name.to_owned());

        Ok(Self {
            class_name: unescape_name(&class_name).into_owned(),
            name: unescape_name(&name).into_owned(),
            failure: None,
            skipped: false,
        })
    }

    fn start_failure(&mut self, e: &BytesStart<'_>) -> Result<(), quick_xml::Error> {
        let message = attribute(e, b"message")?;
        // A case can report several failures; the first message is kept and all text is joined.
        match &mut self.failure {
            Some(failure) => {
                if failure.message.is_none() {
                    failure.message = message;
                }
            }
            None => {
                self.failure = Some(PendingFailure {
                    message,
                    text: String::new(),
                });
            }
        }
        Ok(())
    }

    fn push_failure_text(&mut self, text: &str) {
        if let Some(failure) = &mut self.failure {
            if !failure.text.is_empty() {
                failure.text.push('\n');
            }
            failure.text.push_str(text);
        }
    }

    fn finish(self) -> TestCase {
        let outcome = match self.failure {
            Some(PendingFailure { message, text }) => {
                let detail = if text.is_empty() {
                    message.unwrap_or_default()
                } else {
                    text
                };
                TestOutcome::Failed { detail }
            }
            None if self.skipped => TestOutcome::Skipped,
            None => TestOutcome::Passed,
        };
        TestCase {
            class_name: self.class_name,
            name: self.name,
            outcome,
        }
    }
}
