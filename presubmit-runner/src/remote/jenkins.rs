// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::new_agent;
use crate::{
    baseline::{BuildInfo, CiServer, JobSpec},
    errors::CiError,
    helpers::join_segments,
    xunit::TestCase,
};
use chrono::DateTime;
use serde::{Deserialize, de::DeserializeOwned};
use std::fmt;
use tracing::debug;
use ureq::Agent;
use url::Url;

/// Test report statuses that count as failures.
const FAILED_STATUSES: [&str; 2] = ["FAILED", "REGRESSION"];

/// A client for a Jenkins-style CI server's JSON API.
pub struct JenkinsClient {
    agent: Agent,
    base_url: Url,
    token: Option<String>,
}

impl fmt::Debug for JenkinsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JenkinsClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl JenkinsClient {
    /// Creates a client for the server at `base_url`. If `token` is set, it is passed with every
    /// request as the `token` query parameter.
    pub fn new(base_url: &Url, token: Option<String>) -> Self {
        Self {
            agent: new_agent(),
            base_url: base_url.clone(),
            token,
        }
    }

    /// Returns the API URL for `path` under a job spec, e.g. `["lastCompletedBuild"]`.
    fn api_url(&self, spec: &JobSpec, path: &[&str]) -> String {
        api_url(&self.base_url, spec, path).into()
    }

    fn get<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, CiError> {
        debug!("GET {url}");
        let mut request = self.agent.get(url);
        if let Some(token) = &self.token {
            request = request.query("token", token.as_str());
        }
        let mut response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(404)) => return Ok(None),
            Err(error) => {
                return Err(CiError::Request {
                    url: url.to_owned(),
                    error: Box::new(error),
                });
            }
        };
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|error| CiError::Request {
                url: url.to_owned(),
                error: Box::new(error),
            })?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|error| CiError::Decode {
                url: url.to_owned(),
                error,
            })
    }

    fn get_build(&self, spec: &JobSpec, path: &str, number: u64) -> Result<BuildInfo, CiError> {
        let url = self.api_url(spec, &[path]);
        match self.get::<BuildJson>(&url)? {
            Some(build) => build.into_build_info(&url),
            None => Err(CiError::BuildNotFound {
                spec: spec.to_string(),
                number,
            }),
        }
    }
}

impl CiServer for JenkinsClient {
    fn last_completed_build(&self, spec: &JobSpec) -> Result<BuildInfo, CiError> {
        self.get_build(spec, "lastCompletedBuild", 0)
    }

    fn build_info(&self, spec: &JobSpec, number: u64) -> Result<BuildInfo, CiError> {
        self.get_build(spec, &number.to_string(), number)
    }

    fn failed_test_cases(&self, spec: &JobSpec, number: u64) -> Result<Vec<TestCase>, CiError> {
        let build = number.to_string();
        let url = self.api_url(spec, &[build.as_str(), "testReport"]);
        // Builds that didn't publish a test report have no failing tests.
        Ok(self
            .get::<TestReportJson>(&url)?
            .map(TestReportJson::failures)
            .unwrap_or_default())
    }
}

fn api_url(base_url: &Url, spec: &JobSpec, path: &[&str]) -> Url {
    let configuration = spec.executor_label().map(|label| format!("L={label}"));
    let segments = ["job", spec.job_name()]
        .into_iter()
        .chain(configuration.as_deref())
        .chain(path.iter().copied())
        .chain(["api", "json"]);
    join_segments(base_url, segments)
}

#[derive(Debug, Deserialize)]
struct BuildJson {
    number: u64,
    // Milliseconds since the epoch.
    timestamp: i64,
    result: Option<String>,
}

impl BuildJson {
    fn into_build_info(self, url: &str) -> Result<BuildInfo, CiError> {
        let timestamp =
            DateTime::from_timestamp_millis(self.timestamp).ok_or_else(|| CiError::Schema {
                url: url.to_owned(),
                message: format!("build timestamp {} is out of range", self.timestamp),
            })?;
        Ok(BuildInfo {
            number: self.number,
            timestamp,
            result: self.result,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TestReportJson {
    #[serde(default)]
    suites: Vec<SuiteJson>,
}

#[derive(Debug, Deserialize)]
struct SuiteJson {
    #[serde(default)]
    cases: Vec<CaseJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaseJson {
    class_name: String,
    name: String,
    status: String,
    #[serde(default)]
    error_details: Option<String>,
}

impl TestReportJson {
    fn failures(self) -> Vec<TestCase> {
        self.suites
            .into_iter()
            .flat_map(|suite| suite.cases)
            .filter(|case| FAILED_STATUSES.contains(&case.status.as_str()))
            .map(|case| {
                TestCase::failed(
                    case.class_name,
                    case.name,
                    case.error_details.unwrap_or_default(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PresubmitConfig;
    use chrono::{TimeZone, Utc};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn api_urls() {
        let config = PresubmitConfig::from_toml_str(indoc! {r#"
            [ci]
            multi-configuration-jobs = ["vanadium-go-test"]
        "#})
        .unwrap();
        let base = Url::parse("http://ci/").unwrap();

        assert_eq!(
            api_url(
                &base,
                &JobSpec::for_test(&config, "vanadium-go-test", "linux-slave"),
                &["lastCompletedBuild"]
            )
            .as_str(),
            "http://ci/job/vanadium-go-test/L=linux-slave/lastCompletedBuild/api/json"
        );
        assert_eq!(
            api_url(
                &base,
                &JobSpec::for_test(&config, "vanadium-go-build", "linux-slave"),
                &["12", "testReport"]
            )
            .as_str(),
            "http://ci/job/vanadium-go-build/12/testReport/api/json"
        );
    }

    #[test]
    fn decode_build() {
        let build: BuildJson = serde_json::from_str(
            r#"{"number": 1234, "timestamp": 1429300800000, "result": "SUCCESS", "building": false}"#,
        )
        .unwrap();
        let build = build.into_build_info("http://ci").unwrap();
        assert_eq!(build.number, 1234);
        assert_eq!(
            build.timestamp,
            Utc.timestamp_millis_opt(1_429_300_800_000).unwrap()
        );
        assert!(build.is_success());

        let running: BuildJson =
            serde_json::from_str(r#"{"number": 1235, "timestamp": 1429300900000, "result": null}"#)
                .unwrap();
        assert_eq!(running.into_build_info("http://ci").unwrap().result, None);
    }

    #[test]
    fn out_of_range_timestamp() {
        let build = BuildJson {
            number: 1,
            timestamp: i64::MAX,
            result: None,
        };
        assert!(matches!(
            build.into_build_info("http://ci"),
            Err(CiError::Schema { .. })
        ));
    }

    #[test]
    fn report_failures() {
        let report: TestReportJson = serde_json::from_str(indoc! {r#"
            {
              "failCount": 2,
              "suites": [
                {
                  "name": "v.io/x/ref",
                  "cases": [
                    {"className": "v.io.x.ref", "name": "TestA", "status": "PASSED"},
                    {"className": "v.io.x.ref", "name": "TestB", "status": "FAILED",
                     "errorDetails": "assert false"},
                    {"className": "v.io.x.ref", "name": "TestC", "status": "SKIPPED"}
                  ]
                },
                {
                  "name": "v.io/x/lib",
                  "cases": [
                    {"className": "v.io.x.lib", "name": "TestD", "status": "REGRESSION"},
                    {"className": "v.io.x.lib", "name": "TestE", "status": "FIXED"}
                  ]
                }
              ]
            }
        "#})
        .unwrap();

        assert_eq!(
            report.failures(),
            vec![
                TestCase::failed("v.io.x.ref", "TestB", "assert false"),
                TestCase::failed("v.io.x.lib", "TestD", ""),
            ]
        );
    }

    #[test]
    fn token_is_redacted() {
        let base = Url::parse("http://ci/").unwrap();
        let client = JenkinsClient::new(&base, Some("secret".to_owned()));
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret"), "{debug}");
        assert!(debug.contains("http://ci/\""), "{debug}");
    }
}
