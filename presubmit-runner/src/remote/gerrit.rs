// Copyright (c) The presubmit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::new_agent;
use crate::{errors::ReviewError, publish::ReviewServer};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    str::FromStr,
};
use tracing::debug;
use ureq::Agent;

/// Gerrit prefixes JSON responses with this line to prevent XSSI.
const XSSI_PREFIX: &str = ")]}'";

/// A change reference of the form `refs/changes/NN/CHANGE/PATCHSET`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChangeRef {
    /// The change number.
    pub change: u64,

    /// The patchset number.
    pub patchset: u64,
}

impl FromStr for ChangeRef {
    type Err = ReviewError;

    fn from_str(reference: &str) -> Result<Self, Self::Err> {
        let invalid = || ReviewError::InvalidRef {
            reference: reference.to_owned(),
        };
        let mut parts = reference.split('/');
        let (Some("refs"), Some("changes"), Some(shard), Some(change), Some(patchset), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(invalid());
        };
        let change: u64 = change.parse().map_err(|_| invalid())?;
        let patchset = patchset.parse().map_err(|_| invalid())?;
        // The shard is the last two digits of the change number, zero-padded.
        if shard != format!("{:02}", change % 100) {
            return Err(invalid());
        }
        Ok(Self { change, patchset })
    }
}

impl fmt::Display for ChangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "refs/changes/{:02}/{}/{}",
            self.change % 100,
            self.change,
            self.patchset
        )
    }
}

/// Credentials for a Gerrit server.
#[derive(Clone)]
pub struct GerritCredentials {
    /// The username.
    pub username: String,

    /// The HTTP password.
    pub password: String,
}

impl GerritCredentials {
    fn authorization(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

impl fmt::Debug for GerritCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GerritCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A client for a Gerrit-style code review server.
#[derive(Debug)]
pub struct GerritClient {
    agent: Agent,
    base_url: String,
    query: String,
    credentials: Option<GerritCredentials>,
}

impl GerritClient {
    /// Creates a client for the server at `base_url`.
    ///
    /// `query` selects the changes considered by
    /// [`changes_accepting_label`](ReviewServer::changes_accepting_label). Without credentials,
    /// only anonymous endpoints are used, and posting reviews will fail.
    pub fn new(
        base_url: &str,
        query: impl Into<String>,
        credentials: Option<GerritCredentials>,
    ) -> Self {
        Self {
            agent: new_agent(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            query: query.into(),
            credentials,
        }
    }

    // Authenticated endpoints live under `/a/`.
    fn endpoint(&self, path: &str) -> String {
        if self.credentials.is_some() {
            format!("{}/a/{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn request_error(url: &str, error: ureq::Error) -> ReviewError {
        ReviewError::Request {
            url: url.to_owned(),
            error: Box::new(error),
        }
    }
}

impl ReviewServer for GerritClient {
    fn changes_accepting_label(&self, label: &str) -> Result<BTreeSet<String>, ReviewError> {
        let url = self.endpoint("changes/");
        debug!("GET {url} (q={})", self.query);
        let mut request = self
            .agent
            .get(&url)
            .query("q", self.query.as_str())
            .query("o", "LABELS")
            .query("o", "CURRENT_REVISION");
        if let Some(credentials) = &self.credentials {
            request = request.header("Authorization", credentials.authorization());
        }
        let mut response = request
            .call()
            .map_err(|error| Self::request_error(&url, error))?;
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|error| Self::request_error(&url, error))?;
        let changes = parse_changes(&body).map_err(|error| ReviewError::Decode {
            url: url.clone(),
            error,
        })?;
        Ok(refs_accepting_label(&changes, label))
    }

    fn post_review(
        &self,
        change_ref: &str,
        message: &str,
        labels: &BTreeMap<String, i32>,
    ) -> Result<(), ReviewError> {
        let ChangeRef { change, patchset } = change_ref.parse()?;
        let url = self.endpoint(&format!("changes/{change}/revisions/{patchset}/review"));
        let body = serde_json::to_string(&ReviewInput { message, labels }).map_err(|error| {
            ReviewError::Encode {
                url: url.clone(),
                error,
            }
        })?;

        debug!("POST {url}");
        let mut request = self
            .agent
            .post(&url)
            .header("Content-Type", "application/json; charset=UTF-8");
        if let Some(credentials) = &self.credentials {
            request = request.header("Authorization", credentials.authorization());
        }
        request
            .send(body)
            .map_err(|error| Self::request_error(&url, error))?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ReviewInput<'a> {
    message: &'a str,
    labels: &'a BTreeMap<String, i32>,
}

#[derive(Debug, Deserialize)]
struct ChangeInfo {
    #[serde(default)]
    current_revision: Option<String>,
    #[serde(default)]
    revisions: HashMap<String, RevisionInfo>,
    #[serde(default)]
    labels: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RevisionInfo {
    #[serde(rename = "ref")]
    reference: String,
}

impl ChangeInfo {
    fn current_ref(&self) -> Option<&str> {
        let revision = self.current_revision.as_ref()?;
        self.revisions
            .get(revision)
            .map(|revision| revision.reference.as_str())
    }
}

fn parse_changes(body: &str) -> Result<Vec<ChangeInfo>, serde_json::Error> {
    let body = body.trim_start();
    let body = body.strip_prefix(XSSI_PREFIX).unwrap_or(body);
    serde_json::from_str(body)
}

fn refs_accepting_label(changes: &[ChangeInfo], label: &str) -> BTreeSet<String> {
    changes
        .iter()
        .filter(|change| change.labels.contains_key(label))
        .filter_map(|change| change.current_ref())
        .map(str::to_owned)
        .collect()
}
