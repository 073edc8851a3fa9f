use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use stampede_core::prelude::ConfigurationError;
use stampede_instruments::CheckKey;

use crate::transport::{HttpRequest, HttpResponse};

/// Longest piece of a response body quoted in a failure reason.
const BODY_EXCERPT_LEN: usize = 120;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[display("GET")]
    Get,
    #[display("POST")]
    Post,
    #[display("PUT")]
    Put,
    #[display("PATCH")]
    Patch,
    #[display("DELETE")]
    Delete,
    #[display("HEAD")]
    Head,
    #[display("OPTIONS")]
    Options,
}

impl FromStr for Method {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(ConfigurationError::new(format!(
                "unsupported HTTP method '{s}'"
            ))),
        }
    }
}

pub type CheckFn = dyn Fn(&HttpResponse) -> anyhow::Result<bool> + Send + Sync;

/// Result of evaluating one [Check] against one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed,
    Failed { reason: String },
}

impl CheckOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, CheckOutcome::Passed)
    }
}

/// A named assertion about a response.
#[derive(Clone)]
pub struct Check {
    description: Arc<str>,
    predicate: Arc<CheckFn>,
}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Check {
    pub fn new(
        description: impl Into<Arc<str>>,
        predicate: impl Fn(&HttpResponse) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::try_new(description, move |r| Ok(predicate(r)))
    }

    /// A check whose predicate can fail. An error counts as a failed check.
    pub fn try_new(
        description: impl Into<Arc<str>>,
        predicate: impl Fn(&HttpResponse) -> anyhow::Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// `is status <expected>`
    pub fn status(expected: u16) -> Self {
        Self::new(format!("is status {expected}"), move |r| r.status == expected)
    }

    /// Same predicate, reported under a different description.
    pub fn with_description(mut self, description: impl Into<Arc<str>>) -> Self {
        self.description = description.into();
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run the predicate against `response`.
    ///
    /// Errors and panics raised by the predicate are turned into a failed outcome, so a broken
    /// check can never take down the virtual user evaluating it.
    pub fn evaluate(&self, response: &HttpResponse) -> CheckOutcome {
        match std::panic::catch_unwind(AssertUnwindSafe(|| (self.predicate)(response))) {
            Ok(Ok(true)) => CheckOutcome::Passed,
            Ok(Ok(false)) => CheckOutcome::Failed {
                reason: format!(
                    "got status {} with body {:?}",
                    response.status,
                    body_excerpt(response)
                ),
            },
            Ok(Err(e)) => CheckOutcome::Failed {
                reason: format!("check returned an error: {e:#}"),
            },
            Err(panic) => CheckOutcome::Failed {
                reason: format!("check panicked: {}", panic_message(&*panic)),
            },
        }
    }
}

/// The message a panic was raised with, if it was raised with a string.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Shorthand for `check.evaluate(response).is_passed()`.
pub fn evaluate(check: &Check, response: &HttpResponse) -> bool {
    check.evaluate(response).is_passed()
}

fn body_excerpt(response: &HttpResponse) -> String {
    let text = response.text();
    let cut = text.char_indices().nth(BODY_EXCERPT_LEN).map(|(idx, _)| idx);
    match cut {
        Some(idx) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}

/// One request in a scenario, plus the checks to run against its response.
#[derive(Debug, Clone)]
pub struct RequestGroup {
    name: Arc<str>,
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    checks: Vec<Check>,
}

impl RequestGroup {
    pub fn new(name: impl Into<Arc<str>>, method: Method, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            checks: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets `Authorization: Bearer <token>`.
    pub fn with_bearer_token(self, token: impl AsRef<str>) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token.as_ref()))
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Resolve the group's path against `base_url` by plain concatenation, so that a base URL with
    /// a path prefix keeps it.
    pub fn request(&self, base_url: &str) -> HttpRequest {
        let base = base_url.trim_end_matches('/');
        let url = if self.path.is_empty() {
            base.to_string()
        } else if self.path.starts_with('/') {
            format!("{base}{}", self.path)
        } else {
            format!("{base}/{}", self.path)
        };

        HttpRequest {
            method: self.method,
            url,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// An ordered list of request groups, run front to back once per iteration of a virtual user.
#[derive(Debug, Clone)]
pub struct Scenario {
    name: Arc<str>,
    groups: Vec<RequestGroup>,
}

impl Scenario {
    pub fn new(
        name: impl Into<Arc<str>>,
        groups: Vec<RequestGroup>,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if groups.is_empty() {
            return Err(ConfigurationError::new(format!(
                "scenario '{name}' has no request groups"
            )));
        }

        let mut group_names = HashSet::new();
        for group in &groups {
            if !group_names.insert(group.name()) {
                return Err(ConfigurationError::new(format!(
                    "request group '{}' is defined more than once",
                    group.name()
                )));
            }

            let mut descriptions = HashSet::new();
            for check in group.checks() {
                if !descriptions.insert(check.description()) {
                    return Err(ConfigurationError::new(format!(
                        "check '{}' is defined more than once in group '{}'",
                        check.description(),
                        group.name()
                    )));
                }
            }
        }

        Ok(Self { name, groups })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[RequestGroup] {
        &self.groups
    }

    /// Number of check outcomes one complete iteration produces.
    pub fn checks_per_iteration(&self) -> usize {
        self.groups.iter().map(|g| g.checks.len()).sum()
    }

    pub(crate) fn check_key(&self, group: &RequestGroup, check: &Check) -> CheckKey {
        CheckKey::new(
            self.name.clone(),
            group.name.clone(),
            check.description.clone(),
        )
    }
}
