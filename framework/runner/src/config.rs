//! Declarative run configuration, read from a TOML file.
//!
//! ```toml
//! baseUrl = "${BOOKS_URL}"
//! iterationDelaySeconds = 1
//!
//! stages = [
//!     { duration = "30s", target = 100 },
//!     { duration = "1m", target = 100 },
//!     { duration = 30, target = 0 },
//! ]
//!
//! [scenario]
//! name = "guest_only"
//!
//! [[scenario.groups]]
//! name = "GET /book with guest token"
//! method = "GET"
//! path = "/book"
//! headers = { Authorization = "Bearer ${GUEST_TOKEN}" }
//! checks = [{ status = 200 }]
//! ```
//!
//! `${NAME}` is replaced with the value of the environment variable `NAME` in `baseUrl` and in
//! header values. A variable that is not set is a configuration error.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use stampede_core::prelude::ConfigurationError;

use crate::coordinator::RunSettings;
use crate::scenario::{Check, Method, RequestGroup, Scenario};
use crate::stages::{Stage, StageSchedule};

fn default_iteration_delay_seconds() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunConfig {
    /// Root of the service under test. May be left out here and given on the command line.
    pub base_url: Option<String>,
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub start_target: i64,
    #[serde(default = "default_iteration_delay_seconds")]
    pub iteration_delay_seconds: f64,
    pub tick_interval_millis: Option<u64>,
    pub grace_period_seconds: Option<f64>,
    pub request_timeout_seconds: Option<f64>,
    pub scenario: ScenarioConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub duration: DurationConfig,
    pub target: i64,
}

/// Either a humantime string such as `"1m 30s"` or a number of seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationConfig {
    Seconds(f64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    pub name: String,
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

/// One expectation about a response. Exactly one of `status`, `bodyContains` or `headerPresent`
/// must be set.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CheckConfig {
    pub description: Option<String>,
    pub status: Option<u16>,
    pub body_contains: Option<String>,
    pub header_present: Option<String>,
}

/// Everything a run needs, validated.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub base_url: Option<String>,
    pub schedule: StageSchedule,
    pub scenario: Scenario,
    pub settings: RunSettings,
    pub request_timeout: Option<Duration>,
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(content).map_err(|e| ConfigurationError::new(e.to_string()))
    }

    /// Validate the configuration and expand environment variables from the process environment.
    pub fn resolve(self) -> Result<ResolvedConfig, ConfigurationError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with(
        self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ResolvedConfig, ConfigurationError> {
        let stages = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, stage)| stage.to_stage().map_err(|e| prefixed(&format!("stage {i}"), e)))
            .collect::<Result<Vec<_>, _>>()?;
        let start_target = non_negative("startTarget", self.start_target)?;
        let schedule = StageSchedule::new(stages)?.with_start_target(start_target);

        let groups = self
            .scenario
            .groups
            .into_iter()
            .map(|group| group.into_request_group(&lookup))
            .collect::<Result<Vec<_>, _>>()?;
        let scenario = Scenario::new(self.scenario.name, groups)?;

        let mut settings = RunSettings {
            iteration_delay: seconds("iterationDelaySeconds", self.iteration_delay_seconds)?,
            ..Default::default()
        };
        if let Some(millis) = self.tick_interval_millis {
            if millis == 0 {
                return Err(ConfigurationError::new(
                    "tickIntervalMillis must be greater than zero",
                ));
            }
            settings.tick_interval = Duration::from_millis(millis);
        }
        if let Some(grace) = self.grace_period_seconds {
            settings.grace_period = seconds("gracePeriodSeconds", grace)?;
        }

        let request_timeout = self
            .request_timeout_seconds
            .map(|t| seconds("requestTimeoutSeconds", t))
            .transpose()?;

        let base_url = self
            .base_url
            .map(|url| expand_env(&url, &lookup))
            .transpose()?;

        Ok(ResolvedConfig {
            base_url,
            schedule,
            scenario,
            settings,
            request_timeout,
        })
    }
}

impl StageConfig {
    fn to_stage(&self) -> Result<Stage, ConfigurationError> {
        let duration = match &self.duration {
            DurationConfig::Seconds(s) => seconds("duration", *s)?,
            DurationConfig::Text(text) => humantime::parse_duration(text).map_err(|e| {
                ConfigurationError::new(format!("invalid duration '{text}': {e}"))
            })?,
        };

        Ok(Stage::new(duration, non_negative("target", self.target)?))
    }
}

impl GroupConfig {
    fn into_request_group(
        self,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<RequestGroup, ConfigurationError> {
        let context = format!("group '{}'", self.name);
        let method: Method = self.method.parse().map_err(|e| prefixed(&context, e))?;

        let mut group = RequestGroup::new(self.name, method, self.path);
        for (name, value) in self.headers {
            let value = expand_env(&value, lookup).map_err(|e| prefixed(&context, e))?;
            group = group.with_header(name, value);
        }
        if let Some(body) = self.body {
            group = group.with_body(body);
        }
        for check in self.checks {
            group = group.with_check(check.into_check().map_err(|e| prefixed(&context, e))?);
        }

        Ok(group)
    }
}

impl CheckConfig {
    fn into_check(self) -> Result<Check, ConfigurationError> {
        let check = match (self.status, self.body_contains, self.header_present) {
            (Some(status), None, None) => Check::status(status),
            (None, Some(needle), None) => Check::new(
                format!("body contains '{needle}'"),
                move |r| r.text().contains(needle.as_str()),
            ),
            (None, None, Some(header)) => Check::new(
                format!("has header '{header}'"),
                move |r| r.header(&header).is_some(),
            ),
            _ => {
                return Err(ConfigurationError::new(
                    "a check needs exactly one of status, bodyContains or headerPresent",
                ))
            }
        };

        Ok(match self.description {
            Some(description) => check.with_description(description),
            None => check,
        })
    }
}

fn non_negative(field: &str, value: i64) -> Result<usize, ConfigurationError> {
    usize::try_from(value)
        .map_err(|_| ConfigurationError::new(format!("{field} must not be negative, got {value}")))
}

fn seconds(field: &str, value: f64) -> Result<Duration, ConfigurationError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        ConfigurationError::new(format!(
            "{field} must be a non-negative number of seconds, got {value}"
        ))
    })
}

fn prefixed(context: &str, e: ConfigurationError) -> ConfigurationError {
    ConfigurationError::new(format!("{context}: {}", e.message()))
}

/// Replace every `${NAME}` in `input` with the value `lookup` returns for `NAME`.
pub fn expand_env(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigurationError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            ConfigurationError::new(format!("unterminated variable reference in '{input}'"))
        })?;

        let name = &after[..end];
        if name.is_empty() {
            return Err(ConfigurationError::new(format!(
                "empty variable reference in '{input}'"
            )));
        }
        let value = lookup(name).ok_or_else(|| {
            ConfigurationError::new(format!("environment variable {name} is not set"))
        })?;
        out.push_str(&value);

        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}
