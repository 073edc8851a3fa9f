use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stampede_core::prelude::ConfigurationError;

use crate::cli::StampedeScenarioCli;
use crate::config::RunConfig;
use crate::context::RunnerContext;
use crate::coordinator::RunSettings;
use crate::scenario::{RequestGroup, Scenario};
use crate::stages::{Stage, StageSchedule};
use crate::transport::Transport;
use crate::types::StampedeResult;

/// Builds the transport every virtual user in the run sends its requests through.
pub type TransportFactory =
    Box<dyn FnOnce(&RunnerContext) -> StampedeResult<Arc<dyn Transport>> + Send + 'static>;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The builder for a scenario definition.
///
/// This must be used at the start of a test to define the scenario that you want to run.
pub struct ScenarioDefinitionBuilder {
    /// The name of the scenario, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// This value is initialised for you and you cannot change it.
    #[doc(hidden)]
    cli: StampedeScenarioCli,
    /// Used when `--base-url` is not given.
    default_base_url: Option<String>,
    stages: Vec<Stage>,
    start_target: usize,
    /// The request groups of the scenario, in the order each virtual user runs them.
    groups: Vec<RequestGroup>,
    settings: RunSettings,
    request_timeout: Duration,
    transport_fn: Option<TransportFactory>,
}

/// A validated scenario definition, ready to run.
pub struct ScenarioDefinition {
    pub name: String,
    pub base_url: String,
    pub schedule: StageSchedule,
    pub scenario: Scenario,
    pub settings: RunSettings,
    pub request_timeout: Duration,
    pub no_progress: bool,
    pub run_summary_path: Option<PathBuf>,
    pub(crate) transport_fn: TransportFactory,
}

impl ScenarioDefinitionBuilder {
    /// Initialise a new scenario definition from the scenario name and command line arguments.
    /// See the [ScenarioDefinitionBuilder::name] for more information about the name.
    pub fn new(name: &str, cli: StampedeScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            default_base_url: None,
            stages: Vec::new(),
            start_target: 0,
            groups: Vec::new(),
            settings: RunSettings::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            transport_fn: None,
        }
    }

    /// Same as [ScenarioDefinitionBuilder::new], parsing the command line and initialising
    /// logging first.
    pub fn new_with_init(name: &str) -> Self {
        Self::new(name, crate::init::init())
    }

    /// Everything but the transport, taken from a run configuration file.
    ///
    /// Values given on the command line take precedence over the file.
    pub fn from_config(cli: StampedeScenarioCli, mut config: RunConfig) -> StampedeResult<Self> {
        // The file's base URL may name variables that are only needed when it is used.
        if cli.base_url.is_some() {
            config.base_url = None;
        }
        let resolved = config.resolve()?;

        let mut builder = Self::new(resolved.scenario.name(), cli)
            .with_stages(resolved.schedule.stages().to_vec())
            .with_start_target(resolved.schedule.start_target());
        builder.default_base_url = resolved.base_url;
        builder.groups = resolved.scenario.groups().to_vec();
        builder.settings = resolved.settings;
        if let Some(timeout) = resolved.request_timeout {
            builder.request_timeout = timeout;
        }

        Ok(builder)
    }

    /// Base URL for the service under test when none is given with `--base-url`.
    pub fn with_default_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.default_base_url = Some(base_url.into());
        self
    }

    /// Append a stage to the ramp profile.
    pub fn with_stage(mut self, duration: Duration, target: usize) -> Self {
        self.stages.push(Stage::new(duration, target));
        self
    }

    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Number of virtual users the first stage ramps from. Defaults to 0.
    pub fn with_start_target(mut self, start_target: usize) -> Self {
        self.start_target = start_target;
        self
    }

    /// Append a request group to the scenario.
    pub fn with_group(mut self, group: RequestGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn with_iteration_delay(mut self, delay: Duration) -> Self {
        self.settings.iteration_delay = delay;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.settings.tick_interval = interval;
        self
    }

    /// How long a stopped virtual user may take to finish its iteration.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.settings.grace_period = grace_period;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the function that creates the transport. It is called once, before any virtual user
    /// starts, and an error from it stops the run from starting.
    pub fn use_transport(
        mut self,
        transport_fn: impl FnOnce(&RunnerContext) -> StampedeResult<Arc<dyn Transport>>
            + Send
            + 'static,
    ) -> Self {
        self.transport_fn = Some(Box::new(transport_fn));
        self
    }

    pub(crate) fn build(self) -> StampedeResult<ScenarioDefinition> {
        let base_url = self
            .cli
            .base_url
            .or(self.default_base_url)
            .ok_or_else(|| {
                ConfigurationError::new(
                    "no base URL, set one with --base-url or in the scenario definition",
                )
            })?;
        validate_base_url(&base_url)?;

        if self.settings.tick_interval.is_zero() {
            return Err(
                ConfigurationError::new("the tick interval must be greater than zero").into(),
            );
        }

        let schedule = StageSchedule::new(self.stages)?.with_start_target(self.start_target);
        let scenario = Scenario::new(self.name.as_str(), self.groups)?;

        let transport_fn = self.transport_fn.ok_or_else(|| {
            ConfigurationError::new("no transport, set one with use_transport")
        })?;

        Ok(ScenarioDefinition {
            name: self.name,
            base_url,
            schedule,
            scenario,
            settings: self.settings,
            request_timeout: self.request_timeout,
            no_progress: self.cli.no_progress,
            run_summary_path: self.cli.run_summary_path,
            transport_fn,
        })
    }
}

fn validate_base_url(base_url: &str) -> Result<(), ConfigurationError> {
    let url = url::Url::parse(base_url)
        .map_err(|e| ConfigurationError::new(format!("invalid base URL '{base_url}': {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigurationError::new(format!(
            "base URL '{base_url}' must use http or https, not {scheme}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{Check, Method};
    use crate::transport::{HttpRequest, HttpResponse};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use stampede_core::prelude::TransportError;

    struct OkTransport;

    impl Transport for OkTransport {
        fn send(&self, _: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
            async { Ok(HttpResponse::new(200)) }.boxed()
        }
    }

    fn builder(cli: StampedeScenarioCli) -> ScenarioDefinitionBuilder {
        ScenarioDefinitionBuilder::new("books", cli)
            .with_stage(Duration::from_secs(10), 5)
            .with_group(
                RequestGroup::new("get", Method::Get, "/book").with_check(Check::status(200)),
            )
            .use_transport(|_| Ok(Arc::new(OkTransport)))
    }

    fn configuration_error(result: StampedeResult<ScenarioDefinition>) -> String {
        let err = result.err().expect("expected the build to fail");
        err.downcast_ref::<ConfigurationError>()
            .expect("expected a configuration error")
            .message()
            .to_string()
    }

    #[test]
    fn cli_base_url_overrides_default() {
        let cli = StampedeScenarioCli {
            base_url: Some("http://from-cli:8080".to_string()),
            ..Default::default()
        };

        let definition = builder(cli)
            .with_default_base_url("http://default:8080")
            .build()
            .unwrap();
        assert_eq!("http://from-cli:8080", definition.base_url);

        let definition = builder(StampedeScenarioCli::default())
            .with_default_base_url("http://default:8080")
            .build()
            .unwrap();
        assert_eq!("http://default:8080", definition.base_url);
    }

    #[test]
    fn missing_base_url_is_rejected() {
        let message = configuration_error(builder(StampedeScenarioCli::default()).build());
        assert!(message.starts_with("no base URL"), "{message}");
    }

    #[test]
    fn bad_base_url_is_rejected() {
        let message = configuration_error(
            builder(StampedeScenarioCli::default())
                .with_default_base_url("not a url")
                .build(),
        );
        assert!(message.starts_with("invalid base URL"), "{message}");

        let message = configuration_error(
            builder(StampedeScenarioCli::default())
                .with_default_base_url("ftp://books")
                .build(),
        );
        assert!(message.contains("must use http or https"), "{message}");
    }

    #[test]
    fn missing_stages_are_rejected() {
        let result = ScenarioDefinitionBuilder::new("books", StampedeScenarioCli::default())
            .with_default_base_url("http://books")
            .with_group(RequestGroup::new("get", Method::Get, "/book"))
            .use_transport(|_| Ok(Arc::new(OkTransport)))
            .build();

        assert_eq!("at least one stage is required", configuration_error(result));
    }

    #[test]
    fn missing_transport_is_rejected() {
        let result = ScenarioDefinitionBuilder::new("books", StampedeScenarioCli::default())
            .with_default_base_url("http://books")
            .with_stage(Duration::from_secs(1), 1)
            .with_group(RequestGroup::new("get", Method::Get, "/book"))
            .build();

        assert!(configuration_error(result).starts_with("no transport"));
    }

    #[test]
    fn from_config_keeps_settings() {
        let config = RunConfig::from_toml_str(
            r#"
baseUrl = "http://books:31700"
iterationDelaySeconds = 0.25
gracePeriodSeconds = 5
requestTimeoutSeconds = 2
startTarget = 3
stages = [{ duration = "1m", target = 10 }]

[scenario]
name = "from_file"

[[scenario.groups]]
name = "get"
method = "GET"
path = "/book"
checks = [{ status = 200 }]
"#,
        )
        .unwrap();

        let definition =
            ScenarioDefinitionBuilder::from_config(StampedeScenarioCli::default(), config)
                .unwrap()
                .use_transport(|_| Ok(Arc::new(OkTransport)))
                .build()
                .unwrap();

        assert_eq!("from_file", definition.name);
        assert_eq!("http://books:31700", definition.base_url);
        assert_eq!(3, definition.schedule.start_target());
        assert_eq!(Duration::from_millis(250), definition.settings.iteration_delay);
        assert_eq!(Duration::from_secs(5), definition.settings.grace_period);
        assert_eq!(Duration::from_secs(2), definition.request_timeout);
        assert_eq!(1, definition.scenario.checks_per_iteration());
    }

    #[test]
    fn cli_base_url_skips_the_config_base_url() {
        let config = RunConfig::from_toml_str(
            r#"
baseUrl = "${STAMPEDE_TEST_BASE_URL_NEVER_SET}"
stages = [{ duration = "10s", target = 1 }]

[scenario]
name = "from_file"

[[scenario.groups]]
name = "get"
method = "GET"
path = "/book"
"#,
        )
        .unwrap();
        let cli = StampedeScenarioCli {
            base_url: Some("http://localhost:31700".to_string()),
            ..Default::default()
        };

        let definition = ScenarioDefinitionBuilder::from_config(cli, config.clone())
            .unwrap()
            .use_transport(|_| Ok(Arc::new(OkTransport)))
            .build()
            .unwrap();
        assert_eq!("http://localhost:31700", definition.base_url);

        // Without the override the variable is still required.
        let err = ScenarioDefinitionBuilder::from_config(StampedeScenarioCli::default(), config)
            .err()
            .expect("expected an unset variable to be rejected");
        assert!(err.to_string().contains("is not set"), "{err}");
    }
}
