use std::time::Duration;

/// The run cannot start because its definition is invalid.
///
/// This is the only error that stops a run. It is raised while the stage schedule, scenario or
/// configuration file is being built, before any virtual user has been started.
#[derive(derive_more::Error, derive_more::Display, Debug, Clone, PartialEq, Eq)]
#[display("Configuration error: {msg}")]
pub struct ConfigurationError {
    msg: String,
}

impl ConfigurationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

/// A request could not be completed.
///
/// Transport errors are recorded against the checks of the request group that issued the
/// request. They never stop the virtual user or the run.
#[derive(derive_more::Error, derive_more::Display, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[display("request timed out after {after:?}")]
    Timeout { after: Duration },
    #[display("connection failed: {detail}")]
    Connect { detail: String },
    #[display("request failed: {detail}")]
    Request { detail: String },
}

/// A virtual user did not finish its in-flight iteration within the grace period and was
/// aborted.
#[derive(derive_more::Error, derive_more::Display, Debug, Clone, PartialEq, Eq)]
#[display("Virtual user {virtual_user} did not stop within {grace:?}, its partial iteration was discarded")]
pub struct ShutdownTimeoutError {
    pub virtual_user: String,
    pub grace: Duration,
}
