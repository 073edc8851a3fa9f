use std::sync::Arc;
use std::time::Duration;

use stampede_core::prelude::ShutdownHandle;
use stampede_instruments::Reporter;

/// Run-wide values, handed to the code that builds the transport.
#[derive(Debug)]
pub struct RunnerContext {
    reporter: Arc<Reporter>,
    base_url: Arc<str>,
    request_timeout: Duration,
    shutdown_handle: ShutdownHandle,
}

impl RunnerContext {
    pub(crate) fn new(
        reporter: Arc<Reporter>,
        base_url: Arc<str>,
        request_timeout: Duration,
        shutdown_handle: ShutdownHandle,
    ) -> Self {
        Self {
            reporter,
            base_url,
            request_timeout,
            shutdown_handle,
        }
    }

    pub fn reporter(&self) -> Arc<Reporter> {
        self.reporter.clone()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn shared_base_url(&self) -> Arc<str> {
        self.base_url.clone()
    }

    /// Longest a single request may take before it counts as a transport failure.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// End the run early. Virtual users finish their current iteration and the results so far
    /// are reported.
    pub fn force_stop_scenario(&self) {
        log::info!("Scenario stop requested");
        self.shutdown_handle.shutdown();
    }

    pub(crate) fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown_handle
    }
}
