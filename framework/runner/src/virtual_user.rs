use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stampede_core::prelude::DelegatedShutdownListener;
use stampede_instruments::{report_operation, IterationTally, OperationRecord, Reporter};

use crate::scenario::{CheckOutcome, Scenario};
use crate::transport::Transport;

/// One simulated user.
///
/// Runs the scenario front to back, commits the outcomes, waits for the iteration delay and
/// starts again. The stop listener is checked between iterations and raced against the delay, so
/// a stopped user always finishes the iteration it is in and then starts no more.
pub struct VirtualUser {
    id: String,
    scenario: Arc<Scenario>,
    base_url: Arc<str>,
    transport: Arc<dyn Transport>,
    reporter: Arc<Reporter>,
    iteration_delay: Duration,
    stop_listener: DelegatedShutdownListener,
    in_iteration: Arc<AtomicBool>,
}

impl VirtualUser {
    pub fn new(
        id: String,
        scenario: Arc<Scenario>,
        base_url: Arc<str>,
        transport: Arc<dyn Transport>,
        reporter: Arc<Reporter>,
        iteration_delay: Duration,
        stop_listener: DelegatedShutdownListener,
    ) -> Self {
        Self {
            id,
            scenario,
            base_url,
            transport,
            reporter,
            iteration_delay,
            stop_listener,
            in_iteration: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Set while an iteration is running and cleared once it has been committed. If the user is
    /// aborted while this is set, the iteration is lost.
    pub fn in_iteration_flag(&self) -> Arc<AtomicBool> {
        self.in_iteration.clone()
    }

    /// Run until stopped. Returns the number of iterations that were committed.
    pub async fn run(mut self) -> u64 {
        log::debug!("Starting virtual user {}", self.id);

        let mut iterations = 0;
        loop {
            if self.stop_listener.should_shutdown() {
                break;
            }

            self.run_iteration().await;
            iterations += 1;

            if self.stop_listener.should_shutdown() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.iteration_delay) => {}
                _ = self.stop_listener.wait_for_shutdown() => break,
            }
        }

        log::debug!(
            "Stopping virtual user {} after {} iterations",
            self.id,
            iterations
        );
        iterations
    }

    /// Execute every request group once and commit the outcomes.
    pub async fn run_iteration(&self) {
        self.in_iteration.store(true, Ordering::Release);

        let mut tally = IterationTally::new();
        for group in self.scenario.groups() {
            let request = group.request(&self.base_url);
            log::trace!("{} sending {} {}", self.id, request.method, request.url);

            let record = OperationRecord::new(group.name());
            let response = self.transport.send(request).await;
            report_operation(&self.reporter, record, &response);

            match response {
                Ok(response) => {
                    for check in group.checks() {
                        let key = self.scenario.check_key(group, check);
                        match check.evaluate(&response) {
                            CheckOutcome::Passed => tally.record_pass(key),
                            CheckOutcome::Failed { reason } => {
                                log::trace!("{} check failed [{}]: {}", self.id, key, reason);
                                tally.record_fail(key, reason);
                            }
                        }
                    }
                }
                Err(e) => {
                    log::debug!(
                        "{} request for group '{}' failed: {}",
                        self.id,
                        group.name(),
                        e
                    );
                    tally.mark_failed();
                    for check in group.checks() {
                        tally.record_fail(
                            self.scenario.check_key(group, check),
                            format!("transport error: {e}"),
                        );
                    }
                }
            }
        }

        self.reporter.commit_iteration(tally);
        self.in_iteration.store(false, Ordering::Release);
    }
}
