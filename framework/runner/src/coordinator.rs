use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use stampede_core::prelude::{DelegatedShutdownListener, ShutdownHandle, ShutdownTimeoutError};
use stampede_instruments::{Reporter, RunReport};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use crate::scenario::{panic_message, Scenario};
use crate::stages::{ScheduleTarget, StageSchedule};
use crate::transport::Transport;
use crate::virtual_user::VirtualUser;

/// Timing knobs for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    /// Pause between two iterations of the same virtual user.
    pub iteration_delay: Duration,
    /// How often the coordinator compares the running users with the schedule.
    pub tick_interval: Duration,
    /// How long a stopped user may take to finish its iteration before it is aborted.
    pub grace_period: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            iteration_delay: Duration::from_secs(1),
            tick_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum RunState {
    Idle,
    Running,
    Draining,
    Complete,
}

impl RunState {
    fn can_become(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Idle, RunState::Running)
                | (RunState::Running, RunState::Draining)
                | (RunState::Draining, RunState::Complete)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOutcome {
    pub report: RunReport,
    pub peak_virtual_users: usize,
    pub final_state: RunState,
    /// True if the run ended early because of an external shutdown.
    pub interrupted: bool,
}

struct VirtualUserHandle {
    id: String,
    stop: ShutdownHandle,
    in_iteration: Arc<AtomicBool>,
    join: JoinHandle<u64>,
}

struct StoppingUser {
    handle: VirtualUserHandle,
    deadline: Instant,
}

/// Starts and stops virtual users so that the number running follows the stage schedule.
pub struct RunCoordinator {
    schedule: StageSchedule,
    scenario: Arc<Scenario>,
    base_url: Arc<str>,
    transport: Arc<dyn Transport>,
    reporter: Arc<Reporter>,
    settings: RunSettings,
    state: RunState,
    active: Vec<VirtualUserHandle>,
    stopping: Vec<StoppingUser>,
    /// Users that have been aborted but not joined yet.
    aborting: Vec<VirtualUserHandle>,
    next_id: usize,
    peak: usize,
    active_gauge: Arc<AtomicUsize>,
}

impl RunCoordinator {
    pub fn new(
        schedule: StageSchedule,
        scenario: Arc<Scenario>,
        base_url: Arc<str>,
        transport: Arc<dyn Transport>,
        reporter: Arc<Reporter>,
        settings: RunSettings,
    ) -> Self {
        Self {
            schedule,
            scenario,
            base_url,
            transport,
            reporter,
            settings,
            state: RunState::Idle,
            active: Vec::new(),
            stopping: Vec::new(),
            aborting: Vec::new(),
            next_id: 0,
            peak: 0,
            active_gauge: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of users currently running and not asked to stop. Updated on every tick, for the
    /// progress bar and resource monitor.
    pub fn active_gauge(&self) -> Arc<AtomicUsize> {
        self.active_gauge.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Drive the run to completion.
    ///
    /// `external_shutdown` ends the run early. Users are drained the same way as when the schedule
    /// completes, so whatever has been recorded so far is still reported.
    pub async fn run(
        mut self,
        mut external_shutdown: DelegatedShutdownListener,
    ) -> CoordinatorOutcome {
        self.transition(RunState::Running);

        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut interrupted = false;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = external_shutdown.wait_for_shutdown() => {
                    log::info!("Shutdown requested, stopping the run early");
                    interrupted = true;
                    break;
                }
            }

            self.reap();

            match self.schedule.target_at(started.elapsed()) {
                ScheduleTarget::Active(target) => self.scale_to(target),
                ScheduleTarget::Complete => break,
            }
        }

        self.transition(RunState::Draining);
        self.drain().await;

        self.transition(RunState::Complete);
        let report = self.reporter.finalize();

        CoordinatorOutcome {
            report,
            peak_virtual_users: self.peak,
            final_state: self.state,
            interrupted,
        }
    }

    fn transition(&mut self, next: RunState) {
        if !self.state.can_become(next) {
            log::error!("Invalid run state transition {} -> {}", self.state, next);
            return;
        }

        log::info!("Run state {} -> {}", self.state, next);
        self.state = next;
    }

    fn scale_to(&mut self, target: usize) {
        let active = self.active.len();
        if active < target {
            log::debug!("Scaling up from {} to {} virtual users", active, target);
            for _ in active..target {
                self.spawn_virtual_user();
            }
        } else if active > target {
            log::debug!("Scaling down from {} to {} virtual users", active, target);
            let deadline = Instant::now() + self.settings.grace_period;
            // Most recently started users are stopped first.
            for handle in self.active.drain(target..).rev() {
                handle.stop.shutdown();
                self.stopping.push(StoppingUser { handle, deadline });
            }
        }

        self.peak = self.peak.max(self.active.len());
        self.active_gauge.store(self.active.len(), Ordering::Relaxed);
    }

    fn spawn_virtual_user(&mut self) {
        let id = format!("vu-{}", self.next_id);
        self.next_id += 1;

        let stop = ShutdownHandle::new();
        let user = VirtualUser::new(
            id.clone(),
            self.scenario.clone(),
            self.base_url.clone(),
            self.transport.clone(),
            self.reporter.clone(),
            self.settings.iteration_delay,
            stop.new_listener(),
        );
        let in_iteration = user.in_iteration_flag();
        let join = tokio::spawn(user.run());

        self.active.push(VirtualUserHandle {
            id,
            stop,
            in_iteration,
            join,
        });
    }

    /// Join users that have finished and abort stopped users that are past their deadline.
    ///
    /// Aborted users are only joined on a later tick, so a user stuck in a blocking check never
    /// holds up the schedule.
    fn reap(&mut self) {
        for mut handle in std::mem::take(&mut self.active) {
            match try_join(&mut handle.join) {
                Some(Ok(iterations)) => log::error!(
                    "Virtual user {} exited after {} iterations without being stopped, it will be \
                     replaced",
                    handle.id,
                    iterations
                ),
                Some(Err(e)) => log::error!(
                    "Virtual user {} {}, it will be replaced",
                    handle.id,
                    describe_join_error(e)
                ),
                None => self.active.push(handle),
            }
        }

        let now = Instant::now();
        for mut stopping in std::mem::take(&mut self.stopping) {
            if let Some(result) = try_join(&mut stopping.handle.join) {
                log_stopped(&stopping.handle, result);
            } else if now >= stopping.deadline {
                stopping.handle.join.abort();
                self.aborting.push(stopping.handle);
            } else {
                self.stopping.push(stopping);
            }
        }

        for mut handle in std::mem::take(&mut self.aborting) {
            match try_join(&mut handle.join) {
                Some(result) => self.settle_aborted(&handle, result),
                None => self.aborting.push(handle),
            }
        }
    }

    async fn drain(&mut self) {
        let deadline = Instant::now() + self.settings.grace_period;
        for handle in self.active.drain(..) {
            handle.stop.shutdown();
            self.stopping.push(StoppingUser { handle, deadline });
        }
        self.active_gauge.store(0, Ordering::Relaxed);

        log::info!(
            "Waiting for {} virtual users to finish their current iteration",
            self.stopping.len() + self.aborting.len()
        );

        for mut stopping in std::mem::take(&mut self.stopping) {
            match tokio::time::timeout_at(stopping.deadline, &mut stopping.handle.join).await {
                Ok(result) => log_stopped(&stopping.handle, result),
                Err(_) => {
                    stopping.handle.join.abort();
                    self.aborting.push(stopping.handle);
                }
            }
        }

        // An abort only lands at the next await point, wait for it to land.
        for mut handle in std::mem::take(&mut self.aborting) {
            let result = (&mut handle.join).await;
            self.settle_aborted(&handle, result);
        }
    }

    /// Account for a user that was aborted. Its iteration is discarded only if the abort cut it
    /// short.
    fn settle_aborted(&self, handle: &VirtualUserHandle, result: Result<u64, JoinError>) {
        match result {
            Err(e) if e.is_cancelled() => {
                if handle.in_iteration.load(Ordering::Acquire) {
                    self.reporter.record_discarded_iteration();
                    log::warn!(
                        "{}",
                        ShutdownTimeoutError {
                            virtual_user: handle.id.clone(),
                            grace: self.settings.grace_period,
                        }
                    );
                } else {
                    log::debug!("Virtual user {} aborted between iterations", handle.id);
                }
            }
            result => log_stopped(handle, result),
        }
    }
}

/// The result of a task that has already finished, without waiting for one that has not.
fn try_join(join: &mut JoinHandle<u64>) -> Option<Result<u64, JoinError>> {
    if !join.is_finished() {
        return None;
    }
    join.now_or_never()
}

fn log_stopped(handle: &VirtualUserHandle, result: Result<u64, JoinError>) {
    match result {
        Ok(iterations) => log::trace!(
            "Virtual user {} stopped after {} iterations",
            handle.id,
            iterations
        ),
        Err(e) => log::error!("Virtual user {} {}", handle.id, describe_join_error(e)),
    }
}

fn describe_join_error(e: JoinError) -> String {
    if e.is_panic() {
        format!("panicked: {}", panic_message(&*e.into_panic()))
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{Check, Method, RequestGroup};
    use crate::stages::Stage;
    use crate::transport::{HttpRequest, HttpResponse};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use stampede_core::prelude::TransportError;
    use stampede_instruments::ReportConfig;

    struct StatusTransport(u16);

    impl Transport for StatusTransport {
        fn send(&self, _: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
            let status = self.0;
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(HttpResponse::new(status))
            }
            .boxed()
        }
    }

    /// Never answers.
    struct HangingTransport;

    impl Transport for HangingTransport {
        fn send(&self, _: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
            futures::future::pending().boxed()
        }
    }

    fn scenario() -> Arc<Scenario> {
        Arc::new(
            Scenario::new(
                "books",
                vec![
                    RequestGroup::new("get", Method::Get, "/book")
                        .with_check(Check::status(200))
                        .with_check(Check::new("is empty", |r| r.body.is_empty())),
                    RequestGroup::new("head", Method::Head, "/book")
                        .with_check(Check::status(200)),
                ],
            )
            .unwrap(),
        )
    }

    fn coordinator(
        stages: Vec<Stage>,
        transport: Arc<dyn Transport>,
        grace_period: Duration,
    ) -> RunCoordinator {
        RunCoordinator::new(
            StageSchedule::new(stages).unwrap(),
            scenario(),
            "http://books.test".into(),
            transport,
            Arc::new(ReportConfig::default().init()),
            RunSettings {
                iteration_delay: Duration::from_millis(500),
                tick_interval: Duration::from_secs(1),
                grace_period,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn follows_the_schedule_and_completes() {
        let coordinator = coordinator(
            vec![
                Stage::new(Duration::from_secs(10), 4),
                Stage::new(Duration::from_secs(10), 4),
                Stage::new(Duration::from_secs(10), 0),
            ],
            Arc::new(StatusTransport(200)),
            Duration::from_secs(30),
        );
        let gauge = coordinator.active_gauge();
        let handle = ShutdownHandle::new();

        let outcome = coordinator.run(handle.new_listener()).await;

        assert_eq!(RunState::Complete, outcome.final_state);
        assert!(!outcome.interrupted);
        assert_eq!(4, outcome.peak_virtual_users);
        assert_eq!(0, gauge.load(Ordering::Relaxed));

        let report = outcome.report;
        assert!(report.iterations_completed > 0);
        assert_eq!(0, report.checks_failed);
        assert_eq!(0, report.iterations_discarded);
        assert_eq!(report.iterations_completed * 3, report.checks_passed);
    }

    #[tokio::test(start_paused = true)]
    async fn every_iteration_counts_all_its_checks() {
        let coordinator = coordinator(
            vec![Stage::new(Duration::from_secs(20), 10)],
            Arc::new(StatusTransport(500)),
            Duration::from_secs(30),
        );

        let handle = ShutdownHandle::new();
        let outcome = coordinator.run(handle.new_listener()).await;

        // The body check still passes, both status checks fail.
        let report = outcome.report;
        assert!(report.iterations_completed > 0);
        assert_eq!(report.iterations_completed, report.checks_passed);
        assert_eq!(report.iterations_completed * 2, report.checks_failed);
        assert_eq!(
            report.iterations_completed,
            report.check("head", "is status 200").unwrap().failed
        );
        assert!(report.has_failures());
    }

    #[tokio::test(start_paused = true)]
    async fn users_past_the_grace_period_are_aborted() {
        let coordinator = coordinator(
            vec![Stage::new(Duration::from_secs(3), 2)],
            Arc::new(HangingTransport),
            Duration::from_secs(2),
        );

        let handle = ShutdownHandle::new();
        let outcome = coordinator.run(handle.new_listener()).await;

        assert_eq!(RunState::Complete, outcome.final_state);
        assert_eq!(0, outcome.report.iterations_completed);
        assert_eq!(0, outcome.report.checks_passed + outcome.report.checks_failed);
        assert_eq!(outcome.peak_virtual_users as u64, outcome.report.iterations_discarded);
    }

    #[tokio::test(start_paused = true)]
    async fn external_shutdown_drains_early() {
        let coordinator = coordinator(
            vec![
                Stage::new(Duration::ZERO, 5),
                Stage::new(Duration::from_secs(3600), 5),
            ],
            Arc::new(StatusTransport(200)),
            Duration::from_secs(30),
        );
        let handle = ShutdownHandle::new();
        let listener = handle.new_listener();

        let stopper = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            stopper.shutdown();
        });

        let started = Instant::now();
        let outcome = coordinator.run(listener).await;

        assert!(outcome.interrupted);
        assert_eq!(RunState::Complete, outcome.final_state);
        assert!(started.elapsed() < Duration::from_secs(120));
        assert_eq!(5, outcome.peak_virtual_users);
        assert!(outcome.report.iterations_completed > 0);
        assert_eq!(0, outcome.report.iterations_discarded);
        assert_eq!(outcome.report.iterations_completed * 3, outcome.report.checks_passed);
    }

    /// Answers straight away and counts the requests it saw.
    struct CountingTransport(Arc<AtomicUsize>);

    impl Transport for CountingTransport {
        fn send(&self, _: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            async { Ok(HttpResponse::new(200)) }.boxed()
        }
    }

    struct PanickingTransport(Arc<AtomicUsize>);

    impl Transport for PanickingTransport {
        fn send(&self, _: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("connection pool poisoned");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn iteration_that_finishes_after_the_abort_is_not_discarded() {
        // The check blocks its worker thread well past the grace period, so the abort can only
        // land once the iteration has already been committed.
        let scenario = Scenario::new(
            "books",
            vec![RequestGroup::new("get", Method::Get, "/book").with_check(Check::new(
                "slow check",
                |_| {
                    std::thread::sleep(Duration::from_millis(1500));
                    true
                },
            ))],
        )
        .unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let coordinator = RunCoordinator::new(
            StageSchedule::new(vec![
                Stage::new(Duration::ZERO, 1),
                Stage::new(Duration::from_millis(500), 1),
                Stage::new(Duration::ZERO, 0),
                Stage::new(Duration::from_secs(2), 0),
            ])
            .unwrap(),
            Arc::new(scenario),
            "http://books.test".into(),
            Arc::new(CountingTransport(requests.clone())),
            Arc::new(ReportConfig::default().init()),
            RunSettings {
                iteration_delay: Duration::from_millis(500),
                tick_interval: Duration::from_millis(100),
                grace_period: Duration::from_millis(200),
            },
        );

        let handle = ShutdownHandle::new();
        let outcome = coordinator.run(handle.new_listener()).await;

        let report = outcome.report;
        assert_eq!(RunState::Complete, outcome.final_state);
        assert_eq!(1, report.iterations_completed);
        assert_eq!(0, report.iterations_discarded);
        assert_eq!(1, report.checks_passed);
        assert_eq!(1, requests.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn users_scaled_down_while_running_are_aborted_once() {
        let coordinator = coordinator(
            vec![
                Stage::new(Duration::ZERO, 1),
                Stage::new(Duration::from_secs(2), 1),
                Stage::new(Duration::ZERO, 0),
                Stage::new(Duration::from_secs(5), 0),
            ],
            Arc::new(HangingTransport),
            Duration::from_secs(1),
        );

        let handle = ShutdownHandle::new();
        let outcome = coordinator.run(handle.new_listener()).await;

        assert_eq!(RunState::Complete, outcome.final_state);
        assert_eq!(1, outcome.peak_virtual_users);
        assert_eq!(0, outcome.report.iterations_completed);
        assert_eq!(1, outcome.report.iterations_discarded);
    }

    #[tokio::test(start_paused = true)]
    async fn users_that_panic_are_replaced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator(
            vec![
                Stage::new(Duration::ZERO, 1),
                Stage::new(Duration::from_secs(5), 1),
            ],
            Arc::new(PanickingTransport(calls.clone())),
            Duration::from_secs(1),
        );

        let handle = ShutdownHandle::new();
        let outcome = coordinator.run(handle.new_listener()).await;

        assert_eq!(RunState::Complete, outcome.final_state);
        assert_eq!(0, outcome.report.iterations_completed);
        assert_eq!(0, outcome.report.iterations_discarded);
        // One user per tick, each lost to the panic and replaced on the next.
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn join_errors_carry_the_panic_message() {
        let join = tokio::spawn(async {
            panic!("connection pool poisoned");
        });
        let err = join.await.unwrap_err();

        assert_eq!("panicked: connection pool poisoned", describe_join_error(err));
    }

    #[test]
    fn state_transitions_follow_the_lifecycle() {
        assert!(RunState::Idle.can_become(RunState::Running));
        assert!(RunState::Running.can_become(RunState::Draining));
        assert!(RunState::Draining.can_become(RunState::Complete));

        assert!(!RunState::Idle.can_become(RunState::Complete));
        assert!(!RunState::Running.can_become(RunState::Complete));
        assert!(!RunState::Complete.can_become(RunState::Running));
        assert!(!RunState::Draining.can_become(RunState::Running));
    }
}
