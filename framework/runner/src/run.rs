use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use stampede_core::prelude::ShutdownHandle;
use stampede_instruments::{ReportConfig, RunReport};
use stampede_summary_model::{append_run_summary, RunSummary, StageSummary};

use crate::context::RunnerContext;
use crate::coordinator::{CoordinatorOutcome, RunCoordinator};
use crate::definition::ScenarioDefinitionBuilder;
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::shutdown::start_shutdown_listener;
use crate::stages::StageSchedule;
use crate::types::StampedeResult;

/// Key the base URL is stored under in a run summary's environment.
const BASE_URL_ENV_KEY: &str = "BASE_URL";

/// Run a scenario to completion and return its report.
///
/// The report is also printed as a summary table. Failed checks do not make this function fail,
/// call [RunReport::ensure_passed] on the result to turn them into an error. Only an invalid
/// definition or a failure to set the run up is returned as an error.
pub fn run(definition: ScenarioDefinitionBuilder) -> StampedeResult<RunReport> {
    let definition = definition.build()?;

    log::info!(
        "Running scenario {} against {} for {:?}, peaking at {} virtual users",
        definition.name,
        definition.base_url,
        definition.schedule.total_duration(),
        definition.schedule.peak_target()
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime);
    let reporter = Arc::new(ReportConfig::default().enable_summary().init());
    let runner_context = RunnerContext::new(
        reporter.clone(),
        definition.base_url.as_str().into(),
        definition.request_timeout,
        shutdown_handle.clone(),
    );

    let transport = {
        // Clients such as reqwest may need a runtime while they are built.
        let _guard = runtime.enter();
        (definition.transport_fn)(&runner_context).context("Failed to create transport")?
    };

    let started_at = chrono::Utc::now();
    let coordinator = RunCoordinator::new(
        definition.schedule.clone(),
        Arc::new(definition.scenario),
        runner_context.shared_base_url(),
        transport,
        reporter,
        definition.settings,
    );

    // Progress and monitor threads live until the coordinator is done.
    let background = ShutdownHandle::new();
    if !definition.no_progress {
        start_progress(
            definition.schedule.total_duration(),
            coordinator.active_gauge(),
            background.new_listener(),
        );
    }
    start_monitor(coordinator.active_gauge(), background.new_listener());

    let outcome =
        runtime.block_on(coordinator.run(runner_context.shutdown_handle().new_listener()));
    background.shutdown();

    log::info!(
        "Scenario {} finished in state {}{}: {} iterations, {} checks passed, {} checks failed",
        definition.name,
        outcome.final_state,
        if outcome.interrupted { " (interrupted)" } else { "" },
        outcome.report.iterations_completed,
        outcome.report.checks_passed,
        outcome.report.checks_failed
    );

    if let Some(path) = &definition.run_summary_path {
        let summary = build_run_summary(
            &definition.name,
            &definition.base_url,
            started_at,
            &definition.schedule,
            &outcome,
        );
        write_run_summary(summary, path);
    }

    Ok(outcome.report)
}

fn build_run_summary(
    scenario_name: &str,
    base_url: &str,
    started_at: chrono::DateTime<chrono::Utc>,
    schedule: &StageSchedule,
    outcome: &CoordinatorOutcome,
) -> RunSummary {
    let stages = schedule
        .stages()
        .iter()
        .map(|stage| StageSummary {
            duration_ms: stage.duration.as_millis() as u64,
            target: stage.target,
        })
        .collect();

    let mut summary = RunSummary::new(
        nanoid::nanoid!(),
        scenario_name.to_string(),
        started_at.timestamp(),
        stages,
        schedule.start_target(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    summary.add_env(BASE_URL_ENV_KEY.to_string(), base_url.to_string());
    summary.set_peak_virtual_users(outcome.peak_virtual_users);
    summary.set_totals(
        outcome.report.checks_passed,
        outcome.report.checks_failed,
        outcome.report.iterations_completed + outcome.report.iterations_failed,
    );

    summary
}

// The run already happened, so failing to store its summary is only logged.
fn write_run_summary(summary: RunSummary, path: &Path) {
    let run_id = summary.run_id.clone();
    match append_run_summary(summary, path) {
        Ok(()) => log::info!("Run summary for run {} written to {}", run_id, path.display()),
        Err(e) => log::error!("Failed to write run summary to {}: {:?}", path.display(), e),
    }
}
