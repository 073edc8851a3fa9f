mod checks_table;
mod operations_table;

use std::time::Duration;

use tabled::settings::Style;
use tabled::Table;

use crate::report::summary_report::checks_table::CheckRow;
use crate::report::summary_report::operations_table::OperationRow;
use crate::report::ReportCollector;
use crate::RunReport;

/// Prints the checks and request timings of a run to stdout as tables.
#[derive(Debug, Default)]
pub struct SummaryReportCollector;

impl SummaryReportCollector {
    pub fn new() -> Self {
        Self
    }

    fn check_rows(report: &RunReport) -> Vec<CheckRow> {
        report
            .checks
            .iter()
            .map(|c| CheckRow {
                scenario: c.key.scenario.to_string(),
                group: c.key.group.to_string(),
                check: c.key.check.to_string(),
                passed: c.passed,
                failed: c.failed,
                last_failure: c.last_failure.clone(),
            })
            .collect()
    }

    fn operation_rows(report: &RunReport) -> Vec<OperationRow> {
        report
            .operations
            .iter()
            .map(|op| OperationRow {
                operation_id: op.operation_id.clone(),
                avg_time_ms: op.average().map(as_ms).unwrap_or_default(),
                min_time_ms: op.min.map(as_ms),
                max_time_ms: op.max.map(as_ms),
                total_operations: op.count,
                errors: op.errors,
            })
            .collect()
    }

    pub(crate) fn render(report: &RunReport) -> String {
        let mut out = String::new();

        out.push_str("\nSummary of checks\n");
        if report.checks.is_empty() {
            out.push_str("No checks were recorded\n");
        } else {
            let mut table = Table::new(Self::check_rows(report));
            table.with(Style::modern());
            out.push_str(&format!("{table}\n"));
        }

        if !report.operations.is_empty() {
            out.push_str("\nSummary of requests\n");
            let mut table = Table::new(Self::operation_rows(report));
            table.with(Style::modern());
            out.push_str(&format!("{table}\n"));
        }

        out.push_str(&format!(
            "\nchecks: {} passed, {} failed\niterations: {} completed, {} failed, {} discarded\n",
            report.checks_passed,
            report.checks_failed,
            report.iterations_completed,
            report.iterations_failed,
            report.iterations_discarded,
        ));

        out
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_micros() as f64 / 1000.0
}

impl ReportCollector for SummaryReportCollector {
    fn finalize(&self, report: &RunReport) {
        println!("{}", Self::render(report));
    }
}
