mod summary_report;

use std::sync::Arc;

use crate::{IterationTally, OperationRecord, RunReport, RunResult};

pub use summary_report::SummaryReportCollector;

/// Something that presents the outcome of a run once it has finished.
pub trait ReportCollector: Send + Sync {
    fn finalize(&self, report: &RunReport);
}

/// Choose which collectors receive the final report.
#[derive(Debug, Default)]
pub struct ReportConfig {
    enable_summary: bool,
}

impl ReportConfig {
    pub fn enable_summary(mut self) -> Self {
        self.enable_summary = true;
        self
    }

    pub fn init(self) -> Reporter {
        let mut collectors: Vec<Box<dyn ReportCollector>> = Vec::new();
        if self.enable_summary {
            collectors.push(Box::new(SummaryReportCollector::new()));
        }

        Reporter {
            result: Arc::new(RunResult::new()),
            collectors,
        }
    }
}

/// Entry point for everything a run records.
///
/// Virtual users commit their iterations and report the timing of each request
/// here. When the run ends, [Reporter::finalize] closes the underlying [RunResult] and passes the
/// report to each configured collector.
pub struct Reporter {
    result: Arc<RunResult>,
    collectors: Vec<Box<dyn ReportCollector>>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("result", &self.result)
            .field("collectors", &self.collectors.len())
            .finish()
    }
}

impl Reporter {
    pub fn add_operation(&self, operation_record: &OperationRecord) {
        self.result.record_operation(operation_record);
    }

    pub fn commit_iteration(&self, tally: IterationTally) {
        self.result.commit_iteration(tally);
    }

    pub fn record_discarded_iteration(&self) {
        self.result.record_discarded_iteration();
    }

    pub fn result(&self) -> &Arc<RunResult> {
        &self.result
    }

    pub fn finalize(&self) -> RunReport {
        let report = self.result.finalize();
        for collector in &self.collectors {
            collector.finalize(&report);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CheckKey;

    #[test]
    fn reporter_without_collectors_still_aggregates() {
        let reporter = ReportConfig::default().init();

        let mut tally = IterationTally::new();
        tally.record_pass(CheckKey::new(
            "books".into(),
            "get".into(),
            "is status 200".into(),
        ));
        reporter.commit_iteration(tally);

        let report = reporter.finalize();
        assert_eq!(1, report.checks_passed);
        assert!(reporter.result().is_finalized());
    }
}
