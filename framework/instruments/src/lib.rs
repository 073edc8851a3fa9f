mod operation;
mod report;
mod run_result;

pub use operation::{report_operation, OperationRecord};
pub use report::{ReportCollector, ReportConfig, Reporter, SummaryReportCollector};
pub use run_result::{
    CheckKey, CheckSummary, IterationTally, OperationSummary, RunReport, RunResult,
};
