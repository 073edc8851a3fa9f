use std::time::{Duration, Instant};

use crate::report::Reporter;

/// Timing for a single outbound operation, usually one HTTP request.
///
/// Create the record just before the operation starts and hand it to [report_operation] once the
/// operation has produced a result.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub operation_id: String,
    started: Instant,
    pub elapsed: Option<Duration>,
    pub is_error: bool,
}

impl OperationRecord {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            started: Instant::now(),
            elapsed: None,
            is_error: false,
        }
    }

    /// Build an already finished record, for replaying timings that were measured elsewhere.
    pub fn finished(operation_id: impl Into<String>, elapsed: Duration, is_error: bool) -> Self {
        Self {
            operation_id: operation_id.into(),
            started: Instant::now(),
            elapsed: Some(elapsed),
            is_error,
        }
    }

    pub(crate) fn finish(&mut self, is_error: bool) {
        self.elapsed = Some(self.started.elapsed());
        self.is_error = is_error;
    }
}

/// Stop the clock on `record` and add it to the reporter. The operation counts as an error if
/// `response` is an `Err`.
pub fn report_operation<T, E>(
    reporter: &Reporter,
    mut record: OperationRecord,
    response: &Result<T, E>,
) {
    record.finish(response.is_err());
    log::trace!(
        "Operation {} took {:?}, error? {}",
        record.operation_id,
        record.elapsed,
        record.is_error
    );
    reporter.add_operation(&record);
}
