use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::OperationRecord;

/// Identifies a check across the whole run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckKey {
    pub scenario: Arc<str>,
    pub group: Arc<str>,
    pub check: Arc<str>,
}

impl CheckKey {
    pub fn new(scenario: Arc<str>, group: Arc<str>, check: Arc<str>) -> Self {
        Self {
            scenario,
            group,
            check,
        }
    }
}

impl Display for CheckKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {} / {}", self.scenario, self.group, self.check)
    }
}

/// Check outcomes gathered by one virtual user during one scenario iteration.
///
/// Nothing in the tally is visible to the rest of the run until it is committed with
/// [RunResult::commit_iteration]. Dropping a tally discards the iteration.
#[derive(Debug, Default)]
pub struct IterationTally {
    outcomes: Vec<(CheckKey, Option<String>)>,
    failed: bool,
}

impl IterationTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pass(&mut self, key: CheckKey) {
        self.outcomes.push((key, None));
    }

    pub fn record_fail(&mut self, key: CheckKey, reason: impl Into<String>) {
        self.outcomes.push((key, Some(reason.into())));
    }

    /// Flag the iteration as failed, for example because a request could not be sent.
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_some()).count()
    }
}

#[derive(Debug, Default, Clone)]
struct CheckStats {
    passed: u64,
    failed: u64,
    last_failure: Option<String>,
}

#[derive(Debug, Default, Clone)]
struct OperationStats {
    count: u64,
    errors: u64,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl OperationStats {
    fn add(&mut self, elapsed: Duration, is_error: bool) {
        self.count += 1;
        self.total += elapsed;
        if is_error {
            self.errors += 1;
            return;
        }

        // Failed operations tend to be very fast or very slow, keep them out of the range.
        self.min = Some(self.min.map_or(elapsed, |m| m.min(elapsed)));
        self.max = Some(self.max.map_or(elapsed, |m| m.max(elapsed)));
    }
}

/// Aggregated outcome of a run, shared by every virtual user.
///
/// Totals are kept in atomics so that they can be read at any point while the run is in
/// progress. The per-check breakdown is behind a lock that is taken once per committed
/// iteration.
#[derive(Debug, Default)]
pub struct RunResult {
    checks_passed: AtomicU64,
    checks_failed: AtomicU64,
    iterations_completed: AtomicU64,
    iterations_failed: AtomicU64,
    iterations_discarded: AtomicU64,
    checks: Mutex<BTreeMap<CheckKey, CheckStats>>,
    operations: Mutex<BTreeMap<String, OperationStats>>,
    finalized: AtomicBool,
}

impl RunResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a finished iteration into the run totals.
    pub fn commit_iteration(&self, tally: IterationTally) {
        if self.is_finalized() {
            log::warn!(
                "Ignoring an iteration with {} check outcomes committed after the run was finalized",
                tally.len()
            );
            return;
        }

        let passed = tally.passed() as u64;
        let failed = tally.failed() as u64;
        let iteration_failed = tally.is_failed();

        {
            let mut checks = self.checks.lock();
            for (key, failure) in tally.outcomes {
                let stats = checks.entry(key).or_default();
                match failure {
                    None => stats.passed += 1,
                    Some(reason) => {
                        stats.failed += 1;
                        stats.last_failure = Some(reason);
                    }
                }
            }
        }

        self.checks_passed.fetch_add(passed, Ordering::Relaxed);
        self.checks_failed.fetch_add(failed, Ordering::Relaxed);
        if iteration_failed {
            self.iterations_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.iterations_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count an iteration that was cut off by a forced stop. None of its outcomes are counted.
    pub fn record_discarded_iteration(&self) {
        self.iterations_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_operation(&self, record: &OperationRecord) {
        let Some(elapsed) = record.elapsed else {
            log::warn!(
                "Operation {} was reported before it finished",
                record.operation_id
            );
            return;
        };

        self.operations
            .lock()
            .entry(record.operation_id.clone())
            .or_default()
            .add(elapsed, record.is_error);
    }

    pub fn checks_passed(&self) -> u64 {
        self.checks_passed.load(Ordering::Relaxed)
    }

    pub fn checks_failed(&self) -> u64 {
        self.checks_failed.load(Ordering::Relaxed)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Close the result to further updates and take a read-only copy of it.
    pub fn finalize(&self) -> RunReport {
        self.finalized.store(true, Ordering::Release);
        self.snapshot()
    }

    /// Copy the current state of the result without closing it.
    pub fn snapshot(&self) -> RunReport {
        let checks = self
            .checks
            .lock()
            .iter()
            .map(|(key, stats)| CheckSummary {
                key: key.clone(),
                passed: stats.passed,
                failed: stats.failed,
                last_failure: stats.last_failure.clone(),
            })
            .collect();

        let operations = self
            .operations
            .lock()
            .iter()
            .map(|(operation_id, stats)| OperationSummary {
                operation_id: operation_id.clone(),
                count: stats.count,
                errors: stats.errors,
                total: stats.total,
                min: stats.min,
                max: stats.max,
            })
            .collect();

        RunReport {
            checks_passed: self.checks_passed(),
            checks_failed: self.checks_failed(),
            iterations_completed: self.iterations_completed.load(Ordering::Relaxed),
            iterations_failed: self.iterations_failed.load(Ordering::Relaxed),
            iterations_discarded: self.iterations_discarded.load(Ordering::Relaxed),
            checks,
            operations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub key: CheckKey,
    pub passed: u64,
    pub failed: u64,
    /// The reason given by the most recent failure of this check.
    pub last_failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSummary {
    pub operation_id: String,
    pub count: u64,
    pub errors: u64,
    pub total: Duration,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
}

impl OperationSummary {
    pub fn average(&self) -> Option<Duration> {
        u32::try_from(self.count)
            .ok()
            .filter(|c| *c > 0)
            .map(|c| self.total / c)
    }
}

/// Read-only view of a [RunResult]. Checks are ordered by scenario, group and check name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub checks_passed: u64,
    pub checks_failed: u64,
    pub iterations_completed: u64,
    pub iterations_failed: u64,
    pub iterations_discarded: u64,
    pub checks: Vec<CheckSummary>,
    pub operations: Vec<OperationSummary>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.checks_failed > 0
    }

    pub fn check(&self, group: &str, check: &str) -> Option<&CheckSummary> {
        self.checks
            .iter()
            .find(|c| &*c.key.group == group && &*c.key.check == check)
    }

    /// Turn a report with failed checks into an error, so that a scenario `main` exits non-zero.
    pub fn ensure_passed(&self) -> anyhow::Result<()> {
        if self.has_failures() {
            anyhow::bail!(
                "{} of {} checks failed",
                self.checks_failed,
                self.checks_failed + self.checks_passed
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(group: &str, check: &str) -> CheckKey {
        CheckKey::new("books".into(), group.into(), check.into())
    }

    #[test]
    fn commit_merges_totals_and_breakdown() {
        let result = RunResult::new();

        let mut tally = IterationTally::new();
        tally.record_pass(key("get", "is status 200"));
        tally.record_fail(key("post", "is status 403"), "status was 201");
        result.commit_iteration(tally);

        let mut tally = IterationTally::new();
        tally.record_pass(key("get", "is status 200"));
        tally.record_pass(key("post", "is status 403"));
        result.commit_iteration(tally);

        let report = result.finalize();
        assert_eq!(3, report.checks_passed);
        assert_eq!(1, report.checks_failed);
        assert_eq!(2, report.iterations_completed);

        let post = report.check("post", "is status 403").unwrap();
        assert_eq!(1, post.passed);
        assert_eq!(1, post.failed);
        assert_eq!(Some("status was 201".to_string()), post.last_failure);
    }

    #[test]
    fn dropped_tally_leaves_no_trace() {
        let result = RunResult::new();

        let mut tally = IterationTally::new();
        tally.record_fail(key("get", "is status 200"), "status was 500");
        drop(tally);
        result.record_discarded_iteration();

        let report = result.finalize();
        assert_eq!(0, report.checks_passed + report.checks_failed);
        assert_eq!(1, report.iterations_discarded);
        assert!(report.checks.is_empty());
    }

    #[test]
    fn failed_iterations_are_counted_separately() {
        let result = RunResult::new();

        let mut tally = IterationTally::new();
        tally.record_fail(key("get", "is status 200"), "connection refused");
        assert!(!tally.is_failed());
        tally.mark_failed();
        assert!(tally.is_failed());
        result.commit_iteration(tally);

        let report = result.finalize();
        assert_eq!(1, report.iterations_failed);
        assert_eq!(0, report.iterations_completed);
        assert!(report.has_failures());
        assert!(report.ensure_passed().is_err());
    }

    #[test]
    fn commits_after_finalize_are_ignored() {
        let result = RunResult::new();
        let before = result.finalize();

        let mut tally = IterationTally::new();
        tally.record_pass(key("get", "is status 200"));
        result.commit_iteration(tally);

        assert_eq!(before, result.snapshot());
    }

    #[test]
    fn operation_range_ignores_errors() {
        let result = RunResult::new();
        result.record_operation(&OperationRecord::finished(
            "GET /book",
            Duration::from_millis(10),
            false,
        ));
        result.record_operation(&OperationRecord::finished(
            "GET /book",
            Duration::from_millis(30),
            false,
        ));
        result.record_operation(&OperationRecord::finished(
            "GET /book",
            Duration::from_secs(5),
            true,
        ));

        let report = result.snapshot();
        let op = &report.operations[0];
        assert_eq!(3, op.count);
        assert_eq!(1, op.errors);
        assert_eq!(Some(Duration::from_millis(10)), op.min);
        assert_eq!(Some(Duration::from_millis(30)), op.max);
    }

    #[test]
    fn concurrent_commits_are_not_lost() {
        let result = Arc::new(RunResult::new());

        let handles = (0..8)
            .map(|_| {
                let result = result.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let mut tally = IterationTally::new();
                        tally.record_pass(key("get", "is status 200"));
                        tally.record_fail(key("post", "is status 403"), "status was 200");
                        result.commit_iteration(tally);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        let report = result.finalize();
        assert_eq!(4000, report.checks_passed);
        assert_eq!(4000, report.checks_failed);
        assert_eq!(4000, report.iterations_completed);
        assert_eq!(4000, report.check("get", "is status 200").unwrap().passed);
    }
}
