use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::HashMap;
use std::io::{BufRead, Read, Write};
use std::path::Path;

/// One stage of the ramp profile, as it was configured for the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSummary {
    /// Length of the stage in milliseconds
    pub duration_ms: u64,
    /// Number of virtual users to reach by the end of the stage
    pub target: usize,
}

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The planned duration of the run in seconds, which is the sum of the stage durations
    ///
    /// The run may have finished sooner if it was interrupted.
    pub run_duration: u64,
    /// The ramp profile
    pub stages: Vec<StageSummary>,
    /// Number of virtual users active at the start of the first stage
    pub start_target: usize,
    /// The highest number of virtual users that were running at the same time
    pub peak_virtual_users: usize,
    /// Total number of checks that passed
    pub checks_passed: u64,
    /// Total number of checks that failed
    pub checks_failed: u64,
    /// Scenario iterations that ran to completion, including those with failed checks
    pub iterations: u64,
    /// Environment variables set for the run
    ///
    /// This won't capture all environment variables. Just the ones that the runner is aware of,
    /// such as `BASE_URL` for the service under test, or that are included by the scenario
    /// itself. Never put secrets in here.
    pub env: HashMap<String, String>,
    /// The version of Stampede that was used for this run
    pub stampede_version: String,
}

impl RunSummary {
    /// Create a new run summary
    pub fn new(
        run_id: String,
        scenario_name: String,
        started_at: i64,
        stages: Vec<StageSummary>,
        start_target: usize,
        stampede_version: String,
    ) -> Self {
        let run_duration = stages.iter().map(|s| s.duration_ms).sum::<u64>() / 1000;
        Self {
            run_id,
            scenario_name,
            started_at,
            run_duration,
            stages,
            start_target,
            peak_virtual_users: 0,
            checks_passed: 0,
            checks_failed: 0,
            iterations: 0,
            env: HashMap::with_capacity(0),
            stampede_version,
        }
    }

    /// Set the peak number of concurrent virtual users
    pub fn set_peak_virtual_users(&mut self, peak_virtual_users: usize) {
        self.peak_virtual_users = peak_virtual_users;
    }

    /// Set the check and iteration totals
    pub fn set_totals(&mut self, checks_passed: u64, checks_failed: u64, iterations: u64) {
        self.checks_passed = checks_passed;
        self.checks_failed = checks_failed;
        self.iterations = iterations;
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to uniquely identify the configuration used to run the scenario.
    /// It uses the
    ///     - Scenario name
    ///     - Stages and start target
    ///     - Selected environment variables
    ///     - Stampede version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.scenario_name.as_bytes());
        Digest::update(&mut hasher, self.start_target.to_le_bytes());
        for stage in &self.stages {
            Digest::update(&mut hasher, stage.duration_ms.to_le_bytes());
            Digest::update(&mut hasher, stage.target.to_le_bytes());
        }
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.stampede_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file as a single line of JSON. The recommended file extension is
/// `.jsonl`.
pub fn append_run_summary(run_summary: RunSummary, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, &run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: impl AsRef<Path>) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}
