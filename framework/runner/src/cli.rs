use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(about, long_about = None)]
pub struct StampedeScenarioCli {
    /// Root URL of the service to test, for example `http://192.168.49.2:31700`.
    ///
    /// Request paths are appended to it. Overrides any base URL set by the scenario.
    #[clap(long)]
    pub base_url: Option<String>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// Append a JSON summary of the run to this file once the run has finished.
    ///
    /// The file holds one summary per line, so the same file can collect many runs.
    #[clap(long)]
    pub run_summary_path: Option<PathBuf>,
}
