use std::path::PathBuf;

use clap::Parser;
use stampede_http_client::prelude::*;

/// Run the load test described by a configuration file against an HTTP service.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the run configuration, a TOML file with the stages and the scenario to run
    #[clap(long, short)]
    config: PathBuf,

    #[command(flatten)]
    scenario: StampedeScenarioCli,
}

fn main() -> StampedeResult<()> {
    init_logger();
    let cli = Cli::parse();

    let config = RunConfig::load(&cli.config)?;
    log::info!("Loaded run configuration from {}", cli.config.display());

    let builder =
        ScenarioDefinitionBuilder::from_config(cli.scenario, config)?.use_transport(http_transport);

    let report = run(builder)?;
    report.ensure_passed()?;

    Ok(())
}
