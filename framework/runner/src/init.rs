use crate::cli::StampedeScenarioCli;
use clap::Parser;

/// Initialise logging for the runner. `RUST_LOG` selects the level and defaults to `info`.
///
/// Safe to call more than once.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Initialise the CLI and logging for a scenario binary.
pub fn init() -> StampedeScenarioCli {
    init_logger();

    StampedeScenarioCli::parse()
}
