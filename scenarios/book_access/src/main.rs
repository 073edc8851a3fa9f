use std::time::Duration;

use clap::{Parser, ValueEnum};
use stampede_http_client::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Variant {
    /// Guests read the book list.
    Guest,
    /// Guests and admins read the book list, guests are refused when they try to add a book.
    Admin,
}

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Cli {
    #[clap(long, value_enum, default_value = "guest")]
    variant: Variant,

    #[command(flatten)]
    scenario: StampedeScenarioCli,
}

fn token(var: &str) -> Result<String, ConfigurationError> {
    std::env::var(var)
        .map_err(|_| ConfigurationError::new(format!("environment variable {var} is not set")))
}

fn groups(variant: Variant, guest_token: &str, admin_token: Option<&str>) -> Vec<RequestGroup> {
    let mut groups = vec![
        RequestGroup::new("GET /book with guest token", Method::Get, "/book")
            .with_bearer_token(guest_token)
            .with_check(Check::status(200)),
    ];

    if let (Variant::Admin, Some(admin_token)) = (variant, admin_token) {
        groups.push(
            RequestGroup::new("GET /book with admin token", Method::Get, "/book")
                .with_bearer_token(admin_token)
                .with_check(Check::status(200)),
        );
        groups.push(
            RequestGroup::new("POST /book with guest token", Method::Post, "/book")
                .with_bearer_token(guest_token)
                .with_header("Content-Type", "application/json")
                .with_body(r#"{"title": "The Left Hand of Darkness"}"#)
                .with_check(Check::status(403)),
        );
    }

    groups
}

fn main() -> StampedeResult<()> {
    init_logger();
    let cli = Cli::parse();

    let guest_token = token("GUEST_TOKEN")?;
    let admin_token = match cli.variant {
        Variant::Admin => Some(token("ADMIN_TOKEN")?),
        Variant::Guest => None,
    };
    log::info!("Running the {:?} variant", cli.variant);

    let mut builder = ScenarioDefinitionBuilder::new(env!("CARGO_PKG_NAME"), cli.scenario)
        .with_default_base_url("http://192.168.49.2:31700")
        .with_stage(Duration::from_secs(30), 100)
        .with_stage(Duration::from_secs(60), 100)
        .with_stage(Duration::from_secs(30), 0)
        .with_iteration_delay(Duration::from_secs(1))
        .use_transport(http_transport);
    for group in groups(cli.variant, &guest_token, admin_token.as_deref()) {
        builder = builder.with_group(group);
    }

    let report = run(builder)?;
    report.ensure_passed()?;

    Ok(())
}
