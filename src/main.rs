//! relaygate command-line tool
//!
//! Generates, validates and inspects failover configurations. The engine
//! itself is a library embedded by the agent host.

use clap::Parser;
use relaygate::cli::{Cli, Command, generate_config_template, provider_report, render_plan};
use relaygate::config::Config;
use relaygate::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => {
            let template = generate_config_template();
            match output {
                Some(path) => {
                    std::fs::write(&path, template)?;
                    eprintln!("Configuration template written to {}", path);
                }
                None => print!("{}", template),
            }
        }
        Some(Command::Providers) => {
            let config = Config::from_file(&cli.config)?;
            telemetry::init(&config.observability.log_level);

            let report = provider_report(&config);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(Command::Check) | None => {
            let config = Config::from_file(&cli.config)?;
            telemetry::init(&config.observability.log_level);

            tracing::info!(
                config = %cli.config,
                providers = config.providers.len(),
                "Configuration is valid"
            );
            print!("{}", render_plan(&config));
        }
    }

    Ok(())
}
