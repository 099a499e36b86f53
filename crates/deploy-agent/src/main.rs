use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deploy_agent::config::AgentConfig;
use deploy_agent::orchestrator;

#[derive(Debug, Parser)]
#[command(name = "deploy-agent")]
#[command(about = "GitHub webhook auto-deploy agent for Odoo instances")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP control plane.
    Serve,
    /// Print a fresh base64 key for `encryption_key`.
    GenerateKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::from_default_env().add_directive("deploy_agent=info".parse()?),
                )
                .init();

            let config = AgentConfig::load()?;
            orchestrator::run(&config).await
        }
        Command::GenerateKey => {
            println!("{}", orchestrator::credentials::generate_key());
            Ok(())
        }
    }
}
