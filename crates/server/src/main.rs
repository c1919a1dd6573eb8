mod api;
mod cli;
mod db;
mod doc;
mod executor;
mod live;
mod router;
mod startup;
mod state;
mod store;

use clap::Parser;

use crate::cli::{Cli, Command};

fn load_config() -> tilecast_core::Config {
    tilecast_core::config::load_dotenv();
    tilecast_core::Config::from_env()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = load_config();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => startup::serve(config).await,
        Command::Templates => cli::list_templates(config).await,
        Command::RunOnce => cli::run_once(config).await,
    }
}
