//! CLI argument parsing and the one-shot subcommands.

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tilecast_live::LiveMessage;

use crate::startup;

/// Scheduled SQL template refresh with live WebSocket delivery.
#[derive(Parser, Debug)]
#[command(name = "tilecast-server", version, about = "Scheduled SQL template refresh with live WebSocket delivery")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the HTTP/WebSocket server, refresh scheduler and health monitor (default)
    Serve,
    /// Print the templates known to the store
    Templates,
    /// Execute every schedulable template once and print the wire messages as JSON lines
    RunOnce,
}

pub async fn list_templates(config: tilecast_core::Config) -> anyhow::Result<()> {
    let state = startup::build_app_state(config).await?;
    let templates = state.store.list_schedulable().await?;

    println!("{:>6}  {:>8}  {:<32}  last execution", "id", "interval", "name");
    for t in &templates {
        let interval = if t.is_schedulable() {
            format!("{}s", t.refresh_interval_secs)
        } else {
            "off".to_string()
        };
        let last = t
            .last_executed_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!("{:>6}  {:>8}  {:<32}  {}", t.id, interval, t.info.name, last);
    }
    info!(count = templates.len(), "listed templates");
    Ok(())
}

/// Runs each schedulable template through the same step the scheduler uses,
/// so the store's last-execution timestamps move forward as well.
pub async fn run_once(config: tilecast_core::Config) -> anyhow::Result<()> {
    let state = startup::build_app_state(config).await?;
    let templates = state.store.list_schedulable().await?;
    let now = Utc::now();

    let mut failed = 0usize;
    for template in templates.into_iter().filter(|t| t.is_schedulable()) {
        let run = state.scheduler.run_template(template, now).await;
        if let Err(e) = &run.recorded {
            warn!(template_id = run.result.template_id, error = %e, "execution time not recorded");
        }
        if !run.result.is_success() {
            failed += 1;
        }
        println!("{}", LiveMessage::from(run.result.as_ref()).to_json()?);
    }

    info!(cached = state.hub.cache().len(), failed, "run-once complete");
    Ok(())
}
