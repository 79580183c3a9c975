mod background_service;
mod config;
mod infrastructure;

use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use service::prelude::ExecutionManager;
use tracing_subscriber::EnvFilter;

use self::background_service::prelude::*;
use self::config::build_config;
use self::infrastructure::{
    database::JsonDb, service::job_scheduler::SchedulerRegistry, service_provider::Computers,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = build_config().with_context(|| "Failed to build config".red())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .with_context(|| "Invalid log filter".red())?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let repo = Arc::new(
        JsonDb::new(&config.save_path)
            .await
            .with_context(|| "Cannot open calculation store".red())?,
    );
    let computers = Arc::new(
        Computers::new(&config.computers, SchedulerRegistry::builtin())
            .with_context(|| "Invalid computer configuration".red())?,
    );
    let manager = Arc::new(ExecutionManager::new(repo, computers));

    for computer in &config.computers {
        match manager.list_jobs(&computer.name).await {
            Ok(jobs) => {
                tracing::info!(computer = %computer.name, jobs = jobs.len(), "Computer reachable")
            }
            Err(e) => tracing::warn!(computer = %computer.name, "Computer not reachable: {e:#}"),
        }
    }

    let refresh = tokio::spawn(refresh_jobs(manager, config.refresh_interval()));
    tracing::info!("Execution manager started");

    tokio::signal::ctrl_c().await.with_context(|| "Cannot listen for ctrl-c".red())?;
    tracing::info!("Stopping services (ctrl-c handling).");
    refresh.abort();
    Ok(())
}
