//! # Stockpile Entry Point

use anyhow::Context;
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use stockpile::{config::ConfigLoader, db, server::run_server, telemetry};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "stockpile", version, about = "Inventory export, import and restore pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply migrations, then run the HTTP server and worker pools
    Serve,
    /// Apply pending migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    telemetry::init_tracing(&config)?;
    if let Ok(redacted) = config.redacted_json() {
        info!(profile = %config.profile, configuration = %redacted, "Configuration loaded");
    }

    let pool = db::init_pool(&config).await?;
    Migrator::up(&pool, None)
        .await
        .context("failed to apply migrations")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            info!("Migrations applied");
            Ok(())
        }
        Command::Serve => run_server(config, pool).await,
    }
}
