use std::{sync::Arc, time::Duration};

use engine::{SqliteStore, SyncEngine};
use migration::{Migrator, MigratorTrait};

use crate::{
    client::HttpApi,
    error::{AppError, Result},
};

mod client;
mod commands;
mod config;
mod error;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let (settings, command) = config::load()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(format!(
            "pennywise_cli={level},engine={level}",
            level = settings.level
        ))
        .init();

    if settings.token.trim().is_empty() {
        return Err(AppError::Input(
            "missing token, set PENNYWISE_CLI_TOKEN or `token` in the config file".to_string(),
        ));
    }

    let url = format!("sqlite:{}?mode=rwc", settings.database);
    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    tracing::debug!("device database ready at {}", settings.database);

    let api = HttpApi::new(
        &settings.base_url,
        Duration::from_secs(settings.timeout_secs),
    )?;
    let engine = SyncEngine::builder(Arc::new(SqliteStore::new(database)), Arc::new(api)).build();

    for line in commands::execute(&engine, &settings.token, command).await? {
        println!("{line}");
    }
    Ok(())
}
