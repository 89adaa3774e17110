use sea_orm::Database;
use sea_orm_migration::prelude::*;

const DEFAULT_DATABASE: &str = "sqlite:./pennywise.db?mode=rwc";

/// Applies the schema to a server or device database.
///
/// The target is `PENNYWISE_DATABASE_URL`, then `DATABASE_URL`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());
    let url = std::env::var("PENNYWISE_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .unwrap_or_else(|_| DEFAULT_DATABASE.to_string());

    let db = Database::connect(&url).await?;
    match command.as_str() {
        "up" => migration::Migrator::up(&db, None).await?,
        "down" => migration::Migrator::down(&db, Some(1)).await?,
        "fresh" => migration::Migrator::fresh(&db).await?,
        "status" => migration::Migrator::status(&db).await?,
        other => {
            eprintln!("unknown command \"{other}\"; usage: migration [up|down|fresh|status]");
            std::process::exit(2);
        }
    }

    Ok(())
}
