use marketplace_payments::{config, db};
use migrations::Migrator;
use sea_orm_migration::MigratorTrait;
use tracing::info;

/// Applies (`up`, the default) or rolls back (`down`) the schema using the
/// application's configured database.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let direction = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());
    let pool = db::establish_connection_from_app_config(&cfg).await?;

    match direction.as_str() {
        "up" => {
            Migrator::up(&pool, None).await?;
            info!("Migration completed successfully");
        }
        "down" => {
            Migrator::down(&pool, Some(1)).await?;
            info!("Rolled back the latest migration");
        }
        "status" => {
            Migrator::status(&pool).await?;
        }
        other => anyhow::bail!("unknown migration command: {other} (expected up, down or status)"),
    }

    Ok(())
}
