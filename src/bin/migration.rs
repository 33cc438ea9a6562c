use anyhow::Context;
use sea_orm_migration::MigratorTrait;
use storefront_api::{config, db, migrator::Migrator};
use tracing::info;

/// Applies pending migrations, or rolls back the last one with `down`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    info!("Starting database migration");
    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;

    match std::env::args().nth(1).as_deref() {
        Some("down") => {
            Migrator::down(&pool, Some(1))
                .await
                .context("rollback failed")?;
            info!("Rolled back the latest migration");
        }
        Some("status") => {
            Migrator::status(&pool).await.context("status failed")?;
        }
        _ => {
            Migrator::up(&pool, None).await.context("migration failed")?;
            info!("Migration completed successfully");
        }
    }

    Ok(())
}
