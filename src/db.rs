use anyhow::Context;
use sqlx::MySqlPool;
use sqlx::migrate::Migrator;
use sqlx::mysql::MySqlPoolOptions;
use tracing::info;

use crate::config::Config;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn init_db(config: &Config) -> anyhow::Result<MySqlPool> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when STORE_BACKEND=mysql")?;

    let pool = MySqlPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.store_timeout)
        .connect(url)
        .await
        .context("Failed to connect to database")?;

    if config.db_init_schema {
        // Run migrations
        MIGRATOR
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        info!(migrations = MIGRATOR.iter().count(), "Database schema up to date");
    }
    Ok(pool)
}
