use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Config;
use crate::service::ContextService;
use crate::sqlite_store::SqliteStore;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    log::debug!("connected to {}", db_path.display());
    Ok(pool)
}

/// Connect and wrap the pool in a [`ContextService`] over SQLite.
pub async fn open_service(config: &Config) -> Result<ContextService<SqliteStore>> {
    let pool = connect(config).await?;
    Ok(ContextService::new(Arc::new(SqliteStore::new(pool))))
}
