use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_tables(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the MDB tables if they do not exist. Idempotent.
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    // Schemas: one row per table or view of a context
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mdb_schemas (
            context TEXT NOT NULL,
            id TEXT NOT NULL,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            def TEXT NOT NULL DEFAULT '',
            predicate TEXT NOT NULL DEFAULT '',
            is_primary INTEGER NOT NULL DEFAULT 0,
            position INTEGER NOT NULL,
            PRIMARY KEY (context, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mdb_columns (
            context TEXT NOT NULL,
            schema_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            table_ns TEXT NOT NULL DEFAULT '',
            type TEXT NOT NULL,
            value TEXT NOT NULL DEFAULT '',
            hidden INTEGER NOT NULL DEFAULT 0,
            is_primary INTEGER NOT NULL DEFAULT 0,
            is_unique INTEGER NOT NULL DEFAULT 0,
            attrs TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (context, schema_id, position),
            UNIQUE (context, schema_id, name, table_ns)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Rows: values_json holds the string-encoded cell values
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mdb_rows (
            context TEXT NOT NULL,
            schema_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            file TEXT,
            values_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (context, schema_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_mdb_rows_file ON mdb_rows(context, schema_id, file)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
