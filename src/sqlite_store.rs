//! SQLite-backed [`Store`] implementation.
//!
//! Schemas, columns and rows of every context live in three tables
//! (`mdb_schemas`, `mdb_columns`, `mdb_rows`, see [`crate::migrate`]). Row
//! values are stored as a JSON object of string-encoded cells; decoding back
//! to typed values happens here, against the table's columns.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row as _, SqliteConnection, SqlitePool};

use mdb_core::models::{Column, ColumnKind, Row, Schema, SchemaKind, Table};
use mdb_core::predicate::Predicate;
use mdb_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
///
/// Every table write runs in one transaction, so a failed save leaves the
/// previous snapshot in place.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn schema_from_row(row: &SqliteRow) -> Schema {
    let predicate: String = row.get("predicate");
    let kind: String = row.get("type");
    Schema {
        id: row.get("id"),
        name: row.get("name"),
        kind: SchemaKind::parse(&kind),
        def: row.get("def"),
        predicate: Predicate::parse(&predicate),
        primary: row.get::<i64, _>("is_primary") != 0,
    }
}

fn column_from_row(row: &SqliteRow) -> Column {
    let kind: String = row.get("type");
    Column {
        name: row.get("name"),
        table: row.get("table_ns"),
        schema_id: row.get("schema_id"),
        kind: ColumnKind::parse(&kind),
        value: row.get("value"),
        hidden: row.get::<i64, _>("hidden") != 0,
        primary: row.get::<i64, _>("is_primary") != 0,
        unique: row.get::<i64, _>("is_unique") != 0,
        attrs: row.get("attrs"),
    }
}

async fn upsert_schema(conn: &mut SqliteConnection, context: &str, schema: &Schema) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO mdb_schemas (context, id, name, type, def, predicate, is_primary, position)
        VALUES (?, ?, ?, ?, ?, ?, ?,
                (SELECT COALESCE(MAX(position), -1) + 1 FROM mdb_schemas WHERE context = ?))
        ON CONFLICT(context, id) DO UPDATE SET
            name = excluded.name,
            type = excluded.type,
            def = excluded.def,
            predicate = excluded.predicate,
            is_primary = excluded.is_primary
        "#,
    )
    .bind(context)
    .bind(&schema.id)
    .bind(&schema.name)
    .bind(schema.kind.as_str())
    .bind(&schema.def)
    .bind(schema.predicate.serialize())
    .bind(schema.primary as i64)
    .bind(context)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn fetch_schemas(&self, context: &str) -> Result<Vec<Schema>> {
        let rows = sqlx::query(
            "SELECT id, name, type, def, predicate, is_primary FROM mdb_schemas WHERE context = ? ORDER BY position ASC",
        )
        .bind(context)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(schema_from_row).collect())
    }

    async fn fetch_table(&self, context: &str, schema_id: &str) -> Result<Option<Table>> {
        let schema_row = sqlx::query(
            "SELECT id, name, type, def, predicate, is_primary FROM mdb_schemas WHERE context = ? AND id = ?",
        )
        .bind(context)
        .bind(schema_id)
        .fetch_optional(&self.pool)
        .await?;

        let schema = match schema_row {
            Some(row) => schema_from_row(&row),
            None => return Ok(None),
        };

        let cols: Vec<Column> = sqlx::query(
            "SELECT schema_id, name, table_ns, type, value, hidden, is_primary, is_unique, attrs FROM mdb_columns WHERE context = ? AND schema_id = ? ORDER BY position ASC",
        )
        .bind(context)
        .bind(schema_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(column_from_row)
        .collect();

        // A root table is never written without its primary column
        if cols.is_empty() {
            return Ok(None);
        }

        let value_rows = sqlx::query(
            "SELECT values_json FROM mdb_rows WHERE context = ? AND schema_id = ? ORDER BY position ASC",
        )
        .bind(context)
        .bind(schema_id)
        .fetch_all(&self.pool)
        .await?;

        let mut rows = Vec::with_capacity(value_rows.len());
        for r in &value_rows {
            let json: String = r.get("values_json");
            let raw: BTreeMap<String, String> = serde_json::from_str(&json)
                .with_context(|| format!("Corrupt row in {}/{}", context, schema_id))?;
            rows.push(Row::decode(&cols, &raw));
        }

        Ok(Some(Table { schema, cols, rows }))
    }

    async fn put_table(&self, context: &str, table: &Table, schemas: &[Schema]) -> Result<()> {
        let schema_id = &table.schema.id;
        let mut tx = self.pool.begin().await?;

        for schema in schemas {
            upsert_schema(&mut *tx, context, schema).await?;
        }
        upsert_schema(&mut *tx, context, &table.schema).await?;

        sqlx::query("DELETE FROM mdb_columns WHERE context = ? AND schema_id = ?")
            .bind(context)
            .bind(schema_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM mdb_rows WHERE context = ? AND schema_id = ?")
            .bind(context)
            .bind(schema_id)
            .execute(&mut *tx)
            .await?;

        for (i, col) in table.cols.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO mdb_columns (context, schema_id, position, name, table_ns, type,
                                         value, hidden, is_primary, is_unique, attrs)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(context)
            .bind(schema_id)
            .bind(i as i64)
            .bind(&col.name)
            .bind(&col.table)
            .bind(col.kind.as_str())
            .bind(&col.value)
            .bind(col.hidden as i64)
            .bind(col.primary as i64)
            .bind(col.unique as i64)
            .bind(&col.attrs)
            .execute(&mut *tx)
            .await?;
        }

        for (i, row) in table.rows.iter().enumerate() {
            let values_json = serde_json::to_string(&row.encode())?;
            sqlx::query(
                "INSERT INTO mdb_rows (context, schema_id, position, file, values_json) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(context)
            .bind(schema_id)
            .bind(i as i64)
            .bind(row.file())
            .bind(&values_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        log::debug!(
            "saved {}/{} ({} columns, {} rows)",
            context,
            schema_id,
            table.cols.len(),
            table.rows.len()
        );
        Ok(())
    }

    async fn put_schema(&self, context: &str, schema: &Schema) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_schema(&mut *conn, context, schema).await
    }

    async fn remove_schema(&self, context: &str, schema_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["mdb_rows", "mdb_columns"] {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE context = ? AND schema_id = ?",
                table
            ))
            .bind(context)
            .bind(schema_id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM mdb_schemas WHERE context = ? AND id = ?")
            .bind(context)
            .bind(schema_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
