//! Storage abstraction for context tables.
//!
//! The [`Store`] trait exposes raw persistence primitives; the free
//! functions in this module ([`load_schemas`], [`load_table`],
//! [`save_table`], [`save_schema`], [`delete_schema`]) layer the table-store
//! semantics on top so every backend behaves the same:
//!
//! | Operation | Semantics |
//! |-----------|-----------|
//! | [`load_schemas`] | persisted schemas, or the default set when none exist |
//! | [`load_table`] | persisted table, or an empty one for a known schema |
//! | [`save_table`] | validate, then replace columns + rows in one write |
//! | [`save_schema`] | upsert; a new root schema gets an empty table |
//! | [`delete_schema`] | no-op for the primary root schema |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Schema, SchemaKind, Table};

/// Abstract storage backend.
#[async_trait]
pub trait Store: Send + Sync {
    /// All persisted schemas of a context, in creation order.
    async fn fetch_schemas(&self, context: &str) -> Result<Vec<Schema>>;

    /// The persisted table of a root schema, or `None` if never written.
    async fn fetch_table(&self, context: &str, schema_id: &str) -> Result<Option<Table>>;

    /// Atomically upsert `schemas` and then `table.schema`, and replace the
    /// columns and rows of `table`. Either everything is written or nothing.
    async fn put_table(&self, context: &str, table: &Table, schemas: &[Schema]) -> Result<()>;

    /// Upsert a schema definition.
    async fn put_schema(&self, context: &str, schema: &Schema) -> Result<()>;

    /// Remove a schema and its backing table.
    async fn remove_schema(&self, context: &str, schema_id: &str) -> Result<()>;
}

/// Schemas of `context`, or [`Schema::default_set`] when nothing is stored.
pub async fn load_schemas<S: Store + ?Sized>(store: &S, context: &str) -> Result<Vec<Schema>> {
    let schemas = store.fetch_schemas(context).await?;
    if schemas.is_empty() {
        return Ok(Schema::default_set());
    }
    Ok(schemas)
}

/// Table of `schema_id`. A known root schema without stored data yields an
/// empty table; an unknown schema is an error.
pub async fn load_table<S: Store + ?Sized>(
    store: &S,
    context: &str,
    schema_id: &str,
) -> Result<Table> {
    if let Some(table) = store.fetch_table(context, schema_id).await? {
        return Ok(table);
    }
    let schemas = load_schemas(store, context).await?;
    match schemas.into_iter().find(|s| s.id == schema_id) {
        Some(schema) if schema.kind == SchemaKind::Db => Ok(Table::empty(schema)),
        Some(schema) => bail!("schema '{}' is a view, not a table", schema.id),
        None => bail!("schema not found: {}/{}", context, schema_id),
    }
}

/// Table of the context's primary root schema, or `None` when the context
/// has no root schema at all.
pub async fn load_primary_table<S: Store + ?Sized>(
    store: &S,
    context: &str,
) -> Result<Option<Table>> {
    let schemas = load_schemas(store, context).await?;
    let root = schemas
        .iter()
        .find(|s| s.kind == SchemaKind::Db && s.primary)
        .or_else(|| schemas.iter().find(|s| s.kind == SchemaKind::Db));
    match root {
        Some(schema) => Ok(Some(load_table(store, context, &schema.id).await?)),
        None => Ok(None),
    }
}

/// Validate and persist a full table snapshot.
pub async fn save_table<S: Store + ?Sized>(store: &S, context: &str, table: &Table) -> Result<()> {
    save_table_with_schemas(store, context, table, &[]).await
}

/// Validate and persist a table snapshot together with schema upserts
/// (e.g. predicates rewritten by a column rename) as one write.
///
/// The first write to a context also persists the default schema set, so
/// the default view survives the first save.
pub async fn save_table_with_schemas<S: Store + ?Sized>(
    store: &S,
    context: &str,
    table: &Table,
    schemas: &[Schema],
) -> Result<()> {
    table.validate()?;
    let mut upserts = first_write_defaults(store, context, &table.schema.id).await?;
    upserts.extend(schemas.iter().cloned());
    store.put_table(context, table, &upserts).await
}

async fn first_write_defaults<S: Store + ?Sized>(
    store: &S,
    context: &str,
    except_id: &str,
) -> Result<Vec<Schema>> {
    if !store.fetch_schemas(context).await?.is_empty() {
        return Ok(Vec::new());
    }
    Ok(Schema::default_set()
        .into_iter()
        .filter(|s| s.id != except_id)
        .collect())
}

/// Upsert a schema. A root schema that did not exist before is written
/// together with its empty table. Returns whether the schema is new.
pub async fn save_schema<S: Store + ?Sized>(
    store: &S,
    context: &str,
    schema: &Schema,
) -> Result<bool> {
    let existed = store
        .fetch_schemas(context)
        .await?
        .iter()
        .any(|s| s.id == schema.id);
    if existed {
        store.put_schema(context, schema).await?;
    } else if schema.kind == SchemaKind::Db {
        save_table(store, context, &Table::empty(schema.clone())).await?;
    } else if let Some(root) = fresh_context_root(store, context).await? {
        save_table_with_schemas(store, context, &Table::empty(root), &[schema.clone()]).await?;
    } else {
        store.put_schema(context, schema).await?;
    }
    Ok(!existed)
}

/// The default root schema when `context` has never been written.
async fn fresh_context_root<S: Store + ?Sized>(store: &S, context: &str) -> Result<Option<Schema>> {
    if !store.fetch_schemas(context).await?.is_empty() {
        return Ok(None);
    }
    Ok(Schema::default_set()
        .into_iter()
        .find(|s| s.kind == SchemaKind::Db))
}

/// Delete a schema. The primary root schema is never deleted; the call is
/// then a no-op returning `false`.
pub async fn delete_schema<S: Store + ?Sized>(
    store: &S,
    context: &str,
    schema: &Schema,
) -> Result<bool> {
    if schema.primary && schema.kind == SchemaKind::Db {
        log::debug!("refusing to delete primary schema {}/{}", context, schema.id);
        return Ok(false);
    }
    store.remove_schema(context, &schema.id).await?;
    Ok(true)
}
