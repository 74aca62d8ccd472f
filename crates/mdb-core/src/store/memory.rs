//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Rows are kept in their
//! encoded string form so reads go through the same decode path as the
//! SQLite backend. Writes can be switched off with
//! [`InMemoryStore::set_read_only`] to exercise failure handling.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Column, Row, Schema, Table};

use super::Store;

struct StoredTable {
    cols: Vec<Column>,
    rows: Vec<BTreeMap<String, String>>,
}

#[derive(Default)]
struct StoredContext {
    schemas: Vec<Schema>,
    tables: HashMap<String, StoredTable>,
}

impl StoredContext {
    fn upsert_schema(&mut self, schema: &Schema) {
        match self.schemas.iter_mut().find(|s| s.id == schema.id) {
            Some(existing) => *existing = schema.clone(),
            None => self.schemas.push(schema.clone()),
        }
    }
}

/// In-memory store keyed by context id.
pub struct InMemoryStore {
    contexts: RwLock<HashMap<String, StoredContext>>,
    read_only: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            read_only: AtomicBool::new(false),
        }
    }

    /// Make every write fail until switched back.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            bail!("store is read-only");
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn fetch_schemas(&self, context: &str) -> Result<Vec<Schema>> {
        let contexts = self.contexts.read().unwrap();
        Ok(contexts
            .get(context)
            .map(|c| c.schemas.clone())
            .unwrap_or_default())
    }

    async fn fetch_table(&self, context: &str, schema_id: &str) -> Result<Option<Table>> {
        let contexts = self.contexts.read().unwrap();
        let Some(ctx) = contexts.get(context) else {
            return Ok(None);
        };
        let (Some(schema), Some(stored)) = (
            ctx.schemas.iter().find(|s| s.id == schema_id),
            ctx.tables.get(schema_id),
        ) else {
            return Ok(None);
        };
        Ok(Some(Table {
            schema: schema.clone(),
            cols: stored.cols.clone(),
            rows: stored
                .rows
                .iter()
                .map(|raw| Row::decode(&stored.cols, raw))
                .collect(),
        }))
    }

    async fn put_table(&self, context: &str, table: &Table, schemas: &[Schema]) -> Result<()> {
        self.check_writable()?;
        let mut contexts = self.contexts.write().unwrap();
        let ctx = contexts.entry(context.to_string()).or_default();
        for schema in schemas {
            ctx.upsert_schema(schema);
        }
        ctx.upsert_schema(&table.schema);
        ctx.tables.insert(
            table.schema.id.clone(),
            StoredTable {
                cols: table.cols.clone(),
                rows: table.rows.iter().map(Row::encode).collect(),
            },
        );
        Ok(())
    }

    async fn put_schema(&self, context: &str, schema: &Schema) -> Result<()> {
        self.check_writable()?;
        let mut contexts = self.contexts.write().unwrap();
        contexts
            .entry(context.to_string())
            .or_default()
            .upsert_schema(schema);
        Ok(())
    }

    async fn remove_schema(&self, context: &str, schema_id: &str) -> Result<()> {
        self.check_writable()?;
        let mut contexts = self.contexts.write().unwrap();
        if let Some(ctx) = contexts.get_mut(context) {
            ctx.schemas.retain(|s| s.id != schema_id);
            ctx.tables.remove(schema_id);
        }
        Ok(())
    }
}
