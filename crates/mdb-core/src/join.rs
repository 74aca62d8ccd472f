//! Tag-context resolution and primary-key joins.
//!
//! A root schema's `def` lists tag contexts. Each tag context is a separate
//! context whose primary table is joined into the current rows by matching
//! the `File` key. Joined values are stored under `name + tag`, and a marker
//! `_index<tag>` records the matching row's position in the tag table
//! (`-1` when the file has no row there).
//!
//! Tag tables are read through a [`ContextCache`] that is filled lazily and
//! invalidated explicitly when a tag context changes.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::models::{
    split_multi, Column, Row, Schema, Table, Value, DEFAULT_DB_SCHEMA, INDEX_PREFIX,
};
use crate::store::{load_primary_table, Store};

/// Parse a root schema's `def` into its tag-context ids, deduplicated in
/// first-seen order.
pub fn resolve_tag_contexts(def: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in split_multi(def) {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Row key of the join marker for `tag`.
pub fn index_key(tag: &str) -> String {
    format!("{}{}", INDEX_PREFIX, tag)
}

/// Index from primary key to row position.
fn key_index(table: &Table) -> HashMap<&str, usize> {
    table
        .rows
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.file().map(|f| (f, i)))
        .collect()
}

fn join_one(joined: &mut Row, tag: &str, table: Option<&Table>, position: Option<usize>) {
    let Some(table) = table else {
        joined.set(index_key(tag), Value::number(-1.0));
        return;
    };
    let context_row = position.map(|i| &table.rows[i]);
    for col in &table.cols {
        let key = format!("{}{}", col.field_key(), tag);
        let value = context_row
            .and_then(|r| r.get(&col.field_key()))
            .cloned()
            .unwrap_or_default();
        joined.set(key, value);
    }
    let marker = position.map(|i| i as f64).unwrap_or(-1.0);
    joined.set(index_key(tag), Value::number(marker));
}

/// Join one primary row with every linked tag context.
///
/// Tags without a loaded table are treated as empty tables.
pub fn join_row(primary: &Row, tables: &HashMap<String, Arc<Table>>, tags: &[String]) -> Row {
    let mut joined = primary.clone();
    for tag in tags {
        let table = tables.get(tag).map(|t| t.as_ref());
        let position = match (table, primary.file()) {
            (Some(t), Some(file)) => t.row_index(file),
            _ => None,
        };
        join_one(&mut joined, tag, table, position);
    }
    joined
}

/// Join every row of `rows`. Equivalent to mapping [`join_row`], with one
/// key index built per tag table.
pub fn join_rows(rows: &[Row], tables: &HashMap<String, Arc<Table>>, tags: &[String]) -> Vec<Row> {
    let indexes: Vec<(&String, Option<&Table>, HashMap<&str, usize>)> = tags
        .iter()
        .map(|tag| {
            let table = tables.get(tag).map(|t| t.as_ref());
            let index = table.map(key_index).unwrap_or_default();
            (tag, table, index)
        })
        .collect();

    rows.iter()
        .map(|row| {
            let mut joined = row.clone();
            for (tag, table, index) in &indexes {
                let position = row.file().and_then(|f| index.get(f).copied());
                join_one(&mut joined, tag, *table, position);
            }
            joined
        })
        .collect()
}

/// Columns of the joined row set: the local columns followed by every tag
/// table's columns namespaced under their tag. Local columns win on a
/// field-key clash.
pub fn joined_columns(
    local: &[Column],
    tables: &HashMap<String, Arc<Table>>,
    tags: &[String],
) -> Vec<Column> {
    let mut cols = local.to_vec();
    for tag in tags {
        let Some(table) = tables.get(tag) else {
            continue;
        };
        for col in &table.cols {
            let namespaced = Column {
                table: format!("{}{}", col.table, tag),
                primary: false,
                unique: false,
                ..col.clone()
            };
            if !cols.iter().any(|c| c.field_key() == namespaced.field_key()) {
                cols.push(namespaced);
            }
        }
    }
    cols
}

/// Read-through cache of tag-context tables keyed by tag id.
///
/// Cached tables are shared read-only; a change to a tag context is picked
/// up only after [`ContextCache::invalidate`].
#[derive(Debug, Default)]
pub struct ContextCache {
    tables: HashMap<String, Arc<Table>>,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached table for `tag`, loading it from `store` on a miss. A tag
    /// context without a root table yields an empty table.
    pub async fn get_or_load<S: Store + ?Sized>(
        &mut self,
        store: &S,
        tag: &str,
    ) -> Result<Arc<Table>> {
        if let Some(table) = self.tables.get(tag) {
            return Ok(Arc::clone(table));
        }
        let table = match load_primary_table(store, tag).await? {
            Some(table) => table,
            None => Table::empty(Schema::db(DEFAULT_DB_SCHEMA, tag)),
        };
        log::debug!("loaded tag context {} ({} rows)", tag, table.rows.len());
        let table = Arc::new(table);
        self.tables.insert(tag.to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Ensure every tag in `tags` is loaded and return them as a map.
    pub async fn load_all<S: Store + ?Sized>(
        &mut self,
        store: &S,
        tags: &[String],
    ) -> Result<HashMap<String, Arc<Table>>> {
        let mut out = HashMap::new();
        for tag in tags {
            let table = self.get_or_load(store, tag).await?;
            out.insert(tag.clone(), table);
        }
        Ok(out)
    }

    /// Drop the cached table for `tag`. Returns whether it was cached.
    pub fn invalidate(&mut self, tag: &str) -> bool {
        self.tables.remove(tag).is_some()
    }

    pub fn invalidate_all(&mut self) {
        self.tables.clear();
    }

    pub fn tables(&self) -> &HashMap<String, Arc<Table>> {
        &self.tables
    }
}
