//! Context service: the owner of per-context table state.
//!
//! [`ContextService`] keeps an in-memory snapshot of each loaded context
//! (its schemas and root tables), a read-through cache of tag-context
//! tables, and a broadcast channel of [`ChangeEvent`]s.
//!
//! Rules the service enforces:
//!
//! - Mutations on one context are serialized.
//! - Every mutation persists first and updates the snapshot only after the
//!   store accepted the write. A failed write leaves the snapshot as it was.
//! - Reloads replace the snapshot of a context wholesale. Each reload takes
//!   a version ticket; a reload that finishes after a newer ticket was
//!   issued for the same context is discarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, bail, Result};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock};

use mdb_core::frontmatter::{collect_external, merge_external_into_table, MetadataSource};
use mdb_core::join::{joined_columns, join_rows, resolve_tag_contexts, ContextCache};
use mdb_core::models::{Column, Row, Schema, SchemaKind, Table};
use mdb_core::mutation;
use mdb_core::predicate::{apply_predicate, group_rows, Predicate, RowGroup};
use mdb_core::store::{self, Store};

/// Change notifications exchanged with the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Tables or schemas of a context changed.
    TableChanged { context: String },
    /// The frontmatter of one file changed.
    FileMetadataChanged { path: String },
    /// Rows were added to or removed from a tag context.
    TagMembershipChanged { tag: String },
}

#[derive(Debug, Clone)]
struct ContextState {
    schemas: Vec<Schema>,
    /// Root tables by schema id.
    tables: HashMap<String, Arc<Table>>,
}

impl ContextState {
    fn schema(&self, id: &str) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.id == id)
    }

    /// Insert or replace a schema, keeping the root table's copy in step.
    fn upsert_schema(&mut self, schema: Schema) {
        if let Some(table) = self.tables.get_mut(&schema.id) {
            Arc::make_mut(table).schema = schema.clone();
        }
        match self.schemas.iter_mut().find(|s| s.id == schema.id) {
            Some(existing) => *existing = schema,
            None => self.schemas.push(schema),
        }
    }
}

/// A ticket for one reload of a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub context: String,
    pub version: u64,
}

/// Rows of a view after join, filters, search and sort.
#[derive(Debug, Clone)]
pub struct ViewRows {
    pub schema: Schema,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

/// Outcome of a frontmatter sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub files: usize,
    pub new_columns: Vec<String>,
    pub new_rows: usize,
    pub updated_rows: usize,
}

impl SyncReport {
    pub fn is_unchanged(&self) -> bool {
        self.new_columns.is_empty() && self.new_rows == 0 && self.updated_rows == 0
    }
}

struct MetadataBinding {
    source: Arc<dyn MetadataSource + Send + Sync>,
    ignore_keys: Vec<String>,
}

pub struct ContextService<S: Store> {
    store: Arc<S>,
    contexts: RwLock<HashMap<String, ContextState>>,
    versions: StdMutex<HashMap<String, u64>>,
    writes: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    cache: Mutex<ContextCache>,
    events: broadcast::Sender<ChangeEvent>,
    metadata: Option<MetadataBinding>,
}

impl<S: Store + 'static> ContextService<S> {
    pub fn new(store: Arc<S>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            contexts: RwLock::new(HashMap::new()),
            versions: StdMutex::new(HashMap::new()),
            writes: StdMutex::new(HashMap::new()),
            cache: Mutex::new(ContextCache::new()),
            events,
            metadata: None,
        }
    }

    /// Attach the metadata source used by frontmatter sync.
    pub fn with_metadata(
        mut self,
        source: Arc<dyn MetadataSource + Send + Sync>,
        ignore_keys: Vec<String>,
    ) -> Self {
        self.metadata = Some(MetadataBinding {
            source,
            ignore_keys,
        });
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: ChangeEvent) {
        log::debug!("change event: {:?}", event);
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    // ---- loading ----

    /// Issue a new version ticket for `context`, superseding earlier ones.
    pub fn begin_load(&self, context: &str) -> LoadTicket {
        let mut versions = self.versions.lock().unwrap();
        let version = versions.entry(context.to_string()).or_insert(0);
        *version += 1;
        LoadTicket {
            context: context.to_string(),
            version: *version,
        }
    }

    fn is_latest(&self, ticket: &LoadTicket) -> bool {
        let versions = self.versions.lock().unwrap();
        versions.get(&ticket.context).copied() == Some(ticket.version)
    }

    /// Read the context from the store and install it, unless a newer
    /// ticket was issued meanwhile. Returns whether the result was applied.
    pub async fn finish_load(&self, ticket: LoadTicket) -> Result<bool> {
        let state = self.fetch_state(&ticket.context).await?;
        let mut contexts = self.contexts.write().await;
        if !self.is_latest(&ticket) {
            log::debug!(
                "discarding stale load of {} (version {})",
                ticket.context,
                ticket.version
            );
            return Ok(false);
        }
        contexts.insert(ticket.context.clone(), state);
        Ok(true)
    }

    /// Reload `context` from the store.
    pub async fn load_context(&self, context: &str) -> Result<bool> {
        let ticket = self.begin_load(context);
        self.finish_load(ticket).await
    }

    async fn fetch_state(&self, context: &str) -> Result<ContextState> {
        let schemas = store::load_schemas(self.store.as_ref(), context).await?;
        let mut tables = HashMap::new();
        for schema in schemas.iter().filter(|s| s.kind == SchemaKind::Db) {
            let table = store::load_table(self.store.as_ref(), context, &schema.id).await?;
            tables.insert(schema.id.clone(), Arc::new(table));
        }
        Ok(ContextState { schemas, tables })
    }

    async fn snapshot(&self, context: &str) -> Result<ContextState> {
        if let Some(state) = self.contexts.read().await.get(context) {
            return Ok(state.clone());
        }
        self.load_context(context).await?;
        self.contexts
            .read()
            .await
            .get(context)
            .cloned()
            .ok_or_else(|| anyhow!("context {} could not be loaded", context))
    }

    pub async fn schemas(&self, context: &str) -> Result<Vec<Schema>> {
        Ok(self.snapshot(context).await?.schemas)
    }

    pub async fn schema(&self, context: &str, schema_id: &str) -> Result<Schema> {
        self.snapshot(context)
            .await?
            .schema(schema_id)
            .cloned()
            .ok_or_else(|| anyhow!("schema not found: {}/{}", context, schema_id))
    }

    /// Root table of `schema_id`; a view id resolves to its root table.
    pub async fn table(&self, context: &str, schema_id: &str) -> Result<Arc<Table>> {
        let state = self.snapshot(context).await?;
        let schema = state
            .schema(schema_id)
            .ok_or_else(|| anyhow!("schema not found: {}/{}", context, schema_id))?;
        state
            .tables
            .get(schema.root_id())
            .cloned()
            .ok_or_else(|| anyhow!("no table behind schema {}/{}", context, schema_id))
    }

    /// Root table of the context's primary schema.
    pub async fn primary_table(&self, context: &str) -> Result<Arc<Table>> {
        let state = self.snapshot(context).await?;
        let root = state
            .schemas
            .iter()
            .find(|s| s.kind == SchemaKind::Db && s.primary)
            .or_else(|| state.schemas.iter().find(|s| s.kind == SchemaKind::Db))
            .ok_or_else(|| anyhow!("context {} has no root table", context))?;
        state
            .tables
            .get(&root.id)
            .cloned()
            .ok_or_else(|| anyhow!("no table behind schema {}/{}", context, root.id))
    }

    // ---- mutations ----

    async fn write_guard(&self, context: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut writes = self.writes.lock().unwrap();
            Arc::clone(writes.entry(context.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Install a persisted change in the snapshot and tell subscribers.
    async fn commit(&self, context: &str, apply: impl FnOnce(&mut ContextState)) {
        {
            let mut contexts = self.contexts.write().await;
            if let Some(state) = contexts.get_mut(context) {
                apply(state);
            }
            // in-flight reloads started before this write are stale now
            self.begin_load(context);
        }
        self.cache.lock().await.invalidate(context);
        self.notify(ChangeEvent::TableChanged {
            context: context.to_string(),
        });
    }

    async fn persist_table(&self, context: &str, table: Table, schemas: Vec<Schema>) -> Result<()> {
        store::save_table_with_schemas(self.store.as_ref(), context, &table, &schemas).await?;
        self.commit(context, move |state| {
            for schema in schemas {
                state.upsert_schema(schema);
            }
            state.upsert_schema(table.schema.clone());
            state.tables.insert(table.schema.id.clone(), Arc::new(table));
        })
        .await;
        Ok(())
    }

    /// Replace a root table with `table`.
    pub async fn save_table(&self, context: &str, table: Table) -> Result<()> {
        let _guard = self.write_guard(context).await;
        self.snapshot(context).await?;
        self.persist_table(context, table, Vec::new()).await
    }

    /// Create or update a schema. Returns whether it is new.
    pub async fn save_schema(&self, context: &str, schema: Schema) -> Result<bool> {
        let _guard = self.write_guard(context).await;
        self.snapshot(context).await?;
        let created = store::save_schema(self.store.as_ref(), context, &schema).await?;
        self.commit(context, move |state| {
            if created && schema.kind == SchemaKind::Db {
                state
                    .tables
                    .insert(schema.id.clone(), Arc::new(Table::empty(schema.clone())));
            }
            state.upsert_schema(schema);
        })
        .await;
        Ok(created)
    }

    /// Delete a schema. The primary root schema is kept; the call then
    /// returns `false`.
    pub async fn delete_schema(&self, context: &str, schema_id: &str) -> Result<bool> {
        let _guard = self.write_guard(context).await;
        let state = self.snapshot(context).await?;
        let schema = state
            .schema(schema_id)
            .cloned()
            .ok_or_else(|| anyhow!("schema not found: {}/{}", context, schema_id))?;
        if !store::delete_schema(self.store.as_ref(), context, &schema).await? {
            return Ok(false);
        }
        let id = schema.id;
        self.commit(context, move |state| {
            state.schemas.retain(|s| s.id != id);
            state.tables.remove(&id);
        })
        .await;
        Ok(true)
    }

    /// Add `column` to the table behind `schema_id`, or replace
    /// `old_column` with it. A rename rewrites rows and every predicate
    /// that references the old field, in one write.
    pub async fn save_column(
        &self,
        context: &str,
        schema_id: &str,
        column: Column,
        old_column: Option<&Column>,
    ) -> Result<()> {
        let _guard = self.write_guard(context).await;
        let table = self.table(context, schema_id).await?;
        let schemas = self.schemas(context).await?;
        let change = mutation::save_column(&table, &schemas, column, old_column)?;
        self.persist_table(context, change.table, change.schemas).await
    }

    /// Remove a column and its values. Predicates referencing it are left
    /// as they are.
    pub async fn delete_column(&self, context: &str, schema_id: &str, column: &Column) -> Result<()> {
        let _guard = self.write_guard(context).await;
        let table = self.table(context, schema_id).await?;
        let updated = mutation::delete_column(&table, column)?;
        self.persist_table(context, updated, Vec::new()).await
    }

    /// Replace the predicate of a schema. Filters and sorts with unknown
    /// functions are dropped.
    pub async fn update_predicate(
        &self,
        context: &str,
        schema_id: &str,
        predicate: Predicate,
    ) -> Result<Schema> {
        let _guard = self.write_guard(context).await;
        let mut schema = self.schema(context, schema_id).await?;
        schema.predicate = predicate.normalized();
        store::save_schema(self.store.as_ref(), context, &schema).await?;
        let updated = schema.clone();
        self.commit(context, move |state| state.upsert_schema(schema))
            .await;
        Ok(updated)
    }

    // ---- queries ----

    /// Joined, filtered, searched and sorted rows of a view (or root table).
    pub async fn view_rows(
        &self,
        context: &str,
        schema_id: &str,
        search: Option<&str>,
    ) -> Result<ViewRows> {
        let schema = self.schema(context, schema_id).await?;
        let table = self.table(context, schema_id).await?;
        let tags = resolve_tag_contexts(&table.schema.def);
        let tag_tables = self
            .cache
            .lock()
            .await
            .load_all(self.store.as_ref(), &tags)
            .await?;

        let columns = joined_columns(&table.cols, &tag_tables, &tags);
        let joined = join_rows(&table.rows, &tag_tables, &tags);
        let rows = apply_predicate(&schema.predicate, &columns, &joined, search);
        Ok(ViewRows {
            schema,
            columns,
            rows,
        })
    }

    /// [`ContextService::view_rows`] bucketed by the view's group-by field.
    pub async fn view_groups(
        &self,
        context: &str,
        schema_id: &str,
        search: Option<&str>,
    ) -> Result<(ViewRows, Vec<RowGroup>)> {
        let view = self.view_rows(context, schema_id, search).await?;
        let groups = group_rows(&view.schema.predicate, &view.columns, &view.rows);
        Ok((view, groups))
    }

    // ---- frontmatter ----

    fn metadata(&self) -> Result<&MetadataBinding> {
        match &self.metadata {
            Some(binding) => Ok(binding),
            None => bail!("no metadata source attached"),
        }
    }

    async fn merge_paths(&self, context: &str, paths: &[String]) -> Result<SyncReport> {
        let binding = self.metadata()?;
        let records: Vec<_> = paths
            .iter()
            .filter_map(|p| binding.source.get(p).map(|meta| (p.clone(), meta)))
            .collect();
        let snapshot = collect_external(&records, &binding.ignore_keys);

        let table = self.primary_table(context).await?;
        let merged = merge_external_into_table(&table, &snapshot.rows, &snapshot.types);

        let report = SyncReport {
            files: records.len(),
            new_columns: merged
                .cols
                .iter()
                .filter(|c| !table.cols.iter().any(|t| t.same_identity(c)))
                .map(|c| c.name.clone())
                .collect(),
            new_rows: merged.rows.len() - table.rows.len(),
            updated_rows: table
                .rows
                .iter()
                .zip(&merged.rows)
                .filter(|(before, after)| before != after)
                .count(),
        };
        if !report.is_unchanged() {
            self.persist_table(context, merged, Vec::new()).await?;
        }
        Ok(report)
    }

    /// Import the frontmatter of every file under `folder` into the
    /// context's primary table.
    pub async fn sync_frontmatter(&self, context: &str, folder: &str) -> Result<SyncReport> {
        let _guard = self.write_guard(context).await;
        let paths = self.metadata()?.source.paths_under(folder);
        let report = self.merge_paths(context, &paths).await?;
        log::info!(
            "synced {} files into {}: {} new columns, {} new rows, {} updated",
            report.files,
            context,
            report.new_columns.len(),
            report.new_rows,
            report.updated_rows
        );
        Ok(report)
    }

    // ---- events ----

    /// Apply an external change notification.
    pub async fn handle_event(&self, event: &ChangeEvent) -> Result<()> {
        match event {
            ChangeEvent::TableChanged { context } => {
                self.cache.lock().await.invalidate(context);
                let loaded = self.contexts.read().await.contains_key(context);
                if loaded {
                    self.load_context(context).await?;
                }
            }
            ChangeEvent::TagMembershipChanged { tag } => {
                self.cache.lock().await.invalidate(tag);
            }
            ChangeEvent::FileMetadataChanged { path } => {
                let affected: Vec<String> = {
                    let contexts = self.contexts.read().await;
                    contexts
                        .iter()
                        .filter(|(_, state)| {
                            state
                                .tables
                                .values()
                                .any(|t| t.schema.primary && t.row_index(path).is_some())
                        })
                        .map(|(id, _)| id.clone())
                        .collect()
                };
                for context in affected {
                    let _guard = self.write_guard(&context).await;
                    self.merge_paths(&context, std::slice::from_ref(path))
                        .await?;
                }
            }
        }
        Ok(())
    }
}
