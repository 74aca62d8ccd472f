//! Mutating commands: columns, tables, and view predicates.
//!
//! Each command opens the SQLite-backed [`ContextService`], applies one
//! change, and prints a one-line confirmation. Rejected changes (duplicate
//! names, unknown fields or functions) surface as errors.

use anyhow::{anyhow, bail, Result};

use mdb_core::models::{serialize_multi, Column, ColumnKind, Schema, SchemaKind};
use mdb_core::predicate::{default_filter_fn, default_sort_fn, filter_fn, sort_fn, Filter, Sort, ValueShape};
use mdb_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::service::ContextService;

/// Parse a column type tag, rejecting unknown tags.
pub fn parse_kind(tag: &str) -> Result<ColumnKind> {
    ColumnKind::ALL
        .into_iter()
        .find(|k| k.as_str() == tag)
        .ok_or_else(|| {
            let known: Vec<&str> = ColumnKind::ALL.iter().map(|k| k.as_str()).collect();
            anyhow!("unknown column type '{}' (expected one of: {})", tag, known.join(", "))
        })
}

/// Root schema id to edit: `table` if given, else the primary table.
async fn root_id<S: Store + 'static>(
    service: &ContextService<S>,
    context: &str,
    table: Option<&str>,
) -> Result<String> {
    match table {
        Some(id) => Ok(service.table(context, id).await?.schema.id.clone()),
        None => Ok(service.primary_table(context).await?.schema.id.clone()),
    }
}

async fn find_column<S: Store + 'static>(
    service: &ContextService<S>,
    context: &str,
    schema_id: &str,
    name: &str,
) -> Result<Column> {
    let table = service.table(context, schema_id).await?;
    table
        .cols
        .iter()
        .find(|c| c.table.is_empty() && c.name == name)
        .cloned()
        .ok_or_else(|| anyhow!("property not found: {}", name))
}

pub async fn run_column_add(
    config: &Config,
    context: &str,
    table: Option<&str>,
    name: &str,
    kind: &str,
    options: &[String],
) -> Result<()> {
    let service = db::open_service(config).await?;
    let schema_id = root_id(&service, context, table).await?;
    let column = Column {
        schema_id: schema_id.clone(),
        value: serialize_multi(options),
        ..Column::new(name, parse_kind(kind)?)
    };
    service.save_column(context, &schema_id, column, None).await?;
    println!("Added column '{}' ({}) to {}/{}", name, kind, context, schema_id);
    Ok(())
}

pub async fn run_column_rename(
    config: &Config,
    context: &str,
    table: Option<&str>,
    old: &str,
    new: &str,
    kind: Option<&str>,
) -> Result<()> {
    let service = db::open_service(config).await?;
    let schema_id = root_id(&service, context, table).await?;
    let existing = find_column(&service, context, &schema_id, old).await?;
    let column = Column {
        name: new.to_string(),
        kind: match kind {
            Some(tag) => parse_kind(tag)?,
            None => existing.kind,
        },
        ..existing.clone()
    };
    let kind_label = column.kind;
    service
        .save_column(context, &schema_id, column, Some(&existing))
        .await?;
    println!(
        "Updated column '{}' -> '{}' ({}) in {}/{}",
        old, new, kind_label, context, schema_id
    );
    Ok(())
}

pub async fn run_column_delete(
    config: &Config,
    context: &str,
    table: Option<&str>,
    name: &str,
) -> Result<()> {
    let service = db::open_service(config).await?;
    let schema_id = root_id(&service, context, table).await?;
    let existing = find_column(&service, context, &schema_id, name).await?;
    service.delete_column(context, &schema_id, &existing).await?;
    println!("Deleted column '{}' from {}/{}", name, context, schema_id);
    Ok(())
}

/// Create a root table and a table view over it.
pub async fn run_table_new(
    config: &Config,
    context: &str,
    name: &str,
    id: Option<&str>,
    tags: &[String],
) -> Result<()> {
    let service = db::open_service(config).await?;
    let id = id
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if service.schemas(context).await?.iter().any(|s| s.id == id) {
        bail!("schema already exists: {}/{}", context, id);
    }
    let schema = Schema {
        def: serialize_multi(tags),
        ..Schema::db(id.clone(), name)
    };
    service.save_schema(context, schema).await?;
    let view = Schema::view(format!("{}View", id), name, SchemaKind::Table, id.clone());
    service.save_schema(context, view).await?;
    println!("Created table {}/{} ({})", context, id, name);
    Ok(())
}

/// Delete a root table together with the views over it.
pub async fn run_table_drop(config: &Config, context: &str, id: &str) -> Result<()> {
    let service = db::open_service(config).await?;
    let schema = service.schema(context, id).await?;
    if schema.kind.is_view() {
        bail!("{}/{} is a view; drop its table instead", context, id);
    }
    if !service.delete_schema(context, id).await? {
        bail!("the primary table {}/{} cannot be dropped", context, id);
    }
    let views: Vec<String> = service
        .schemas(context)
        .await?
        .into_iter()
        .filter(|s| s.kind.is_view() && s.def == id)
        .map(|s| s.id)
        .collect();
    for view in &views {
        service.delete_schema(context, view).await?;
    }
    println!("Dropped table {}/{} and {} views", context, id, views.len());
    Ok(())
}

/// Kind of `field` among the view's joined columns.
async fn field_kind<S: Store + 'static>(
    service: &ContextService<S>,
    context: &str,
    view: &str,
    field: &str,
) -> Result<ColumnKind> {
    let rows = service.view_rows(context, view, None).await?;
    rows.columns
        .iter()
        .find(|c| c.field_key() == field)
        .map(|c| c.kind)
        .ok_or_else(|| anyhow!("unknown field '{}' in view {}/{}", field, context, view))
}

pub async fn run_view_filter(
    config: &Config,
    context: &str,
    view: &str,
    field: &str,
    func: Option<&str>,
    value: &str,
) -> Result<()> {
    let service = db::open_service(config).await?;
    let kind = field_kind(&service, context, view, field).await?;
    let func = match func {
        Some(id) => {
            let f = filter_fn(id).ok_or_else(|| anyhow!("unknown filter function '{}'", id))?;
            if !f.applies_to(kind) {
                bail!("filter '{}' does not apply to {} columns", id, kind);
            }
            f
        }
        None => default_filter_fn(kind)
            .and_then(filter_fn)
            .ok_or_else(|| anyhow!("no filter available for {} columns", kind))?,
    };
    if func.shape != ValueShape::None && value.is_empty() {
        log::warn!("filter {} on {} has an empty value", func.id, field);
    }

    let mut predicate = service.schema(context, view).await?.predicate;
    predicate.filters.push(Filter {
        field: field.to_string(),
        func: func.id.to_string(),
        value: if func.shape == ValueShape::None {
            String::new()
        } else {
            value.to_string()
        },
    });
    service.update_predicate(context, view, predicate).await?;
    println!("Added filter {} {} '{}' to {}/{}", field, func.id, value, context, view);
    Ok(())
}

pub async fn run_view_sort(
    config: &Config,
    context: &str,
    view: &str,
    field: &str,
    func: Option<&str>,
) -> Result<()> {
    let service = db::open_service(config).await?;
    let kind = field_kind(&service, context, view, field).await?;
    let func = match func {
        Some(id) => {
            let s = sort_fn(id).ok_or_else(|| anyhow!("unknown sort function '{}'", id))?;
            if !s.applies_to(kind) {
                bail!("sort '{}' does not apply to {} columns", id, kind);
            }
            s
        }
        None => default_sort_fn(kind)
            .and_then(sort_fn)
            .ok_or_else(|| anyhow!("no sort available for {} columns", kind))?,
    };

    let mut predicate = service.schema(context, view).await?.predicate;
    let entry = Sort {
        field: field.to_string(),
        func: func.id.to_string(),
    };
    match predicate.sort.iter_mut().find(|s| s.field == field) {
        Some(existing) => *existing = entry,
        None => predicate.sort.push(entry),
    }
    service.update_predicate(context, view, predicate).await?;
    println!("Sorting {}/{} by {} ({})", context, view, field, func.id);
    Ok(())
}

pub async fn run_view_group(
    config: &Config,
    context: &str,
    view: &str,
    field: Option<&str>,
) -> Result<()> {
    let service = db::open_service(config).await?;
    if let Some(field) = field {
        field_kind(&service, context, view, field).await?;
    }
    let mut predicate = service.schema(context, view).await?.predicate;
    predicate.group_by = field.map(|f| vec![f.to_string()]).unwrap_or_default();
    service.update_predicate(context, view, predicate).await?;
    match field {
        Some(f) => println!("Grouping {}/{} by {}", context, view, f),
        None => println!("Removed grouping from {}/{}", context, view),
    }
    Ok(())
}

/// Remove every filter, sort key and grouping from a view.
pub async fn run_view_clear(config: &Config, context: &str, view: &str) -> Result<()> {
    let service = db::open_service(config).await?;
    let mut predicate = service.schema(context, view).await?.predicate;
    predicate.filters.clear();
    predicate.sort.clear();
    predicate.group_by.clear();
    service.update_predicate(context, view, predicate).await?;
    println!("Cleared filters, sort and grouping of {}/{}", context, view);
    Ok(())
}
