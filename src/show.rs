//! Read-only commands: list schemas and print a view.
//!
//! `mdb schemas` lists the tables and views of a context; `mdb show` runs a
//! view's predicate (join, filters, search, sort, grouping) and prints the
//! visible columns.

use anyhow::Result;

use mdb_core::models::{is_internal_key, Column, Schema, SchemaKind};
use mdb_core::predicate::Predicate;

use crate::config::Config;
use crate::db;

/// Columns shown for a predicate: `colsOrder` entries first, then the rest
/// in table order, without hidden and internal columns.
pub fn visible_columns<'a>(predicate: &Predicate, columns: &'a [Column]) -> Vec<&'a Column> {
    let shown = |c: &&Column| {
        let key = c.field_key();
        !c.hidden && !is_internal_key(&key) && !predicate.cols_hidden.contains(&key)
    };
    let mut out: Vec<&Column> = predicate
        .cols_order
        .iter()
        .filter_map(|key| columns.iter().find(|c| &c.field_key() == key))
        .filter(shown)
        .collect();
    for col in columns.iter().filter(shown) {
        if !out.iter().any(|c| c.same_identity(col)) {
            out.push(col);
        }
    }
    out
}

/// The view `mdb show` uses when none is given: the primary view, else the
/// first view, else the primary root schema.
pub fn default_view(schemas: &[Schema]) -> Option<&Schema> {
    schemas
        .iter()
        .find(|s| s.kind.is_view() && s.primary)
        .or_else(|| schemas.iter().find(|s| s.kind.is_view()))
        .or_else(|| schemas.iter().find(|s| s.kind == SchemaKind::Db && s.primary))
}

pub async fn run_schemas(config: &Config, context: &str) -> Result<()> {
    let service = db::open_service(config).await?;
    let schemas = service.schemas(context).await?;

    println!("Schemas in {}:", context);
    for schema in &schemas {
        let p = &schema.predicate;
        println!(
            "  {:<16} {:<6} {}{}",
            schema.id,
            schema.kind.as_str(),
            schema.name,
            if schema.primary { " (primary)" } else { "" }
        );
        if !schema.def.is_empty() {
            let label = if schema.kind.is_view() { "of" } else { "tags" };
            println!("  {:<16} {}: {}", "", label, schema.def);
        }
        if !p.filters.is_empty() || !p.sort.is_empty() || !p.group_by.is_empty() {
            println!(
                "  {:<16} {} filters, {} sort keys{}",
                "",
                p.filters.len(),
                p.sort.len(),
                p.group_by
                    .first()
                    .map(|g| format!(", grouped by {}", g))
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}

pub async fn run_show(
    config: &Config,
    context: &str,
    view: Option<&str>,
    search: Option<&str>,
) -> Result<()> {
    let service = db::open_service(config).await?;
    let view_id = match view {
        Some(id) => id.to_string(),
        None => {
            let schemas = service.schemas(context).await?;
            match default_view(&schemas) {
                Some(s) => s.id.clone(),
                None => anyhow::bail!("context {} has no views", context),
            }
        }
    };

    let (result, groups) = service.view_groups(context, &view_id, search).await?;
    let columns = visible_columns(&result.schema.predicate, &result.columns);
    let header: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

    println!("--- {} ({} rows) ---", result.schema.name, result.rows.len());
    println!("{}", header.join(" | "));
    let grouped = !result.schema.predicate.group_by.is_empty();
    for group in &groups {
        if grouped {
            println!();
            let label = if group.key.is_empty() {
                "(none)"
            } else {
                group.key.as_str()
            };
            println!("## {} ({})", label, group.rows.len());
        }
        for &i in &group.rows {
            let row = &result.rows[i];
            let cells: Vec<String> = columns
                .iter()
                .map(|c| row.value(&c.field_key()).encode())
                .collect();
            println!("{}", cells.join(" | "));
        }
    }
    Ok(())
}
