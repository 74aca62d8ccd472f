//! Column add / rename / retype / delete.
//!
//! [`save_column`] validates the new definition and, on a rename, rewrites
//! row keys and every predicate reference in one [`ColumnChange`] that the
//! caller persists as a single write. [`delete_column`] only drops the
//! column and its row values: predicate references to a deleted column
//! stay behind and are ignored during evaluation. The two paths are kept
//! distinct on purpose.

use thiserror::Error;

use crate::models::{Column, Schema, Table, Value};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColumnError {
    #[error("property name cannot be empty")]
    EmptyName,
    #[error("duplicate property name: {0}")]
    DuplicateName(String),
    #[error("property not found: {0}")]
    NotFound(String),
    #[error("primary property '{0}' cannot be renamed, retyped or deleted")]
    PrimaryColumn(String),
    #[error("property namespace cannot change from '{from}' to '{to}'")]
    NamespaceChanged { from: String, to: String },
}

/// Result of a column save: the updated table and the schemas whose
/// predicates were rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnChange {
    pub table: Table,
    pub schemas: Vec<Schema>,
}

/// Add `new_column`, or replace `old_column` with it.
///
/// Names are compared case-insensitively within the column's namespace;
/// the column being replaced does not count as a duplicate of itself.
pub fn save_column(
    table: &Table,
    schemas: &[Schema],
    mut new_column: Column,
    old_column: Option<&Column>,
) -> Result<ColumnChange, ColumnError> {
    new_column.name = new_column.name.trim().to_string();
    if new_column.name.is_empty() {
        return Err(ColumnError::EmptyName);
    }
    if new_column.schema_id.is_empty() {
        new_column.schema_id = table.schema.id.clone();
    }

    let lowered = new_column.name.to_lowercase();
    let duplicate = table.cols.iter().any(|c| {
        c.table == new_column.table
            && c.name.to_lowercase() == lowered
            && !old_column.is_some_and(|old| c.same_identity(old))
    });
    if duplicate {
        return Err(ColumnError::DuplicateName(new_column.name));
    }

    let mut updated = table.clone();
    let old = match old_column {
        None => {
            updated.cols.push(new_column);
            return Ok(ColumnChange {
                table: updated,
                schemas: Vec::new(),
            });
        }
        Some(old) => old,
    };

    let position = table
        .cols
        .iter()
        .position(|c| c.same_identity(old))
        .ok_or_else(|| ColumnError::NotFound(old.field_key()))?;
    let existing = &table.cols[position];
    if existing.table != new_column.table {
        return Err(ColumnError::NamespaceChanged {
            from: existing.table.clone(),
            to: new_column.table,
        });
    }
    let reshaped = existing.name != new_column.name || existing.kind != new_column.kind;
    if existing.primary && reshaped {
        return Err(ColumnError::PrimaryColumn(existing.name.clone()));
    }

    let old_field = existing.field_key();
    let new_field = new_column.field_key();
    let retyped = existing.kind != new_column.kind;
    let kind = new_column.kind;
    updated.cols[position] = new_column;

    for row in &mut updated.rows {
        if old_field != new_field {
            row.rename_key(&old_field, &new_field);
        }
        if retyped {
            if let Some(v) = row.get(&new_field) {
                let recoded = Value::decode(kind, &v.encode());
                row.set(new_field.clone(), recoded);
            }
        }
    }

    let schemas = migrate_predicates(schemas, &table.schema.id, &old_field, &new_field);
    if let Some(own) = schemas.iter().find(|s| s.id == updated.schema.id) {
        updated.schema = own.clone();
    } else if updated.schema.predicate.references(&old_field) {
        updated.schema.predicate.rename_field(&old_field, &new_field);
    }

    Ok(ColumnChange {
        table: updated,
        schemas,
    })
}

/// Rewrite `old_field` to `new_field` in the root schema `root_id` and in
/// every view over it. Returns only the schemas that changed.
pub fn migrate_predicates(
    schemas: &[Schema],
    root_id: &str,
    old_field: &str,
    new_field: &str,
) -> Vec<Schema> {
    if old_field == new_field {
        return Vec::new();
    }
    schemas
        .iter()
        .filter(|s| s.root_id() == root_id && s.predicate.references(old_field))
        .map(|s| {
            let mut s = s.clone();
            s.predicate.rename_field(old_field, new_field);
            s
        })
        .collect()
}

/// Remove `column` and strip its value from every row.
pub fn delete_column(table: &Table, column: &Column) -> Result<Table, ColumnError> {
    let existing = table
        .cols
        .iter()
        .find(|c| c.same_identity(column))
        .ok_or_else(|| ColumnError::NotFound(column.field_key()))?;
    if existing.primary {
        return Err(ColumnError::PrimaryColumn(existing.name.clone()));
    }
    let field = existing.field_key();
    let mut updated = table.clone();
    updated.cols.retain(|c| !c.same_identity(column));
    for row in &mut updated.rows {
        row.remove(&field);
    }
    Ok(updated)
}
