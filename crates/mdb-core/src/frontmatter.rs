//! Frontmatter synchronization: column type inference over per-file
//! metadata and the overlay merge of external rows into a table.
//!
//! External metadata arrives as JSON objects (one per file) through a
//! [`MetadataSource`]. [`collect_external`] turns a batch of them into typed
//! rows plus an aggregated type per key, and [`merge_external_into_table`]
//! folds that snapshot into a stored table without dropping local values.

use std::collections::HashMap;

use serde_json::{Map, Value as JsonValue};

use crate::models::{
    is_internal_key, parse_date, serialize_multi, Column, ColumnKind, Row, Table, Value,
    PRIMARY_KEY,
};
use crate::predicate::registry::{capabilities, MergeBehavior};

/// Read-only per-file key/value metadata.
pub trait MetadataSource {
    /// Metadata of one file, or `None` when the file is unknown or its
    /// metadata cannot be read.
    fn get(&self, path: &str) -> Option<Map<String, JsonValue>>;

    /// Paths of the files under `folder` (relative to the source root).
    fn paths_under(&self, _folder: &str) -> Vec<String> {
        Vec::new()
    }
}

impl MetadataSource for HashMap<String, Map<String, JsonValue>> {
    fn get(&self, path: &str) -> Option<Map<String, JsonValue>> {
        HashMap::get(self, path).cloned()
    }

    fn paths_under(&self, folder: &str) -> Vec<String> {
        let prefix = folder.trim_end_matches('/');
        let mut paths: Vec<String> = self
            .keys()
            .filter(|p| prefix.is_empty() || p.starts_with(&format!("{}/", prefix)))
            .cloned()
            .collect();
        paths.sort();
        paths
    }
}

fn looks_like_date(s: &str) -> bool {
    let s = s.trim();
    let b = s.as_bytes();
    b.len() >= 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[7] == b'-'
        && parse_date(s).is_some()
}

fn looks_like_link(s: &str) -> bool {
    let s = s.trim();
    s.starts_with("[[") && s.ends_with("]]") && s.len() > 4
}

/// Infer the column kind of one observed value.
///
/// Heuristics apply in order: date strings, the reserved `tag`/`tags` keys,
/// arrays (multi variant of the element kind, `option-multi` when mixed),
/// primitive JSON types, then text.
pub fn guess_column_type(value: &JsonValue, key: &str) -> ColumnKind {
    if let JsonValue::String(s) = value {
        if looks_like_date(s) {
            return ColumnKind::Date;
        }
    }
    match key {
        "tag" => return ColumnKind::Tag,
        "tags" => return ColumnKind::TagMulti,
        _ => {}
    }
    match value {
        JsonValue::Array(items) => {
            let mut kinds = items.iter().map(|v| guess_column_type(v, ""));
            match kinds.next() {
                Some(first) if kinds.all(|k| k == first) => first.multi_variant(),
                _ => ColumnKind::SelectMulti,
            }
        }
        JsonValue::Number(_) => ColumnKind::Number,
        JsonValue::Bool(_) => ColumnKind::Boolean,
        JsonValue::String(s) if looks_like_link(s) => ColumnKind::Link,
        _ => ColumnKind::Text,
    }
}

/// The most frequent kind among `samples`; ties go to the kind seen first.
pub fn aggregate_column_type(samples: &[ColumnKind]) -> ColumnKind {
    let mut counts: Vec<(ColumnKind, usize)> = Vec::new();
    for kind in samples {
        match counts.iter_mut().find(|(k, _)| k == kind) {
            Some((_, n)) => *n += 1,
            None => counts.push((*kind, 1)),
        }
    }
    let mut best: Option<(ColumnKind, usize)> = None;
    for (kind, n) in counts {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((kind, n));
        }
    }
    best.map(|(k, _)| k).unwrap_or(ColumnKind::Text)
}

/// Convert an external JSON value into a cell value of `kind`.
pub fn external_value(kind: ColumnKind, value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Empty,
        JsonValue::Bool(b) if kind == ColumnKind::Boolean => Value::Boolean(*b),
        JsonValue::Array(items) => {
            let list: Vec<String> = items
                .iter()
                .map(scalar_text)
                .filter(|s| !s.is_empty())
                .collect();
            if kind.is_multi() {
                Value::List(list)
            } else {
                Value::decode(kind, &serialize_multi(&list))
            }
        }
        other => Value::decode(kind, &scalar_text(other)),
    }
}

fn scalar_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Typed rows and aggregated column kinds for one metadata batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalSnapshot {
    pub rows: Vec<Row>,
    /// Keys in first-seen order with their aggregated kind.
    pub types: Vec<(String, ColumnKind)>,
}

/// Build an [`ExternalSnapshot`] from `(path, metadata)` records.
///
/// The primary key, internal (`_`-prefixed) keys and `ignore_keys` are
/// skipped.
pub fn collect_external(
    records: &[(String, Map<String, JsonValue>)],
    ignore_keys: &[String],
) -> ExternalSnapshot {
    let skip = |key: &str| {
        key.eq_ignore_ascii_case(PRIMARY_KEY)
            || is_internal_key(key)
            || ignore_keys.iter().any(|k| k == key)
    };

    let mut order: Vec<String> = Vec::new();
    let mut samples: HashMap<String, Vec<ColumnKind>> = HashMap::new();
    for (_, meta) in records {
        for (key, value) in meta {
            if skip(key) || value.is_null() {
                continue;
            }
            if !samples.contains_key(key) {
                order.push(key.clone());
            }
            samples
                .entry(key.clone())
                .or_default()
                .push(guess_column_type(value, key));
        }
    }

    let types: Vec<(String, ColumnKind)> = order
        .into_iter()
        .map(|key| {
            let kind = aggregate_column_type(&samples[&key]);
            (key, kind)
        })
        .collect();
    let kinds: HashMap<&str, ColumnKind> = types.iter().map(|(k, t)| (k.as_str(), *t)).collect();

    let rows = records
        .iter()
        .map(|(path, meta)| {
            let mut row = Row::with_file(path.clone());
            for (key, value) in meta {
                if skip(key) {
                    continue;
                }
                let kind = kinds.get(key.as_str()).copied().unwrap_or(ColumnKind::Text);
                row.set(key.clone(), external_value(kind, value));
            }
            row
        })
        .collect();

    ExternalSnapshot { rows, types }
}

/// Overlay external rows onto `table`.
///
/// External keys map to existing local columns case-insensitively and keep
/// the existing column's kind; unknown keys become new columns of their
/// aggregated kind. Columns whose kind preserves local values (the primary
/// key and file properties) are never written. Matching rows are overlaid
/// key by key, external-only rows are appended, and local-only rows are
/// left as they are. Merging the same snapshot again changes nothing.
pub fn merge_external_into_table(
    table: &Table,
    external_rows: &[Row],
    external_types: &[(String, ColumnKind)],
) -> Table {
    let mut merged = table.clone();

    // external key -> (field key, kind), or None when the key is not written
    let mut targets: HashMap<String, Option<(String, ColumnKind)>> = HashMap::new();
    let mut resolve = |merged: &mut Table, key: &str, kind: ColumnKind| {
        if let Some(target) = targets.get(key) {
            return target.clone();
        }
        let target = if key.eq_ignore_ascii_case(PRIMARY_KEY) {
            None
        } else if let Some(col) = merged
            .cols
            .iter()
            .find(|c| c.table.is_empty() && c.name.eq_ignore_ascii_case(key))
        {
            match capabilities(col.kind).merge {
                MergeBehavior::Preserve => None,
                MergeBehavior::Overlay => Some((col.field_key(), col.kind)),
            }
        } else {
            let col = Column {
                schema_id: merged.schema.id.clone(),
                ..Column::new(key, kind)
            };
            let target = Some((col.field_key(), col.kind));
            merged.cols.push(col);
            target
        };
        targets.insert(key.to_string(), target.clone());
        target
    };

    for (key, kind) in external_types {
        resolve(&mut merged, key, *kind);
    }

    for external in external_rows {
        let Some(file) = external.file() else {
            continue;
        };
        let mut values = Vec::new();
        for (key, value) in external.iter() {
            if key == PRIMARY_KEY {
                continue;
            }
            let kind = external_types
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, t)| *t)
                .unwrap_or(ColumnKind::Text);
            if let Some((field, col_kind)) = resolve(&mut merged, key, kind) {
                values.push((field, Value::decode(col_kind, &value.encode())));
            }
        }
        let index = match merged.row_index(file) {
            Some(i) => i,
            None => {
                merged.rows.push(Row::with_file(file));
                merged.rows.len() - 1
            }
        };
        let row = &mut merged.rows[index];
        for (field, value) in values {
            row.set(field, value);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Schema;
    use serde_json::json;

    fn meta(v: JsonValue) -> Map<String, JsonValue> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_guess_column_type_heuristics() {
        assert_eq!(guess_column_type(&json!("2024-01-05"), "due"), ColumnKind::Date);
        assert_eq!(guess_column_type(&json!("2024-01-05"), "tags"), ColumnKind::Date);
        assert_eq!(guess_column_type(&json!("x"), "tag"), ColumnKind::Tag);
        assert_eq!(guess_column_type(&json!(["a"]), "tags"), ColumnKind::TagMulti);
        assert_eq!(guess_column_type(&json!(3), "n"), ColumnKind::Number);
        assert_eq!(guess_column_type(&json!(true), "b"), ColumnKind::Boolean);
        assert_eq!(guess_column_type(&json!("[[Note]]"), "l"), ColumnKind::Link);
        assert_eq!(
            guess_column_type(&json!(["[[A]]", "[[B]]"]), "l"),
            ColumnKind::LinkMulti
        );
        assert_eq!(guess_column_type(&json!(["a", 1]), "m"), ColumnKind::SelectMulti);
        assert_eq!(guess_column_type(&json!([]), "m"), ColumnKind::SelectMulti);
        assert_eq!(guess_column_type(&json!({"a": 1}), "o"), ColumnKind::Text);
        assert_eq!(guess_column_type(&json!("2024"), "y"), ColumnKind::Text);
    }

    #[test]
    fn test_aggregate_takes_mode_then_first_seen() {
        use ColumnKind::*;
        assert_eq!(aggregate_column_type(&[Text, Number, Number]), Number);
        assert_eq!(aggregate_column_type(&[Date, Text, Text, Date]), Date);
        assert_eq!(aggregate_column_type(&[]), Text);
    }

    fn base_table() -> Table {
        let mut table = Table::empty(Schema::db("files", "Files"));
        table.cols.push(Column::new("Status", ColumnKind::Text));
        table.cols.push(Column::new("note", ColumnKind::Text));
        let mut row = Row::with_file("a.md");
        row.set("Status", Value::Text("draft".into()));
        row.set("note", Value::Text("local only".into()));
        table.rows.push(row);
        table.rows.push(Row::with_file("local.md"));
        table
    }

    fn snapshot() -> ExternalSnapshot {
        collect_external(
            &[
                ("a.md".into(), meta(json!({"status": "done", "rating": 4}))),
                ("b.md".into(), meta(json!({"rating": "n/a", "tags": ["x", "y"]}))),
                ("c.md".into(), meta(json!({"rating": 2, "position": 9}))),
            ],
            &["position".to_string()],
        )
    }

    #[test]
    fn test_collect_external() {
        let snap = snapshot();
        assert_eq!(
            snap.types,
            vec![
                ("rating".to_string(), ColumnKind::Number),
                ("status".to_string(), ColumnKind::Text),
                ("tags".to_string(), ColumnKind::TagMulti),
            ]
        );
        assert_eq!(snap.rows.len(), 3);
        assert_eq!(snap.rows[1].value("rating"), &Value::Text("n/a".into()));
        assert!(snap.rows[2].get("position").is_none());
    }

    #[test]
    fn test_merge_overlays_and_appends() {
        let snap = snapshot();
        let merged = merge_external_into_table(&base_table(), &snap.rows, &snap.types);

        let a = &merged.rows[merged.row_index("a.md").unwrap()];
        assert_eq!(a.value("Status"), &Value::Text("done".into()));
        assert_eq!(a.value("note"), &Value::Text("local only".into()));
        assert_eq!(a.value("rating"), &Value::number(4.0));
        assert!(a.get("status").is_none());

        assert!(merged.row_index("local.md").is_some());
        assert!(merged.row_index("b.md").is_some());
        assert!(merged.row_index("c.md").is_some());

        let names: Vec<&str> = merged.cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["File", "Status", "note", "rating", "tags"]);
        assert!(merged.validate().is_ok());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let snap = snapshot();
        let once = merge_external_into_table(&base_table(), &snap.rows, &snap.types);
        let twice = merge_external_into_table(&once, &snap.rows, &snap.types);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_preserves_file_properties() {
        let mut table = base_table();
        table.cols.push(Column::new("ctime", ColumnKind::FileProp));
        let snap = collect_external(
            &[("a.md".into(), meta(json!({"ctime": "yesterday", "File": "x.md"})))],
            &[],
        );
        let merged = merge_external_into_table(&table, &snap.rows, &snap.types);
        let a = &merged.rows[merged.row_index("a.md").unwrap()];
        assert!(a.get("ctime").is_none());
        assert_eq!(a.file(), Some("a.md"));
        assert_eq!(merged.rows.len(), 2);
    }
}
