//! Serializable query state for a view: filters, sort keys, grouping and
//! column layout.
//!
//! Every `field` in a [`Predicate`] is a field key (`name + table`), which
//! is why a column rename must go through [`Predicate::rename_field`].
//!
//! Parsing is lenient: malformed JSON yields the default predicate, missing
//! or malformed fields fall back to empty values, and filter/sort entries
//! naming an unregistered function are discarded.

pub mod eval;
pub mod registry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::models::serialize_multi;

pub use eval::{
    apply_filter, apply_predicate, evaluate_filters, evaluate_sort, group_rows, matches_search,
    RowGroup,
};
pub use registry::{
    capabilities, default_filter_fn, default_sort_fn, filter_fn, sort_fn, Capabilities, FilterFn,
    MergeBehavior, SortFn, ValueShape,
};

/// One filter: `fn` applied to the row value at `field` with `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    #[serde(rename = "fn")]
    pub func: String,
    #[serde(default)]
    pub value: String,
}

/// One sort key. Direction is part of the function (`alphabetical` vs
/// `reverseAlphabetical`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    #[serde(rename = "fn")]
    pub func: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub filters: Vec<Filter>,
    pub sort: Vec<Sort>,
    /// Zero or one grouping field.
    pub group_by: Vec<String>,
    pub cols_order: Vec<String>,
    pub cols_hidden: Vec<String>,
    pub cols_size: BTreeMap<String, f64>,
}

impl Predicate {
    /// Parse a stored predicate, substituting defaults for anything malformed.
    pub fn parse(raw: &str) -> Predicate {
        if raw.trim().is_empty() {
            return Predicate::default();
        }
        match serde_json::from_str::<JsonValue>(raw) {
            Ok(value) => Predicate::from_json(&value),
            Err(e) => {
                log::warn!("malformed predicate json, using default: {}", e);
                Predicate::default()
            }
        }
    }

    pub fn from_json(value: &JsonValue) -> Predicate {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => {
                log::warn!("predicate is not a json object, using default");
                return Predicate::default();
            }
        };

        let filters = entries(obj, "filters")
            .filter_map(|e| {
                Some(Filter {
                    field: e.get("field")?.as_str()?.to_string(),
                    func: e.get("fn")?.as_str()?.to_string(),
                    value: e.get("value").map(scalar_string).unwrap_or_default(),
                })
            })
            .collect();

        let sort = entries(obj, "sort")
            .filter_map(|e| {
                Some(Sort {
                    field: e.get("field")?.as_str()?.to_string(),
                    func: e.get("fn")?.as_str()?.to_string(),
                })
            })
            .collect();

        let cols_size = obj
            .get("colsSize")
            .and_then(JsonValue::as_object)
            .map(|sizes| {
                sizes
                    .iter()
                    .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
                    .collect()
            })
            .unwrap_or_default();

        Predicate {
            filters,
            sort,
            group_by: strings(obj, "groupBy"),
            cols_order: strings(obj, "colsOrder"),
            cols_hidden: strings(obj, "colsHidden"),
            cols_size,
        }
        .normalized()
    }

    /// Serialize to the flat JSON object stored with the schema.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Drop entries with unregistered functions and keep at most one
    /// grouping field.
    pub fn normalized(mut self) -> Predicate {
        self.filters.retain(|f| filter_fn(&f.func).is_some());
        self.sort.retain(|s| sort_fn(&s.func).is_some());
        self.group_by.truncate(1);
        self
    }

    /// Whether any reference site names `field`.
    pub fn references(&self, field: &str) -> bool {
        self.filters.iter().any(|f| f.field == field)
            || self.sort.iter().any(|s| s.field == field)
            || self.group_by.iter().any(|g| g == field)
            || self.cols_order.iter().any(|c| c == field)
            || self.cols_hidden.iter().any(|c| c == field)
            || self.cols_size.contains_key(field)
    }

    /// Rewrite every reference to `old` as `new`: filters, sort keys,
    /// grouping, hidden and ordered columns, and the column size entry.
    pub fn rename_field(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }
        for f in self.filters.iter_mut().filter(|f| f.field == old) {
            f.field = new.to_string();
        }
        for s in self.sort.iter_mut().filter(|s| s.field == old) {
            s.field = new.to_string();
        }
        for list in [&mut self.group_by, &mut self.cols_order, &mut self.cols_hidden] {
            for entry in list.iter_mut().filter(|e| e.as_str() == old) {
                *entry = new.to_string();
            }
        }
        if let Some(size) = self.cols_size.remove(old) {
            self.cols_size.insert(new.to_string(), size);
        }
    }
}

fn entries<'a>(
    obj: &'a Map<String, JsonValue>,
    key: &str,
) -> impl Iterator<Item = &'a Map<String, JsonValue>> {
    obj.get(key)
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(JsonValue::as_object)
}

fn strings(obj: &Map<String, JsonValue>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => {
            let parts: Vec<String> = items.iter().map(scalar_string).collect();
            serialize_multi(&parts)
        }
        other => other.to_string(),
    }
}
