//! Predicate evaluation over a row set.
//!
//! Filters and sort keys whose field no longer names a column are ignored
//! (vacuously true / equal), so dangling references left behind by a column
//! delete never fail evaluation.

use std::cmp::Ordering;

use crate::models::{is_internal_key, split_multi, Column, Row};

use super::registry::{filter_fn, sort_fn};
use super::{Filter, Predicate};

/// A group bucket: its key and the indices of the rows it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowGroup {
    pub key: String,
    pub rows: Vec<usize>,
}

fn has_column(columns: &[Column], field: &str) -> bool {
    columns.iter().any(|c| c.field_key() == field)
}

/// Apply one filter to a row.
pub fn apply_filter(filter: &Filter, columns: &[Column], row: &Row) -> bool {
    if !has_column(columns, &filter.field) {
        return true;
    }
    match filter_fn(&filter.func) {
        Some(f) => (f.eval)(row.value(&filter.field), &filter.value),
        None => true,
    }
}

/// Conjunction of every filter in the predicate.
pub fn evaluate_filters(predicate: &Predicate, columns: &[Column], row: &Row) -> bool {
    predicate
        .filters
        .iter()
        .all(|f| apply_filter(f, columns, row))
}

/// Compare two rows by the predicate's sort keys in order; the first
/// non-equal key decides.
pub fn evaluate_sort(predicate: &Predicate, columns: &[Column], a: &Row, b: &Row) -> Ordering {
    for s in &predicate.sort {
        if !has_column(columns, &s.field) {
            continue;
        }
        let Some(func) = sort_fn(&s.func) else {
            continue;
        };
        let ord = func.compare(a.value(&s.field), b.value(&s.field));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Case-insensitive substring search over every non-internal value.
pub fn matches_search(row: &Row, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    row.iter()
        .filter(|(k, _)| !is_internal_key(k))
        .any(|(_, v)| v.encode().to_lowercase().contains(&needle))
}

/// Filter, search and sort `rows`. The sort is stable.
pub fn apply_predicate(
    predicate: &Predicate,
    columns: &[Column],
    rows: &[Row],
    search: Option<&str>,
) -> Vec<Row> {
    let mut out: Vec<Row> = rows
        .iter()
        .filter(|r| evaluate_filters(predicate, columns, r))
        .filter(|r| search.map_or(true, |q| matches_search(r, q)))
        .cloned()
        .collect();
    out.sort_by(|a, b| evaluate_sort(predicate, columns, a, b));
    out
}

/// Bucket rows by the predicate's group-by field.
///
/// For list-valued columns a row joins every bucket named in its list and
/// lands in the empty-key bucket only when its list is empty. Buckets keep
/// first-seen order, except that `option` columns follow their declared
/// option order. The empty-key bucket is always last. Without a (valid)
/// group-by field every row is in a single empty-key bucket.
pub fn group_rows(predicate: &Predicate, columns: &[Column], rows: &[Row]) -> Vec<RowGroup> {
    let column = predicate
        .group_by
        .first()
        .and_then(|field| columns.iter().find(|c| &c.field_key() == field));
    let Some(column) = column else {
        return if rows.is_empty() {
            Vec::new()
        } else {
            vec![RowGroup {
                key: String::new(),
                rows: (0..rows.len()).collect(),
            }]
        };
    };

    let field = column.field_key();
    let multi = column.kind.is_multi();
    let mut groups: Vec<RowGroup> = Vec::new();
    let mut ungrouped = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let value = row.value(&field);
        let mut keys = if multi {
            value.as_list()
        } else {
            let s = value.encode();
            if s.is_empty() {
                Vec::new()
            } else {
                vec![s]
            }
        };
        keys.dedup();
        if keys.is_empty() {
            ungrouped.push(i);
            continue;
        }
        for key in keys {
            match groups.iter_mut().find(|g| g.key == key) {
                Some(g) => {
                    if g.rows.last() != Some(&i) {
                        g.rows.push(i);
                    }
                }
                None => groups.push(RowGroup { key, rows: vec![i] }),
            }
        }
    }

    let options = split_multi(&column.value);
    if !options.is_empty() {
        groups.sort_by_key(|g| {
            options
                .iter()
                .position(|o| o == &g.key)
                .unwrap_or(usize::MAX)
        });
    }
    if !ungrouped.is_empty() {
        groups.push(RowGroup {
            key: String::new(),
            rows: ungrouped,
        });
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnKind, Value};
    use crate::predicate::Sort;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn filter(field: &str, func: &str, value: &str) -> Filter {
        Filter {
            field: field.into(),
            func: func.into(),
            value: value.into(),
        }
    }

    fn columns() -> Vec<Column> {
        vec![
            Column::primary_file("files"),
            Column::new("status", ColumnKind::Text),
            Column::new("rating", ColumnKind::Number),
            Column::new("tags", ColumnKind::TagMulti),
        ]
    }

    #[test]
    fn test_filters_are_a_conjunction() {
        let cols = columns();
        let rows = vec![
            row(&[("status", text("done")), ("rating", Value::number(4.0))]),
            row(&[("status", text("done")), ("rating", Value::number(1.0))]),
            row(&[("status", text("todo")), ("rating", Value::number(5.0))]),
        ];
        let p = Predicate {
            filters: vec![
                filter("status", "is", "done"),
                filter("rating", "isGreatThan", "2"),
            ],
            ..Default::default()
        };
        for r in &rows {
            let each = p.filters.iter().all(|f| apply_filter(f, &cols, r));
            assert_eq!(evaluate_filters(&p, &cols, r), each);
        }
        assert_eq!(apply_predicate(&p, &cols, &rows, None).len(), 1);
    }

    #[test]
    fn test_dangling_filter_is_vacuous() {
        let cols = columns();
        let p = Predicate {
            filters: vec![filter("deleted", "is", "x")],
            sort: vec![Sort {
                field: "deleted".into(),
                func: "alphabetical".into(),
            }],
            ..Default::default()
        };
        let a = row(&[("status", text("a"))]);
        let b = row(&[("status", text("b"))]);
        assert!(evaluate_filters(&p, &cols, &a));
        assert_eq!(evaluate_sort(&p, &cols, &a, &b), Ordering::Equal);
    }

    #[test]
    fn test_sort_fallback_chain() {
        let cols = columns();
        let p = Predicate {
            sort: vec![
                Sort {
                    field: "status".into(),
                    func: "alphabetical".into(),
                },
                Sort {
                    field: "rating".into(),
                    func: "numberDescending".into(),
                },
            ],
            ..Default::default()
        };
        let rows = vec![
            row(&[("File", text("1")), ("status", text("b")), ("rating", Value::number(1.0))]),
            row(&[("File", text("2")), ("status", text("a")), ("rating", Value::number(1.0))]),
            row(&[("File", text("3")), ("status", text("a")), ("rating", Value::number(3.0))]),
        ];
        let sorted = apply_predicate(&p, &cols, &rows, None);
        let files: Vec<&str> = sorted.iter().filter_map(|r| r.file()).collect();
        assert_eq!(files, vec!["3", "2", "1"]);
    }

    #[test]
    fn test_sort_is_stable_and_reversible() {
        let cols = columns();
        let rows: Vec<Row> = [3.0, 1.0, 2.0, 1.0]
            .iter()
            .enumerate()
            .map(|(i, n)| row(&[("File", text(&i.to_string())), ("rating", Value::number(*n))]))
            .collect();
        let by = |func: &str| Predicate {
            sort: vec![Sort {
                field: "rating".into(),
                func: func.into(),
            }],
            ..Default::default()
        };
        let asc = apply_predicate(&by("numberAscending"), &cols, &rows, None);
        let files: Vec<&str> = asc.iter().filter_map(|r| r.file()).collect();
        assert_eq!(files, vec!["1", "3", "2", "0"]);

        let strict: Vec<Row> = rows.iter().take(3).cloned().collect();
        let up = apply_predicate(&by("numberAscending"), &cols, &strict, None);
        let mut down = apply_predicate(&by("numberDescending"), &cols, &strict, None);
        down.reverse();
        assert_eq!(up, down);
    }

    #[test]
    fn test_search_skips_internal_keys() {
        let r = row(&[("status", text("In Progress")), ("_index#x", Value::number(7.0))]);
        assert!(matches_search(&r, "progress"));
        assert!(!matches_search(&r, "7"));
        assert!(matches_search(&r, "  "));
    }

    #[test]
    fn test_search_and_filters_compose() {
        let cols = columns();
        let rows = vec![
            row(&[("status", text("done alpha"))]),
            row(&[("status", text("done beta"))]),
            row(&[("status", text("todo alpha"))]),
        ];
        let p = Predicate {
            filters: vec![filter("status", "include", "done")],
            ..Default::default()
        };
        assert_eq!(apply_predicate(&p, &cols, &rows, Some("ALPHA")).len(), 1);
    }

    #[test]
    fn test_group_by_multi_value_column() {
        let cols = columns();
        let rows = vec![
            row(&[("tags", Value::decode(ColumnKind::TagMulti, "x,y"))]),
            row(&[("tags", Value::decode(ColumnKind::TagMulti, ""))]),
            row(&[("tags", Value::decode(ColumnKind::TagMulti, "x"))]),
        ];
        let p = Predicate {
            group_by: vec!["tags".into()],
            ..Default::default()
        };
        let groups = group_rows(&p, &cols, &rows);
        assert_eq!(
            groups,
            vec![
                RowGroup {
                    key: "x".into(),
                    rows: vec![0, 2]
                },
                RowGroup {
                    key: "y".into(),
                    rows: vec![0]
                },
                RowGroup {
                    key: "".into(),
                    rows: vec![1]
                },
            ]
        );
    }

    #[test]
    fn test_group_by_option_follows_declared_order() {
        let mut cols = columns();
        cols.push(Column {
            value: "high,medium,low".into(),
            ..Column::new("priority", ColumnKind::Select)
        });
        let rows = vec![
            row(&[("priority", text("low"))]),
            row(&[]),
            row(&[("priority", text("high"))]),
            row(&[("priority", text("low"))]),
        ];
        let p = Predicate {
            group_by: vec!["priority".into()],
            ..Default::default()
        };
        let keys: Vec<String> = group_rows(&p, &cols, &rows)
            .into_iter()
            .map(|g| g.key)
            .collect();
        assert_eq!(keys, vec!["high", "low", ""]);
    }

    #[test]
    fn test_group_without_field_is_single_bucket() {
        let cols = columns();
        let rows = vec![row(&[]), row(&[])];
        let groups = group_rows(&Predicate::default(), &cols, &rows);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].rows, vec![0, 1]);
    }
}
