//! Core data model for context tables.
//!
//! A context owns a list of [`Schema`]s. Root (`db`) schemas are backed by a
//! [`Table`] of [`Column`]s and [`Row`]s; view schemas point at their root
//! schema through `def` and only carry display state in their
//! [`Predicate`].
//!
//! Row values live in memory as typed [`Value`]s. They are encoded to
//! strings only at the storage boundary ([`Row::encode`] / [`Row::decode`]).

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::predicate::Predicate;

/// Reserved row key holding the file path; the primary key of every table.
pub const PRIMARY_KEY: &str = "File";

/// Prefix of the join marker recording a row's position in a tag context.
pub const INDEX_PREFIX: &str = "_index";

/// Id of the root schema every context starts with.
pub const DEFAULT_DB_SCHEMA: &str = "files";

/// Id of the view schema every context starts with.
pub const DEFAULT_VIEW_SCHEMA: &str = "filesView";

/// Logical type of a column.
///
/// Unknown type tags read from storage fall back to [`ColumnKind::Text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnKind {
    Text,
    Number,
    Boolean,
    Date,
    /// Single choice from the option list stored in `Column::value` (`option`).
    Select,
    /// Multiple choices (`option-multi`).
    SelectMulti,
    Context,
    ContextMulti,
    Link,
    LinkMulti,
    Tag,
    TagMulti,
    FileProp,
    Image,
    Preview,
    File,
}

impl ColumnKind {
    pub const ALL: [ColumnKind; 16] = [
        ColumnKind::Text,
        ColumnKind::Number,
        ColumnKind::Boolean,
        ColumnKind::Date,
        ColumnKind::Select,
        ColumnKind::SelectMulti,
        ColumnKind::Context,
        ColumnKind::ContextMulti,
        ColumnKind::Link,
        ColumnKind::LinkMulti,
        ColumnKind::Tag,
        ColumnKind::TagMulti,
        ColumnKind::FileProp,
        ColumnKind::Image,
        ColumnKind::Preview,
        ColumnKind::File,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Number => "number",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Date => "date",
            ColumnKind::Select => "option",
            ColumnKind::SelectMulti => "option-multi",
            ColumnKind::Context => "context",
            ColumnKind::ContextMulti => "context-multi",
            ColumnKind::Link => "link",
            ColumnKind::LinkMulti => "link-multi",
            ColumnKind::Tag => "tag",
            ColumnKind::TagMulti => "tag-multi",
            ColumnKind::FileProp => "fileprop",
            ColumnKind::Image => "image",
            ColumnKind::Preview => "preview",
            ColumnKind::File => "file",
        }
    }

    /// Parse a type tag. Unknown tags map to `Text`.
    pub fn parse(tag: &str) -> ColumnKind {
        ColumnKind::ALL
            .into_iter()
            .find(|k| k.as_str() == tag.trim())
            .unwrap_or(ColumnKind::Text)
    }

    /// Whether values of this kind are lists: every `-multi` kind plus `tag`.
    pub fn is_multi(self) -> bool {
        matches!(
            self,
            ColumnKind::SelectMulti
                | ColumnKind::ContextMulti
                | ColumnKind::LinkMulti
                | ColumnKind::TagMulti
                | ColumnKind::Tag
        )
    }

    /// The list-valued counterpart of this kind.
    pub fn multi_variant(self) -> ColumnKind {
        match self {
            ColumnKind::Context | ColumnKind::ContextMulti => ColumnKind::ContextMulti,
            ColumnKind::Link | ColumnKind::LinkMulti => ColumnKind::LinkMulti,
            ColumnKind::Tag | ColumnKind::TagMulti => ColumnKind::TagMulti,
            _ => ColumnKind::SelectMulti,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ColumnKind {
    fn from(tag: String) -> Self {
        ColumnKind::parse(&tag)
    }
}

impl From<ColumnKind> for String {
    fn from(kind: ColumnKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Kind of a schema: a root table (`db`) or one of the view layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SchemaKind {
    Db,
    Table,
    Card,
    List,
    Flow,
    Day,
    Week,
    Month,
}

impl SchemaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaKind::Db => "db",
            SchemaKind::Table => "table",
            SchemaKind::Card => "card",
            SchemaKind::List => "list",
            SchemaKind::Flow => "flow",
            SchemaKind::Day => "day",
            SchemaKind::Week => "week",
            SchemaKind::Month => "month",
        }
    }

    /// Parse a schema type tag. Unknown tags are treated as a table view.
    pub fn parse(tag: &str) -> SchemaKind {
        match tag.trim() {
            "db" => SchemaKind::Db,
            "card" => SchemaKind::Card,
            "list" => SchemaKind::List,
            "flow" => SchemaKind::Flow,
            "day" => SchemaKind::Day,
            "week" => SchemaKind::Week,
            "month" => SchemaKind::Month,
            _ => SchemaKind::Table,
        }
    }

    pub fn is_view(self) -> bool {
        self != SchemaKind::Db
    }
}

impl From<String> for SchemaKind {
    fn from(tag: String) -> Self {
        SchemaKind::parse(&tag)
    }
}

impl From<SchemaKind> for String {
    fn from(kind: SchemaKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A typed cell value.
///
/// Numbers and dates keep the string they were decoded from, so encoding
/// gives back exactly what was stored. Comparisons use the parsed part.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Empty,
    Text(String),
    Number { n: f64, raw: String },
    Boolean(bool),
    /// `at` is the UTC instant when `raw` carries an offset, else the
    /// local wall-clock time.
    Date { at: NaiveDateTime, raw: String },
    List(Vec<String>),
}

static EMPTY_VALUE: Value = Value::Empty;

impl Value {
    /// A computed number in canonical form.
    pub fn number(n: f64) -> Value {
        Value::Number {
            n,
            raw: format_number(n),
        }
    }

    /// A computed date in canonical form.
    pub fn date(at: NaiveDateTime) -> Value {
        Value::Date {
            raw: format_date(&at),
            at,
        }
    }

    /// Decode a stored string under the given column kind.
    ///
    /// Values that do not parse as the column's kind are kept as text so no
    /// data is lost when a column is retyped.
    pub fn decode(kind: ColumnKind, raw: &str) -> Value {
        if raw.is_empty() {
            return Value::Empty;
        }
        if kind.is_multi() {
            return Value::List(split_multi(raw));
        }
        match kind {
            ColumnKind::Number => match raw.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => Value::Number {
                    n,
                    raw: raw.to_string(),
                },
                _ => Value::Text(raw.to_string()),
            },
            ColumnKind::Boolean => match raw {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                _ => Value::Text(raw.to_string()),
            },
            ColumnKind::Date => match parse_date(raw) {
                Some(at) => Value::Date {
                    at,
                    raw: raw.to_string(),
                },
                None => Value::Text(raw.to_string()),
            },
            _ => Value::Text(raw.to_string()),
        }
    }

    /// Encode to the storage string form.
    pub fn encode(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Text(s) => s.clone(),
            Value::Number { raw, .. } => raw.clone(),
            Value::Boolean(b) => b.to_string(),
            Value::Date { raw, .. } => raw.clone(),
            Value::List(items) => serialize_multi(items),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Empty => true,
            Value::Text(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Tolerant numeric view; `NaN` when the value has no numeric prefix.
    pub fn as_number(&self) -> f64 {
        match self {
            Value::Number { n, .. } => *n,
            Value::Text(s) => parse_number_lenient(s),
            _ => f64::NAN,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date { at, .. } => Some(*at),
            Value::Text(s) => parse_date(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Text(s) => s.trim() == "true",
            _ => false,
        }
    }

    /// List view of the value. Scalars are split as multi-value strings.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Value::List(items) => items.clone(),
            Value::Empty => Vec::new(),
            other => split_multi(&other.encode()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Split a multi-value string on unescaped commas. `\,` is a literal comma.
pub fn split_multi(raw: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => items.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    items.push(current);
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Inverse of [`split_multi`].
pub fn serialize_multi<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|s| s.as_ref().replace(',', "\\,"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse the longest numeric prefix of `raw`, like a tolerant float parse.
///
/// Returns `NaN` when there is no numeric prefix.
pub fn parse_number_lenient(raw: &str) -> f64 {
    let s = raw.trim();
    let bytes = s.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return f64::NAN;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end].parse::<f64>().unwrap_or(f64::NAN)
}

/// Parse the date formats found in notes: ISO dates, ISO date-times with or
/// without seconds, and RFC 3339 timestamps. Timestamps with an offset are
/// normalized to UTC.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn format_date(dt: &NaiveDateTime) -> String {
    if dt.hour() == 0 && dt.minute() == 0 && dt.second() == 0 {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Build the field key used by rows and predicates: `name + table`.
pub fn field_key(name: &str, table: &str) -> String {
    format!("{}{}", name, table)
}

/// Keys starting with `_` are bookkeeping (join markers) and never shown
/// or searched.
pub fn is_internal_key(key: &str) -> bool {
    key.starts_with('_')
}

/// A column definition.
///
/// Identity is the pair `(name, table)`; `table` is the namespace of the
/// source table (empty for local columns) and never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub schema_id: String,
    #[serde(rename = "type")]
    pub kind: ColumnKind,
    /// Kind-specific configuration: option list, linked context id,
    /// file-property key, or formula.
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub attrs: String,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            table: String::new(),
            schema_id: String::new(),
            kind,
            value: String::new(),
            hidden: false,
            primary: false,
            unique: false,
            attrs: String::new(),
        }
    }

    /// The primary `File` column every root table starts with.
    pub fn primary_file(schema_id: &str) -> Self {
        Self {
            schema_id: schema_id.to_string(),
            primary: true,
            unique: true,
            ..Column::new(PRIMARY_KEY, ColumnKind::File)
        }
    }

    pub fn field_key(&self) -> String {
        field_key(&self.name, &self.table)
    }

    pub fn same_identity(&self, other: &Column) -> bool {
        self.name == other.name && self.table == other.table
    }
}

/// One table or one view over a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub id: String,
    pub name: String,
    pub kind: SchemaKind,
    /// Root schemas: comma list of linked tag-context ids.
    /// View schemas: id of the parent root schema.
    pub def: String,
    pub predicate: Predicate,
    pub primary: bool,
}

impl Schema {
    pub fn db(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: SchemaKind::Db,
            def: String::new(),
            predicate: Predicate::default(),
            primary: false,
        }
    }

    pub fn view(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: SchemaKind,
        parent: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            def: parent.into(),
            predicate: Predicate::default(),
            primary: false,
        }
    }

    /// Schemas a context has before anything was saved: the primary root
    /// table and its default table view.
    pub fn default_set() -> Vec<Schema> {
        vec![
            Schema {
                primary: true,
                ..Schema::db(DEFAULT_DB_SCHEMA, "Files")
            },
            Schema {
                primary: true,
                ..Schema::view(
                    DEFAULT_VIEW_SCHEMA,
                    "All Files",
                    SchemaKind::Table,
                    DEFAULT_DB_SCHEMA,
                )
            },
        ]
    }

    /// Id of the root schema whose table this schema displays.
    pub fn root_id(&self) -> &str {
        if self.kind.is_view() {
            &self.def
        } else {
            &self.id
        }
    }
}

/// A row: typed values keyed by field key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(path: impl Into<String>) -> Self {
        let mut row = Row::new();
        row.set(PRIMARY_KEY, Value::Text(path.into()));
        row
    }

    /// Primary key of the row, if set.
    pub fn file(&self) -> Option<&str> {
        match self.values.get(PRIMARY_KEY) {
            Some(Value::Text(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Value for `key`, or [`Value::Empty`] when absent.
    pub fn value(&self, key: &str) -> &Value {
        self.values.get(key).unwrap_or(&EMPTY_VALUE)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn rename_key(&mut self, old: &str, new: &str) {
        if let Some(v) = self.values.remove(old) {
            self.values.insert(new.to_string(), v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Encode every value to its storage string.
    pub fn encode(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.encode()))
            .collect()
    }

    /// Decode stored strings using the kinds of `columns`. Keys without a
    /// column are kept as text.
    pub fn decode(columns: &[Column], raw: &BTreeMap<String, String>) -> Row {
        let mut row = Row::new();
        for (key, s) in raw {
            let kind = if key == PRIMARY_KEY {
                ColumnKind::File
            } else {
                columns
                    .iter()
                    .find(|c| &c.field_key() == key)
                    .map(|c| c.kind)
                    .unwrap_or(ColumnKind::Text)
            };
            row.set(key.clone(), Value::decode(kind, s));
        }
        row
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Row {
            values: iter.into_iter().collect(),
        }
    }
}

/// A root schema together with its columns and rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub schema: Schema,
    pub cols: Vec<Column>,
    pub rows: Vec<Row>,
}

impl Table {
    /// An empty table for `schema`. Root tables start with the `File` column.
    pub fn empty(schema: Schema) -> Self {
        let cols = if schema.kind == SchemaKind::Db {
            vec![Column::primary_file(&schema.id)]
        } else {
            Vec::new()
        };
        Self {
            schema,
            cols,
            rows: Vec::new(),
        }
    }

    pub fn column(&self, field: &str) -> Option<&Column> {
        self.cols.iter().find(|c| c.field_key() == field)
    }

    pub fn row_index(&self, file: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.file() == Some(file))
    }

    /// Check the table invariants: unique primary keys and no two columns
    /// whose names collide case-insensitively within one namespace.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for col in &self.cols {
            if !names.insert((col.name.to_lowercase(), col.table.clone())) {
                bail!(
                    "duplicate property name '{}' in table '{}'",
                    col.name,
                    self.schema.id
                );
            }
        }
        let mut files = HashSet::new();
        for row in &self.rows {
            if let Some(file) = row.file() {
                if !files.insert(file) {
                    bail!("duplicate row key '{}' in table '{}'", file, self.schema.id);
                }
            }
        }
        Ok(())
    }
}
