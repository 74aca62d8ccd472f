//! Filter and sort function registry, and the per-kind capability table.
//!
//! Each [`FilterFn`] and [`SortFn`] declares the column kinds it applies
//! to. Registration order matters: the default function for a kind is the
//! first registered one whose kind set contains it.
//!
//! | Kind family | Filters | Sorts |
//! |-------------|---------|-------|
//! | textual | `include`, `notInclude`, `is`, `isNot` | `alphabetical`, `reverseAlphabetical` |
//! | list | `isAnyInList`, `isNoneInList`, `isAllInList` | `count`, `reverseCount` |
//! | number | `equal`, `isGreatThan`, `isLessThan`, `isGreatThanOrEqual`, `isLessThanOrEqual` | `numberAscending`, `numberDescending` |
//! | date | `isSameDate`, `isBefore`, `isAfter` | `earliest`, `latest` |
//! | boolean | `isTrue`, `isFalse` | `checkedFirst`, `uncheckedFirst` |
//! | all | `isEmpty`, `isNotEmpty` | `alphabetical`, `reverseAlphabetical` |

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::NaiveDateTime;

use crate::models::{parse_date, parse_number_lenient, split_multi, ColumnKind, Value};

/// Shape of the value a filter expects from the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    None,
    Text,
    Number,
    Date,
    List,
}

/// How externally observed values combine with stored ones during
/// frontmatter sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeBehavior {
    /// External values overwrite the stored value for the same key.
    Overlay,
    /// The stored value is kept (primary key, derived file properties).
    Preserve,
}

pub struct FilterFn {
    pub id: &'static str,
    pub label: &'static str,
    pub kinds: &'static [ColumnKind],
    pub shape: ValueShape,
    pub eval: fn(&Value, &str) -> bool,
}

impl FilterFn {
    pub fn applies_to(&self, kind: ColumnKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// The value a sort function orders by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Text,
    Number,
    Date,
    Checked,
    Count,
}

pub struct SortFn {
    pub id: &'static str,
    pub label: &'static str,
    pub kinds: &'static [ColumnKind],
    pub key: SortKey,
    pub desc: bool,
}

impl SortFn {
    pub fn applies_to(&self, kind: ColumnKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Three-way comparison. Rows without a usable key (empty text, `NaN`,
    /// unparsable dates) sort after every row that has one, in both
    /// directions.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match self.key {
            SortKey::Text => present_cmp(text_key(a), text_key(b), self.desc, |x, y| {
                x.to_lowercase().cmp(&y.to_lowercase()).then_with(|| x.cmp(y))
            }),
            SortKey::Number => present_cmp(number_key(a), number_key(b), self.desc, |x, y| {
                x.partial_cmp(y).unwrap_or(Ordering::Equal)
            }),
            SortKey::Date => present_cmp(a.as_date(), b.as_date(), self.desc, NaiveDateTime::cmp),
            // Checked rows first in the ascending variant.
            SortKey::Checked => {
                present_cmp(Some(a.as_bool()), Some(b.as_bool()), self.desc, |x, y| y.cmp(x))
            }
            SortKey::Count => present_cmp(
                Some(a.as_list().len()),
                Some(b.as_list().len()),
                self.desc,
                usize::cmp,
            ),
        }
    }
}

fn present_cmp<T>(
    a: Option<T>,
    b: Option<T>,
    desc: bool,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let ord = cmp(&x, &y);
            if desc {
                ord.reverse()
            } else {
                ord
            }
        }
    }
}

fn text_key(v: &Value) -> Option<String> {
    let s = v.encode();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn number_key(v: &Value) -> Option<f64> {
    let n = v.as_number();
    if n.is_nan() {
        None
    } else {
        Some(n)
    }
}

/// What a column kind supports.
pub struct Capabilities {
    pub filters: Vec<&'static FilterFn>,
    pub sorts: Vec<&'static SortFn>,
    pub merge: MergeBehavior,
}

const ALL: &[ColumnKind] = &ColumnKind::ALL;

const TEXTUAL: &[ColumnKind] = &[
    ColumnKind::Text,
    ColumnKind::Select,
    ColumnKind::Link,
    ColumnKind::File,
    ColumnKind::FileProp,
    ColumnKind::Context,
    ColumnKind::Image,
    ColumnKind::Preview,
];

const LISTS: &[ColumnKind] = &[
    ColumnKind::SelectMulti,
    ColumnKind::ContextMulti,
    ColumnKind::LinkMulti,
    ColumnKind::Tag,
    ColumnKind::TagMulti,
    ColumnKind::Select,
];

const NUMBERS: &[ColumnKind] = &[ColumnKind::Number, ColumnKind::FileProp];

const DATES: &[ColumnKind] = &[ColumnKind::Date, ColumnKind::FileProp];

const BOOLEANS: &[ColumnKind] = &[ColumnKind::Boolean];

const COUNTABLE: &[ColumnKind] = &[
    ColumnKind::SelectMulti,
    ColumnKind::ContextMulti,
    ColumnKind::LinkMulti,
    ColumnKind::Tag,
    ColumnKind::TagMulti,
];

static FILTERS: &[FilterFn] = &[
    FilterFn {
        id: "include",
        label: "Contains",
        kinds: TEXTUAL,
        shape: ValueShape::Text,
        eval: include,
    },
    FilterFn {
        id: "notInclude",
        label: "Does Not Contain",
        kinds: TEXTUAL,
        shape: ValueShape::Text,
        eval: not_include,
    },
    FilterFn {
        id: "is",
        label: "Is",
        kinds: TEXTUAL,
        shape: ValueShape::Text,
        eval: is,
    },
    FilterFn {
        id: "isNot",
        label: "Is Not",
        kinds: TEXTUAL,
        shape: ValueShape::Text,
        eval: is_not,
    },
    FilterFn {
        id: "isAnyInList",
        label: "Is Any Of",
        kinds: LISTS,
        shape: ValueShape::List,
        eval: any_in_list,
    },
    FilterFn {
        id: "isNoneInList",
        label: "Is None Of",
        kinds: LISTS,
        shape: ValueShape::List,
        eval: none_in_list,
    },
    FilterFn {
        id: "isAllInList",
        label: "Has All Of",
        kinds: LISTS,
        shape: ValueShape::List,
        eval: all_in_list,
    },
    FilterFn {
        id: "equal",
        label: "=",
        kinds: NUMBERS,
        shape: ValueShape::Number,
        eval: number_equal,
    },
    FilterFn {
        id: "isGreatThan",
        label: ">",
        kinds: NUMBERS,
        shape: ValueShape::Number,
        eval: greater_than,
    },
    FilterFn {
        id: "isLessThan",
        label: "<",
        kinds: NUMBERS,
        shape: ValueShape::Number,
        eval: less_than,
    },
    FilterFn {
        id: "isGreatThanOrEqual",
        label: ">=",
        kinds: NUMBERS,
        shape: ValueShape::Number,
        eval: greater_or_equal,
    },
    FilterFn {
        id: "isLessThanOrEqual",
        label: "<=",
        kinds: NUMBERS,
        shape: ValueShape::Number,
        eval: less_or_equal,
    },
    FilterFn {
        id: "isSameDate",
        label: "Is On",
        kinds: DATES,
        shape: ValueShape::Date,
        eval: same_date,
    },
    FilterFn {
        id: "isBefore",
        label: "Is Before",
        kinds: DATES,
        shape: ValueShape::Date,
        eval: before,
    },
    FilterFn {
        id: "isAfter",
        label: "Is After",
        kinds: DATES,
        shape: ValueShape::Date,
        eval: after,
    },
    FilterFn {
        id: "isTrue",
        label: "Is Checked",
        kinds: BOOLEANS,
        shape: ValueShape::None,
        eval: checked,
    },
    FilterFn {
        id: "isFalse",
        label: "Is Unchecked",
        kinds: BOOLEANS,
        shape: ValueShape::None,
        eval: unchecked,
    },
    FilterFn {
        id: "isEmpty",
        label: "Is Empty",
        kinds: ALL,
        shape: ValueShape::None,
        eval: empty,
    },
    FilterFn {
        id: "isNotEmpty",
        label: "Is Not Empty",
        kinds: ALL,
        shape: ValueShape::None,
        eval: not_empty,
    },
];

static SORTS: &[SortFn] = &[
    SortFn {
        id: "numberAscending",
        label: "1 → 9",
        kinds: NUMBERS,
        key: SortKey::Number,
        desc: false,
    },
    SortFn {
        id: "numberDescending",
        label: "9 → 1",
        kinds: NUMBERS,
        key: SortKey::Number,
        desc: true,
    },
    SortFn {
        id: "earliest",
        label: "Earliest",
        kinds: DATES,
        key: SortKey::Date,
        desc: false,
    },
    SortFn {
        id: "latest",
        label: "Latest",
        kinds: DATES,
        key: SortKey::Date,
        desc: true,
    },
    SortFn {
        id: "checkedFirst",
        label: "Checked → Unchecked",
        kinds: BOOLEANS,
        key: SortKey::Checked,
        desc: false,
    },
    SortFn {
        id: "uncheckedFirst",
        label: "Unchecked → Checked",
        kinds: BOOLEANS,
        key: SortKey::Checked,
        desc: true,
    },
    SortFn {
        id: "alphabetical",
        label: "A → Z",
        kinds: ALL,
        key: SortKey::Text,
        desc: false,
    },
    SortFn {
        id: "reverseAlphabetical",
        label: "Z → A",
        kinds: ALL,
        key: SortKey::Text,
        desc: true,
    },
    SortFn {
        id: "count",
        label: "Fewest Items",
        kinds: COUNTABLE,
        key: SortKey::Count,
        desc: false,
    },
    SortFn {
        id: "reverseCount",
        label: "Most Items",
        kinds: COUNTABLE,
        key: SortKey::Count,
        desc: true,
    },
];

pub fn filter_fns() -> &'static [FilterFn] {
    FILTERS
}

pub fn sort_fns() -> &'static [SortFn] {
    SORTS
}

pub fn filter_fn(id: &str) -> Option<&'static FilterFn> {
    FILTERS.iter().find(|f| f.id == id)
}

pub fn sort_fn(id: &str) -> Option<&'static SortFn> {
    SORTS.iter().find(|s| s.id == id)
}

/// Capability table entry for `kind`, built once on first use.
pub fn capabilities(kind: ColumnKind) -> &'static Capabilities {
    static TABLE: OnceLock<HashMap<ColumnKind, Capabilities>> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        ColumnKind::ALL
            .into_iter()
            .map(|k| {
                let caps = Capabilities {
                    filters: FILTERS.iter().filter(|f| f.applies_to(k)).collect(),
                    sorts: SORTS.iter().filter(|s| s.applies_to(k)).collect(),
                    merge: match k {
                        ColumnKind::File | ColumnKind::FileProp => MergeBehavior::Preserve,
                        _ => MergeBehavior::Overlay,
                    },
                };
                (k, caps)
            })
            .collect()
    });
    &table[&kind]
}

/// Function used when a filter is attached to a column of `kind` without an
/// explicit choice.
pub fn default_filter_fn(kind: ColumnKind) -> Option<&'static str> {
    capabilities(kind).filters.first().map(|f| f.id)
}

/// Function used when a sort key is attached to a column of `kind` without
/// an explicit choice.
pub fn default_sort_fn(kind: ColumnKind) -> Option<&'static str> {
    capabilities(kind).sorts.first().map(|s| s.id)
}

fn include(v: &Value, f: &str) -> bool {
    v.encode().to_lowercase().contains(&f.to_lowercase())
}

fn not_include(v: &Value, f: &str) -> bool {
    !include(v, f)
}

fn is(v: &Value, f: &str) -> bool {
    v.encode() == f
}

fn is_not(v: &Value, f: &str) -> bool {
    !is(v, f)
}

fn any_in_list(v: &Value, f: &str) -> bool {
    let wanted = split_multi(f);
    v.as_list().iter().any(|item| wanted.contains(item))
}

fn none_in_list(v: &Value, f: &str) -> bool {
    !any_in_list(v, f)
}

fn all_in_list(v: &Value, f: &str) -> bool {
    let items = v.as_list();
    split_multi(f).iter().all(|w| items.contains(w))
}

fn number_equal(v: &Value, f: &str) -> bool {
    v.as_number() == parse_number_lenient(f)
}

fn greater_than(v: &Value, f: &str) -> bool {
    v.as_number() > parse_number_lenient(f)
}

fn less_than(v: &Value, f: &str) -> bool {
    v.as_number() < parse_number_lenient(f)
}

fn greater_or_equal(v: &Value, f: &str) -> bool {
    v.as_number() >= parse_number_lenient(f)
}

fn less_or_equal(v: &Value, f: &str) -> bool {
    v.as_number() <= parse_number_lenient(f)
}

fn same_date(v: &Value, f: &str) -> bool {
    match (v.as_date(), parse_date(f)) {
        (Some(a), Some(b)) => a.date() == b.date(),
        _ => false,
    }
}

fn before(v: &Value, f: &str) -> bool {
    match (v.as_date(), parse_date(f)) {
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}

fn after(v: &Value, f: &str) -> bool {
    match (v.as_date(), parse_date(f)) {
        (Some(a), Some(b)) => a > b,
        _ => false,
    }
}

fn checked(v: &Value, _: &str) -> bool {
    v.as_bool()
}

fn unchecked(v: &Value, _: &str) -> bool {
    !v.as_bool()
}

fn empty(v: &Value, _: &str) -> bool {
    v.is_empty()
}

fn not_empty(v: &Value, _: &str) -> bool {
    !v.is_empty()
}
