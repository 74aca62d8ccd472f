//! # MDB Core
//!
//! Pure logic for context tables: the schema/column/row data model, the
//! predicate (filter/sort/group) engine, column mutation with predicate
//! migration, tag-context resolution and joins, and frontmatter
//! synchronization.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Persistence goes
//! through the [`store::Store`] trait; [`store::memory::InMemoryStore`] is
//! the reference backend used in tests.
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────┐
//! │  Store   │──▶│  join (tags) │──▶│ predicate eval │──▶ rendering
//! └────▲─────┘   └──────────────┘   └────────────────┘
//!      │
//!      ├── mutation (add/rename/delete column + predicate migration)
//!      └── frontmatter (type inference + overlay merge)
//! ```

pub mod frontmatter;
pub mod join;
pub mod models;
pub mod mutation;
pub mod predicate;
pub mod store;

pub use models::{Column, ColumnKind, Row, Schema, SchemaKind, Table, Value};
pub use predicate::Predicate;
