//! # MDB Context
//!
//! Local-first context tables for a markdown vault.
//!
//! A context is a folder or tag with a set of tables and views. Tables hold
//! typed columns and one row per file; views select, sort, and group the rows
//! of a table. Frontmatter from the vault is merged into each context's
//! primary table, and linked tag contexts are joined into a view at query
//! time. The pure logic lives in [`mdb_core`]; this crate adds SQLite
//! persistence, the vault reader, and the `mdb` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────────┐   ┌──────────┐
//! │    Vault    │──▶│ ContextService │──▶│  SQLite  │
//! │ frontmatter │   │ cache + events │   │  tables  │
//! └─────────────┘   └───────┬────────┘   └──────────┘
//!                           │
//!                           ▼
//!                      ┌──────────┐
//!                      │   CLI    │
//!                      │  (mdb)   │
//!                      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mdb init                            # create database
//! mdb sync notes                      # import frontmatter into "notes"
//! mdb show notes                      # print the primary view
//! mdb column add notes rating number  # add a column
//! mdb view filter notes filesView rating --fn isGreatThan 3
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the table store |
//! | [`vault`] | Vault scanning and frontmatter parsing |
//! | [`service`] | Cached, evented access to contexts |
//! | [`show`] | Listing schemas and printing views |
//! | [`sync`] | Frontmatter import command |
//! | [`edit`] | Column, table, and view mutation commands |

pub mod config;
pub mod db;
pub mod edit;
pub mod migrate;
pub mod service;
pub mod show;
pub mod sqlite_store;
pub mod sync;
pub mod vault;
