//! Context service over the SQLite store.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use mdb_context::config::{Config, DbConfig, SyncConfig, VaultConfig};
use mdb_context::service::ContextService;
use mdb_context::sqlite_store::SqliteStore;
use mdb_context::vault::VaultMetadata;
use mdb_context::{db, migrate};

use mdb_core::models::{Column, ColumnKind, Row, Schema, Table, Value, DEFAULT_DB_SCHEMA};
use mdb_core::predicate::{Filter, Predicate, Sort};

fn test_config(tmp: &TempDir) -> Config {
    let vault = tmp.path().join("vault");
    fs::create_dir_all(&vault).unwrap();
    Config {
        db: DbConfig {
            path: tmp.path().join("data/mdb.sqlite"),
        },
        vault: VaultConfig {
            root: vault,
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
        },
        sync: SyncConfig::default(),
    }
}

async fn open(config: &Config) -> ContextService<SqliteStore> {
    migrate::run_migrations(config).await.unwrap();
    db::open_service(config).await.unwrap()
}

fn status_view_predicate() -> Predicate {
    Predicate {
        filters: vec![Filter {
            field: "status".into(),
            func: "is".into(),
            value: "done".into(),
        }],
        sort: vec![Sort {
            field: "status".into(),
            func: "alphabetical".into(),
        }],
        group_by: vec!["status".into()],
        ..Default::default()
    }
}

async fn table_with_status(svc: &ContextService<SqliteStore>, context: &str) {
    svc.save_column(
        context,
        DEFAULT_DB_SCHEMA,
        Column::new("status", ColumnKind::Text),
        None,
    )
    .await
    .unwrap();
    let mut table = (*svc.table(context, DEFAULT_DB_SCHEMA).await.unwrap()).clone();
    for (file, status) in [("a.md", "done"), ("b.md", "todo")] {
        let mut row = Row::with_file(file);
        row.set("status", Value::Text(status.into()));
        table.rows.push(row);
    }
    svc.save_table(context, table).await.unwrap();
}

#[tokio::test]
async fn test_fresh_context_has_default_schemas() {
    let tmp = TempDir::new().unwrap();
    let svc = open(&test_config(&tmp)).await;

    let ids: Vec<String> = svc
        .schemas("projects")
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec!["files", "filesView"]);
    let table = svc.primary_table("projects").await.unwrap();
    assert_eq!(table.cols.len(), 1);
    assert!(table.rows.is_empty());
}

#[tokio::test]
async fn test_save_and_reload_across_services() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    {
        let svc = open(&config).await;
        table_with_status(&svc, "projects").await;
    }

    let svc = open(&config).await;
    let table = svc.primary_table("projects").await.unwrap();
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[0].value("status"), &Value::Text("done".into()));
    assert!(table.column("status").is_some());
    // the default view was persisted with the first write
    assert!(svc.schema("projects", "filesView").await.is_ok());
}

#[tokio::test]
async fn test_rename_migrates_rows_and_predicates() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    {
        let svc = open(&config).await;
        table_with_status(&svc, "projects").await;
        svc.update_predicate("projects", "filesView", status_view_predicate())
            .await
            .unwrap();

        let old = svc
            .table("projects", DEFAULT_DB_SCHEMA)
            .await
            .unwrap()
            .column("status")
            .cloned()
            .unwrap();
        let renamed = Column {
            name: "state".into(),
            ..old.clone()
        };
        svc.save_column("projects", DEFAULT_DB_SCHEMA, renamed, Some(&old))
            .await
            .unwrap();
    }

    let svc = open(&config).await;
    let table = svc.primary_table("projects").await.unwrap();
    assert!(table.column("status").is_none());
    assert_eq!(table.rows[1].value("state"), &Value::Text("todo".into()));

    let predicate = svc.schema("projects", "filesView").await.unwrap().predicate;
    assert_eq!(predicate.filters[0].field, "state");
    assert_eq!(predicate.sort[0].field, "state");
    assert_eq!(predicate.group_by, vec!["state"]);

    let view = svc.view_rows("projects", "filesView", None).await.unwrap();
    assert_eq!(view.rows.len(), 1);
    assert_eq!(view.rows[0].file(), Some("a.md"));
}

#[tokio::test]
async fn test_duplicate_column_name_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let svc = open(&test_config(&tmp)).await;
    table_with_status(&svc, "projects").await;

    let err = svc
        .save_column(
            "projects",
            DEFAULT_DB_SCHEMA,
            Column::new("Status", ColumnKind::Number),
            None,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("duplicate property name"));
    let table = svc.primary_table("projects").await.unwrap();
    assert_eq!(table.column("status").unwrap().kind, ColumnKind::Text);
}

#[tokio::test]
async fn test_delete_column_leaves_predicates() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let svc = open(&config).await;
    table_with_status(&svc, "projects").await;
    svc.update_predicate("projects", "filesView", status_view_predicate())
        .await
        .unwrap();

    let col = svc
        .primary_table("projects")
        .await
        .unwrap()
        .column("status")
        .cloned()
        .unwrap();
    svc.delete_column("projects", DEFAULT_DB_SCHEMA, &col)
        .await
        .unwrap();

    let reopened = open(&config).await;
    let table = reopened.primary_table("projects").await.unwrap();
    assert!(table.column("status").is_none());
    assert!(table.rows.iter().all(|r| r.get("status").is_none()));
    let predicate = reopened.schema("projects", "filesView").await.unwrap().predicate;
    assert_eq!(predicate.filters[0].field, "status");

    // the dangling filter is ignored, so every row shows
    let view = reopened.view_rows("projects", "filesView", None).await.unwrap();
    assert_eq!(view.rows.len(), 2);
}

#[tokio::test]
async fn test_primary_table_cannot_be_deleted() {
    let tmp = TempDir::new().unwrap();
    let svc = open(&test_config(&tmp)).await;
    table_with_status(&svc, "projects").await;

    assert!(!svc.delete_schema("projects", DEFAULT_DB_SCHEMA).await.unwrap());
    assert_eq!(svc.primary_table("projects").await.unwrap().rows.len(), 2);

    let created = svc
        .save_schema("projects", Schema::db("archive", "Archive"))
        .await
        .unwrap();
    assert!(created);
    assert!(svc.delete_schema("projects", "archive").await.unwrap());
    assert!(svc.schema("projects", "archive").await.is_err());
}

#[tokio::test]
async fn test_view_joins_tag_context() {
    let tmp = TempDir::new().unwrap();
    let svc = open(&test_config(&tmp)).await;

    // tag context "#project" holds the status of note.md
    table_with_status(&svc, "#project").await;
    let mut tagged = (*svc.primary_table("#project").await.unwrap()).clone();
    let mut row = Row::with_file("note.md");
    row.set("status", Value::Text("done".into()));
    tagged.rows.push(row);
    svc.save_table("#project", tagged).await.unwrap();

    // folder context linking the tag
    let mut notes = Table::empty(Schema {
        def: "#project".into(),
        primary: true,
        ..Schema::db(DEFAULT_DB_SCHEMA, "Files")
    });
    notes.rows.push(Row::with_file("note.md"));
    notes.rows.push(Row::with_file("loose.md"));
    svc.save_table("notes", notes).await.unwrap();

    let view = svc.view_rows("notes", "filesView", None).await.unwrap();
    assert!(view.columns.iter().any(|c| c.field_key() == "status#project"));
    let note = view.rows.iter().find(|r| r.file() == Some("note.md")).unwrap();
    assert_eq!(note.value("status#project"), &Value::Text("done".into()));
    let loose = view.rows.iter().find(|r| r.file() == Some("loose.md")).unwrap();
    assert_eq!(loose.value("_index#project"), &Value::number(-1.0));
    assert!(loose.value("status#project").is_empty());
}

#[tokio::test]
async fn test_frontmatter_sync_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    fs::write(
        config.vault.root.join("a.md"),
        "---\nstatus: done\nrating: 4\ntags: [rust, notes]\n---\n# A\n",
    )
    .unwrap();
    fs::write(config.vault.root.join("b.md"), "---\nstatus: todo\n---\n").unwrap();
    fs::write(config.vault.root.join("plain.md"), "no frontmatter here\n").unwrap();

    let vault = VaultMetadata::new(&config.vault).unwrap();
    let svc = open(&config)
        .await
        .with_metadata(Arc::new(vault), Vec::new());

    let first = svc.sync_frontmatter("vault", "").await.unwrap();
    assert_eq!(first.files, 3);
    assert_eq!(first.new_rows, 3);
    assert_eq!(first.new_columns, vec!["rating", "status", "tags"]);

    let table = svc.primary_table("vault").await.unwrap();
    assert_eq!(table.column("rating").unwrap().kind, ColumnKind::Number);
    assert_eq!(table.column("tags").unwrap().kind, ColumnKind::TagMulti);
    let a = &table.rows[table.row_index("a.md").unwrap()];
    assert_eq!(a.value("rating"), &Value::number(4.0));

    let second = svc.sync_frontmatter("vault", "").await.unwrap();
    assert!(second.is_unchanged());
}

#[tokio::test]
async fn test_dates_and_numbers_survive_sqlite_reload() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    {
        let svc = open(&config).await;
        let mut table = (*svc.primary_table("projects").await.unwrap()).clone();
        table.cols.push(Column::new("due", ColumnKind::Date));
        table.cols.push(Column::new("code", ColumnKind::Number));
        let mut row = Row::with_file("a.md");
        row.set("due", Value::decode(ColumnKind::Date, "2024-03-01T09:30:00+02:00"));
        row.set("code", Value::decode(ColumnKind::Number, "007"));
        table.rows.push(row);
        svc.save_table("projects", table).await.unwrap();
    }

    let svc = open(&config).await;
    let table = svc.primary_table("projects").await.unwrap();
    let row = &table.rows[0];
    assert_eq!(row.value("due").encode(), "2024-03-01T09:30:00+02:00");
    assert_eq!(row.value("code").encode(), "007");
    assert_eq!(row.value("code").as_number(), 7.0);
}
