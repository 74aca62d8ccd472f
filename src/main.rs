//! # MDB CLI (`mdb`)
//!
//! The `mdb` binary manages context tables for a markdown vault: it creates
//! the database, imports frontmatter, prints views, and edits columns,
//! tables, and view predicates.
//!
//! ## Usage
//!
//! ```bash
//! mdb --config ./config/mdb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mdb init` | Create the SQLite database and run schema migrations |
//! | `mdb schemas <context>` | List the tables and views of a context |
//! | `mdb show <context>` | Print the rows of a view |
//! | `mdb sync <context>` | Merge vault frontmatter into the primary table |
//! | `mdb column add\|rename\|delete` | Edit the columns of a table |
//! | `mdb table new\|drop` | Create or remove a table and its views |
//! | `mdb view filter\|sort\|group\|clear` | Edit the predicate of a view |
//!
//! ## Examples
//!
//! ```bash
//! mdb init
//! mdb sync projects --folder projects
//! mdb column rename projects status state
//! mdb view sort projects filesView due --fn earliest
//! mdb view group projects filesView state
//! mdb show projects --search draft
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mdb_context::{config, edit, migrate, show, sync};

/// MDB: typed tables and views over the notes of a markdown vault.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mdb.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mdb",
    about = "MDB: typed tables and views over the notes of a markdown vault",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mdb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the schema, column and row
    /// tables. Running it again is safe.
    Init,

    /// List the tables and views of a context.
    Schemas {
        /// Context id (a folder path or tag).
        context: String,
    },

    /// Print the rows of a view.
    ///
    /// Joins linked tag contexts, applies the view's filters and sort keys,
    /// and prints the rows grouped by the view's group-by field.
    Show {
        /// Context id (a folder path or tag).
        context: String,

        /// View (or table) id. Defaults to the context's primary view.
        #[arg(long)]
        view: Option<String>,

        /// Only show rows with a value containing this text.
        #[arg(long)]
        search: Option<String>,
    },

    /// Merge vault frontmatter into a context's primary table.
    ///
    /// New keys become columns with a guessed type. Existing column types
    /// are kept.
    Sync {
        /// Context id (a folder path or tag).
        context: String,

        /// Vault folder to read, relative to the vault root. Defaults to the
        /// whole vault.
        #[arg(long)]
        folder: Option<String>,
    },

    /// Add, rename, or delete columns.
    Column {
        #[command(subcommand)]
        action: ColumnAction,
    },

    /// Create or drop tables.
    Table {
        #[command(subcommand)]
        action: TableAction,
    },

    /// Edit the filters, sort keys, and grouping of a view.
    View {
        #[command(subcommand)]
        action: ViewAction,
    },
}

/// Column subcommands.
#[derive(Subcommand)]
enum ColumnAction {
    /// Add a column to a table.
    Add {
        context: String,
        name: String,
        /// Column type tag (`text`, `number`, `option-multi`, ...).
        #[arg(default_value = "text")]
        kind: String,
        /// Table id. Defaults to the primary table.
        #[arg(long)]
        table: Option<String>,
        /// Choice for `option` columns. Repeatable.
        #[arg(long = "option")]
        options: Vec<String>,
    },
    /// Rename a column, optionally changing its type.
    ///
    /// Row values and view predicates that reference the column follow the
    /// new name.
    Rename {
        context: String,
        old: String,
        new: String,
        /// New column type tag.
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long)]
        table: Option<String>,
    },
    /// Delete a column and its values.
    Delete {
        context: String,
        name: String,
        #[arg(long)]
        table: Option<String>,
    },
}

/// Table subcommands.
#[derive(Subcommand)]
enum TableAction {
    /// Create a table and a default view over it.
    New {
        context: String,
        name: String,
        /// Table id. Defaults to a random UUID.
        #[arg(long)]
        id: Option<String>,
        /// Tag context to join into the table's views. Repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Drop a table and every view over it.
    Drop { context: String, id: String },
}

/// View subcommands.
#[derive(Subcommand)]
enum ViewAction {
    /// Add a filter.
    Filter {
        context: String,
        view: String,
        field: String,
        /// Filter value. Ignored by functions that take none.
        #[arg(default_value = "")]
        value: String,
        /// Filter function id. Defaults to the column type's first filter.
        #[arg(long = "fn")]
        func: Option<String>,
    },
    /// Sort by a field, replacing any sort key already on that field.
    Sort {
        context: String,
        view: String,
        field: String,
        /// Sort function id. Defaults to the column type's first sort.
        #[arg(long = "fn")]
        func: Option<String>,
    },
    /// Group rows by a field. Without a field, grouping is removed.
    Group {
        context: String,
        view: String,
        field: Option<String>,
    },
    /// Remove all filters, sort keys, and grouping.
    Clear { context: String, view: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Schemas { context } => {
            show::run_schemas(&cfg, &context).await?;
        }
        Commands::Show {
            context,
            view,
            search,
        } => {
            show::run_show(&cfg, &context, view.as_deref(), search.as_deref()).await?;
        }
        Commands::Sync { context, folder } => {
            sync::run_sync(&cfg, &context, folder.as_deref()).await?;
        }
        Commands::Column { action } => match action {
            ColumnAction::Add {
                context,
                name,
                kind,
                table,
                options,
            } => {
                edit::run_column_add(&cfg, &context, table.as_deref(), &name, &kind, &options)
                    .await?;
            }
            ColumnAction::Rename {
                context,
                old,
                new,
                kind,
                table,
            } => {
                edit::run_column_rename(
                    &cfg,
                    &context,
                    table.as_deref(),
                    &old,
                    &new,
                    kind.as_deref(),
                )
                .await?;
            }
            ColumnAction::Delete {
                context,
                name,
                table,
            } => {
                edit::run_column_delete(&cfg, &context, table.as_deref(), &name).await?;
            }
        },
        Commands::Table { action } => match action {
            TableAction::New {
                context,
                name,
                id,
                tags,
            } => {
                edit::run_table_new(&cfg, &context, &name, id.as_deref(), &tags).await?;
            }
            TableAction::Drop { context, id } => {
                edit::run_table_drop(&cfg, &context, &id).await?;
            }
        },
        Commands::View { action } => match action {
            ViewAction::Filter {
                context,
                view,
                field,
                value,
                func,
            } => {
                edit::run_view_filter(&cfg, &context, &view, &field, func.as_deref(), &value)
                    .await?;
            }
            ViewAction::Sort {
                context,
                view,
                field,
                func,
            } => {
                edit::run_view_sort(&cfg, &context, &view, &field, func.as_deref()).await?;
            }
            ViewAction::Group {
                context,
                view,
                field,
            } => {
                edit::run_view_group(&cfg, &context, &view, field.as_deref()).await?;
            }
            ViewAction::Clear { context, view } => {
                edit::run_view_clear(&cfg, &context, &view).await?;
            }
        },
    }

    Ok(())
}
