use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mdb_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("mdb");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Vault with frontmatter
    let projects = root.join("vault/projects");
    fs::create_dir_all(&projects).unwrap();
    fs::create_dir_all(root.join("vault/.obsidian")).unwrap();
    fs::write(
        projects.join("alpha.md"),
        "---\nstatus: done\nrating: 5\n---\n# Alpha\n",
    )
    .unwrap();
    fs::write(
        projects.join("beta.md"),
        "---\nstatus: todo\nrating: 2\n---\n# Beta\n",
    )
    .unwrap();
    fs::write(root.join("vault/inbox.md"), "# Inbox\n\nNo frontmatter.\n").unwrap();
    fs::write(root.join("vault/.obsidian/workspace.md"), "---\nx: 1\n---\n").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/mdb.sqlite"

[vault]
root = "{root}/vault"
include_globs = ["**/*.md"]
exclude_globs = []
"#,
        root = root.display()
    );

    let config_path = config_dir.join("mdb.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mdb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mdb_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mdb binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Initialize and sync the whole vault into the `notes` context.
fn synced_env() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_mdb(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    let (stdout, stderr, success) = run_mdb(&config_path, &["sync", "notes"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    (tmp, config_path)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mdb(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_mdb(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_mdb(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_mdb(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_sync_imports_frontmatter() {
    let (_tmp, config_path) = setup_test_env();
    run_mdb(&config_path, &["init"]);

    let (stdout, stderr, success) = run_mdb(&config_path, &["sync", "notes"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("3 files read from vault"), "{}", stdout);
    assert!(stdout.contains("new columns:  rating, status"), "{}", stdout);
    assert!(stdout.contains("new rows:     3"), "{}", stdout);
}

#[test]
fn test_sync_idempotent() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_mdb(&config_path, &["sync", "notes"]);
    assert!(success);
    assert!(stdout.contains("up to date"), "{}", stdout);
}

#[test]
fn test_sync_folder() {
    let (_tmp, config_path) = setup_test_env();
    run_mdb(&config_path, &["init"]);

    let (stdout, _, success) =
        run_mdb(&config_path, &["sync", "projects", "--folder", "projects"]);
    assert!(success);
    assert!(stdout.contains("2 files read from projects"), "{}", stdout);
}

#[test]
fn test_schemas_lists_defaults() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_mdb(&config_path, &["schemas", "notes"]);
    assert!(success);
    assert!(stdout.contains("files"));
    assert!(stdout.contains("filesView"));
    assert!(stdout.contains("(primary)"));
}

#[test]
fn test_show_prints_rows() {
    let (_tmp, config_path) = synced_env();

    let (stdout, stderr, success) = run_mdb(&config_path, &["show", "notes"]);
    assert!(success, "show failed: {}", stderr);
    assert!(stdout.contains("(3 rows)"), "{}", stdout);
    assert!(stdout.contains("File | rating | status"), "{}", stdout);
    assert!(stdout.contains("projects/alpha.md | 5 | done"), "{}", stdout);
}

#[test]
fn test_show_search() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_mdb(&config_path, &["show", "notes", "--search", "todo"]);
    assert!(success);
    assert!(stdout.contains("(1 rows)"), "{}", stdout);
    assert!(stdout.contains("projects/beta.md"));
}

#[test]
fn test_show_unknown_view_fails() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_mdb(&config_path, &["show", "notes", "--view", "nope"]);
    assert!(!success);
    assert!(stderr.contains("schema not found"));
}

#[test]
fn test_column_rename_updates_rows() {
    let (_tmp, config_path) = synced_env();

    let (stdout, stderr, success) =
        run_mdb(&config_path, &["column", "rename", "notes", "status", "state"]);
    assert!(success, "rename failed: {}", stderr);
    assert!(stdout.contains("'status' -> 'state'"));

    let (stdout, _, _) = run_mdb(&config_path, &["show", "notes"]);
    assert!(stdout.contains("File | rating | state"), "{}", stdout);
    assert!(stdout.contains("projects/beta.md | 2 | todo"), "{}", stdout);
}

#[test]
fn test_column_add_duplicate_fails() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) =
        run_mdb(&config_path, &["column", "add", "notes", "Status", "number"]);
    assert!(!success);
    assert!(stderr.contains("duplicate property name"), "{}", stderr);

    let (_, stderr, success) = run_mdb(&config_path, &["column", "add", "notes", "due", "formula"]);
    assert!(!success);
    assert!(stderr.contains("unknown column type"), "{}", stderr);
}

#[test]
fn test_column_add_and_delete() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_mdb(
        &config_path,
        &["column", "add", "notes", "priority", "option", "--option", "high", "--option", "low"],
    );
    assert!(success, "add failed: {}", stderr);
    let (stdout, _, _) = run_mdb(&config_path, &["show", "notes"]);
    assert!(stdout.contains("File | rating | status | priority"), "{}", stdout);

    let (_, stderr, success) = run_mdb(&config_path, &["column", "delete", "notes", "priority"]);
    assert!(success, "delete failed: {}", stderr);
    let (stdout, _, _) = run_mdb(&config_path, &["show", "notes"]);
    assert!(!stdout.contains("priority"), "{}", stdout);
}

#[test]
fn test_view_filter_sort_group() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_mdb(
        &config_path,
        &["view", "filter", "notes", "filesView", "rating", "1", "--fn", "isGreatThan"],
    );
    assert!(success, "filter failed: {}", stderr);
    let (stdout, _, _) = run_mdb(&config_path, &["show", "notes"]);
    assert!(stdout.contains("(2 rows)"), "{}", stdout);
    assert!(!stdout.contains("inbox.md"));

    let (_, _, success) = run_mdb(
        &config_path,
        &["view", "sort", "notes", "filesView", "rating", "--fn", "numberDescending"],
    );
    assert!(success);
    let (_, _, success) = run_mdb(&config_path, &["view", "group", "notes", "filesView", "status"]);
    assert!(success);

    let (stdout, _, _) = run_mdb(&config_path, &["show", "notes"]);
    assert!(stdout.contains("## done (1)"), "{}", stdout);
    assert!(stdout.contains("## todo (1)"), "{}", stdout);
    let alpha = stdout.find("projects/alpha.md").unwrap();
    let beta = stdout.find("projects/beta.md").unwrap();
    assert!(alpha < beta);

    let (_, _, success) = run_mdb(&config_path, &["view", "clear", "notes", "filesView"]);
    assert!(success);
    let (stdout, _, _) = run_mdb(&config_path, &["show", "notes"]);
    assert!(stdout.contains("(3 rows)"), "{}", stdout);
}

#[test]
fn test_view_filter_rejects_bad_input() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_mdb(
        &config_path,
        &["view", "filter", "notes", "filesView", "rating", "1", "--fn", "isTrue"],
    );
    assert!(!success);
    assert!(stderr.contains("does not apply"), "{}", stderr);

    let (_, stderr, success) =
        run_mdb(&config_path, &["view", "filter", "notes", "filesView", "missing", "x"]);
    assert!(!success);
    assert!(stderr.contains("unknown field"), "{}", stderr);
}

#[test]
fn test_rename_follows_into_view() {
    let (_tmp, config_path) = synced_env();

    run_mdb(&config_path, &["view", "group", "notes", "filesView", "status"]);
    run_mdb(&config_path, &["column", "rename", "notes", "status", "state"]);

    let (stdout, _, success) = run_mdb(&config_path, &["show", "notes"]);
    assert!(success);
    assert!(stdout.contains("## done (1)"), "{}", stdout);
    assert!(stdout.contains("## (none) (1)"), "{}", stdout);
}

#[test]
fn test_table_new_and_drop() {
    let (_tmp, config_path) = synced_env();

    let (stdout, stderr, success) = run_mdb(
        &config_path,
        &["table", "new", "notes", "Reading", "--id", "reading", "--tag", "#book"],
    );
    assert!(success, "table new failed: {}", stderr);
    assert!(stdout.contains("Created table notes/reading"));

    let (_, _, success) =
        run_mdb(&config_path, &["table", "new", "notes", "Again", "--id", "reading"]);
    assert!(!success);

    let (stdout, _, _) = run_mdb(&config_path, &["schemas", "notes"]);
    assert!(stdout.contains("readingView"));
    assert!(stdout.contains("tags: #book"), "{}", stdout);

    let (stdout, _, success) = run_mdb(&config_path, &["table", "drop", "notes", "reading"]);
    assert!(success);
    assert!(stdout.contains("and 1 views"), "{}", stdout);
    let (stdout, _, _) = run_mdb(&config_path, &["schemas", "notes"]);
    assert!(!stdout.contains("reading"));

    let (_, stderr, success) = run_mdb(&config_path, &["table", "drop", "notes", "files"]);
    assert!(!success);
    assert!(stderr.contains("cannot be dropped"));
}
