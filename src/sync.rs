//! `mdb sync`: import vault frontmatter into a context's primary table.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::vault::VaultMetadata;

pub async fn run_sync(config: &Config, context: &str, folder: Option<&str>) -> Result<()> {
    let vault = VaultMetadata::new(&config.vault)?;
    let folder = folder.unwrap_or("");
    let service = db::open_service(config)
        .await?
        .with_metadata(Arc::new(vault), config.sync.ignore_keys.clone());

    let report = service.sync_frontmatter(context, folder).await?;

    println!(
        "sync {}: {} files read from {}",
        context,
        report.files,
        if folder.is_empty() { "vault" } else { folder }
    );
    if report.is_unchanged() {
        println!("  up to date");
        return Ok(());
    }
    if !report.new_columns.is_empty() {
        println!("  new columns:  {}", report.new_columns.join(", "));
    }
    println!("  new rows:     {}", report.new_rows);
    println!("  updated rows: {}", report.updated_rows);
    Ok(())
}
