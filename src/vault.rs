//! Vault frontmatter reader.
//!
//! Walks the configured vault root, applies the include/exclude globs, and
//! reads the YAML frontmatter block of each markdown file as a JSON object.
//! Implements [`MetadataSource`] for frontmatter synchronization.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use mdb_core::frontmatter::MetadataSource;

use crate::config::VaultConfig;

#[derive(Debug, Error)]
pub enum FrontmatterError {
    #[error("frontmatter block is not closed")]
    Unterminated,
    #[error("invalid frontmatter yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("frontmatter is not a key/value mapping")]
    NotAMapping,
}

/// Parse the `---` fenced YAML block at the start of `content`.
///
/// A file without a block yields an empty map.
pub fn parse_frontmatter(content: &str) -> Result<Map<String, JsonValue>, FrontmatterError> {
    let content = content.trim_start_matches('\u{feff}');
    let mut lines = content.lines();
    match lines.next() {
        Some(first) if first.trim_end() == "---" => {}
        _ => return Ok(Map::new()),
    }

    let mut yaml = String::new();
    let mut closed = false;
    for line in lines {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            closed = true;
            break;
        }
        yaml.push_str(line);
        yaml.push('\n');
    }
    if !closed {
        return Err(FrontmatterError::Unterminated);
    }
    if yaml.trim().is_empty() {
        return Ok(Map::new());
    }

    match serde_yaml::from_str::<JsonValue>(&yaml)? {
        JsonValue::Object(map) => Ok(map),
        JsonValue::Null => Ok(Map::new()),
        _ => Err(FrontmatterError::NotAMapping),
    }
}

/// Frontmatter of the markdown files under a vault root.
pub struct VaultMetadata {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl VaultMetadata {
    pub fn new(config: &VaultConfig) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string(), "**/.obsidian/**".to_string()];
        excludes.extend(config.exclude_globs.clone());
        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_tracked(&self, relative: &str) -> bool {
        !self.exclude.is_match(relative) && self.include.is_match(relative)
    }

    /// Tracked files under `folder` (vault-relative, empty for the whole
    /// vault), sorted by path.
    pub fn scan(&self, folder: &str) -> Result<Vec<String>> {
        if !self.root.exists() {
            bail!("Vault root does not exist: {}", self.root.display());
        }
        let start = self.root.join(folder.trim_matches('/'));
        if !start.exists() {
            bail!("Folder does not exist in vault: {}", folder);
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&start) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");
            if self.is_tracked(&rel_str) {
                paths.push(rel_str);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl MetadataSource for VaultMetadata {
    fn get(&self, path: &str) -> Option<Map<String, JsonValue>> {
        if !self.is_tracked(path) {
            return None;
        }
        let content = match std::fs::read_to_string(self.root.join(path)) {
            Ok(content) => content,
            Err(e) => {
                log::debug!("cannot read {}: {}", path, e);
                return None;
            }
        };
        match parse_frontmatter(&content) {
            Ok(map) => Some(map),
            Err(e) => {
                log::warn!("skipping frontmatter of {}: {}", path, e);
                None
            }
        }
    }

    fn paths_under(&self, folder: &str) -> Vec<String> {
        self.scan(folder).unwrap_or_else(|e| {
            log::warn!("vault scan failed: {:#}", e);
            Vec::new()
        })
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
