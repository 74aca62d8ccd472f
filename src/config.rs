use anyhow::{Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use mdb_core::models::PRIMARY_KEY;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub vault: VaultConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncConfig {
    /// Frontmatter keys that are never imported as columns.
    #[serde(default)]
    pub ignore_keys: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.vault.include_globs.is_empty() {
        anyhow::bail!("vault.include_globs must not be empty");
    }
    for pattern in config
        .vault
        .include_globs
        .iter()
        .chain(&config.vault.exclude_globs)
    {
        Glob::new(pattern).with_context(|| format!("Invalid vault glob: '{}'", pattern))?;
    }

    if let Some(key) = config
        .sync
        .ignore_keys
        .iter()
        .find(|k| k.eq_ignore_ascii_case(PRIMARY_KEY))
    {
        anyhow::bail!("sync.ignore_keys cannot contain the primary key '{}'", key);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_applied() {
        let file = write_config(
            r#"
            [db]
            path = "./data/mdb.sqlite"

            [vault]
            root = "./vault"
            "#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.vault.include_globs, vec!["**/*.md"]);
        assert!(config.vault.exclude_globs.is_empty());
        assert!(config.sync.ignore_keys.is_empty());
    }

    #[test]
    fn test_rejects_bad_glob() {
        let file = write_config(
            r#"
            [db]
            path = "x.sqlite"

            [vault]
            root = "."
            exclude_globs = ["a/{b"]
            "#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_rejects_primary_key_in_ignore_keys() {
        let file = write_config(
            r#"
            [db]
            path = "x.sqlite"

            [vault]
            root = "."

            [sync]
            ignore_keys = ["file"]
            "#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("primary key"));
    }
}
