//! Sync client configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use dav_common::{Error, Result, TableId};

/// Backend environment the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    Staging,
    #[default]
    Production,
}

/// A remote table the client synchronizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Name used for listings.
    pub name: String,
    /// Id carried by the table's objects.
    pub id: TableId,
}

impl TableConfig {
    pub fn new(name: impl Into<String>, id: TableId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Backend environment.
    pub environment: Environment,
    /// Tables to synchronize, in download order.
    pub tables: Vec<TableConfig>,
    /// Names of tables whose pages are fetched interleaved.
    pub parallel_tables: Vec<String>,
    /// Look-ahead for page listings and concurrent object downloads.
    pub download_concurrency: usize,
    /// Concurrent pushes.
    pub push_concurrency: usize,
    /// Whether blobs of file objects are downloaded during sync.
    pub download_files: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            tables: Vec::new(),
            parallel_tables: Vec::new(),
            download_concurrency: 3,
            push_concurrency: 3,
            download_files: true,
        }
    }
}

impl SyncConfig {
    /// Create a configuration for the given tables.
    pub fn new(tables: Vec<TableConfig>) -> Self {
        Self {
            tables,
            ..Self::default()
        }
    }

    /// Mark tables as parallel.
    pub fn with_parallel_tables(mut self, names: &[&str]) -> Self {
        self.parallel_tables = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Set the environment.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set both concurrency limits.
    pub fn with_concurrency(mut self, download: usize, push: usize) -> Self {
        self.download_concurrency = download;
        self.push_concurrency = push;
        self
    }

    /// Enable or disable blob downloads.
    pub fn with_download_files(mut self, download_files: bool) -> Self {
        self.download_files = download_files;
        self
    }

    /// Names of all configured tables, in order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Position of a table id in the configured order.
    pub fn table_position(&self, id: TableId) -> usize {
        self.tables
            .iter()
            .position(|t| t.id == id)
            .unwrap_or(self.tables.len())
    }

    /// Name of the table with the given id.
    pub fn table_name(&self, id: TableId) -> Option<&str> {
        self.tables
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.name.as_str())
    }

    /// Check the configuration for consistency.
    ///
    /// # Errors
    /// - Empty or duplicate table names or ids
    /// - Parallel table names that are not configured tables
    /// - Zero concurrency
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut ids = HashSet::new();

        for table in &self.tables {
            if table.name.is_empty() {
                return Err(Error::InvalidInput("Table name cannot be empty".to_string()));
            }
            if !names.insert(table.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "Duplicate table name: {}",
                    table.name
                )));
            }
            if !ids.insert(table.id) {
                return Err(Error::InvalidInput(format!("Duplicate table id: {}", table.id)));
            }
        }

        if let Some(unknown) = self
            .parallel_tables
            .iter()
            .find(|name| !names.contains(name.as_str()))
        {
            return Err(Error::InvalidInput(format!(
                "Parallel table is not configured: {}",
                unknown
            )));
        }

        if self.download_concurrency == 0 || self.push_concurrency == 0 {
            return Err(Error::InvalidInput(
                "Concurrency limits must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> Vec<TableConfig> {
        vec![TableConfig::new("notes", 1), TableConfig::new("images", 2)]
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.download_concurrency, 3);
        assert_eq!(config.push_concurrency, 3);
        assert!(config.download_files);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let config = SyncConfig::new(vec![TableConfig::new("a", 1), TableConfig::new("a", 2)]);
        assert!(config.validate().is_err());

        let config = SyncConfig::new(vec![TableConfig::new("a", 1), TableConfig::new("b", 1)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_parallel_table() {
        let config = SyncConfig::new(tables()).with_parallel_tables(&["videos"]);
        assert!(config.validate().is_err());

        let config = SyncConfig::new(tables()).with_parallel_tables(&["images"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = SyncConfig::new(tables()).with_concurrency(0, 2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"environment":"test","tables":[{"name":"notes","id":1}]}"#;
        let config = SyncConfig::from_json(json).unwrap();
        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.tables.len(), 1);
        assert_eq!(config.push_concurrency, 3);
    }

    #[test]
    fn test_table_lookup() {
        let config = SyncConfig::new(tables());
        assert_eq!(config.table_name(2), Some("images"));
        assert_eq!(config.table("notes").map(|t| t.id), Some(1));
        assert_eq!(config.table_position(2), 1);
        assert_eq!(config.table_position(9), 2);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = SyncConfig::new(tables()).with_parallel_tables(&["notes"]);
        let restored = SyncConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored.tables, config.tables);
        assert_eq!(restored.parallel_tables, vec!["notes".to_string()]);
    }
}
