use crate::error::{FlatStoreError, Result};
use crate::lock::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Store configuration. Every field has a default, so a YAML file only
/// needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one `<collection>.<extension>` file per collection.
    pub base_dir: PathBuf,
    pub extension: String,
    pub delimiter: char,
    pub id_strategy: IdStrategy,
    /// Back-fill new columns with name/type aware defaults instead of
    /// empty cells.
    pub generate_defaults: bool,
    /// Check records against the collection schema on create/update.
    pub validate_on_write: bool,
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            base_dir: PathBuf::from("data"),
            extension: "csv".to_string(),
            delimiter: ',',
            id_strategy: IdStrategy::default(),
            generate_defaults: true,
            validate_on_write: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Parse a YAML configuration document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = serde_yaml::from_str(content)
            .map_err(|e| FlatStoreError::Config(e.to_string()))?;
        config.delimiter_byte()?;
        Ok(config)
    }

    /// Load a YAML configuration file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn delimiter_byte(&self) -> Result<u8> {
        if self.delimiter.is_ascii() && self.delimiter != '"' && self.delimiter != '\n' {
            Ok(self.delimiter as u8)
        } else {
            Err(FlatStoreError::Config(format!(
                "Delimiter must be a single ASCII character other than a quote or newline, got {:?}",
                self.delimiter
            )))
        }
    }
}

/// How record ids are generated on create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    #[default]
    Uuid,
    Ulid,
    Nanoid,
}

impl IdStrategy {
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            IdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::new("/tmp/data");
        assert_eq!(config.extension, "csv");
        assert_eq!(config.delimiter_byte().unwrap(), b',');
        assert!(config.retry.enabled);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 50);
        assert!(!config.validate_on_write);
    }

    #[test]
    fn test_partial_yaml() {
        let config = StoreConfig::from_yaml_str(
            "base_dir: ./collections\ndelimiter: ';'\nid_strategy: ulid\nretry:\n  max_retries: 5\n",
        )
        .unwrap();
        assert_eq!(config.base_dir, PathBuf::from("./collections"));
        assert_eq!(config.delimiter, ';');
        assert_eq!(config.id_strategy, IdStrategy::Ulid);
        assert_eq!(config.retry.max_retries, 5);
        // Untouched retry fields keep their defaults
        assert!(config.retry.enabled);
        assert_eq!(config.retry.base_delay_ms, 50);
    }

    #[test]
    fn test_bad_delimiter_rejected() {
        let result = StoreConfig::from_yaml_str("delimiter: 'é'");
        assert!(matches!(result, Err(FlatStoreError::Config(_))));
    }

    #[test]
    fn test_id_strategies_are_distinct() {
        for strategy in [IdStrategy::Uuid, IdStrategy::Ulid, IdStrategy::Nanoid] {
            let ids: HashSet<String> = (0..100).map(|_| strategy.generate()).collect();
            assert_eq!(ids.len(), 100);
        }
    }
}
