//! Ontograph Configuration Management
//!
//! Handles configuration from config files and environment variables
//! with defaults suited to a local, in-memory deployment.
//!
//! Author: hephaex@gmail.com

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Ontology behaviour
    pub ontology: OntologySettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override every setting whose variable `lookup` returns a value for
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup("ONTOGRAPH_ENABLE_SEARCH") {
            self.ontology.enable_search = parse_env("ONTOGRAPH_ENABLE_SEARCH", value)?;
        }
        if let Some(value) = lookup("ONTOGRAPH_SEARCH_LIMIT") {
            self.ontology.search_limit = parse_env("ONTOGRAPH_SEARCH_LIMIT", value)?;
        }
        if let Some(path) = lookup("ONTOGRAPH_SEED") {
            self.ontology.seed_file = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("ONTOGRAPH_STORE_PATH") {
            self.ontology.store_path = Some(PathBuf::from(path));
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { message, .. } => ConfigError::ParseError { path, message },
            other => other,
        })
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        self.apply_env(lookup)?;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ontology.search_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ontology.search_limit".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Ontology settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OntologySettings {
    /// Build and maintain a search index over all resources
    pub enable_search: bool,

    /// Default maximum number of search results
    pub search_limit: usize,

    /// TOML file with resources and relationships to load on startup
    pub seed_file: Option<PathBuf>,

    /// RocksDB directory. Unset keeps the graph in memory.
    pub store_path: Option<PathBuf>,
}

impl Default for OntologySettings {
    fn default() -> Self {
        Self {
            enable_search: true,
            search_limit: 50,
            seed_file: None,
            store_path: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.ontology.enable_search);
        assert_eq!(config.ontology.search_limit, 50);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_toml_partial() {
        let config = AppConfig::from_toml(
            r#"
            [ontology]
            enable_search = false
            seed_file = "seed.toml"

            [logging]
            json_format = true
            "#,
        )
        .unwrap();
        assert!(!config.ontology.enable_search);
        assert_eq!(config.ontology.search_limit, 50);
        assert_eq!(config.ontology.seed_file, Some(PathBuf::from("seed.toml")));
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_from_toml_rejects_zero_limit() {
        let err = AppConfig::from_toml("[ontology]\nsearch_limit = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let file = AppConfig::from_toml(
            r#"
            [ontology]
            enable_search = false
            search_limit = 20

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let env = |key: &str| match key {
            "ONTOGRAPH_ENABLE_SEARCH" => Some("true".to_string()),
            "ONTOGRAPH_SEARCH_LIMIT" => Some("50".to_string()),
            "ONTOGRAPH_STORE_PATH" => Some("/var/lib/ontograph".to_string()),
            "LOG_LEVEL" => Some("info".to_string()),
            _ => None,
        };
        let config = file.with_overrides(env).unwrap();
        assert!(config.ontology.enable_search);
        assert_eq!(config.ontology.search_limit, 50);
        assert_eq!(
            config.ontology.store_path,
            Some(PathBuf::from("/var/lib/ontograph"))
        );
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_unset_env_keeps_file_values() {
        let file = AppConfig::from_toml("[ontology]\nenable_search = false\n").unwrap();
        let config = file.with_overrides(|_| None).unwrap();
        assert!(!config.ontology.enable_search);
        assert_eq!(config.ontology.store_path, None);
    }

    #[test]
    fn test_invalid_env_value() {
        let err = AppConfig::default()
            .with_overrides(|key| {
                (key == "ONTOGRAPH_SEARCH_LIMIT").then(|| "lots".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_from_file_missing() {
        let err = AppConfig::from_file("/nonexistent/ontograph.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
