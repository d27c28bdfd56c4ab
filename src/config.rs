use std::path::PathBuf;

use thiserror::Error;

use crate::storage::Database;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub migration: MigrationConfig,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    /// Directory holding the datastore file
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for stored media files
    pub storage_path: String,
    /// Directory for timestamped datastore backups
    pub backup_dir: String,
    /// Prefix for download URLs handed back to clients
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Rows between progress log lines
    pub batch_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_path: "./files".to_string(),
            backup_dir: "./backups".to_string(),
            public_base_url: String::new(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            storage: StorageConfig::default(),
            migration: MigrationConfig::default(),
            max_upload_size: 50 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or(defaults.node.bind_address);

        let data_dir = std::env::var("DATA_DIR").unwrap_or(defaults.node.data_dir);

        let storage_path =
            std::env::var("STORAGE_PATH").unwrap_or(defaults.storage.storage_path);

        let backup_dir = std::env::var("BACKUP_DIR").unwrap_or(defaults.storage.backup_dir);

        let public_base_url =
            std::env::var("PUBLIC_BASE_URL").unwrap_or(defaults.storage.public_base_url);

        let max_upload_size = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_upload_size);

        let batch_size = std::env::var("MIGRATION_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.migration.batch_size);

        let config = Config {
            node: NodeConfig {
                bind_address,
                data_dir,
            },
            storage: StorageConfig {
                storage_path,
                backup_dir,
                public_base_url,
            },
            migration: MigrationConfig { batch_size },
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node.data_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "DATA_DIR cannot be empty".to_string(),
            ));
        }

        if self.storage.storage_path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "STORAGE_PATH cannot be empty".to_string(),
            ));
        }

        if self.migration.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "MIGRATION_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must be greater than 0".to_string(),
            ));
        }

        if PathBuf::from(&self.storage.backup_dir) == PathBuf::from(&self.node.data_dir) {
            tracing::warn!(
                "BACKUP_DIR equals DATA_DIR. Backups will sit next to the live datastore."
            );
        }

        Ok(())
    }

    /// Path of the live datastore file.
    pub fn db_path(&self) -> PathBuf {
        Database::file_path(&self.node.data_dir)
    }
}
