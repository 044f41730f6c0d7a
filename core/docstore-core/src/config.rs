//! Store configuration.
//!
//! Defaults, overridden by a JSON file and/or `DOCSTORE_*` environment
//! variables.

use crate::error::{DocError, DocResult};
use crate::index::DEFAULT_BUCKET_COUNT;
use crate::schema::model::validate_name;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_KEYSPACE: &str = "DOCSTORE_KEYSPACE";
pub const ENV_DATA_DIR: &str = "DOCSTORE_DATA_DIR";
pub const ENV_BUCKET_COUNT: &str = "DOCSTORE_BUCKET_COUNT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub keyspace: String,
    /// On-disk location of the embedded store; `None` = temporary store.
    pub data_dir: Option<PathBuf>,
    pub bucket_count: u32,
    /// Default TTL (seconds) of the system tables; `None` = rows never expire.
    pub system_ttl: Option<u32>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            keyspace: "docstore".to_string(),
            data_dir: None,
            bucket_count: DEFAULT_BUCKET_COUNT,
            system_ttl: None,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by the environment.
    pub fn from_env() -> DocResult<Self> {
        let mut config = Self::default();
        config.load_from_env()?;
        Ok(config)
    }

    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = keyspace.into();
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_bucket_count(mut self, bucket_count: u32) -> Self {
        self.bucket_count = bucket_count;
        self
    }

    pub fn with_system_ttl(mut self, ttl: u32) -> Self {
        self.system_ttl = Some(ttl);
        self
    }

    /// Apply `DOCSTORE_KEYSPACE`, `DOCSTORE_DATA_DIR` and `DOCSTORE_BUCKET_COUNT`.
    pub fn load_from_env(&mut self) -> DocResult<()> {
        self.apply_vars(|name| env::var(name).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> DocResult<()> {
        if let Some(keyspace) = var(ENV_KEYSPACE) {
            self.keyspace = keyspace;
        }
        if let Some(dir) = var(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(count) = var(ENV_BUCKET_COUNT) {
            self.bucket_count = count.trim().parse().map_err(|_| {
                DocError::Validation(format!("{ENV_BUCKET_COUNT} must be a positive integer, got '{count}'"))
            })?;
        }
        Ok(())
    }

    /// Load from a JSON file; missing fields keep their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> DocResult<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> DocResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> DocResult<()> {
        validate_name("keyspace", &self.keyspace)?;
        if self.bucket_count == 0 {
            return Err(DocError::Validation("bucket_count must be at least 1".to_string()));
        }
        Ok(())
    }
}
