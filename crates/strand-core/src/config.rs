//! Store configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tuning knobs for a [`GraphDatabase`](crate::GraphDatabase)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of in-use relationships returned per batch fetch
    pub relationship_grab_size: usize,
    /// Degree at which a node is converted to super-node layout
    pub super_node_threshold: u64,
    /// Whether rollback returns ids of records created by the transaction
    pub free_ids_during_rollback: bool,
    /// Initial size in bytes of each store file
    pub initial_store_size: usize,
    /// Row lock acquisition timeout in milliseconds
    pub lock_timeout_ms: u64,
    /// Whether the logical log is fsynced on commit
    pub sync_log_on_commit: bool,
    /// Log size in bytes past which a commit empties the log, once no other
    /// transaction is in flight
    pub log_rotate_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            relationship_grab_size: 100,
            super_node_threshold: 50,
            free_ids_during_rollback: true,
            initial_store_size: 64 * 1024,
            lock_timeout_ms: 5000,
            sync_log_on_commit: true,
            log_rotate_size: 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Load a configuration from a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse {:?}: {}", path, e)))?;
        tracing::info!("Loaded store configuration from {:?}", path);
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `STRAND_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup.
    ///
    /// Recognised keys are `STRAND_GRAB_SIZE`, `STRAND_SUPER_NODE_THRESHOLD`,
    /// `STRAND_FREE_IDS_DURING_ROLLBACK`, `STRAND_LOCK_TIMEOUT_MS` and
    /// `STRAND_LOG_ROTATE_SIZE`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("STRAND_GRAB_SIZE") {
            self.relationship_grab_size = parse_var("STRAND_GRAB_SIZE", &v)?;
        }
        if let Some(v) = lookup("STRAND_SUPER_NODE_THRESHOLD") {
            self.super_node_threshold = parse_var("STRAND_SUPER_NODE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("STRAND_FREE_IDS_DURING_ROLLBACK") {
            self.free_ids_during_rollback = parse_var("STRAND_FREE_IDS_DURING_ROLLBACK", &v)?;
        }
        if let Some(v) = lookup("STRAND_LOCK_TIMEOUT_MS") {
            self.lock_timeout_ms = parse_var("STRAND_LOCK_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("STRAND_LOG_ROTATE_SIZE") {
            self.log_rotate_size = parse_var("STRAND_LOG_ROTATE_SIZE", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the chain code cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.relationship_grab_size == 0 {
            return Err(Error::config("relationship_grab_size must be at least 1"));
        }
        if self.super_node_threshold == 0 {
            return Err(Error::config("super_node_threshold must be at least 1"));
        }
        if self.initial_store_size == 0 {
            return Err(Error::config("initial_store_size must be non-zero"));
        }
        Ok(())
    }

    /// Set the relationship grab size
    pub fn with_grab_size(mut self, grab_size: usize) -> Self {
        self.relationship_grab_size = grab_size;
        self
    }

    /// Set the super-node conversion threshold
    pub fn with_super_node_threshold(mut self, threshold: u64) -> Self {
        self.super_node_threshold = threshold;
        self
    }

    /// Set whether rollback frees created ids
    pub fn with_free_ids_during_rollback(mut self, free: bool) -> Self {
        self.free_ids_during_rollback = free;
        self
    }

    /// Set the log size that triggers truncation after a commit
    pub fn with_log_rotate_size(mut self, bytes: u64) -> Self {
        self.log_rotate_size = bytes;
        self
    }

    /// Lock timeout as a [`Duration`]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| Error::config(format!("invalid value {:?} for {}: {}", value, key, e)))
}
