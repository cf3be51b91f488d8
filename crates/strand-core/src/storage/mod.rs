//! Storage layer - Record stores for nodes, relationships, groups and properties
//!
//! Neo4j-inspired record stores, one file per record kind:
//! - `nodes.store`: node records (first relationship or group, first property, flags)
//! - `relationships.store`: relationship records linked into both endpoint chains
//! - `relationship_groups.store`: per-(node, type) chain anchors of super nodes
//! - `properties.store` (+ strings / arrays): property chains with packed blocks
//! - `relationship_types.store`, `property_keys.store` (+ names): name tokens
//! - `meta.store`: last committed transaction and graph property chain head
//!
//! Records are written in place by committing transactions only.

mod dynamic;
mod mapped_file;
mod meta;
mod property;
mod record_store;
mod records;
mod token;

pub use dynamic::DynamicStore;
pub use meta::MetaStore;
pub use property::{
    MAX_KEY_ID, PROPERTY_PAYLOAD_SIZE, PropertyBlock, PropertyOwner, PropertyRecord,
    PropertyStore, PropertyType, PropertyValue, SHORT_STRING_MAX,
};
pub use record_store::{HEADER_SIZE, RecordStore, StoreRecord};
pub use records::{
    DYNAMIC_PAYLOAD_SIZE, DynamicRecord, NodeRecord, PropertyIndexRecord, RelationshipGroupRecord,
    RelationshipRecord, RelationshipTypeRecord, TokenRecord,
};
pub use token::{Token, TokenStore};

use crate::chain::RecordSource;
use crate::config::StoreConfig;
use crate::Result;
use std::path::{Path, PathBuf};

/// "No record" sentinel for every id field
pub const NO_NEXT: u64 = u64::MAX;

/// Relationship type id
pub type TypeId = u32;

/// Property key id
pub type KeyId = u32;

/// All record stores of one database directory
pub struct GraphStore {
    dir: PathBuf,
    config: StoreConfig,
    /// Node records
    pub nodes: RecordStore<NodeRecord>,
    /// Relationship records
    pub relationships: RecordStore<RelationshipRecord>,
    /// Relationship group records
    pub groups: RecordStore<RelationshipGroupRecord>,
    /// Property records and their overflow stores
    pub properties: PropertyStore,
    /// Relationship type tokens
    pub relationship_types: TokenStore,
    /// Property key tokens
    pub property_keys: TokenStore,
    /// Metadata record
    pub meta: MetaStore,
}

impl GraphStore {
    /// Open or create every store in `dir`
    pub fn open<P: AsRef<Path>>(dir: P, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let size = config.initial_store_size;

        let store = Self {
            nodes: RecordStore::open(dir.join("nodes.store"), size)?,
            relationships: RecordStore::open(dir.join("relationships.store"), size)?,
            groups: RecordStore::open(dir.join("relationship_groups.store"), size)?,
            properties: PropertyStore::open(&dir, size)?,
            relationship_types: TokenStore::open(&dir, "relationship_types", size)?,
            property_keys: TokenStore::open(&dir, "property_keys", size)?,
            meta: MetaStore::open(dir.join("meta.store"))?,
            dir,
            config,
        };

        tracing::info!(
            "Opened graph store at {:?}: {} nodes, {} relationships, last tx {}",
            store.dir,
            store.nodes.high_id(),
            store.relationships.high_id(),
            store.meta.last_committed_tx()
        );
        Ok(store)
    }

    /// Directory holding the store files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Rescan every fixed-size store after recovery wrote records directly
    pub fn rebuild_id_generators(&self) -> Result<()> {
        self.nodes.rebuild_id_generator()?;
        self.relationships.rebuild_id_generator()?;
        self.groups.rebuild_id_generator()
    }

    /// Flush every store
    pub fn flush(&self) -> Result<()> {
        self.nodes.flush()?;
        self.relationships.flush()?;
        self.groups.flush()?;
        self.properties.flush()?;
        self.relationship_types.flush()?;
        self.property_keys.flush()?;
        self.meta.flush()?;
        tracing::debug!("Flushed graph store at {:?}", self.dir);
        Ok(())
    }
}

impl RecordSource for GraphStore {
    fn node(&self, id: u64) -> Result<NodeRecord> {
        self.nodes.get(id)
    }

    fn relationship(&self, id: u64) -> Result<RelationshipRecord> {
        self.relationships.get(id)
    }

    fn group(&self, id: u64) -> Result<RelationshipGroupRecord> {
        self.groups.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_files() {
        let dir = TempDir::new().unwrap();
        let store = GraphStore::open(dir.path(), StoreConfig::default()).unwrap();
        assert!(dir.path().join("nodes.store").exists());
        assert!(dir.path().join("relationship_types.names.store").exists());
        assert_eq!(store.nodes.high_id(), 0);
        assert_eq!(store.meta.last_committed_tx(), 0);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = GraphStore::open(dir.path(), StoreConfig::default()).unwrap();
            let id = store.nodes.next_id();
            let mut node = NodeRecord::new(id);
            node.next_prop = 3;
            store.nodes.update(&node).unwrap();
            store.flush().unwrap();
        }
        let store = GraphStore::open(dir.path(), StoreConfig::default()).unwrap();
        let node = store.node(0).unwrap();
        assert!(node.in_use);
        assert_eq!(node.next_prop, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::default().with_grab_size(0);
        assert!(GraphStore::open(dir.path(), config).is_err());
    }
}
