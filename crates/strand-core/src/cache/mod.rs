//! Caches above the record stores
//!
//! - [`EntityCache`]: committed property maps per node and relationship
//! - [`TokenCache`]: relationship type and property key names, by id and by name
//!
//! Committing and recovering transactions report every touched id through
//! [`CacheInvalidation`]. Both caches live as long as the database that owns
//! them and are cleared when it closes.

use crate::storage::{KeyId, Token, TypeId};
use crate::transaction::PropertyMap;
use crate::Result;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for per-entity invalidations
pub trait CacheInvalidation {
    /// A node record or its properties changed
    fn invalidate_node(&self, node_id: u64);

    /// A relationship record or its properties changed
    fn invalidate_relationship(&self, rel_id: u64);

    /// A relationship type token changed
    fn invalidate_relationship_type(&self, type_id: TypeId);
}

/// Hit and miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that went to the store
    pub misses: u64,
}

/// Committed property maps of nodes and relationships
#[derive(Debug, Default)]
pub struct EntityCache {
    nodes: RwLock<HashMap<u64, PropertyMap>>,
    relationships: RwLock<HashMap<u64, PropertyMap>>,
    hits: AtomicU64,
    misses: AtomicU64,
    generation: AtomicU64,
}

impl EntityCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Only fills the cache if no invalidation ran while `load` was reading,
    /// so a load that raced a commit never shadows the newer record.
    fn get_or_load(
        &self,
        map: &RwLock<HashMap<u64, PropertyMap>>,
        id: u64,
        load: impl FnOnce() -> Result<PropertyMap>,
    ) -> Result<PropertyMap> {
        if let Some(properties) = map.read().get(&id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(properties.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation.load(Ordering::Acquire);
        let properties = load()?;
        let mut entries = map.write();
        if self.generation.load(Ordering::Acquire) == generation {
            entries.insert(id, properties.clone());
        }
        Ok(properties)
    }

    /// Cached properties of a node, loaded with `load` on a miss
    pub fn node_properties(
        &self,
        node_id: u64,
        load: impl FnOnce() -> Result<PropertyMap>,
    ) -> Result<PropertyMap> {
        self.get_or_load(&self.nodes, node_id, load)
    }

    /// Cached properties of a relationship, loaded with `load` on a miss
    pub fn relationship_properties(
        &self,
        rel_id: u64,
        load: impl FnOnce() -> Result<PropertyMap>,
    ) -> Result<PropertyMap> {
        self.get_or_load(&self.relationships, rel_id, load)
    }

    /// Whether a node's properties are cached
    pub fn contains_node(&self, node_id: u64) -> bool {
        self.nodes.read().contains_key(&node_id)
    }

    /// Number of cached entities
    pub fn len(&self) -> usize {
        self.nodes.read().len() + self.relationships.read().len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit and miss counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.nodes.write().clear();
        self.relationships.write().clear();
    }
}

impl CacheInvalidation for EntityCache {
    fn invalidate_node(&self, node_id: u64) {
        let mut nodes = self.nodes.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        nodes.remove(&node_id);
    }

    fn invalidate_relationship(&self, rel_id: u64) {
        let mut relationships = self.relationships.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        relationships.remove(&rel_id);
    }

    fn invalidate_relationship_type(&self, _type_id: TypeId) {}
}

/// Bidirectional id/name cache for one token kind
#[derive(Debug, Default)]
pub struct NameCache {
    by_id: DashMap<u32, String>,
    by_name: DashMap<String, u32>,
}

impl NameCache {
    /// Name of `id`, loaded with `load` on a miss
    pub fn get_or_load(&self, id: u32, load: impl FnOnce() -> Result<String>) -> Result<String> {
        if let Some(name) = self.by_id.get(&id) {
            return Ok(name.clone());
        }
        let name = load()?;
        self.add(id, &name);
        Ok(name)
    }

    /// Cached name of `id`
    pub fn name(&self, id: u32) -> Option<String> {
        self.by_id.get(&id).map(|name| name.clone())
    }

    /// Cached id of `name`
    pub fn id(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).map(|id| *id)
    }

    /// Record a token
    pub fn add(&self, id: u32, name: &str) {
        self.by_id.insert(id, name.to_string());
        self.by_name.insert(name.to_string(), id);
    }

    /// Forget a token
    pub fn invalidate(&self, id: u32) {
        if let Some((_, name)) = self.by_id.remove(&id) {
            self.by_name.remove(&name);
        }
    }

    /// Every cached token, ordered by id
    pub fn tokens(&self) -> Vec<Token> {
        let mut tokens: Vec<Token> = self
            .by_id
            .iter()
            .map(|entry| Token {
                id: *entry.key(),
                name: entry.value().clone(),
            })
            .collect();
        tokens.sort_by_key(|token| token.id);
        tokens
    }

    /// Number of cached tokens
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no token is cached
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Forget every token
    pub fn clear(&self) {
        self.by_id.clear();
        self.by_name.clear();
    }

    /// Replace the contents with `tokens`
    pub fn reload(&self, tokens: &[Token]) {
        self.clear();
        for token in tokens {
            self.add(token.id, &token.name);
        }
    }
}

/// Process-wide name caches of a database
#[derive(Debug, Default)]
pub struct TokenCache {
    /// Relationship type names
    pub relationship_types: NameCache,
    /// Property key names
    pub property_keys: NameCache,
}

impl TokenCache {
    /// Create empty caches
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of property key `key_id`, loaded with `load` on a miss
    pub fn property_key(&self, key_id: KeyId, load: impl FnOnce() -> Result<String>) -> Result<String> {
        self.property_keys.get_or_load(key_id, load)
    }

    /// Name of relationship type `type_id`, loaded with `load` on a miss
    pub fn relationship_type(
        &self,
        type_id: TypeId,
        load: impl FnOnce() -> Result<String>,
    ) -> Result<String> {
        self.relationship_types.get_or_load(type_id, load)
    }

    /// Forget everything
    pub fn clear(&self) {
        self.relationship_types.clear();
        self.property_keys.clear();
    }
}

impl CacheInvalidation for TokenCache {
    fn invalidate_node(&self, _node_id: u64) {}

    fn invalidate_relationship(&self, _rel_id: u64) {}

    fn invalidate_relationship_type(&self, type_id: TypeId) {
        self.relationship_types.invalidate(type_id);
    }
}

/// Entity and token caches of one database, invalidated together
#[derive(Debug, Default)]
pub struct Caches {
    /// Property map cache
    pub entities: EntityCache,
    /// Name caches
    pub tokens: TokenCache,
}

impl Caches {
    /// Drop every cached entity and token
    pub fn clear(&self) {
        self.entities.clear();
        self.tokens.clear();
    }
}

impl CacheInvalidation for Caches {
    fn invalidate_node(&self, node_id: u64) {
        self.entities.invalidate_node(node_id);
    }

    fn invalidate_relationship(&self, rel_id: u64) {
        self.entities.invalidate_relationship(rel_id);
    }

    fn invalidate_relationship_type(&self, type_id: TypeId) {
        self.tokens.invalidate_relationship_type(type_id);
    }
}
