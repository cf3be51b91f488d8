//! Transactions over the record stores
//!
//! [`ReadTransaction`] reads committed records straight from the stores and
//! rejects every write. [`WriteTransaction`] stages records in memory, turns
//! them into ordered [`Command`]s on prepare and applies them on commit.
//! Both run the same chain walking and counting code from [`crate::chain`],
//! so iteration behaves identically whether or not a record is staged.
//!
//! ```text
//!   Active ──prepare──▶ Prepared ──commit──▶ Committed
//!     │                    │
//!     └──────rollback──────┴──────────────▶ RolledBack
//! ```

mod command;
mod read;
mod write;

pub use command::{Command, CommandMode};
pub use read::ReadTransaction;
pub use write::WriteTransaction;

use crate::cache::Caches;
use crate::chain::{
    ChainPosition, Direction, PerTypeChainPosition, RecordSource, RelationshipBatch,
    RelationshipType, SingleChainPosition,
};
use crate::lock::LockManager;
use crate::storage::{
    GraphStore, KeyId, NO_NEXT, PropertyOwner, PropertyRecord, PropertyStore, PropertyValue,
    RelationshipRecord, Token, TypeId,
};
use crate::wal::LogicalLog;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Lifecycle phase of a write transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Accepting mutations
    Active,
    /// Commands generated and logged
    Prepared,
    /// Commands applied to the stores
    Committed,
    /// Changes discarded
    RolledBack,
}

/// One loaded property
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyData {
    /// Property record holding the block
    pub record_id: u64,
    /// Property key id
    pub key_id: KeyId,
    /// Value; `None` for a dynamic value loaded light
    pub value: Option<PropertyValue>,
}

/// Properties of one primitive keyed by property key id
pub type PropertyMap = BTreeMap<KeyId, PropertyData>;

/// Representation of a node's relationships
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// One flat chain
    Normal,
    /// Per-type relationship groups
    Super,
}

/// Everything a transaction needs from its database
pub(crate) struct TransactionContext {
    pub(crate) store: GraphStore,
    pub(crate) locks: LockManager,
    pub(crate) log: LogicalLog,
    pub(crate) caches: Caches,
    pub(crate) commit_lock: Mutex<()>,
}

/// Store operations exposed to the graph API
///
/// Property operations take a [`PropertyOwner`]; the `node_*`, `rel_*` and
/// `graph_*` helpers are shorthands for each owner kind.
pub trait NeoStoreTransaction {
    /// Create a node and return its id
    fn node_create(&mut self) -> Result<u64>;

    /// Delete a node and its properties, returning the removed properties.
    /// The node must have no relationships left by the time of prepare.
    fn node_delete(&mut self, node_id: u64) -> Result<PropertyMap>;

    /// Create a relationship of `type_id` from `first_node` to `second_node`
    fn relationship_create(&mut self, type_id: TypeId, first_node: u64, second_node: u64)
    -> Result<u64>;

    /// Delete a relationship and its properties, returning the removed properties
    fn rel_delete(&mut self, rel_id: u64) -> Result<PropertyMap>;

    /// Add a property that `owner` does not have yet
    fn add_property(
        &mut self,
        owner: PropertyOwner,
        key_id: KeyId,
        value: PropertyValue,
    ) -> Result<PropertyData>;

    /// Replace the value of an existing property
    fn change_property(
        &mut self,
        owner: PropertyOwner,
        key_id: KeyId,
        value: PropertyValue,
    ) -> Result<PropertyData>;

    /// Remove an existing property
    fn remove_property(&mut self, owner: PropertyOwner, key_id: KeyId) -> Result<()>;

    /// Load every property of `owner`; `light` leaves dynamic values unread
    fn load_properties(&self, owner: PropertyOwner, light: bool) -> Result<PropertyMap>;

    /// Value of a property returned by a light load
    fn load_property_value(&self, property: &PropertyData) -> Result<PropertyValue>;

    /// Representation of a node, `None` if it is not in use
    fn node_load_light(&self, node_id: u64) -> Result<Option<NodeState>>;

    /// Relationship record, `None` if it is not in use
    fn rel_load_light(&self, rel_id: u64) -> Result<Option<RelationshipRecord>>;

    /// Start position for walking a node's relationships
    fn get_relationship_chain_position(&self, node_id: u64) -> Result<ChainPosition>;

    /// Next batch of a node's relationships, advancing `position`
    fn get_more_relationships(
        &self,
        node_id: u64,
        position: &mut ChainPosition,
        types: &[RelationshipType],
    ) -> Result<RelationshipBatch>;

    /// Degree of a node, optionally by type and/or direction.
    ///
    /// Filtered counts on a normal node walk its chain; see
    /// [`relationship_count`](crate::chain::relationship_count).
    fn get_relationship_count(
        &self,
        node_id: u64,
        type_id: Option<TypeId>,
        direction: Option<Direction>,
    ) -> Result<u64>;

    /// Create a property key token
    fn create_property_index(&mut self, key: &str) -> Result<KeyId>;

    /// Create a relationship type token
    fn create_relationship_type(&mut self, name: &str) -> Result<TypeId>;

    /// Every relationship type
    fn load_relationship_types(&self) -> Result<Vec<Token>>;

    /// Every property key
    fn load_property_indexes(&self) -> Result<Vec<Token>>;

    /// Name of a property key, `None` if unknown
    fn load_index(&self, key_id: KeyId) -> Result<Option<String>>;

    /// Ids of nodes created by this transaction
    fn created_nodes(&self) -> Result<Vec<u64>>;

    /// Whether this transaction created `node_id`
    fn is_node_created(&self, node_id: u64) -> bool;

    /// Whether this transaction created `rel_id`
    fn is_relationship_created(&self, rel_id: u64) -> bool;

    /// Add a node property
    fn node_add_property(
        &mut self,
        node_id: u64,
        key_id: KeyId,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.add_property(PropertyOwner::Node(node_id), key_id, value)
    }

    /// Change a node property
    fn node_change_property(
        &mut self,
        node_id: u64,
        key_id: KeyId,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.change_property(PropertyOwner::Node(node_id), key_id, value)
    }

    /// Remove a node property
    fn node_remove_property(&mut self, node_id: u64, key_id: KeyId) -> Result<()> {
        self.remove_property(PropertyOwner::Node(node_id), key_id)
    }

    /// Load node properties
    fn node_load_properties(&self, node_id: u64, light: bool) -> Result<PropertyMap> {
        self.load_properties(PropertyOwner::Node(node_id), light)
    }

    /// Add a relationship property
    fn rel_add_property(
        &mut self,
        rel_id: u64,
        key_id: KeyId,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.add_property(PropertyOwner::Relationship(rel_id), key_id, value)
    }

    /// Change a relationship property
    fn rel_change_property(
        &mut self,
        rel_id: u64,
        key_id: KeyId,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.change_property(PropertyOwner::Relationship(rel_id), key_id, value)
    }

    /// Remove a relationship property
    fn rel_remove_property(&mut self, rel_id: u64, key_id: KeyId) -> Result<()> {
        self.remove_property(PropertyOwner::Relationship(rel_id), key_id)
    }

    /// Load relationship properties
    fn rel_load_properties(&self, rel_id: u64, light: bool) -> Result<PropertyMap> {
        self.load_properties(PropertyOwner::Relationship(rel_id), light)
    }

    /// Add a graph property
    fn graph_add_property(&mut self, key_id: KeyId, value: PropertyValue) -> Result<PropertyData> {
        self.add_property(PropertyOwner::Graph, key_id, value)
    }

    /// Change a graph property
    fn graph_change_property(
        &mut self,
        key_id: KeyId,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.change_property(PropertyOwner::Graph, key_id, value)
    }

    /// Remove a graph property
    fn graph_remove_property(&mut self, key_id: KeyId) -> Result<()> {
        self.remove_property(PropertyOwner::Graph, key_id)
    }

    /// Load graph properties
    fn graph_load_properties(&self, light: bool) -> Result<PropertyMap> {
        self.load_properties(PropertyOwner::Graph, light)
    }
}

/// Start position for `node_id`, binding super node groups through `resolve`
pub(crate) fn chain_position<S: RecordSource + ?Sized>(
    source: &S,
    node_id: u64,
    resolve: impl Fn(TypeId) -> Result<RelationshipType>,
) -> Result<ChainPosition> {
    let node = source.node(node_id)?;
    if !node.in_use {
        return Err(Error::not_found(format!("Node[{}] not in use", node_id)));
    }
    if !node.super_node {
        return Ok(ChainPosition::Single(SingleChainPosition::new(node.next_rel)));
    }
    let groups = source.groups_of(&node)?;
    let mut position = PerTypeChainPosition::new(node_id, &groups);
    position.bind(resolve)?;
    Ok(ChainPosition::PerType(position))
}

/// Walk a property chain from `head`, reading records through `get`
pub(crate) fn load_property_chain(
    store: &PropertyStore,
    head: u64,
    light: bool,
    get: impl Fn(u64) -> Result<PropertyRecord>,
) -> Result<PropertyMap> {
    let mut properties = PropertyMap::new();
    let mut next = head;
    while next != NO_NEXT {
        let record = get(next)?;
        if !record.in_use {
            return Err(Error::invalid_record(format!(
                "Property[{}] is linked into a chain but not in use",
                record.id
            )));
        }
        for block in &record.blocks {
            let value = if light && block.is_light() {
                None
            } else {
                Some(store.value_of(block)?)
            };
            properties.insert(
                block.key_id(),
                PropertyData {
                    record_id: record.id,
                    key_id: block.key_id(),
                    value,
                },
            );
        }
        next = record.next_prop;
    }
    Ok(properties)
}

/// Value of `property`, reading its record through `get` if it was loaded light
pub(crate) fn property_value(
    store: &PropertyStore,
    property: &PropertyData,
    get: impl Fn(u64) -> Result<PropertyRecord>,
) -> Result<PropertyValue> {
    if let Some(value) = &property.value {
        return Ok(value.clone());
    }
    let record = get(property.record_id)?;
    let block = record.block(property.key_id).ok_or_else(|| {
        Error::not_found(format!(
            "Property key {} in Property[{}]",
            property.key_id, property.record_id
        ))
    })?;
    store.value_of(block)
}

/// Map "absent" lookups to `None`
pub(crate) fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
