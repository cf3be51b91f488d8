//! Read-only transaction

use super::{
    NeoStoreTransaction, NodeState, PropertyData, PropertyMap, TransactionContext, chain_position,
    load_property_chain, optional, property_value,
};
use crate::chain::{
    ChainPosition, Direction, RecordSource, RelationshipBatch, RelationshipType,
    fetch_more_relationships, relationship_count,
};
use crate::storage::{
    KeyId, PropertyOwner, PropertyValue, RelationshipRecord, Token, TypeId,
};
use crate::{Error, Result};
use std::sync::Arc;

/// Reads committed state straight from the stores; every write fails with
/// [`Error::ReadOnly`]
pub struct ReadTransaction {
    ctx: Arc<TransactionContext>,
}

impl ReadTransaction {
    pub(crate) fn new(ctx: Arc<TransactionContext>) -> Self {
        Self { ctx }
    }

    fn property_head(&self, owner: PropertyOwner) -> Result<u64> {
        let store = &self.ctx.store;
        match owner {
            PropertyOwner::Node(id) => {
                let node = store.node(id)?;
                if !node.in_use {
                    return Err(Error::not_found(format!("Node[{}] not in use", id)));
                }
                Ok(node.next_prop)
            }
            PropertyOwner::Relationship(id) => {
                let rel = store.relationship(id)?;
                if !rel.in_use {
                    return Err(Error::not_found(format!("Relationship[{}] not in use", id)));
                }
                Ok(rel.next_prop)
            }
            PropertyOwner::Graph => Ok(store.meta.graph_next_prop()),
        }
    }

    fn resolve_relationship_type(&self, type_id: TypeId) -> Result<RelationshipType> {
        let name = self
            .ctx
            .caches
            .tokens
            .relationship_type(type_id, || self.ctx.store.relationship_types.name(type_id))?;
        Ok(RelationshipType::new(type_id, name))
    }
}

impl NeoStoreTransaction for ReadTransaction {
    fn node_create(&mut self) -> Result<u64> {
        Err(Error::ReadOnly)
    }

    fn node_delete(&mut self, _node_id: u64) -> Result<PropertyMap> {
        Err(Error::ReadOnly)
    }

    fn relationship_create(
        &mut self,
        _type_id: TypeId,
        _first_node: u64,
        _second_node: u64,
    ) -> Result<u64> {
        Err(Error::ReadOnly)
    }

    fn rel_delete(&mut self, _rel_id: u64) -> Result<PropertyMap> {
        Err(Error::ReadOnly)
    }

    fn add_property(
        &mut self,
        _owner: PropertyOwner,
        _key_id: KeyId,
        _value: PropertyValue,
    ) -> Result<PropertyData> {
        Err(Error::ReadOnly)
    }

    fn change_property(
        &mut self,
        _owner: PropertyOwner,
        _key_id: KeyId,
        _value: PropertyValue,
    ) -> Result<PropertyData> {
        Err(Error::ReadOnly)
    }

    fn remove_property(&mut self, _owner: PropertyOwner, _key_id: KeyId) -> Result<()> {
        Err(Error::ReadOnly)
    }

    fn load_properties(&self, owner: PropertyOwner, light: bool) -> Result<PropertyMap> {
        let head = self.property_head(owner)?;
        let properties = &self.ctx.store.properties;
        load_property_chain(properties, head, light, |id| properties.get(id))
    }

    fn load_property_value(&self, property: &PropertyData) -> Result<PropertyValue> {
        let properties = &self.ctx.store.properties;
        property_value(properties, property, |id| properties.get(id))
    }

    fn node_load_light(&self, node_id: u64) -> Result<Option<NodeState>> {
        Ok(optional(self.ctx.store.node(node_id))?
            .filter(|node| node.in_use)
            .map(|node| {
                if node.super_node {
                    NodeState::Super
                } else {
                    NodeState::Normal
                }
            }))
    }

    fn rel_load_light(&self, rel_id: u64) -> Result<Option<RelationshipRecord>> {
        Ok(optional(self.ctx.store.relationship(rel_id))?.filter(|rel| rel.in_use))
    }

    fn get_relationship_chain_position(&self, node_id: u64) -> Result<ChainPosition> {
        chain_position(&self.ctx.store, node_id, |type_id| {
            self.resolve_relationship_type(type_id)
        })
    }

    fn get_more_relationships(
        &self,
        node_id: u64,
        position: &mut ChainPosition,
        types: &[RelationshipType],
    ) -> Result<RelationshipBatch> {
        let grab_size = self.ctx.store.config().relationship_grab_size;
        fetch_more_relationships(&self.ctx.store, node_id, position, types, grab_size)
    }

    fn get_relationship_count(
        &self,
        node_id: u64,
        type_id: Option<TypeId>,
        direction: Option<Direction>,
    ) -> Result<u64> {
        relationship_count(&self.ctx.store, node_id, type_id, direction)
    }

    fn create_property_index(&mut self, _key: &str) -> Result<KeyId> {
        Err(Error::ReadOnly)
    }

    fn create_relationship_type(&mut self, _name: &str) -> Result<TypeId> {
        Err(Error::ReadOnly)
    }

    fn load_relationship_types(&self) -> Result<Vec<Token>> {
        self.ctx.store.relationship_types.tokens()
    }

    fn load_property_indexes(&self) -> Result<Vec<Token>> {
        self.ctx.store.property_keys.tokens()
    }

    fn load_index(&self, key_id: KeyId) -> Result<Option<String>> {
        optional(
            self.ctx
                .caches
                .tokens
                .property_key(key_id, || self.ctx.store.property_keys.name(key_id)),
        )
    }

    fn created_nodes(&self) -> Result<Vec<u64>> {
        Err(Error::ReadOnly)
    }

    fn is_node_created(&self, _node_id: u64) -> bool {
        false
    }

    fn is_relationship_created(&self, _rel_id: u64) -> bool {
        false
    }
}
