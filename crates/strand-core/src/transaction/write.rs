//! Write transaction: staged record changes, chain maintenance, commit
//!
//! Every record a transaction touches is copied into [`RecordChanges`] under
//! a write lock and modified there. Reads inside the transaction go through
//! [`StagedSource`], which prefers staged copies, so chain walks and degree
//! counts see uncommitted work. `prepare` turns the staged records into
//! ordered commands and logs them; `commit` writes them to the stores.

use super::command::ordered_commands;
use super::{
    Command, NeoStoreTransaction, NodeState, PropertyData, PropertyMap, TransactionContext,
    TxState, chain_position, load_property_chain, optional, property_value,
};
use crate::cache::CacheInvalidation;
use crate::chain::{
    ChainLink, ChainPosition, ChainPrev, Direction, RecordSource, RelationshipBatch,
    RelationshipType, fetch_more_relationships, relationship_count,
};
use crate::lock::{LockGuard, ResourceId};
use crate::storage::{
    GraphStore, KeyId, NO_NEXT, NodeRecord, PropertyBlock, PropertyIndexRecord, PropertyOwner,
    PropertyRecord, PropertyValue, RelationshipGroupRecord, RelationshipRecord,
    RelationshipTypeRecord, Token, TypeId,
};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Records staged by one transaction, keyed by id
#[derive(Debug, Default)]
struct RecordChanges {
    nodes: BTreeMap<u64, NodeRecord>,
    relationships: BTreeMap<u64, RelationshipRecord>,
    groups: BTreeMap<u64, RelationshipGroupRecord>,
    properties: BTreeMap<u64, PropertyRecord>,
    property_keys: BTreeMap<KeyId, PropertyIndexRecord>,
    relationship_types: BTreeMap<TypeId, RelationshipTypeRecord>,
    graph_next_prop: Option<u64>,
}

/// Staged records over the committed store
struct StagedSource<'a> {
    changes: &'a RecordChanges,
    store: &'a GraphStore,
}

impl StagedSource<'_> {
    fn property(&self, id: u64) -> Result<PropertyRecord> {
        match self.changes.properties.get(&id) {
            Some(record) => Ok(record.clone()),
            None => self.store.properties.get(id),
        }
    }
}

impl RecordSource for StagedSource<'_> {
    fn node(&self, id: u64) -> Result<NodeRecord> {
        match self.changes.nodes.get(&id) {
            Some(record) => Ok(*record),
            None => self.store.nodes.get(id),
        }
    }

    fn relationship(&self, id: u64) -> Result<RelationshipRecord> {
        match self.changes.relationships.get(&id) {
            Some(record) => Ok(*record),
            None => self.store.relationships.get(id),
        }
    }

    fn group(&self, id: u64) -> Result<RelationshipGroupRecord> {
        match self.changes.groups.get(&id) {
            Some(record) => Ok(*record),
            None => self.store.groups.get(id),
        }
    }
}

/// A transaction that stages record changes and commits them atomically
pub struct WriteTransaction {
    ctx: Arc<TransactionContext>,
    identifier: u64,
    state: TxState,
    changes: RecordChanges,
    commands: Vec<Command>,
    locks: Vec<LockGuard>,
}

impl WriteTransaction {
    pub(crate) fn new(ctx: Arc<TransactionContext>) -> Self {
        let identifier = ctx.log.next_identifier();
        tracing::trace!("Began write transaction {}", identifier);
        Self {
            ctx,
            identifier,
            state: TxState::Active,
            changes: RecordChanges::default(),
            commands: Vec::new(),
            locks: Vec::new(),
        }
    }

    /// Log identifier, also the lock owner id
    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    /// Lifecycle phase
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Commands generated by [`prepare`](Self::prepare)
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    fn source(&self) -> StagedSource<'_> {
        StagedSource {
            changes: &self.changes,
            store: &self.ctx.store,
        }
    }

    fn assert_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(Error::invalid_state(format!(
                "Transaction {} is {:?}, not Active",
                self.identifier, self.state
            )));
        }
        Ok(())
    }

    fn lock(&mut self, resource: ResourceId) -> Result<()> {
        if let Some(guard) = self.ctx.locks.acquire_write(self.identifier, resource)? {
            self.locks.push(guard);
        }
        Ok(())
    }

    // Staging. Each record is locked before it is first read so the staged
    // copy reflects the latest commit.

    fn node_for_update(&mut self, node_id: u64) -> Result<&mut NodeRecord> {
        if !self.changes.nodes.contains_key(&node_id) {
            self.lock(ResourceId::node(node_id))?;
            let record = self.ctx.store.nodes.get(node_id)?;
            self.changes.nodes.insert(node_id, record);
        }
        self.changes
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| Error::internal(format!("Node[{}] missing from staged changes", node_id)))
    }

    fn relationship_for_update(&mut self, rel_id: u64) -> Result<&mut RelationshipRecord> {
        if !self.changes.relationships.contains_key(&rel_id) {
            self.lock(ResourceId::relationship(rel_id))?;
            let record = self.ctx.store.relationships.get(rel_id)?;
            self.changes.relationships.insert(rel_id, record);
        }
        self.changes.relationships.get_mut(&rel_id).ok_or_else(|| {
            Error::internal(format!("Relationship[{}] missing from staged changes", rel_id))
        })
    }

    fn group_for_update(&mut self, group_id: u64) -> Result<&mut RelationshipGroupRecord> {
        if !self.changes.groups.contains_key(&group_id) {
            self.lock(ResourceId::group(group_id))?;
            let record = self.ctx.store.groups.get(group_id)?;
            self.changes.groups.insert(group_id, record);
        }
        self.changes.groups.get_mut(&group_id).ok_or_else(|| {
            Error::internal(format!("RelationshipGroup[{}] missing from staged changes", group_id))
        })
    }

    // Property records are reached through their locked owner only.
    fn property_for_update(&mut self, record_id: u64) -> Result<&mut PropertyRecord> {
        if !self.changes.properties.contains_key(&record_id) {
            let record = self.ctx.store.properties.get(record_id)?;
            self.changes.properties.insert(record_id, record);
        }
        self.changes.properties.get_mut(&record_id).ok_or_else(|| {
            Error::internal(format!("Property[{}] missing from staged changes", record_id))
        })
    }

    /// Stage a node the caller names, rejecting unknown and deleted ones
    fn live_node(&mut self, node_id: u64) -> Result<&mut NodeRecord> {
        let was_staged = self.changes.nodes.contains_key(&node_id);
        if !self.node_for_update(node_id)?.in_use {
            if was_staged {
                return Err(Error::invalid_state(format!(
                    "Node[{}] was deleted in this transaction",
                    node_id
                )));
            }
            self.changes.nodes.remove(&node_id);
            return Err(Error::not_found(format!("Node[{}] not in use", node_id)));
        }
        self.node_for_update(node_id)
    }

    /// Stage a relationship the caller names, rejecting unknown and deleted ones
    fn live_relationship(&mut self, rel_id: u64) -> Result<&mut RelationshipRecord> {
        let was_staged = self.changes.relationships.contains_key(&rel_id);
        if !self.relationship_for_update(rel_id)?.in_use {
            if was_staged {
                return Err(Error::invalid_state(format!(
                    "Relationship[{}] was deleted in this transaction",
                    rel_id
                )));
            }
            self.changes.relationships.remove(&rel_id);
            return Err(Error::not_found(format!("Relationship[{}] not in use", rel_id)));
        }
        self.relationship_for_update(rel_id)
    }

    /// Stage a relationship reached through `node_id`'s chain
    fn chain_neighbor(&mut self, rel_id: u64, node_id: u64) -> Result<&mut RelationshipRecord> {
        if rel_id == NO_NEXT {
            return Err(Error::invalid_record(format!(
                "Chain of Node[{}] ends where a relationship was expected",
                node_id
            )));
        }
        let record = self.relationship_for_update(rel_id)?;
        if !record.in_use {
            return Err(Error::invalid_record(format!(
                "Relationship[{}] in the chain of Node[{}] is not in use",
                rel_id, node_id
            )));
        }
        Ok(record)
    }

    fn ensure_relationship_type(&self, type_id: TypeId) -> Result<()> {
        if self.changes.relationship_types.contains_key(&type_id) {
            return Ok(());
        }
        self.ctx.store.relationship_types.get(type_id).and_then(|record| {
            if record.in_use {
                Ok(())
            } else {
                Err(Error::not_found(format!("RelationshipType[{}] not in use", type_id)))
            }
        })
    }

    fn ensure_property_key(&self, key_id: KeyId) -> Result<()> {
        if self.changes.property_keys.contains_key(&key_id) {
            return Ok(());
        }
        self.ctx.store.property_keys.get(key_id).and_then(|record| {
            if record.in_use {
                Ok(())
            } else {
                Err(Error::not_found(format!("PropertyKey[{}] not in use", key_id)))
            }
        })
    }

    fn resolve_relationship_type(&self, type_id: TypeId) -> Result<RelationshipType> {
        let name = match self.changes.relationship_types.get(&type_id) {
            Some(record) => self.ctx.store.relationship_types.name_of(record)?,
            None => self
                .ctx
                .caches
                .tokens
                .relationship_type(type_id, || self.ctx.store.relationship_types.name(type_id))?,
        };
        Ok(RelationshipType::new(type_id, name))
    }

    // Relationship chains

    fn convert_if_necessary(&mut self, node_id: u64) -> Result<()> {
        let node = *self.node_for_update(node_id)?;
        if node.super_node || node.next_rel == NO_NEXT {
            return Ok(());
        }
        let degree = relationship_count(&self.source(), node_id, None, None)?;
        if degree >= self.ctx.store.config().super_node_threshold {
            self.convert_to_super_node(node_id, degree)?;
        }
        Ok(())
    }

    /// Move every relationship of a normal node into per-type groups
    fn convert_to_super_node(&mut self, node_id: u64, degree: u64) -> Result<()> {
        let first = {
            let node = self.node_for_update(node_id)?;
            node.super_node = true;
            std::mem::replace(&mut node.next_rel, NO_NEXT)
        };

        let mut next = first;
        while next != NO_NEXT {
            let rel_id = next;
            next = self.chain_neighbor(rel_id, node_id)?.next_for(node_id)?;
            self.connect_to_super_node(node_id, rel_id)?;
        }

        tracing::debug!(
            "Converted Node[{}] to a super node with {} relationships",
            node_id,
            degree
        );
        Ok(())
    }

    fn connect_to_node(&mut self, node_id: u64, rel_id: u64) -> Result<()> {
        let node = *self.node_for_update(node_id)?;
        if node.super_node {
            return self.connect_to_super_node(node_id, rel_id);
        }
        self.connect(node_id, node.next_rel, rel_id)?;
        self.node_for_update(node_id)?.next_rel = rel_id;
        Ok(())
    }

    fn connect_to_super_node(&mut self, node_id: u64, rel_id: u64) -> Result<()> {
        let rel = *self.relationship_for_update(rel_id)?;
        let direction = rel.direction_for(node_id)?;
        let group_id = self.get_or_create_group(node_id, rel.type_id)?;
        let head = self.group_for_update(group_id)?.head(direction);
        self.connect(node_id, head, rel_id)?;
        self.group_for_update(group_id)?.set_head(direction, rel_id);
        Ok(())
    }

    /// Make `rel_id` the new head of `node_id`'s chain that starts at `head_id`
    fn connect(&mut self, node_id: u64, head_id: u64, rel_id: u64) -> Result<()> {
        let count = if head_id == NO_NEXT {
            1
        } else {
            let head = self.chain_neighbor(head_id, node_id)?;
            let count = head.link_for(node_id)?.prev.count().ok_or_else(|| {
                Error::invalid_record(format!(
                    "Relationship[{}] is anchored by Node[{}] but does not head its chain",
                    head_id, node_id
                ))
            })?;
            head.update_links(node_id, |link| link.prev = ChainPrev::Prev(rel_id));
            count + 1
        };
        self.relationship_for_update(rel_id)?
            .update_links(node_id, |link| *link = ChainLink::head(count, head_id));
        Ok(())
    }

    fn get_or_create_group(&mut self, node_id: u64, type_id: TypeId) -> Result<u64> {
        let node = *self.node_for_update(node_id)?;
        if let Some(group) = self.source().find_group(&node, type_id)? {
            return Ok(group.id);
        }
        let group_id = self.ctx.store.groups.next_id();
        if let Err(err) = self.lock(ResourceId::group(group_id)) {
            self.ctx.store.groups.free_id(group_id);
            return Err(err);
        }
        let mut group = RelationshipGroupRecord::new(group_id, type_id, node_id);
        group.next = node.next_rel;
        self.changes.groups.insert(group_id, group);
        self.node_for_update(node_id)?.next_rel = group_id;
        Ok(group_id)
    }

    /// Current head of the chain `rel` sits in on `node_id`'s side
    fn chain_anchor(&self, node_id: u64, rel: &RelationshipRecord) -> Result<u64> {
        let source = self.source();
        let node = source.node(node_id)?;
        if !node.super_node {
            return Ok(node.next_rel);
        }
        let group = source.find_group(&node, rel.type_id)?.ok_or_else(|| {
            Error::invalid_record(format!(
                "Super node Node[{}] has no group for type {} of Relationship[{}]",
                node_id, rel.type_id, rel.id
            ))
        })?;
        Ok(group.head(rel.direction_for(node_id)?))
    }

    fn set_chain_anchor(&mut self, node_id: u64, rel: &RelationshipRecord, head: u64) -> Result<()> {
        let node = *self.node_for_update(node_id)?;
        if !node.super_node {
            self.node_for_update(node_id)?.next_rel = head;
            return Ok(());
        }
        let group = self.source().find_group(&node, rel.type_id)?.ok_or_else(|| {
            Error::invalid_record(format!(
                "Super node Node[{}] has no group for type {}",
                node_id, rel.type_id
            ))
        })?;
        let direction = rel.direction_for(node_id)?;
        self.group_for_update(group.id)?.set_head(direction, head);
        Ok(())
    }

    /// Unlink `rel_id` from `node_id`'s chain and decrement the chain degree
    fn disconnect(&mut self, rel_id: u64, node_id: u64) -> Result<()> {
        let rel = *self.relationship_for_update(rel_id)?;
        let link = rel.link_for(node_id)?;
        let broken = |what: &str| {
            Error::invalid_record(format!(
                "Relationship[{}] chain of Node[{}] is broken: {}",
                rel_id, node_id, what
            ))
        };

        match link.prev {
            ChainPrev::Head { count } => {
                let anchor = self.chain_anchor(node_id, &rel)?;
                if anchor != rel_id {
                    return Err(broken(&format!("marked as head but chain starts at {}", anchor)));
                }
                if link.next != NO_NEXT {
                    let remaining = count
                        .checked_sub(1)
                        .ok_or_else(|| broken("head degree is zero"))?;
                    let next = self.chain_neighbor(link.next, node_id)?;
                    if next.link_for(node_id)?.prev != ChainPrev::Prev(rel_id) {
                        return Err(broken(&format!("{} does not point back", link.next)));
                    }
                    next.update_links(node_id, |l| l.prev = ChainPrev::Head { count: remaining });
                }
                self.set_chain_anchor(node_id, &rel, link.next)?;
            }
            ChainPrev::Prev(prev_id) => {
                let prev = self.chain_neighbor(prev_id, node_id)?;
                if prev.link_for(node_id)?.next != rel_id {
                    return Err(broken(&format!("{} does not point forward", prev_id)));
                }
                prev.update_links(node_id, |l| l.next = link.next);

                if link.next != NO_NEXT {
                    let next = self.chain_neighbor(link.next, node_id)?;
                    if next.link_for(node_id)?.prev != ChainPrev::Prev(rel_id) {
                        return Err(broken(&format!("{} does not point back", link.next)));
                    }
                    next.update_links(node_id, |l| l.prev = ChainPrev::Prev(prev_id));
                }

                let anchor = self.chain_anchor(node_id, &rel)?;
                let head = self.chain_neighbor(anchor, node_id)?;
                let count = head
                    .link_for(node_id)?
                    .prev
                    .count()
                    .and_then(|count| count.checked_sub(1))
                    .ok_or_else(|| broken(&format!("anchor {} carries no degree", anchor)))?;
                head.update_links(node_id, |l| l.prev = ChainPrev::Head { count });
            }
        }
        Ok(())
    }

    /// Free the groups of a deleted super node if none holds a relationship
    fn release_empty_groups(&mut self, node_id: u64) -> Result<()> {
        let node = *self.node_for_update(node_id)?;
        let groups = self.source().groups_of(&node)?;
        if !groups.iter().all(RelationshipGroupRecord::is_empty) {
            return Ok(());
        }
        for group in &groups {
            self.group_for_update(group.id)?.in_use = false;
        }
        let node = self.node_for_update(node_id)?;
        node.next_rel = NO_NEXT;
        node.super_node = false;
        Ok(())
    }

    // Property chains

    fn property_head(&self, owner: PropertyOwner) -> Result<u64> {
        let source = self.source();
        match owner {
            PropertyOwner::Node(id) => {
                let node = source.node(id)?;
                if !node.in_use {
                    return Err(Error::not_found(format!("Node[{}] not in use", id)));
                }
                Ok(node.next_prop)
            }
            PropertyOwner::Relationship(id) => {
                let rel = source.relationship(id)?;
                if !rel.in_use {
                    return Err(Error::not_found(format!("Relationship[{}] not in use", id)));
                }
                Ok(rel.next_prop)
            }
            PropertyOwner::Graph => Ok(self
                .changes
                .graph_next_prop
                .unwrap_or_else(|| self.ctx.store.meta.graph_next_prop())),
        }
    }

    fn set_property_head(&mut self, owner: PropertyOwner, head: u64) -> Result<()> {
        match owner {
            PropertyOwner::Node(id) => self.node_for_update(id)?.next_prop = head,
            PropertyOwner::Relationship(id) => self.relationship_for_update(id)?.next_prop = head,
            PropertyOwner::Graph => self.changes.graph_next_prop = Some(head),
        }
        Ok(())
    }

    /// Lock the owner of a property chain about to change
    fn lock_owner(&mut self, owner: PropertyOwner) -> Result<()> {
        match owner {
            PropertyOwner::Node(id) => self.live_node(id).map(|_| ()),
            PropertyOwner::Relationship(id) => self.live_relationship(id).map(|_| ()),
            PropertyOwner::Graph => self.lock(ResourceId::graph()),
        }
    }

    fn find_property_record(&self, owner: PropertyOwner, key_id: KeyId) -> Result<Option<u64>> {
        let source = self.source();
        let mut next = self.property_head(owner)?;
        while next != NO_NEXT {
            let record = source.property(next)?;
            if record.block(key_id).is_some() {
                return Ok(Some(next));
            }
            next = record.next_prop;
        }
        Ok(None)
    }

    fn missing_property(owner: PropertyOwner, key_id: KeyId) -> Error {
        Error::invalid_state(format!("{:?} has no property with key {}", owner, key_id))
    }

    /// Put `block` in the first record of the owner's chain, or in a new head
    fn add_block_to_owner(&mut self, owner: PropertyOwner, block: PropertyBlock) -> Result<u64> {
        let head = self.property_head(owner)?;
        if head != NO_NEXT {
            let host = self.property_for_update(head)?;
            if host.has_space_for(&block) {
                host.add_block(block);
                return Ok(head);
            }
        }

        let record_id = self.ctx.store.properties.next_id();
        let mut record = PropertyRecord::new(record_id, owner);
        record.next_prop = head;
        record.add_block(block);
        self.changes.properties.insert(record_id, record);
        if head != NO_NEXT {
            self.property_for_update(head)?.prev_prop = record_id;
        }
        self.set_property_head(owner, record_id)?;
        Ok(record_id)
    }

    /// Take an emptied record out of its chain and mark it unused
    fn unlink_property_record(&mut self, record_id: u64) -> Result<()> {
        let (owner, prev, next) = {
            let record = self.property_for_update(record_id)?;
            (record.owner, record.prev_prop, record.next_prop)
        };

        if prev == NO_NEXT {
            let head = self.property_head(owner)?;
            if head != record_id {
                return Err(Error::invalid_record(format!(
                    "Property[{}] has no predecessor but {:?} starts its chain at {}",
                    record_id, owner, head
                )));
            }
            self.set_property_head(owner, next)?;
        } else {
            self.property_for_update(prev)?.next_prop = next;
        }
        if next != NO_NEXT {
            self.property_for_update(next)?.prev_prop = prev;
        }

        let record = self.property_for_update(record_id)?;
        record.in_use = false;
        record.prev_prop = NO_NEXT;
        record.next_prop = NO_NEXT;
        Ok(())
    }

    /// Mark every record of a chain unused and return the values it held
    fn delete_property_chain(&mut self, head: u64) -> Result<PropertyMap> {
        let ctx = Arc::clone(&self.ctx);
        let mut properties = PropertyMap::new();
        let mut next = head;
        while next != NO_NEXT {
            let record = self.property_for_update(next)?;
            next = record.next_prop;
            for mut block in std::mem::take(&mut record.blocks) {
                ctx.store.properties.make_heavy(&mut block)?;
                let value = ctx.store.properties.value_of(&block)?;
                properties.insert(
                    block.key_id(),
                    PropertyData {
                        record_id: record.id,
                        key_id: block.key_id(),
                        value: Some(value),
                    },
                );
                record.removed_blocks.push(block);
            }
            record.in_use = false;
        }
        Ok(properties)
    }

    // Lifecycle

    /// Turn the staged records into ordered commands and log them
    pub fn prepare(&mut self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(Error::invalid_state(format!(
                "Cannot prepare transaction {} in state {:?}",
                self.identifier, self.state
            )));
        }
        // A super node deleted before its relationships still points at
        // groups that only emptied afterwards.
        let deleted_super_nodes: Vec<u64> = self
            .changes
            .nodes
            .values()
            .filter(|node| !node.in_use && node.super_node)
            .map(|node| node.id)
            .collect();
        for node_id in deleted_super_nodes {
            self.release_empty_groups(node_id)?;
        }
        if let Some(node) = self
            .changes
            .nodes
            .values()
            .find(|node| !node.in_use && node.next_rel != NO_NEXT)
        {
            return Err(Error::invalid_state(format!(
                "Node[{}] is deleted but still has relationships",
                node.id
            )));
        }

        let changes = &self.changes;
        self.commands = ordered_commands(
            changes.relationship_types.values(),
            changes.property_keys.values(),
            changes.properties.values(),
            changes.relationships.values(),
            changes.nodes.values(),
            changes.groups.values(),
            changes.graph_next_prop,
        );
        self.ctx.log.prepare(self.identifier, &self.commands)?;
        self.state = TxState::Prepared;
        tracing::debug!(
            "Prepared transaction {} with {} commands",
            self.identifier,
            self.commands.len()
        );
        Ok(())
    }

    /// Apply the prepared commands to the stores, returning the transaction id
    pub fn commit(&mut self) -> Result<u64> {
        if self.state != TxState::Prepared {
            return Err(Error::invalid_state(format!(
                "Cannot commit transaction {} in state {:?}",
                self.identifier, self.state
            )));
        }

        let ctx = Arc::clone(&self.ctx);
        let _commit = ctx.commit_lock.lock();
        self.check_token_names()?;
        let tx_id = ctx.store.meta.last_committed_tx() + 1;
        ctx.log.commit(self.identifier, tx_id)?;

        // From here on the log holds the commit; a failure is repaired by
        // recovery, never by rollback.
        self.state = TxState::Committed;
        for command in &self.commands {
            command.execute(&ctx.store)?;
        }
        ctx.store.meta.set_last_committed_tx(tx_id)?;
        ctx.log.done(self.identifier)?;

        for command in &self.commands {
            command.invalidate(&ctx.caches);
        }
        self.publish_tokens()?;
        self.locks.clear();

        let rotate_size = ctx.store.config().log_rotate_size;
        if let Err(e) = ctx.log.truncate_if_idle(rotate_size, || ctx.store.flush()) {
            tracing::warn!("Keeping logical log {:?} after tx {}: {}", ctx.log.path(), tx_id, e);
        }

        tracing::debug!(
            "Committed transaction {} as tx {} ({} commands)",
            self.identifier,
            tx_id,
            self.commands.len()
        );
        Ok(tx_id)
    }

    /// Fail if a token this transaction creates was committed under the same
    /// name by another transaction after it was staged
    fn check_token_names(&self) -> Result<()> {
        let store = &self.ctx.store;
        let tokens = &self.ctx.caches.tokens;
        for record in self.changes.relationship_types.values() {
            let name = store.relationship_types.name_of(record)?;
            if tokens.relationship_types.id(&name).is_some() {
                return Err(Error::invalid_state(format!(
                    "Relationship type {:?} already exists",
                    name
                )));
            }
        }
        for record in self.changes.property_keys.values() {
            let name = store.property_keys.name_of(record)?;
            if tokens.property_keys.id(&name).is_some() {
                return Err(Error::invalid_state(format!(
                    "Property key {:?} already exists",
                    name
                )));
            }
        }
        Ok(())
    }

    fn publish_tokens(&self) -> Result<()> {
        let store = &self.ctx.store;
        let tokens = &self.ctx.caches.tokens;
        for (id, record) in &self.changes.relationship_types {
            tokens.relationship_types.add(*id, &store.relationship_types.name_of(record)?);
        }
        for (id, record) in &self.changes.property_keys {
            tokens.property_keys.add(*id, &store.property_keys.name_of(record)?);
        }
        Ok(())
    }

    /// Discard every staged change and release the locks
    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            TxState::Committed | TxState::RolledBack => {
                return Err(Error::invalid_state(format!(
                    "Cannot roll back transaction {} in state {:?}",
                    self.identifier, self.state
                )));
            }
            TxState::Active | TxState::Prepared => {}
        }
        let was_prepared = self.state == TxState::Prepared;
        self.state = TxState::RolledBack;

        if self.ctx.store.config().free_ids_during_rollback {
            self.free_created_ids()?;
        }
        self.invalidate_staged(&self.ctx.caches);

        let changes = std::mem::take(&mut self.changes);
        self.commands.clear();
        self.locks.clear();
        if was_prepared {
            self.ctx.log.done(self.identifier)?;
        }
        tracing::debug!(
            "Rolled back transaction {} ({} nodes, {} relationships staged)",
            self.identifier,
            changes.nodes.len(),
            changes.relationships.len()
        );
        Ok(())
    }

    fn free_created_ids(&self) -> Result<()> {
        let store = &self.ctx.store;
        let changes = &self.changes;
        for node in changes.nodes.values().filter(|r| r.created) {
            store.nodes.free_id(node.id);
        }
        for rel in changes.relationships.values().filter(|r| r.created) {
            store.relationships.free_id(rel.id);
        }
        for group in changes.groups.values().filter(|r| r.created) {
            store.groups.free_id(group.id);
        }
        for record in changes.properties.values() {
            if record.created {
                store.properties.free_id(record.id);
            }
            for block in record.blocks.iter().chain(&record.removed_blocks) {
                store.properties.free_value_ids(block)?;
            }
        }
        for record in changes.relationship_types.values() {
            store.relationship_types.free_id(record.id);
            store.relationship_types.free_name_ids(record);
        }
        for record in changes.property_keys.values() {
            store.property_keys.free_id(record.id);
            store.property_keys.free_name_ids(record);
        }
        Ok(())
    }

    fn invalidate_staged(&self, sink: &dyn CacheInvalidation) {
        for id in self.changes.nodes.keys() {
            sink.invalidate_node(*id);
        }
        for rel in self.changes.relationships.values() {
            Command::Relationship(*rel).invalidate(sink);
        }
        for group in self.changes.groups.values() {
            sink.invalidate_node(group.owning_node);
        }
        for record in self.changes.properties.values() {
            match record.owner {
                PropertyOwner::Node(id) => sink.invalidate_node(id),
                PropertyOwner::Relationship(id) => sink.invalidate_relationship(id),
                PropertyOwner::Graph => {}
            }
        }
        for id in self.changes.relationship_types.keys() {
            sink.invalidate_relationship_type(*id);
        }
    }
}

impl NeoStoreTransaction for WriteTransaction {
    fn node_create(&mut self) -> Result<u64> {
        self.assert_active()?;
        let node_id = self.ctx.store.nodes.next_id();
        if let Err(err) = self.lock(ResourceId::node(node_id)) {
            self.ctx.store.nodes.free_id(node_id);
            return Err(err);
        }
        self.changes.nodes.insert(node_id, NodeRecord::new(node_id));
        Ok(node_id)
    }

    fn node_delete(&mut self, node_id: u64) -> Result<PropertyMap> {
        self.assert_active()?;
        let node = *self.live_node(node_id)?;
        let properties = self.delete_property_chain(node.next_prop)?;
        if node.super_node {
            self.release_empty_groups(node_id)?;
        }
        let record = self.node_for_update(node_id)?;
        record.in_use = false;
        record.next_prop = NO_NEXT;
        Ok(properties)
    }

    fn relationship_create(
        &mut self,
        type_id: TypeId,
        first_node: u64,
        second_node: u64,
    ) -> Result<u64> {
        self.assert_active()?;
        self.ensure_relationship_type(type_id)?;
        self.live_node(first_node)?;
        if second_node != first_node {
            self.live_node(second_node)?;
        }

        self.convert_if_necessary(first_node)?;
        if second_node != first_node {
            self.convert_if_necessary(second_node)?;
        }

        let rel_id = self.ctx.store.relationships.next_id();
        if let Err(err) = self.lock(ResourceId::relationship(rel_id)) {
            self.ctx.store.relationships.free_id(rel_id);
            return Err(err);
        }
        self.changes.relationships.insert(
            rel_id,
            RelationshipRecord::new(rel_id, first_node, second_node, type_id),
        );

        self.connect_to_node(first_node, rel_id)?;
        if second_node != first_node {
            self.connect_to_node(second_node, rel_id)?;
        }
        Ok(rel_id)
    }

    fn rel_delete(&mut self, rel_id: u64) -> Result<PropertyMap> {
        self.assert_active()?;
        let rel = *self.live_relationship(rel_id)?;
        let properties = self.delete_property_chain(rel.next_prop)?;

        self.disconnect(rel_id, rel.first_node)?;
        if !rel.is_loop() {
            self.disconnect(rel_id, rel.second_node)?;
        }

        let record = self.relationship_for_update(rel_id)?;
        record.in_use = false;
        record.next_prop = NO_NEXT;
        Ok(properties)
    }

    fn add_property(
        &mut self,
        owner: PropertyOwner,
        key_id: KeyId,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.assert_active()?;
        self.lock_owner(owner)?;
        self.ensure_property_key(key_id)?;
        if self.find_property_record(owner, key_id)?.is_some() {
            return Err(Error::invalid_state(format!(
                "{:?} already has a property with key {}",
                owner, key_id
            )));
        }

        let block = self.ctx.store.properties.encode_value(key_id, &value)?;
        let record_id = self.add_block_to_owner(owner, block)?;
        Ok(PropertyData {
            record_id,
            key_id,
            value: Some(value),
        })
    }

    fn change_property(
        &mut self,
        owner: PropertyOwner,
        key_id: KeyId,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.assert_active()?;
        self.lock_owner(owner)?;
        let record_id = self
            .find_property_record(owner, key_id)?
            .ok_or_else(|| Self::missing_property(owner, key_id))?;

        let ctx = Arc::clone(&self.ctx);
        let block = ctx.store.properties.encode_value(key_id, &value)?;
        let record = self.property_for_update(record_id)?;
        let mut old = record
            .remove_block(key_id)
            .ok_or_else(|| Self::missing_property(owner, key_id))?;
        ctx.store.properties.make_heavy(&mut old)?;
        record.removed_blocks.push(old);

        if record.has_space_for(&block) {
            record.add_block(block);
            return Ok(PropertyData {
                record_id,
                key_id,
                value: Some(value),
            });
        }

        if record.blocks.is_empty() {
            self.unlink_property_record(record_id)?;
        }
        let record_id = self.add_block_to_owner(owner, block)?;
        Ok(PropertyData {
            record_id,
            key_id,
            value: Some(value),
        })
    }

    fn remove_property(&mut self, owner: PropertyOwner, key_id: KeyId) -> Result<()> {
        self.assert_active()?;
        self.lock_owner(owner)?;
        let record_id = self
            .find_property_record(owner, key_id)?
            .ok_or_else(|| Self::missing_property(owner, key_id))?;

        let ctx = Arc::clone(&self.ctx);
        let record = self.property_for_update(record_id)?;
        let mut block = record
            .remove_block(key_id)
            .ok_or_else(|| Self::missing_property(owner, key_id))?;
        ctx.store.properties.make_heavy(&mut block)?;
        record.removed_blocks.push(block);

        if record.blocks.is_empty() {
            self.unlink_property_record(record_id)?;
        }
        Ok(())
    }

    fn load_properties(&self, owner: PropertyOwner, light: bool) -> Result<PropertyMap> {
        let head = self.property_head(owner)?;
        let source = self.source();
        load_property_chain(&self.ctx.store.properties, head, light, |id| {
            source.property(id)
        })
    }

    fn load_property_value(&self, property: &PropertyData) -> Result<PropertyValue> {
        let source = self.source();
        property_value(&self.ctx.store.properties, property, |id| {
            source.property(id)
        })
    }

    fn node_load_light(&self, node_id: u64) -> Result<Option<NodeState>> {
        Ok(optional(self.source().node(node_id))?
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
        Ok(optional(self.source().relationship(rel_id))?.filter(|rel| rel.in_use))
    }

    fn get_relationship_chain_position(&self, node_id: u64) -> Result<ChainPosition> {
        chain_position(&self.source(), node_id, |type_id| {
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
        fetch_more_relationships(&self.source(), node_id, position, types, grab_size)
    }

    fn get_relationship_count(
        &self,
        node_id: u64,
        type_id: Option<TypeId>,
        direction: Option<Direction>,
    ) -> Result<u64> {
        relationship_count(&self.source(), node_id, type_id, direction)
    }

    fn create_property_index(&mut self, key: &str) -> Result<KeyId> {
        self.assert_active()?;
        let store = &self.ctx.store.property_keys;
        let staged = self
            .changes
            .property_keys
            .values()
            .any(|record| store.name_of(record).is_ok_and(|name| name == key));
        if staged || self.ctx.caches.tokens.property_keys.id(key).is_some() {
            return Err(Error::invalid_state(format!("Property key {:?} already exists", key)));
        }
        let key_id = store.next_id()?;
        let record = store.create(key_id, key);
        self.changes.property_keys.insert(key_id, record);
        Ok(key_id)
    }

    fn create_relationship_type(&mut self, name: &str) -> Result<TypeId> {
        self.assert_active()?;
        let store = &self.ctx.store.relationship_types;
        let staged = self
            .changes
            .relationship_types
            .values()
            .any(|record| store.name_of(record).is_ok_and(|n| n == name));
        if staged || self.ctx.caches.tokens.relationship_types.id(name).is_some() {
            return Err(Error::invalid_state(format!(
                "Relationship type {:?} already exists",
                name
            )));
        }
        let type_id = store.next_id()?;
        let record = store.create(type_id, name);
        self.changes.relationship_types.insert(type_id, record);
        Ok(type_id)
    }

    fn load_relationship_types(&self) -> Result<Vec<Token>> {
        let store = &self.ctx.store.relationship_types;
        let mut tokens = store.tokens()?;
        for (id, record) in &self.changes.relationship_types {
            tokens.push(Token {
                id: *id,
                name: store.name_of(record)?,
            });
        }
        tokens.sort_by_key(|token| token.id);
        Ok(tokens)
    }

    fn load_property_indexes(&self) -> Result<Vec<Token>> {
        let store = &self.ctx.store.property_keys;
        let mut tokens = store.tokens()?;
        for (id, record) in &self.changes.property_keys {
            tokens.push(Token {
                id: *id,
                name: store.name_of(record)?,
            });
        }
        tokens.sort_by_key(|token| token.id);
        Ok(tokens)
    }

    fn load_index(&self, key_id: KeyId) -> Result<Option<String>> {
        let store = &self.ctx.store.property_keys;
        if let Some(record) = self.changes.property_keys.get(&key_id) {
            return store.name_of(record).map(Some);
        }
        optional(
            self.ctx
                .caches
                .tokens
                .property_key(key_id, || store.name(key_id)),
        )
    }

    fn created_nodes(&self) -> Result<Vec<u64>> {
        Ok(self
            .changes
            .nodes
            .values()
            .filter(|node| node.created)
            .map(|node| node.id)
            .collect())
    }

    fn is_node_created(&self, node_id: u64) -> bool {
        self.changes.nodes.get(&node_id).is_some_and(|node| node.created)
    }

    fn is_relationship_created(&self, rel_id: u64) -> bool {
        self.changes
            .relationships
            .get(&rel_id)
            .is_some_and(|rel| rel.created)
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if matches!(self.state, TxState::Active | TxState::Prepared) {
            tracing::warn!(
                "Write transaction {} dropped while {:?}, rolling back",
                self.identifier,
                self.state
            );
            if let Err(e) = self.rollback() {
                tracing::warn!("Rollback of transaction {} failed: {}", self.identifier, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::database::GraphDatabase;
    use crate::storage::SHORT_STRING_MAX;
    use tempfile::TempDir;

    fn create_test_db(config: StoreConfig) -> (GraphDatabase, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = GraphDatabase::open_with_config(dir.path(), config).unwrap();
        (db, dir)
    }

    fn with_type(db: &GraphDatabase, name: &str) -> TypeId {
        let mut tx = db.begin_write();
        let id = tx.create_relationship_type(name).unwrap();
        tx.prepare().unwrap();
        tx.commit().unwrap();
        id
    }

    fn chain_ids(tx: &WriteTransaction, node: u64) -> Vec<u64> {
        let mut position = tx.get_relationship_chain_position(node).unwrap();
        let mut ids = Vec::new();
        loop {
            let batch = tx.get_more_relationships(node, &mut position, &[]).unwrap();
            if batch.is_empty() {
                break;
            }
            ids.extend(batch.ids());
        }
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_new_relationship_heads_both_chains() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let knows = with_type(&db, "KNOWS");
        let mut tx = db.begin_write();
        let a = tx.node_create().unwrap();
        let b = tx.node_create().unwrap();
        let r1 = tx.relationship_create(knows, a, b).unwrap();
        let r2 = tx.relationship_create(knows, a, b).unwrap();

        let rec = *tx.changes.relationships.get(&r2).unwrap();
        assert_eq!(rec.first, ChainLink::head(2, r1));
        assert_eq!(rec.second, ChainLink::head(2, r1));
        let old = *tx.changes.relationships.get(&r1).unwrap();
        assert_eq!(old.first.prev, ChainPrev::Prev(r2));
        assert_eq!(tx.changes.nodes.get(&a).unwrap().next_rel, r2);
        assert_eq!(tx.get_relationship_count(a, None, None).unwrap(), 2);
    }

    #[test]
    fn test_self_loop_links_mirror() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let t = with_type(&db, "SELF");
        let mut tx = db.begin_write();
        let a = tx.node_create().unwrap();
        let r1 = tx.relationship_create(t, a, a).unwrap();
        let r2 = tx.relationship_create(t, a, a).unwrap();
        for id in [r1, r2] {
            let rec = tx.changes.relationships.get(&id).unwrap();
            assert_eq!(rec.first, rec.second);
        }
        assert_eq!(tx.get_relationship_count(a, None, None).unwrap(), 2);
        assert_eq!(
            tx.get_relationship_count(a, None, Some(Direction::Both)).unwrap(),
            2
        );
    }

    #[test]
    fn test_conversion_at_threshold() {
        let config = StoreConfig::default().with_super_node_threshold(3);
        let (db, _dir) = create_test_db(config);
        let t = with_type(&db, "T");
        let mut tx = db.begin_write();
        let hub = tx.node_create().unwrap();
        let mut created = Vec::new();
        for _ in 0..3 {
            let other = tx.node_create().unwrap();
            created.push(tx.relationship_create(t, hub, other).unwrap());
        }
        assert!(!tx.changes.nodes.get(&hub).unwrap().super_node);

        let other = tx.node_create().unwrap();
        created.push(tx.relationship_create(t, hub, other).unwrap());
        assert_eq!(tx.node_load_light(hub).unwrap(), Some(NodeState::Super));
        assert_eq!(tx.get_relationship_count(hub, None, None).unwrap(), 4);
        assert_eq!(
            tx.get_relationship_count(hub, Some(t), Some(Direction::Outgoing))
                .unwrap(),
            4
        );
        created.sort_unstable();
        assert_eq!(chain_ids(&tx, hub), created);
    }

    #[test]
    fn test_delete_middle_of_chain() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let t = with_type(&db, "T");
        let mut tx = db.begin_write();
        let a = tx.node_create().unwrap();
        let b = tx.node_create().unwrap();
        let r0 = tx.relationship_create(t, a, b).unwrap();
        let r1 = tx.relationship_create(t, a, b).unwrap();
        let r2 = tx.relationship_create(t, a, b).unwrap();

        tx.rel_delete(r1).unwrap();
        let head = *tx.changes.relationships.get(&r2).unwrap();
        assert_eq!(head.first, ChainLink::head(2, r0));
        let tail = *tx.changes.relationships.get(&r0).unwrap();
        assert_eq!(tail.first.prev, ChainPrev::Prev(r2));
        assert_eq!(chain_ids(&tx, a), vec![r0, r2]);
    }

    #[test]
    fn test_delete_head_moves_anchor() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let t = with_type(&db, "T");
        let mut tx = db.begin_write();
        let a = tx.node_create().unwrap();
        let b = tx.node_create().unwrap();
        let r0 = tx.relationship_create(t, a, b).unwrap();
        let r1 = tx.relationship_create(t, a, b).unwrap();

        tx.rel_delete(r1).unwrap();
        assert_eq!(tx.changes.nodes.get(&a).unwrap().next_rel, r0);
        assert_eq!(tx.changes.nodes.get(&b).unwrap().next_rel, r0);
        let rec = tx.changes.relationships.get(&r0).unwrap();
        assert_eq!(rec.first, ChainLink::head(1, NO_NEXT));

        tx.rel_delete(r0).unwrap();
        assert_eq!(tx.changes.nodes.get(&a).unwrap().next_rel, NO_NEXT);
        assert_eq!(tx.get_relationship_count(a, None, None).unwrap(), 0);
    }

    #[test]
    fn test_broken_back_pointer_is_invalid_record() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let t = with_type(&db, "T");
        let mut tx = db.begin_write();
        let a = tx.node_create().unwrap();
        let b = tx.node_create().unwrap();
        let r0 = tx.relationship_create(t, a, b).unwrap();
        let r1 = tx.relationship_create(t, a, b).unwrap();
        tx.changes
            .relationships
            .get_mut(&r0)
            .unwrap()
            .first
            .prev = ChainPrev::Prev(77);

        let err = tx.rel_delete(r1).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
        tx.rollback().unwrap();
    }

    #[test]
    fn test_node_with_relationships_cannot_be_deleted() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let t = with_type(&db, "T");
        let mut tx = db.begin_write();
        let a = tx.node_create().unwrap();
        let b = tx.node_create().unwrap();
        tx.relationship_create(t, a, b).unwrap();
        tx.node_delete(a).unwrap();
        assert!(matches!(tx.prepare(), Err(Error::InvalidState(_))));
        assert_eq!(tx.state(), TxState::Active);
    }

    #[test]
    fn test_property_add_change_remove() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let mut tx = db.begin_write();
        let name = tx.create_property_index("name").unwrap();
        let age = tx.create_property_index("age").unwrap();
        let node = tx.node_create().unwrap();

        tx.node_add_property(node, name, "alice".into()).unwrap();
        tx.node_add_property(node, age, 30i64.into()).unwrap();
        assert!(matches!(
            tx.node_add_property(node, age, 31i64.into()),
            Err(Error::InvalidState(_))
        ));

        tx.node_change_property(node, age, 31i64.into()).unwrap();
        tx.node_remove_property(node, name).unwrap();
        assert!(matches!(
            tx.node_remove_property(node, name),
            Err(Error::InvalidState(_))
        ));

        let props = tx.node_load_properties(node, false).unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props[&age].value, Some(PropertyValue::Int(31)));
    }

    #[test]
    fn test_change_into_bigger_value_moves_record() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let mut tx = db.begin_write();
        let keys: Vec<KeyId> = (0..4)
            .map(|i| tx.create_property_index(&format!("k{}", i)).unwrap())
            .collect();
        let node = tx.node_create().unwrap();
        for key in &keys {
            tx.node_add_property(node, *key, PropertyValue::Bool(true)).unwrap();
        }
        let long = "x".repeat(SHORT_STRING_MAX + 1);
        tx.node_change_property(node, keys[0], long.clone().into())
            .unwrap();
        let props = tx.node_load_properties(node, false).unwrap();
        assert_eq!(props.len(), 4);
        assert_eq!(props[&keys[0]].value, Some(PropertyValue::String(long)));
    }

    #[test]
    fn test_state_machine_misuse() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let mut tx = db.begin_write();
        assert!(matches!(tx.commit(), Err(Error::InvalidState(_))));
        tx.node_create().unwrap();
        tx.prepare().unwrap();
        assert!(matches!(tx.prepare(), Err(Error::InvalidState(_))));
        assert!(matches!(tx.node_create(), Err(Error::InvalidState(_))));
        tx.commit().unwrap();
        assert!(matches!(tx.rollback(), Err(Error::InvalidState(_))));
        assert!(matches!(tx.commit(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_rollback_frees_created_ids() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let mut tx = db.begin_write();
        let node = tx.node_create().unwrap();
        tx.rollback().unwrap();
        assert_eq!(tx.state(), TxState::RolledBack);
        assert!(matches!(tx.rollback(), Err(Error::InvalidState(_))));

        let mut tx = db.begin_write();
        assert_eq!(tx.node_create().unwrap(), node);
    }

    #[test]
    fn test_created_tracking() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let t = with_type(&db, "T");
        let mut tx = db.begin_write();
        let a = tx.node_create().unwrap();
        let b = tx.node_create().unwrap();
        let r = tx.relationship_create(t, a, b).unwrap();
        assert_eq!(tx.created_nodes().unwrap(), vec![a, b]);
        assert!(tx.is_node_created(a));
        assert!(tx.is_relationship_created(r));
        assert!(!tx.is_relationship_created(r + 1));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let mut tx = db.begin_write();
        let a = tx.node_create().unwrap();
        assert!(matches!(
            tx.relationship_create(5, a, a),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        with_type(&db, "KNOWS");
        let mut tx = db.begin_write();
        assert!(matches!(
            tx.create_relationship_type("KNOWS"),
            Err(Error::InvalidState(_))
        ));
        tx.create_property_index("name").unwrap();
        assert!(matches!(
            tx.create_property_index("name"),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_concurrent_token_creation_commits_once() {
        let (db, _dir) = create_test_db(StoreConfig::default());
        let mut first = db.begin_write();
        let mut second = db.begin_write();
        first.create_relationship_type("KNOWS").unwrap();
        second.create_relationship_type("KNOWS").unwrap();
        second.create_property_index("since").unwrap();
        first.create_property_index("since").unwrap();

        first.prepare().unwrap();
        second.prepare().unwrap();
        first.commit().unwrap();
        assert!(matches!(second.commit(), Err(Error::InvalidState(_))));
        assert_eq!(second.state(), TxState::Prepared);
        second.rollback().unwrap();

        let names: Vec<String> = db
            .relationship_types()
            .into_iter()
            .map(|token| token.name)
            .collect();
        assert_eq!(names, vec!["KNOWS".to_string()]);
        assert_eq!(db.begin_read().load_property_indexes().unwrap().len(), 1);
    }

    #[test]
    fn test_lock_timeout_on_create_returns_id() {
        let config = StoreConfig {
            lock_timeout_ms: 50,
            ..StoreConfig::default()
        };
        let (db, _dir) = create_test_db(config);
        let mut tx = db.begin_write();
        let held = tx
            .ctx
            .locks
            .acquire_write(u64::MAX, ResourceId::node(0))
            .unwrap();
        assert!(matches!(tx.node_create(), Err(Error::LockTimeout(_))));
        assert_eq!(tx.state(), TxState::Active);

        drop(held);
        assert_eq!(tx.node_create().unwrap(), 0);
        assert_eq!(db.store().nodes.high_id(), 1);
    }
}
