//! Commands: staged records in the order they reach the stores

use crate::cache::CacheInvalidation;
use crate::storage::{
    GraphStore, NodeRecord, PropertyIndexRecord, PropertyOwner, PropertyRecord,
    RelationshipGroupRecord, RelationshipRecord, RelationshipTypeRecord,
};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Whether a command creates, modifies or deletes its record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommandMode {
    /// Record created by the transaction and still in use
    Created,
    /// Existing record changed in place
    Modified,
    /// Record no longer in use
    Deleted,
}

impl CommandMode {
    fn of(in_use: bool, created: bool) -> Self {
        match (in_use, created) {
            (false, _) => Self::Deleted,
            (true, true) => Self::Created,
            (true, false) => Self::Modified,
        }
    }
}

/// One record write, logged before commit and replayed by recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Write a node record
    Node(NodeRecord),
    /// Write a relationship record
    Relationship(RelationshipRecord),
    /// Write a relationship group record
    RelationshipGroup(RelationshipGroupRecord),
    /// Write a property record with its dynamic records
    Property(PropertyRecord),
    /// Write a property key token
    PropertyKey(PropertyIndexRecord),
    /// Write a relationship type token
    RelationshipType(RelationshipTypeRecord),
    /// Move the head of the graph property chain
    GraphPropertyHead(u64),
}

impl Command {
    /// Mode of the record this command writes
    pub fn mode(&self) -> CommandMode {
        match self {
            Self::Node(r) => CommandMode::of(r.in_use, r.created),
            Self::Relationship(r) => CommandMode::of(r.in_use, r.created),
            Self::RelationshipGroup(r) => CommandMode::of(r.in_use, r.created),
            Self::Property(r) => CommandMode::of(r.in_use, r.created),
            Self::PropertyKey(r) | Self::RelationshipType(r) => CommandMode::of(r.in_use, r.created),
            Self::GraphPropertyHead(_) => CommandMode::Modified,
        }
    }

    /// Apply to the stores
    pub fn execute(&self, store: &GraphStore) -> Result<()> {
        match self {
            Self::Node(record) => store.nodes.update(record),
            Self::Relationship(record) => store.relationships.update(record),
            Self::RelationshipGroup(record) => store.groups.update(record),
            Self::Property(record) => store.properties.update(record),
            Self::PropertyKey(record) => store.property_keys.update(record),
            Self::RelationshipType(record) => store.relationship_types.update(record),
            Self::GraphPropertyHead(id) => store.meta.set_graph_next_prop(*id),
        }
    }

    /// Report every cached entity this command makes stale
    pub fn invalidate(&self, sink: &dyn CacheInvalidation) {
        match self {
            Self::Node(record) => sink.invalidate_node(record.id),
            Self::Relationship(record) => {
                sink.invalidate_relationship(record.id);
                sink.invalidate_node(record.first_node);
                sink.invalidate_node(record.second_node);
            }
            Self::RelationshipGroup(record) => sink.invalidate_node(record.owning_node),
            Self::Property(record) => match record.owner {
                PropertyOwner::Node(id) => sink.invalidate_node(id),
                PropertyOwner::Relationship(id) => sink.invalidate_relationship(id),
                PropertyOwner::Graph => {}
            },
            Self::RelationshipType(record) => sink.invalidate_relationship_type(record.id),
            Self::PropertyKey(_) | Self::GraphPropertyHead(_) => {}
        }
    }
}

/// Order staged records for execution.
///
/// Tokens go first. Entity records follow in three passes (created, then
/// modified, then deleted), each pass visiting properties, relationships,
/// nodes and groups in that order. Within a kind, records keep the order
/// of the iterators, which is ascending id for the transaction's maps.
pub(crate) fn ordered_commands<'a>(
    relationship_types: impl IntoIterator<Item = &'a RelationshipTypeRecord>,
    property_keys: impl IntoIterator<Item = &'a PropertyIndexRecord>,
    properties: impl IntoIterator<Item = &'a PropertyRecord>,
    relationships: impl IntoIterator<Item = &'a RelationshipRecord>,
    nodes: impl IntoIterator<Item = &'a NodeRecord>,
    groups: impl IntoIterator<Item = &'a RelationshipGroupRecord>,
    graph_next_prop: Option<u64>,
) -> Vec<Command> {
    let mut commands: Vec<Command> = relationship_types
        .into_iter()
        .cloned()
        .map(Command::RelationshipType)
        .chain(property_keys.into_iter().cloned().map(Command::PropertyKey))
        .collect();

    let entities: Vec<Command> = properties
        .into_iter()
        .cloned()
        .map(Command::Property)
        .chain(relationships.into_iter().copied().map(Command::Relationship))
        .chain(nodes.into_iter().copied().map(Command::Node))
        .chain(groups.into_iter().copied().map(Command::RelationshipGroup))
        .collect();

    for mode in [CommandMode::Created, CommandMode::Modified, CommandMode::Deleted] {
        commands.extend(entities.iter().filter(|c| c.mode() == mode).cloned());
    }

    if let Some(head) = graph_next_prop {
        commands.push(Command::GraphPropertyHead(head));
    }
    commands
}
