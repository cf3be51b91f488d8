//! Restartable cursors over a node's relationship chains

use super::{Direction, RelationshipType};
use crate::storage::{NO_NEXT, RelationshipGroupRecord, TypeId};
use crate::Result;
use std::collections::BTreeMap;

/// Cursor protocol shared by both position kinds
pub(crate) trait LoadingPosition {
    /// Current non-terminal position for `types`, or [`NO_NEXT`]
    fn position(&mut self, types: &[RelationshipType]) -> u64;

    /// Feed back the next link of the record at the current position and
    /// return the new current position
    fn next_position(&mut self, candidate: u64, types: &[RelationshipType]) -> u64;
}

/// Position in the single chain of a normal node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleChainPosition {
    position: u64,
}

impl SingleChainPosition {
    /// Start at the chain head
    pub fn new(first: u64) -> Self {
        Self { position: first }
    }

    /// Current position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether the chain has more records
    pub fn has_more(&self) -> bool {
        self.position != NO_NEXT
    }
}

impl LoadingPosition for SingleChainPosition {
    fn position(&mut self, _types: &[RelationshipType]) -> u64 {
        self.position
    }

    fn next_position(&mut self, candidate: u64, _types: &[RelationshipType]) -> u64 {
        self.position = candidate;
        candidate
    }
}

/// Out, in and loop cursors of one group, walked in [`Direction::ALL`] order
#[derive(Debug, Clone, PartialEq, Eq)]
struct TypePosition {
    heads: [u64; 3],
    current: usize,
}

impl TypePosition {
    fn new(group: &RelationshipGroupRecord) -> Self {
        Self {
            heads: Direction::ALL.map(|direction| group.head(direction)),
            current: 0,
        }
    }

    fn position(&mut self) -> u64 {
        while self.current < self.heads.len() {
            if self.heads[self.current] != NO_NEXT {
                return self.heads[self.current];
            }
            self.current += 1;
        }
        NO_NEXT
    }

    fn next_position(&mut self, candidate: u64) {
        if let Some(head) = self.heads.get_mut(self.current) {
            *head = candidate;
        }
    }

    fn has_more(&self) -> bool {
        self.heads[self.current.min(2)..]
            .iter()
            .any(|&head| head != NO_NEXT)
    }
}

/// Position over the per-type group chains of a super node.
///
/// Built from the node's group records, it must be bound to type handles
/// with [`PerTypeChainPosition::bind`] before it can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerTypeChainPosition {
    node_id: u64,
    positions: BTreeMap<TypeId, TypePosition>,
    types: Option<Vec<RelationshipType>>,
    current: Option<TypeId>,
}

impl PerTypeChainPosition {
    /// Cursor over `groups`, all owned by `node_id`
    pub fn new(node_id: u64, groups: &[RelationshipGroupRecord]) -> Self {
        let positions = groups
            .iter()
            .filter(|group| group.in_use)
            .map(|group| (group.type_id, TypePosition::new(group)))
            .collect();
        Self {
            node_id,
            positions,
            types: None,
            current: None,
        }
    }

    /// Node this position walks
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Resolve every group's type id to a named handle
    pub fn bind(&mut self, resolve: impl Fn(TypeId) -> Result<RelationshipType>) -> Result<()> {
        let types = self
            .positions
            .keys()
            .map(|&type_id| resolve(type_id))
            .collect::<Result<Vec<_>>>()?;
        self.types = Some(types);
        Ok(())
    }

    /// Whether [`PerTypeChainPosition::bind`] has run
    pub fn is_bound(&self) -> bool {
        self.types.is_some()
    }

    /// Bound type handles in type id order
    pub fn types(&self) -> &[RelationshipType] {
        self.types.as_deref().unwrap_or_default()
    }

    fn requested(&self, types: &[RelationshipType]) -> Vec<TypeId> {
        if types.is_empty() {
            self.positions.keys().copied().collect()
        } else {
            types.iter().map(|t| t.id).collect()
        }
    }

    /// Whether any of `types` (all bound types if empty) has records left
    pub fn has_more(&self, types: &[RelationshipType]) -> bool {
        self.requested(types)
            .iter()
            .any(|id| self.positions.get(id).is_some_and(TypePosition::has_more))
    }
}

impl LoadingPosition for PerTypeChainPosition {
    fn position(&mut self, types: &[RelationshipType]) -> u64 {
        for type_id in self.requested(types) {
            if let Some(position) = self.positions.get_mut(&type_id) {
                let current = position.position();
                if current != NO_NEXT {
                    self.current = Some(type_id);
                    return current;
                }
            }
        }
        self.current = None;
        NO_NEXT
    }

    fn next_position(&mut self, candidate: u64, types: &[RelationshipType]) -> u64 {
        if let Some(position) = self.current.and_then(|id| self.positions.get_mut(&id)) {
            position.next_position(candidate);
        }
        LoadingPosition::position(self, types)
    }
}

/// Where the next batch of a node's relationships starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainPosition {
    /// Normal node
    Single(SingleChainPosition),
    /// Super node
    PerType(PerTypeChainPosition),
}

impl ChainPosition {
    /// Whether more relationships of `types` (all if empty) remain
    pub fn has_more(&self, types: &[RelationshipType]) -> bool {
        match self {
            Self::Single(position) => position.has_more(),
            Self::PerType(position) => position.has_more(types),
        }
    }
}
