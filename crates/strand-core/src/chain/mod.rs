//! Relationship chain model
//!
//! Every relationship record sits in two doubly-linked chains at once, one
//! per endpoint. A normal node anchors a single chain at `next_rel`; a super
//! node anchors a list of [`RelationshipGroupRecord`]s, each anchoring one
//! chain per direction for a single relationship type.
//!
//! The head of a chain does not store a back pointer: its `prev` slot holds
//! the number of relationships in the chain. [`ChainPrev`] makes that
//! explicit, so only a head can carry a count.

mod fetch;
mod position;

pub use fetch::{RelationshipBatch, fetch_more_relationships, relationship_count};
pub use position::{ChainPosition, PerTypeChainPosition, SingleChainPosition};

use crate::storage::{NO_NEXT, NodeRecord, RelationshipGroupRecord, RelationshipRecord, TypeId};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Back link of one side of a relationship record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainPrev {
    /// This record heads the chain, which holds `count` relationships
    Head {
        /// Relationships in the chain, this one included
        count: u64,
    },
    /// Previous relationship in the chain
    Prev(u64),
}

impl ChainPrev {
    /// Whether this side heads its chain
    pub fn is_head(&self) -> bool {
        matches!(self, Self::Head { .. })
    }

    /// Chain degree if this side heads its chain
    pub fn count(&self) -> Option<u64> {
        match self {
            Self::Head { count } => Some(*count),
            Self::Prev(_) => None,
        }
    }
}

/// Both links of one side of a relationship record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    /// Back link or degree counter
    pub prev: ChainPrev,
    /// Next relationship in the chain, or [`NO_NEXT`]
    pub next: u64,
}

impl ChainLink {
    /// Link of a chain head
    pub fn head(count: u64, next: u64) -> Self {
        Self {
            prev: ChainPrev::Head { count },
            next,
        }
    }

    /// Pack into the on-disk `(prev, next, is_head)` triple
    pub(crate) fn to_raw(self) -> (u64, u64, bool) {
        match self.prev {
            ChainPrev::Head { count } => (count, self.next, true),
            ChainPrev::Prev(id) => (id, self.next, false),
        }
    }

    /// Unpack the on-disk triple
    pub(crate) fn from_raw(prev: u64, next: u64, is_head: bool) -> Self {
        let prev = if is_head {
            ChainPrev::Head { count: prev }
        } else {
            ChainPrev::Prev(prev)
        };
        Self { prev, next }
    }
}

impl Default for ChainLink {
    fn default() -> Self {
        Self::head(1, NO_NEXT)
    }
}

/// Orientation of a relationship as seen from one of its nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    /// The node is the first (start) node
    Outgoing,
    /// The node is the second (end) node
    Incoming,
    /// Self-loop: the node is both ends
    Both,
}

impl Direction {
    /// Group sub-chain order used by chain positions and counting
    pub const ALL: [Direction; 3] = [Direction::Outgoing, Direction::Incoming, Direction::Both];
}

/// Relationship type handle with its resolved name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationshipType {
    /// Type id
    pub id: TypeId,
    /// Type name
    pub name: String,
}

impl RelationshipType {
    /// Create a handle
    pub fn new(id: TypeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Where chain algorithms read records from.
///
/// The store implements this directly; a write transaction layers its
/// staged records on top so walks see its own uncommitted changes.
pub trait RecordSource {
    /// Load a node record
    fn node(&self, id: u64) -> Result<NodeRecord>;

    /// Load a relationship record
    fn relationship(&self, id: u64) -> Result<RelationshipRecord>;

    /// Load a relationship group record
    fn group(&self, id: u64) -> Result<RelationshipGroupRecord>;

    /// Walk a super node's group list
    fn groups_of(&self, node: &NodeRecord) -> Result<Vec<RelationshipGroupRecord>> {
        let mut groups = Vec::new();
        let mut next = node.next_rel;
        while next != NO_NEXT {
            let group = self.group(next)?;
            next = group.next;
            groups.push(group);
        }
        Ok(groups)
    }

    /// Find the group of `type_id` in a super node's group list
    fn find_group(&self, node: &NodeRecord, type_id: TypeId) -> Result<Option<RelationshipGroupRecord>> {
        let mut next = node.next_rel;
        while next != NO_NEXT {
            let group = self.group(next)?;
            if group.type_id == type_id {
                return Ok(Some(group));
            }
            next = group.next;
        }
        Ok(None)
    }
}
