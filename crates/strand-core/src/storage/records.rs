//! Node, relationship, group, dynamic and token records
//!
//! Each record has an in-memory form (used by transactions and serialized
//! into log commands) and a `#[repr(C)]` disk form.
//!
//! # Record Sizes
//!
//! - NodeRecord: 24 bytes (next_rel: 8, next_prop: 8, flags: 4, padding: 4)
//! - RelationshipRecord: 64 bytes (7 x 8 byte ids, type: 4, flags: 4)
//! - RelationshipGroupRecord: 48 bytes (5 x 8 byte ids, type: 4, flags: 4)
//! - DynamicRecord: 80 bytes (next: 8, in_use: 1, len: 2, payload: 64)
//! - TokenRecord: 16 bytes (name: 8, flags: 4, padding: 4)

use super::record_store::StoreRecord;
use super::{NO_NEXT, TypeId};
use crate::chain::{ChainLink, Direction};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

const IN_USE: u32 = 0x01;
const SUPER_NODE: u32 = 0x02;
const FIRST_IN_FIRST_CHAIN: u32 = 0x02;
const FIRST_IN_SECOND_CHAIN: u32 = 0x04;

/// Payload bytes carried by one dynamic record
pub const DYNAMIC_PAYLOAD_SIZE: usize = 64;

/// Node record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node id
    pub id: u64,
    /// In-use flag
    pub in_use: bool,
    /// Created by the transaction holding this copy
    pub created: bool,
    /// Relationships are partitioned into groups
    pub super_node: bool,
    /// First relationship (normal node) or first group (super node)
    pub next_rel: u64,
    /// First property record
    pub next_prop: u64,
}

impl NodeRecord {
    /// A freshly created, in-use node with no relationships or properties
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: true,
            created: true,
            super_node: false,
            next_rel: NO_NEXT,
            next_prop: NO_NEXT,
        }
    }
}

/// Disk layout of [`NodeRecord`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct NodeDisk {
    next_rel: u64,
    next_prop: u64,
    flags: u32,
    _padding: u32,
}

impl StoreRecord for NodeRecord {
    type Disk = NodeDisk;
    const KIND: &'static str = "Node";

    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn to_disk(&self) -> NodeDisk {
        let mut flags = 0;
        if self.in_use {
            flags |= IN_USE;
        }
        if self.super_node {
            flags |= SUPER_NODE;
        }
        NodeDisk {
            next_rel: self.next_rel,
            next_prop: self.next_prop,
            flags,
            _padding: 0,
        }
    }

    fn from_disk(id: u64, disk: &NodeDisk) -> Self {
        let in_use = disk.flags & IN_USE != 0;
        Self {
            id,
            in_use,
            created: false,
            super_node: disk.flags & SUPER_NODE != 0,
            next_rel: if in_use { disk.next_rel } else { NO_NEXT },
            next_prop: if in_use { disk.next_prop } else { NO_NEXT },
        }
    }

    fn disk_in_use(disk: &NodeDisk) -> bool {
        disk.flags & IN_USE != 0
    }
}

/// Relationship record, linked into the chains of both its nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    /// Relationship id
    pub id: u64,
    /// In-use flag
    pub in_use: bool,
    /// Created by the transaction holding this copy
    pub created: bool,
    /// Start node
    pub first_node: u64,
    /// End node
    pub second_node: u64,
    /// Relationship type
    pub type_id: TypeId,
    /// Links in the first node's chain
    pub first: ChainLink,
    /// Links in the second node's chain
    pub second: ChainLink,
    /// First property record
    pub next_prop: u64,
}

impl RelationshipRecord {
    /// A freshly created, unlinked relationship
    pub fn new(id: u64, first_node: u64, second_node: u64, type_id: TypeId) -> Self {
        Self {
            id,
            in_use: true,
            created: true,
            first_node,
            second_node,
            type_id,
            first: ChainLink::default(),
            second: ChainLink::default(),
            next_prop: NO_NEXT,
        }
    }

    /// Whether both ends are the same node
    pub fn is_loop(&self) -> bool {
        self.first_node == self.second_node
    }

    fn not_an_endpoint(&self, node_id: u64) -> Error {
        Error::invalid_record(format!(
            "Node[{}] is neither first nor second node of Relationship[{}] ({} -> {})",
            node_id, self.id, self.first_node, self.second_node
        ))
    }

    /// Chain links on the side belonging to `node_id`
    pub fn link_for(&self, node_id: u64) -> Result<ChainLink> {
        if self.first_node == node_id {
            Ok(self.first)
        } else if self.second_node == node_id {
            Ok(self.second)
        } else {
            Err(self.not_an_endpoint(node_id))
        }
    }

    /// Next relationship in `node_id`'s chain
    pub fn next_for(&self, node_id: u64) -> Result<u64> {
        self.link_for(node_id).map(|link| link.next)
    }

    /// Orientation of this relationship as seen from `node_id`
    pub fn direction_for(&self, node_id: u64) -> Result<Direction> {
        match (self.first_node == node_id, self.second_node == node_id) {
            (true, true) => Ok(Direction::Both),
            (true, false) => Ok(Direction::Outgoing),
            (false, true) => Ok(Direction::Incoming),
            (false, false) => Err(self.not_an_endpoint(node_id)),
        }
    }

    /// Apply `f` to every side that belongs to `node_id`.
    ///
    /// For a self-loop both sides match, so the two chains stay identical.
    /// Returns false if `node_id` is not an endpoint.
    pub fn update_links(&mut self, node_id: u64, mut f: impl FnMut(&mut ChainLink)) -> bool {
        let mut matched = false;
        if self.first_node == node_id {
            f(&mut self.first);
            matched = true;
        }
        if self.second_node == node_id {
            f(&mut self.second);
            matched = true;
        }
        matched
    }
}

/// Disk layout of [`RelationshipRecord`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RelationshipDisk {
    first_node: u64,
    second_node: u64,
    first_prev: u64,
    first_next: u64,
    second_prev: u64,
    second_next: u64,
    next_prop: u64,
    type_id: u32,
    flags: u32,
}

impl StoreRecord for RelationshipRecord {
    type Disk = RelationshipDisk;
    const KIND: &'static str = "Relationship";

    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn to_disk(&self) -> RelationshipDisk {
        let (first_prev, first_next, first_head) = self.first.to_raw();
        let (second_prev, second_next, second_head) = self.second.to_raw();
        let mut flags = 0;
        if self.in_use {
            flags |= IN_USE;
        }
        if first_head {
            flags |= FIRST_IN_FIRST_CHAIN;
        }
        if second_head {
            flags |= FIRST_IN_SECOND_CHAIN;
        }
        RelationshipDisk {
            first_node: self.first_node,
            second_node: self.second_node,
            first_prev,
            first_next,
            second_prev,
            second_next,
            next_prop: self.next_prop,
            type_id: self.type_id,
            flags,
        }
    }

    fn from_disk(id: u64, disk: &RelationshipDisk) -> Self {
        Self {
            id,
            in_use: disk.flags & IN_USE != 0,
            created: false,
            first_node: disk.first_node,
            second_node: disk.second_node,
            type_id: disk.type_id,
            first: ChainLink::from_raw(
                disk.first_prev,
                disk.first_next,
                disk.flags & FIRST_IN_FIRST_CHAIN != 0,
            ),
            second: ChainLink::from_raw(
                disk.second_prev,
                disk.second_next,
                disk.flags & FIRST_IN_SECOND_CHAIN != 0,
            ),
            next_prop: disk.next_prop,
        }
    }

    fn disk_in_use(disk: &RelationshipDisk) -> bool {
        disk.flags & IN_USE != 0
    }
}

/// Per-(node, type) anchor of a super node's out, in and loop chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipGroupRecord {
    /// Group id
    pub id: u64,
    /// In-use flag
    pub in_use: bool,
    /// Created by the transaction holding this copy
    pub created: bool,
    /// Relationship type of every relationship in this group
    pub type_id: TypeId,
    /// Node owning this group
    pub owning_node: u64,
    /// Next group of the same node
    pub next: u64,
    /// Head of the outgoing chain
    pub next_out: u64,
    /// Head of the incoming chain
    pub next_in: u64,
    /// Head of the self-loop chain
    pub next_loop: u64,
}

impl RelationshipGroupRecord {
    /// A freshly created group with empty chains
    pub fn new(id: u64, type_id: TypeId, owning_node: u64) -> Self {
        Self {
            id,
            in_use: true,
            created: true,
            type_id,
            owning_node,
            next: NO_NEXT,
            next_out: NO_NEXT,
            next_in: NO_NEXT,
            next_loop: NO_NEXT,
        }
    }

    /// Chain head for `direction`
    pub fn head(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Outgoing => self.next_out,
            Direction::Incoming => self.next_in,
            Direction::Both => self.next_loop,
        }
    }

    /// Replace the chain head for `direction`
    pub fn set_head(&mut self, direction: Direction, id: u64) {
        match direction {
            Direction::Outgoing => self.next_out = id,
            Direction::Incoming => self.next_in = id,
            Direction::Both => self.next_loop = id,
        }
    }

    /// Whether all three chains are empty
    pub fn is_empty(&self) -> bool {
        self.next_out == NO_NEXT && self.next_in == NO_NEXT && self.next_loop == NO_NEXT
    }
}

/// Disk layout of [`RelationshipGroupRecord`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GroupDisk {
    next: u64,
    next_out: u64,
    next_in: u64,
    next_loop: u64,
    owning_node: u64,
    type_id: u32,
    flags: u32,
}

impl StoreRecord for RelationshipGroupRecord {
    type Disk = GroupDisk;
    const KIND: &'static str = "RelationshipGroup";

    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn to_disk(&self) -> GroupDisk {
        GroupDisk {
            next: self.next,
            next_out: self.next_out,
            next_in: self.next_in,
            next_loop: self.next_loop,
            owning_node: self.owning_node,
            type_id: self.type_id,
            flags: if self.in_use { IN_USE } else { 0 },
        }
    }

    fn from_disk(id: u64, disk: &GroupDisk) -> Self {
        Self {
            id,
            in_use: disk.flags & IN_USE != 0,
            created: false,
            type_id: disk.type_id,
            owning_node: disk.owning_node,
            next: disk.next,
            next_out: disk.next_out,
            next_in: disk.next_in,
            next_loop: disk.next_loop,
        }
    }

    fn disk_in_use(disk: &GroupDisk) -> bool {
        disk.flags & IN_USE != 0
    }
}

/// Overflow block holding part of a long string, an array or a token name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicRecord {
    /// Record id
    pub id: u64,
    /// In-use flag
    pub in_use: bool,
    /// Created by the transaction holding this copy
    pub created: bool,
    /// Next block of the same value
    pub next: u64,
    /// Payload, at most [`DYNAMIC_PAYLOAD_SIZE`] bytes
    pub data: Vec<u8>,
}

impl DynamicRecord {
    /// A freshly created, in-use block
    pub fn new(id: u64, data: Vec<u8>) -> Self {
        Self {
            id,
            in_use: true,
            created: true,
            next: NO_NEXT,
            data,
        }
    }
}

/// Disk layout of [`DynamicRecord`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DynamicDisk {
    next: u64,
    in_use: u8,
    _padding0: u8,
    len: u16,
    _padding1: u32,
    data: [u8; DYNAMIC_PAYLOAD_SIZE],
}

impl StoreRecord for DynamicRecord {
    type Disk = DynamicDisk;
    const KIND: &'static str = "Dynamic";

    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn to_disk(&self) -> DynamicDisk {
        let len = self.data.len().min(DYNAMIC_PAYLOAD_SIZE);
        let mut data = [0u8; DYNAMIC_PAYLOAD_SIZE];
        data[..len].copy_from_slice(&self.data[..len]);
        DynamicDisk {
            next: self.next,
            in_use: self.in_use as u8,
            _padding0: 0,
            len: len as u16,
            _padding1: 0,
            data,
        }
    }

    fn from_disk(id: u64, disk: &DynamicDisk) -> Self {
        let len = (disk.len as usize).min(DYNAMIC_PAYLOAD_SIZE);
        Self {
            id,
            in_use: disk.in_use != 0,
            created: false,
            next: disk.next,
            data: disk.data[..len].to_vec(),
        }
    }

    fn disk_in_use(disk: &DynamicDisk) -> bool {
        disk.in_use != 0
    }
}

/// Name token: a relationship type or a property key (property index)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Token id
    pub id: u32,
    /// In-use flag
    pub in_use: bool,
    /// Created by the transaction holding this copy
    pub created: bool,
    /// First dynamic record of the name
    pub name_id: u64,
    /// Name records, present when the record was loaded heavy or created
    pub name_records: Vec<DynamicRecord>,
}

impl TokenRecord {
    /// A freshly created token whose name lives in `name_records`
    pub fn new(id: u32, name_records: Vec<DynamicRecord>) -> Self {
        let name_id = name_records.first().map_or(NO_NEXT, |r| r.id);
        Self {
            id,
            in_use: true,
            created: true,
            name_id,
            name_records,
        }
    }
}

/// Relationship type token record
pub type RelationshipTypeRecord = TokenRecord;

/// Property key token record
pub type PropertyIndexRecord = TokenRecord;

/// Disk layout of [`TokenRecord`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TokenDisk {
    name_id: u64,
    flags: u32,
    _padding: u32,
}

impl StoreRecord for TokenRecord {
    type Disk = TokenDisk;
    const KIND: &'static str = "Token";

    fn id(&self) -> u64 {
        self.id as u64
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn to_disk(&self) -> TokenDisk {
        TokenDisk {
            name_id: self.name_id,
            flags: if self.in_use { IN_USE } else { 0 },
            _padding: 0,
        }
    }

    fn from_disk(id: u64, disk: &TokenDisk) -> Self {
        Self {
            id: id as u32,
            in_use: disk.flags & IN_USE != 0,
            created: false,
            name_id: disk.name_id,
            name_records: Vec::new(),
        }
    }

    fn disk_in_use(disk: &TokenDisk) -> bool {
        disk.flags & IN_USE != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainPrev;

    #[test]
    fn test_disk_sizes() {
        assert_eq!(std::mem::size_of::<NodeDisk>(), 24);
        assert_eq!(std::mem::size_of::<RelationshipDisk>(), 64);
        assert_eq!(std::mem::size_of::<GroupDisk>(), 48);
        assert_eq!(std::mem::size_of::<DynamicDisk>(), 80);
        assert_eq!(std::mem::size_of::<TokenDisk>(), 16);
    }

    #[test]
    fn test_node_flags_survive_disk_form() {
        let mut node = NodeRecord::new(4);
        node.super_node = true;
        node.next_rel = 10;
        let back = NodeRecord::from_disk(4, &node.to_disk());
        assert!(back.in_use);
        assert!(back.super_node);
        assert!(!back.created);
        assert_eq!(back.next_rel, 10);
        assert_eq!(back.next_prop, NO_NEXT);
    }

    #[test]
    fn test_relationship_head_flags() {
        let mut rel = RelationshipRecord::new(1, 2, 3, 0);
        rel.first = ChainLink::head(42, 7);
        rel.second = ChainLink {
            prev: ChainPrev::Prev(5),
            next: NO_NEXT,
        };
        let back = RelationshipRecord::from_disk(1, &rel.to_disk());
        assert_eq!(back.first.prev, ChainPrev::Head { count: 42 });
        assert_eq!(back.first.next, 7);
        assert_eq!(back.second.prev, ChainPrev::Prev(5));
    }

    #[test]
    fn test_link_for_picks_side_by_node() {
        let mut rel = RelationshipRecord::new(1, 2, 3, 0);
        rel.second.next = 99;
        assert_eq!(rel.next_for(3).unwrap(), 99);
        assert_eq!(rel.direction_for(2).unwrap(), Direction::Outgoing);
        assert_eq!(rel.direction_for(3).unwrap(), Direction::Incoming);
        assert!(rel.link_for(8).unwrap_err().is_corruption());
    }

    #[test]
    fn test_update_links_mirrors_loops() {
        let mut rel = RelationshipRecord::new(1, 5, 5, 0);
        assert!(rel.update_links(5, |l| l.next = 11));
        assert_eq!(rel.first, rel.second);
        assert_eq!(rel.first.next, 11);
        assert_eq!(rel.direction_for(5).unwrap(), Direction::Both);
        assert!(!rel.update_links(6, |l| l.next = 12));
    }

    #[test]
    fn test_group_heads() {
        let mut group = RelationshipGroupRecord::new(0, 3, 9);
        assert!(group.is_empty());
        group.set_head(Direction::Incoming, 14);
        assert_eq!(group.head(Direction::Incoming), 14);
        assert_eq!(group.head(Direction::Outgoing), NO_NEXT);
        assert!(!group.is_empty());
    }

    #[test]
    fn test_dynamic_payload_truncated_to_block() {
        let record = DynamicRecord::new(0, b"name".to_vec());
        let back = DynamicRecord::from_disk(0, &record.to_disk());
        assert_eq!(back.data, b"name");
        assert!(back.in_use);
    }
}
