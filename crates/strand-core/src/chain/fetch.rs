//! Batch fetching and degree counting over relationship chains
//!
//! Both functions are generic over [`RecordSource`], so a read transaction
//! runs them against the store and a write transaction against its staged
//! records layered over the store.

use super::position::{LoadingPosition, PerTypeChainPosition, SingleChainPosition};
use super::{ChainPosition, Direction, RecordSource, RelationshipType};
use crate::storage::{NO_NEXT, RelationshipRecord, TypeId};
use crate::{Error, Result};

/// One batch of relationships, bucketed by direction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipBatch {
    /// Relationships starting at the node
    pub outgoing: Vec<RelationshipRecord>,
    /// Relationships ending at the node
    pub incoming: Vec<RelationshipRecord>,
    /// Self-loops, allocated only when one is found
    pub loops: Option<Vec<RelationshipRecord>>,
}

impl RelationshipBatch {
    /// Records of one bucket
    pub fn get(&self, direction: Direction) -> &[RelationshipRecord] {
        match direction {
            Direction::Outgoing => &self.outgoing,
            Direction::Incoming => &self.incoming,
            Direction::Both => self.loops.as_deref().unwrap_or_default(),
        }
    }

    /// Records in all buckets
    pub fn len(&self) -> usize {
        self.outgoing.len() + self.incoming.len() + self.loops.as_ref().map_or(0, Vec::len)
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all records in the batch
    pub fn ids(&self) -> Vec<u64> {
        Direction::ALL
            .iter()
            .flat_map(|&direction| self.get(direction).iter().map(|r| r.id))
            .collect()
    }

    fn push(&mut self, direction: Direction, record: RelationshipRecord) {
        match direction {
            Direction::Outgoing => self.outgoing.push(record),
            Direction::Incoming => self.incoming.push(record),
            Direction::Both => self.loops.get_or_insert_with(Vec::new).push(record),
        }
    }
}

/// Fetch up to `grab_size` in-use relationships of `node_id` from `position`.
///
/// Not-in-use records met on the way are stepped over without counting
/// against the batch. A non-empty `types` restricts the result to those
/// types; a super node position walks them in the given order.
pub fn fetch_more_relationships<S: RecordSource + ?Sized>(
    source: &S,
    node_id: u64,
    position: &mut ChainPosition,
    types: &[RelationshipType],
    grab_size: usize,
) -> Result<RelationshipBatch> {
    match position {
        ChainPosition::Single(position) => fetch_single(source, node_id, position, types, grab_size),
        ChainPosition::PerType(position) => {
            if !position.is_bound() {
                return Err(Error::invalid_state(format!(
                    "Chain position of Node[{}] has not been bound to relationship types",
                    node_id
                )));
            }
            fetch_per_type(source, node_id, position, types, grab_size)
        }
    }
}

fn fetch_single<S: RecordSource + ?Sized>(
    source: &S,
    node_id: u64,
    position: &mut SingleChainPosition,
    types: &[RelationshipType],
    grab_size: usize,
) -> Result<RelationshipBatch> {
    fetch(source, node_id, position, types, grab_size, |rel| {
        types.is_empty() || types.iter().any(|t| t.id == rel.type_id)
    })
}

fn fetch_per_type<S: RecordSource + ?Sized>(
    source: &S,
    node_id: u64,
    position: &mut PerTypeChainPosition,
    types: &[RelationshipType],
    grab_size: usize,
) -> Result<RelationshipBatch> {
    // Group chains only hold relationships of their own type
    fetch(source, node_id, position, types, grab_size, |_| true)
}

fn fetch<S, P>(
    source: &S,
    node_id: u64,
    position: &mut P,
    types: &[RelationshipType],
    grab_size: usize,
    accept: impl Fn(&RelationshipRecord) -> bool,
) -> Result<RelationshipBatch>
where
    S: RecordSource + ?Sized,
    P: LoadingPosition,
{
    let mut batch = RelationshipBatch::default();
    let mut grabbed = 0;
    let mut current = position.position(types);

    while current != NO_NEXT && grabbed < grab_size {
        let record = source.relationship(current)?;
        let next = record.next_for(node_id)?;
        if record.in_use && accept(&record) {
            batch.push(record.direction_for(node_id)?, record);
            grabbed += 1;
        }
        current = position.next_position(next, types);
    }
    Ok(batch)
}

fn head_count(record: &RelationshipRecord, node_id: u64) -> Result<u64> {
    record.link_for(node_id)?.prev.count().ok_or_else(|| {
        Error::invalid_record(format!(
            "Relationship[{}] anchors a chain of Node[{}] but carries no degree count",
            record.id, node_id
        ))
    })
}

fn chain_count<S: RecordSource + ?Sized>(source: &S, node_id: u64, head: u64) -> Result<u64> {
    if head == NO_NEXT {
        return Ok(0);
    }
    head_count(&source.relationship(head)?, node_id)
}

/// Degree of `node_id`, optionally restricted to one type and/or direction.
///
/// Unfiltered counts and every super node count read the degree counters
/// kept by chain heads. A type or direction filtered count on a normal node
/// walks its single chain. A relationship added to a node whose degree has
/// reached `super_node_threshold` converts it first, so that walk reads at
/// most the threshold's worth of records.
/// [`Direction::Both`] selects self-loops.
pub fn relationship_count<S: RecordSource + ?Sized>(
    source: &S,
    node_id: u64,
    type_id: Option<TypeId>,
    direction: Option<Direction>,
) -> Result<u64> {
    let node = source.node(node_id)?;
    if !node.in_use {
        return Err(Error::not_found(format!("Node[{}] not in use", node_id)));
    }

    if !node.super_node {
        if type_id.is_none() && direction.is_none() {
            return chain_count(source, node_id, node.next_rel);
        }
        let mut count = 0;
        let mut next = node.next_rel;
        while next != NO_NEXT {
            let record = source.relationship(next)?;
            next = record.next_for(node_id)?;
            let type_matches = type_id.is_none_or(|t| t == record.type_id);
            let direction_matches =
                direction.is_none_or(|d| record.direction_for(node_id).is_ok_and(|actual| actual == d));
            if record.in_use && type_matches && direction_matches {
                count += 1;
            }
        }
        return Ok(count);
    }

    let groups = match type_id {
        Some(type_id) => source.find_group(&node, type_id)?.into_iter().collect(),
        None => source.groups_of(&node)?,
    };
    let directions = match direction {
        Some(direction) => vec![direction],
        None => Direction::ALL.to_vec(),
    };

    let mut count = 0;
    for group in &groups {
        for &direction in &directions {
            count += chain_count(source, node_id, group.head(direction))?;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainLink, ChainPrev};
    use crate::storage::{NodeRecord, RelationshipGroupRecord};
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemorySource {
        nodes: HashMap<u64, NodeRecord>,
        rels: HashMap<u64, RelationshipRecord>,
        groups: HashMap<u64, RelationshipGroupRecord>,
    }

    impl RecordSource for MemorySource {
        fn node(&self, id: u64) -> Result<NodeRecord> {
            self.nodes.get(&id).copied().ok_or_else(|| Error::not_found("node"))
        }
        fn relationship(&self, id: u64) -> Result<RelationshipRecord> {
            self.rels.get(&id).copied().ok_or_else(|| Error::not_found("rel"))
        }
        fn group(&self, id: u64) -> Result<RelationshipGroupRecord> {
            self.groups.get(&id).copied().ok_or_else(|| Error::not_found("group"))
        }
    }

    /// Node 0 with a flat chain 2 -> 1 -> 0: out to 1, in from 2, loop
    fn flat_source() -> MemorySource {
        let mut source = MemorySource::default();
        let mut node = NodeRecord::new(0);
        node.next_rel = 2;
        source.nodes.insert(0, node);

        let mut r0 = RelationshipRecord::new(0, 0, 1, 7);
        r0.first = ChainLink {
            prev: ChainPrev::Prev(1),
            next: NO_NEXT,
        };
        let mut r1 = RelationshipRecord::new(1, 2, 0, 7);
        r1.second = ChainLink {
            prev: ChainPrev::Prev(2),
            next: 0,
        };
        let mut r2 = RelationshipRecord::new(2, 0, 0, 8);
        r2.first = ChainLink::head(3, 1);
        r2.second = r2.first;
        for r in [r0, r1, r2] {
            source.rels.insert(r.id, r);
        }
        source
    }

    #[test]
    fn test_fetch_buckets_by_direction() {
        let source = flat_source();
        let mut position = ChainPosition::Single(SingleChainPosition::new(2));
        let batch = fetch_more_relationships(&source, 0, &mut position, &[], 10).unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.get(Direction::Outgoing)[0].id, 0);
        assert_eq!(batch.get(Direction::Incoming)[0].id, 1);
        assert_eq!(batch.get(Direction::Both)[0].id, 2);
        assert!(!position.has_more(&[]));
    }

    #[test]
    fn test_fetch_respects_grab_size() {
        let source = flat_source();
        let mut position = ChainPosition::Single(SingleChainPosition::new(2));
        let first = fetch_more_relationships(&source, 0, &mut position, &[], 2).unwrap();
        assert_eq!(first.ids(), vec![1, 2]);
        assert!(first.loops.is_some());
        assert!(position.has_more(&[]));

        let second = fetch_more_relationships(&source, 0, &mut position, &[], 2).unwrap();
        assert_eq!(second.ids(), vec![0]);
        assert!(second.loops.is_none());
    }

    #[test]
    fn test_fetch_skips_not_in_use_without_counting() {
        let mut source = flat_source();
        if let Some(r) = source.rels.get_mut(&1) {
            r.in_use = false;
        }
        let mut position = ChainPosition::Single(SingleChainPosition::new(2));
        let batch = fetch_more_relationships(&source, 0, &mut position, &[], 2).unwrap();
        assert_eq!(batch.ids(), vec![0, 2]);
    }

    #[test]
    fn test_fetch_detects_foreign_record() {
        let mut source = flat_source();
        if let Some(r) = source.rels.get_mut(&1) {
            r.second_node = 9;
        }
        let mut position = ChainPosition::Single(SingleChainPosition::new(2));
        let err = fetch_more_relationships(&source, 0, &mut position, &[], 10).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_fetch_unbound_per_type_fails() {
        let source = flat_source();
        let mut position = ChainPosition::PerType(PerTypeChainPosition::new(0, &[]));
        assert!(matches!(
            fetch_more_relationships(&source, 0, &mut position, &[], 10),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_count_flat_chain() {
        let source = flat_source();
        assert_eq!(relationship_count(&source, 0, None, None).unwrap(), 3);
        assert_eq!(relationship_count(&source, 0, Some(7), None).unwrap(), 2);
        assert_eq!(
            relationship_count(&source, 0, None, Some(Direction::Both)).unwrap(),
            1
        );
        assert_eq!(
            relationship_count(&source, 0, Some(7), Some(Direction::Incoming)).unwrap(),
            1
        );
    }

    #[test]
    fn test_count_super_node_groups() {
        let mut source = MemorySource::default();
        let mut node = NodeRecord::new(0);
        node.super_node = true;
        node.next_rel = 0;
        source.nodes.insert(0, node);

        let mut g0 = RelationshipGroupRecord::new(0, 1, 0);
        g0.next_out = 10;
        g0.next = 1;
        let mut g1 = RelationshipGroupRecord::new(1, 2, 0);
        g1.next_in = 11;
        source.groups.insert(0, g0);
        source.groups.insert(1, g1);

        let mut out = RelationshipRecord::new(10, 0, 5, 1);
        out.first = ChainLink::head(4, NO_NEXT);
        let mut inc = RelationshipRecord::new(11, 6, 0, 2);
        inc.second = ChainLink::head(2, NO_NEXT);
        source.rels.insert(10, out);
        source.rels.insert(11, inc);

        assert_eq!(relationship_count(&source, 0, None, None).unwrap(), 6);
        assert_eq!(relationship_count(&source, 0, Some(1), None).unwrap(), 4);
        assert_eq!(
            relationship_count(&source, 0, None, Some(Direction::Incoming)).unwrap(),
            2
        );
        assert_eq!(
            relationship_count(&source, 0, Some(2), Some(Direction::Outgoing)).unwrap(),
            0
        );
        assert_eq!(relationship_count(&source, 0, Some(9), None).unwrap(), 0);
    }
}
