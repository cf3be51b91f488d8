//! Degree counting and chain iteration across normal and super nodes

use std::collections::BTreeSet;
use std::path::Path;
use strand_core::chain::RecordSource;
use strand_core::storage::TypeId;
use strand_core::{
    Direction, GraphDatabase, NeoStoreTransaction, NodeState, StoreConfig, WriteTransaction,
    NO_NEXT,
};
use tempfile::TempDir;

fn open(dir: &Path, config: StoreConfig) -> GraphDatabase {
    GraphDatabase::open_with_config(dir, config).unwrap()
}

fn commit(mut tx: WriteTransaction) {
    tx.prepare().unwrap();
    tx.commit().unwrap();
}

fn create_types(db: &GraphDatabase, names: &[&str]) -> Vec<TypeId> {
    let mut tx = db.begin_write();
    let ids = names
        .iter()
        .map(|name| tx.create_relationship_type(name).unwrap())
        .collect();
    commit(tx);
    ids
}

/// Every relationship id reachable from `node`, with the largest batch seen
fn walk<T: NeoStoreTransaction>(tx: &T, node: u64) -> (Vec<u64>, usize) {
    let mut position = tx.get_relationship_chain_position(node).unwrap();
    let mut ids = Vec::new();
    let mut largest = 0;
    loop {
        let batch = tx.get_more_relationships(node, &mut position, &[]).unwrap();
        if batch.is_empty() {
            break;
        }
        largest = largest.max(batch.len());
        ids.extend(batch.ids());
    }
    ids.sort_unstable();
    (ids, largest)
}

fn degree<T: NeoStoreTransaction>(tx: &T, node: u64) -> u64 {
    tx.get_relationship_count(node, None, None).unwrap()
}

fn count<T: NeoStoreTransaction>(
    tx: &T,
    node: u64,
    type_id: Option<TypeId>,
    direction: Option<Direction>,
) -> u64 {
    tx.get_relationship_count(node, type_id, direction).unwrap()
}

#[test]
fn test_degree_scenario_with_restarts() {
    let dir = TempDir::new().unwrap();
    let mut db = open(dir.path(), StoreConfig::default());
    let types = create_types(&db, &["TEST", "TEST2"]);
    let (test, test2) = (types[0], types[1]);

    let mut tx = db.begin_write();
    let node1 = tx.node_create().unwrap();
    let node2 = tx.node_create().unwrap();
    assert_eq!(degree(&tx, node1), 0);
    assert_eq!(degree(&tx, node2), 0);
    tx.relationship_create(test, node1, node2).unwrap();
    assert_eq!(degree(&tx, node1), 1);
    assert_eq!(degree(&tx, node2), 1);
    let new_node = tx.node_create().unwrap();
    tx.relationship_create(test2, node1, new_node).unwrap();
    assert_eq!(degree(&tx, node1), 2);
    assert_eq!(degree(&tx, node2), 1);
    commit(tx);

    for round in 0..10 {
        let mut tx = db.begin_write();
        for i in 0..100 {
            if i % 2 == 0 {
                tx.relationship_create(test, node1, node2).unwrap();
            } else {
                tx.relationship_create(test, node2, node1).unwrap();
            }
        }
        commit(tx);

        if round % 3 == 2 {
            db.clear_caches().unwrap();
            db.close().unwrap();
            db = open(dir.path(), StoreConfig::default());
        }
    }

    let read = db.begin_read();
    assert_eq!(read.node_load_light(node1).unwrap(), Some(NodeState::Super));
    assert_eq!(degree(&read, node1), 1002);
    assert_eq!(
        read.get_relationship_count(node1, None, Some(Direction::Outgoing)).unwrap(),
        502
    );
    assert_eq!(
        read.get_relationship_count(node1, None, Some(Direction::Incoming)).unwrap(),
        500
    );
    assert_eq!(read.get_relationship_count(node1, Some(test), None).unwrap(), 1001);
    assert_eq!(read.get_relationship_count(node1, Some(test2), None).unwrap(), 1);
    assert_eq!(degree(&read, node2), 1001);
    assert_eq!(walk(&read, node1).0.len(), 1002);

    db.clear_caches().unwrap();
    assert_eq!(degree(&db.begin_read(), node1), 1002);
}

#[test]
fn test_loop_counts_once() {
    for threshold in [50, 1] {
        let dir = TempDir::new().unwrap();
        let db = open(
            dir.path(),
            StoreConfig::default().with_super_node_threshold(threshold),
        );
        let types = create_types(&db, &["TEST", "TEST2"]);

        let mut tx = db.begin_write();
        let node = tx.node_create().unwrap();
        let other = tx.node_create().unwrap();
        tx.relationship_create(types[0], node, node).unwrap();
        commit(tx);
        assert_eq!(degree(&db.begin_read(), node), 1);

        let mut tx = db.begin_write();
        let rel = tx.relationship_create(types[1], node, other).unwrap();
        commit(tx);
        let read = db.begin_read();
        assert_eq!(degree(&read, node), 2);
        assert_eq!(
            read.get_relationship_count(node, None, Some(Direction::Both)).unwrap(),
            1
        );
        assert_eq!(walk(&read, node).0.len(), 2);

        let mut tx = db.begin_write();
        tx.rel_delete(rel).unwrap();
        commit(tx);
        let read = db.begin_read();
        assert_eq!(degree(&read, node), 1);
        assert_eq!(degree(&read, other), 0);
        assert_eq!(walk(&read, node).0.len(), 1);
    }
}

#[test]
fn test_super_node_conversion_keeps_relationships() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::default()
        .with_super_node_threshold(10)
        .with_grab_size(5);
    let db = open(dir.path(), config);
    let types = create_types(&db, &["A", "B"]);

    let mut tx = db.begin_write();
    let hub = tx.node_create().unwrap();
    for i in 0..10u64 {
        let other = tx.node_create().unwrap();
        let t = types[(i % 2) as usize];
        if i % 3 == 0 {
            tx.relationship_create(t, other, hub).unwrap();
        } else {
            tx.relationship_create(t, hub, other).unwrap();
        }
    }
    tx.relationship_create(types[0], hub, hub).unwrap();
    commit(tx);

    let read = db.begin_read();
    assert_eq!(read.node_load_light(hub).unwrap(), Some(NodeState::Super));
    let (after, largest) = walk(&read, hub);
    assert_eq!(after.len(), 11);
    assert!(largest <= 5);

    let dir = TempDir::new().unwrap();
    let db = open(
        dir.path(),
        StoreConfig::default()
            .with_super_node_threshold(10)
            .with_grab_size(5),
    );
    let types = create_types(&db, &["A", "B"]);
    let mut tx = db.begin_write();
    let hub = tx.node_create().unwrap();
    for i in 0..10u64 {
        let other = tx.node_create().unwrap();
        tx.relationship_create(types[(i % 2) as usize], hub, other).unwrap();
    }
    commit(tx);

    let read = db.begin_read();
    assert_eq!(read.node_load_light(hub).unwrap(), Some(NodeState::Normal));
    let (before, _) = walk(&read, hub);
    assert_eq!(before.len(), 10);

    let mut tx = db.begin_write();
    let other = tx.node_create().unwrap();
    let extra = tx.relationship_create(types[1], other, hub).unwrap();
    assert_eq!(tx.node_load_light(hub).unwrap(), Some(NodeState::Super));
    let (staged, _) = walk(&tx, hub);
    commit(tx);

    let mut expected: BTreeSet<u64> = before.into_iter().collect();
    expected.insert(extra);
    let expected: Vec<u64> = expected.into_iter().collect();
    assert_eq!(staged, expected);
    assert_eq!(walk(&db.begin_read(), hub).0, expected);
}

#[test]
fn test_typed_walk_filters_groups() {
    let dir = TempDir::new().unwrap();
    let db = open(
        dir.path(),
        StoreConfig::default().with_super_node_threshold(2),
    );
    let types = create_types(&db, &["A", "B", "C"]);

    let mut tx = db.begin_write();
    let hub = tx.node_create().unwrap();
    let mut of_b = Vec::new();
    for i in 0..9usize {
        let other = tx.node_create().unwrap();
        let rel = tx.relationship_create(types[i % 3], hub, other).unwrap();
        if i % 3 == 1 {
            of_b.push(rel);
        }
    }
    commit(tx);

    let read = db.begin_read();
    let mut position = read.get_relationship_chain_position(hub).unwrap();
    let b = strand_core::RelationshipType::new(types[1], "B");
    let mut seen = Vec::new();
    loop {
        let batch = read
            .get_more_relationships(hub, &mut position, std::slice::from_ref(&b))
            .unwrap();
        if batch.is_empty() {
            break;
        }
        assert!(batch.get(Direction::Incoming).is_empty());
        seen.extend(batch.ids());
    }
    seen.sort_unstable();
    assert_eq!(seen, of_b);
}

#[test]
fn test_deleting_group_head_moves_group_pointer() {
    let dir = TempDir::new().unwrap();
    let db = open(
        dir.path(),
        StoreConfig::default().with_super_node_threshold(1),
    );
    let types = create_types(&db, &["T"]);

    let mut tx = db.begin_write();
    let hub = tx.node_create().unwrap();
    let mut rels = Vec::new();
    for _ in 0..3 {
        let other = tx.node_create().unwrap();
        rels.push(tx.relationship_create(types[0], hub, other).unwrap());
    }
    commit(tx);

    let store = db.store();
    let node = store.node(hub).unwrap();
    let group = store.find_group(&node, types[0]).unwrap().unwrap();
    assert_eq!(group.head(Direction::Outgoing), rels[2]);

    let mut tx = db.begin_write();
    tx.rel_delete(rels[2]).unwrap();
    commit(tx);
    let group = store.group(group.id).unwrap();
    assert_eq!(group.head(Direction::Outgoing), rels[1]);
    assert_eq!(store.relationship(rels[1]).unwrap().first.prev.count(), Some(2));

    let mut tx = db.begin_write();
    tx.rel_delete(rels[0]).unwrap();
    commit(tx);
    let group = store.group(group.id).unwrap();
    assert_eq!(group.head(Direction::Outgoing), rels[1]);
    let head = store.relationship(rels[1]).unwrap();
    assert_eq!(head.first.next, NO_NEXT);
    assert_eq!(head.first.prev.count(), Some(1));
    assert_eq!(degree(&db.begin_read(), hub), 1);
}

#[test]
fn test_super_node_deleted_before_its_relationships() {
    let dir = TempDir::new().unwrap();
    let db = open(
        dir.path(),
        StoreConfig::default().with_super_node_threshold(1),
    );
    let types = create_types(&db, &["A", "B"]);

    let mut tx = db.begin_write();
    let hub = tx.node_create().unwrap();
    let mut rels = Vec::new();
    for &t in &types {
        let other = tx.node_create().unwrap();
        rels.push(tx.relationship_create(t, hub, other).unwrap());
    }
    commit(tx);

    let store = db.store();
    assert_eq!(db.begin_read().node_load_light(hub).unwrap(), Some(NodeState::Super));
    let groups: Vec<u64> = store
        .groups_of(&store.node(hub).unwrap())
        .unwrap()
        .iter()
        .map(|group| group.id)
        .collect();
    assert_eq!(groups.len(), 2);

    let mut tx = db.begin_write();
    tx.node_delete(hub).unwrap();
    for &rel in &rels {
        tx.rel_delete(rel).unwrap();
    }
    commit(tx);

    assert_eq!(db.begin_read().node_load_light(hub).unwrap(), None);
    for id in groups {
        assert!(!store.groups.get(id).unwrap().in_use);
    }
    assert!(!store.nodes.get(hub).unwrap().super_node);
}

#[test]
fn test_filtered_counts_agree_across_layouts() {
    let dir = TempDir::new().unwrap();
    let db = open(
        dir.path(),
        StoreConfig::default().with_super_node_threshold(4),
    );
    let types = create_types(&db, &["A", "B"]);
    let (a, b) = (types[0], types[1]);

    let mut tx = db.begin_write();
    let hub = tx.node_create().unwrap();
    let other = tx.node_create().unwrap();
    tx.relationship_create(a, hub, other).unwrap();
    tx.relationship_create(a, other, hub).unwrap();
    tx.relationship_create(b, hub, other).unwrap();
    tx.relationship_create(a, hub, hub).unwrap();
    commit(tx);

    let read = db.begin_read();
    assert_eq!(read.node_load_light(hub).unwrap(), Some(NodeState::Normal));
    assert_eq!(count(&read, hub, Some(a), None), 3);
    assert_eq!(count(&read, hub, Some(a), Some(Direction::Outgoing)), 1);
    assert_eq!(count(&read, hub, Some(a), Some(Direction::Incoming)), 1);
    assert_eq!(count(&read, hub, Some(a), Some(Direction::Both)), 1);
    assert_eq!(count(&read, hub, Some(b), None), 1);
    assert_eq!(count(&read, hub, None, Some(Direction::Outgoing)), 2);

    let mut tx = db.begin_write();
    tx.relationship_create(b, other, hub).unwrap();
    commit(tx);

    let read = db.begin_read();
    assert_eq!(read.node_load_light(hub).unwrap(), Some(NodeState::Super));
    assert_eq!(count(&read, hub, Some(a), None), 3);
    assert_eq!(count(&read, hub, Some(a), Some(Direction::Both)), 1);
    assert_eq!(count(&read, hub, Some(b), None), 2);
    assert_eq!(count(&read, hub, Some(b), Some(Direction::Incoming)), 1);
    assert_eq!(count(&read, hub, None, Some(Direction::Incoming)), 2);
    assert_eq!(degree(&read, hub), 5);
}

#[test]
fn test_normal_node_head_pointer_after_deletes() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), StoreConfig::default());
    let types = create_types(&db, &["T"]);

    let mut tx = db.begin_write();
    let a = tx.node_create().unwrap();
    let b = tx.node_create().unwrap();
    let rels: Vec<u64> = (0..4)
        .map(|_| tx.relationship_create(types[0], a, b).unwrap())
        .collect();
    commit(tx);

    let mut tx = db.begin_write();
    tx.rel_delete(rels[1]).unwrap();
    commit(tx);
    let store = db.store();
    assert_eq!(store.node(a).unwrap().next_rel, rels[3]);
    assert_eq!(store.relationship(rels[2]).unwrap().first.next, rels[0]);

    let mut tx = db.begin_write();
    tx.rel_delete(rels[3]).unwrap();
    commit(tx);
    assert_eq!(store.node(a).unwrap().next_rel, rels[2]);
    assert_eq!(store.node(b).unwrap().next_rel, rels[2]);
    assert_eq!(degree(&db.begin_read(), a), 2);
    assert_eq!(walk(&db.begin_read(), b).0, vec![rels[0], rels[2]]);
}
