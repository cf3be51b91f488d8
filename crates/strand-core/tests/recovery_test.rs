//! Crash recovery from the logical log

use std::io::Write;
use std::path::Path;
use std::sync::Once;
use strand_core::database::LOG_FILE;
use strand_core::transaction::Command;
use strand_core::wal::LogicalLog;
use strand_core::{GraphDatabase, NeoStoreTransaction, NodeState, PropertyValue};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("strand_core=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

struct Staged {
    commands: Vec<Command>,
    nodes: (u64, u64),
    rel: u64,
}

/// Stage a small graph, capture its commands and roll it back so only the
/// log can bring it into the stores
fn stage_graph(db: &GraphDatabase) -> Staged {
    init_tracing();
    let mut tx = db.begin_write();
    let likes = tx.create_relationship_type("LIKES").unwrap();
    let name = tx.create_property_index("name").unwrap();
    let a = tx.node_create().unwrap();
    let b = tx.node_create().unwrap();
    let rel = tx.relationship_create(likes, a, b).unwrap();
    tx.node_add_property(a, name, "x".repeat(80).into()).unwrap();
    tx.prepare().unwrap();
    let commands = tx.commands().to_vec();
    tx.rollback().unwrap();
    Staged {
        commands,
        nodes: (a, b),
        rel,
    }
}

fn open_log(dir: &Path) -> LogicalLog {
    LogicalLog::open(dir.join(LOG_FILE), true).unwrap()
}

fn log_committed(dir: &Path, commands: &[Command], tx_id: u64) {
    let log = open_log(dir);
    let id = log.next_identifier();
    log.prepare(id, commands).unwrap();
    log.commit(id, tx_id).unwrap();
}

fn assert_staged_graph_present(db: &GraphDatabase, staged: &Staged) {
    let read = db.begin_read();
    let (a, b) = staged.nodes;
    assert_eq!(read.node_load_light(a).unwrap(), Some(NodeState::Normal));
    assert_eq!(read.node_load_light(b).unwrap(), Some(NodeState::Normal));
    assert!(read.rel_load_light(staged.rel).unwrap().is_some());
    assert_eq!(read.get_relationship_count(a, None, None).unwrap(), 1);

    let name = db.property_key_id("name").unwrap();
    let props = read.node_load_properties(a, false).unwrap();
    assert_eq!(props[&name].value, Some(PropertyValue::String("x".repeat(80))));
    assert!(db.relationship_type_id("LIKES").is_some());
}

#[test]
fn test_committed_transaction_is_replayed() {
    let dir = TempDir::new().unwrap();
    let db = GraphDatabase::open(dir.path()).unwrap();
    let staged = stage_graph(&db);
    assert_eq!(db.begin_read().node_load_light(staged.nodes.0).unwrap(), None);
    db.close().unwrap();

    log_committed(dir.path(), &staged.commands, 1);

    let db = GraphDatabase::open(dir.path()).unwrap();
    assert_eq!(db.last_committed_tx(), 1);
    assert_staged_graph_present(&db, &staged);
    assert!(open_log(dir.path()).read_entries().unwrap().is_empty());

    let mut tx = db.begin_write();
    let fresh = tx.node_create().unwrap();
    assert!(fresh > staged.nodes.1);
    tx.prepare().unwrap();
    assert_eq!(tx.commit().unwrap(), 2);
}

#[test]
fn test_replay_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let db = GraphDatabase::open(dir.path()).unwrap();
    let staged = stage_graph(&db);
    db.close().unwrap();

    log_committed(dir.path(), &staged.commands, 1);
    GraphDatabase::open(dir.path()).unwrap().close().unwrap();

    log_committed(dir.path(), &staged.commands, 1);
    let db = GraphDatabase::open(dir.path()).unwrap();
    assert_eq!(db.last_committed_tx(), 1);
    assert_staged_graph_present(&db, &staged);
}

#[test]
fn test_prepared_only_transaction_is_discarded() {
    let dir = TempDir::new().unwrap();
    let db = GraphDatabase::open(dir.path()).unwrap();
    let staged = stage_graph(&db);
    db.close().unwrap();

    {
        let log = open_log(dir.path());
        let id = log.next_identifier();
        log.prepare(id, &staged.commands).unwrap();
    }

    let db = GraphDatabase::open(dir.path()).unwrap();
    assert_eq!(db.last_committed_tx(), 0);
    assert_eq!(db.begin_read().node_load_light(staged.nodes.0).unwrap(), None);
    assert!(db.relationship_type_id("LIKES").is_none());
}

#[test]
fn test_done_transaction_is_not_replayed() {
    let dir = TempDir::new().unwrap();
    let db = GraphDatabase::open(dir.path()).unwrap();
    let staged = stage_graph(&db);
    db.close().unwrap();

    {
        let log = open_log(dir.path());
        let id = log.next_identifier();
        log.prepare(id, &staged.commands).unwrap();
        log.commit(id, 1).unwrap();
        log.done(id).unwrap();
    }

    let db = GraphDatabase::open(dir.path()).unwrap();
    assert_eq!(db.begin_read().node_load_light(staged.nodes.0).unwrap(), None);
}

#[test]
fn test_torn_tail_is_ignored() {
    let dir = TempDir::new().unwrap();
    let db = GraphDatabase::open(dir.path()).unwrap();
    let staged = stage_graph(&db);
    db.close().unwrap();

    log_committed(dir.path(), &staged.commands, 1);
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join(LOG_FILE))
        .unwrap();
    file.write_all(&[0xff, 0x10, 0, 0, 1, 2]).unwrap();
    drop(file);

    let db = GraphDatabase::open(dir.path()).unwrap();
    assert_eq!(db.last_committed_tx(), 1);
    assert_staged_graph_present(&db, &staged);
}

#[test]
fn test_dropped_database_keeps_committed_state() {
    let dir = TempDir::new().unwrap();
    let (a, b);
    {
        let db = GraphDatabase::open(dir.path()).unwrap();
        let mut tx = db.begin_write();
        let t = tx.create_relationship_type("T").unwrap();
        a = tx.node_create().unwrap();
        b = tx.node_create().unwrap();
        for _ in 0..3 {
            tx.relationship_create(t, a, b).unwrap();
        }
        tx.prepare().unwrap();
        tx.commit().unwrap();
    }

    let db = GraphDatabase::open(dir.path()).unwrap();
    let read = db.begin_read();
    assert_eq!(read.get_relationship_count(a, None, None).unwrap(), 3);
    assert_eq!(read.get_relationship_count(b, None, None).unwrap(), 3);
    assert_eq!(db.last_committed_tx(), 1);
}
