//! Strand Core - storage and transaction kernel of an embedded graph database
//!
//! This crate provides:
//! - Fixed-size record stores for nodes, relationships, relationship groups,
//!   properties and name tokens, memory-mapped one file per kind
//! - Relationship chains: every relationship sits in a doubly-linked list per
//!   endpoint, whose head carries the chain degree
//! - Super nodes: above a degree threshold a node's chain splits into per-type,
//!   per-direction groups
//! - Batched chain iteration with resumable positions and O(1) degree counts
//! - Read and write transactions with record locks, ordered commands, a
//!   logical log and crash recovery
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               GraphDatabase                  │
//! │     (open, recovery, caches, tx factory)     │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │            Transaction Layer                 │
//! │  (Read/Write tx, Commands, Locks, Log)       │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │               Chain Layer                    │
//! │  (Positions, Batch fetch, Degree counts)     │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │              Storage Layer                   │
//! │  (Record stores, Dynamic stores, Meta)       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use strand_core::{GraphDatabase, NeoStoreTransaction};
//!
//! # fn main() -> strand_core::Result<()> {
//! let db = GraphDatabase::open("./data")?;
//! let mut tx = db.begin_write();
//! let knows = tx.create_relationship_type("KNOWS")?;
//! let alice = tx.node_create()?;
//! let bob = tx.node_create()?;
//! tx.relationship_create(knows, alice, bob)?;
//! tx.prepare()?;
//! tx.commit()?;
//!
//! assert_eq!(db.begin_read().get_relationship_count(alice, None, None)?, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod chain;
pub mod config;
pub mod database;
pub mod error;
pub mod lock;
pub mod storage;
pub mod transaction;
pub mod wal;

pub use chain::{ChainPosition, Direction, RelationshipBatch, RelationshipType};
pub use config::StoreConfig;
pub use database::GraphDatabase;
pub use error::{Error, Result};
pub use storage::{NO_NEXT, PropertyOwner, PropertyValue};
pub use transaction::{
    NeoStoreTransaction, NodeState, PropertyData, PropertyMap, ReadTransaction, TxState,
    WriteTransaction,
};
