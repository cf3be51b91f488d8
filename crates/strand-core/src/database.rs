//! Database handle: opens the stores, recovers the log, hands out transactions

use crate::cache::CacheStats;
use crate::config::StoreConfig;
use crate::lock::{LockManager, LockStats};
use crate::storage::{GraphStore, KeyId, Token, TypeId};
use crate::transaction::{
    NeoStoreTransaction, PropertyMap, ReadTransaction, TransactionContext, WriteTransaction,
};
use crate::wal::LogicalLog;
use crate::Result;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Log file name inside the database directory
pub const LOG_FILE: &str = "tx.log";

/// An open graph database directory
pub struct GraphDatabase {
    ctx: Arc<TransactionContext>,
}

impl GraphDatabase {
    /// Open or create a database in `dir` with the default configuration
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with_config(dir, StoreConfig::default())
    }

    /// Open or create a database in `dir`, replaying committed transactions
    /// the log holds but the stores may lack
    pub fn open_with_config<P: AsRef<Path>>(dir: P, config: StoreConfig) -> Result<Self> {
        let store = GraphStore::open(dir, config)?;
        let log = LogicalLog::open(store.dir().join(LOG_FILE), store.config().sync_log_on_commit)?;
        let locks = LockManager::new(store.config().lock_timeout());

        let db = Self {
            ctx: Arc::new(TransactionContext {
                store,
                locks,
                log,
                caches: Default::default(),
                commit_lock: Mutex::new(()),
            }),
        };
        let recovered = db.recover()?;
        db.load_tokens()?;

        tracing::info!(
            "Opened graph database at {:?} (last tx {}, {} transactions recovered)",
            db.ctx.store.dir(),
            db.last_committed_tx(),
            recovered
        );
        Ok(db)
    }

    /// Replay every logged commit without a `Done` marker, in commit order
    fn recover(&self) -> Result<usize> {
        let ctx = &self.ctx;
        let transactions = ctx.log.recoverable_transactions()?;
        if transactions.is_empty() {
            ctx.log.truncate()?;
            return Ok(0);
        }

        ctx.store.meta.set_recovered(true);
        let replay = || -> Result<()> {
            for tx in &transactions {
                tracing::info!(
                    "Recovering tx {} ({} commands) from {:?}",
                    tx.tx_id,
                    tx.commands.len(),
                    ctx.log.path()
                );
                for command in &tx.commands {
                    command.execute(&ctx.store)?;
                    command.invalidate(&ctx.caches);
                }
                ctx.store.meta.set_last_committed_tx(tx.tx_id)?;
            }
            Ok(())
        };
        let result = replay();
        ctx.store.meta.set_recovered(false);
        result?;

        ctx.store.rebuild_id_generators()?;
        ctx.store.flush()?;
        ctx.log.truncate()?;
        Ok(transactions.len())
    }

    fn load_tokens(&self) -> Result<()> {
        let store = &self.ctx.store;
        let tokens = &self.ctx.caches.tokens;
        tokens.relationship_types.reload(&store.relationship_types.tokens()?);
        tokens.property_keys.reload(&store.property_keys.tokens()?);
        Ok(())
    }

    /// Start a read-only transaction
    pub fn begin_read(&self) -> ReadTransaction {
        ReadTransaction::new(Arc::clone(&self.ctx))
    }

    /// Start a write transaction
    pub fn begin_write(&self) -> WriteTransaction {
        WriteTransaction::new(Arc::clone(&self.ctx))
    }

    /// Committed properties of a node, served from the entity cache
    pub fn node_properties(&self, node_id: u64) -> Result<PropertyMap> {
        self.ctx
            .caches
            .entities
            .node_properties(node_id, || self.begin_read().node_load_properties(node_id, false))
    }

    /// Committed properties of a relationship, served from the entity cache
    pub fn relationship_properties(&self, rel_id: u64) -> Result<PropertyMap> {
        self.ctx
            .caches
            .entities
            .relationship_properties(rel_id, || self.begin_read().rel_load_properties(rel_id, false))
    }

    /// Id of a committed relationship type
    pub fn relationship_type_id(&self, name: &str) -> Option<TypeId> {
        self.ctx.caches.tokens.relationship_types.id(name)
    }

    /// Id of a committed property key
    pub fn property_key_id(&self, name: &str) -> Option<KeyId> {
        self.ctx.caches.tokens.property_keys.id(name)
    }

    /// Every committed relationship type
    pub fn relationship_types(&self) -> Vec<Token> {
        self.ctx.caches.tokens.relationship_types.tokens()
    }

    /// Drop every cached entity and reload the token caches from the stores
    pub fn clear_caches(&self) -> Result<()> {
        self.ctx.caches.clear();
        self.load_tokens()
    }

    /// Entity cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.ctx.caches.entities.stats()
    }

    /// Record locks currently held
    pub fn lock_stats(&self) -> LockStats {
        self.ctx.locks.stats()
    }

    /// Id of the last committed transaction
    pub fn last_committed_tx(&self) -> u64 {
        self.ctx.store.meta.last_committed_tx()
    }

    /// Configuration in effect
    pub fn config(&self) -> &StoreConfig {
        self.ctx.store.config()
    }

    /// Underlying record stores
    pub fn store(&self) -> &GraphStore {
        &self.ctx.store
    }

    /// Flush the stores and clear the caches. The log is emptied unless a
    /// write transaction is between prepare and done.
    pub fn close(self) -> Result<()> {
        let ctx = &self.ctx;
        if !ctx.log.truncate_if_idle(0, || ctx.store.flush())? {
            ctx.store.flush()?;
            tracing::warn!(
                "Closing {:?} with {} prepared transactions; keeping the logical log",
                ctx.store.dir(),
                ctx.log.open_transactions()
            );
        }
        self.ctx.caches.clear();
        tracing::info!("Closed graph database at {:?}", self.ctx.store.dir());
        Ok(())
    }
}
