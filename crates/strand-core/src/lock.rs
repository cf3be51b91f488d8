//! Record-level write locks
//!
//! A write transaction takes an exclusive lock on every node, relationship
//! and group record it is about to modify, so concurrent transactions can
//! only change disjoint parts of a chain. Locks are re-entrant for the
//! holding transaction and released when their guards drop, which happens
//! when the transaction ends.

use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Resource type for locking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Node record
    Node,
    /// Relationship record
    Relationship,
    /// Relationship group record
    RelationshipGroup,
    /// Graph property chain head
    Graph,
}

/// Resource identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId {
    /// Resource type
    pub resource_type: ResourceType,
    /// Resource ID
    pub id: u64,
}

impl ResourceId {
    /// Lock surrogate of a node
    pub fn node(id: u64) -> Self {
        Self {
            resource_type: ResourceType::Node,
            id,
        }
    }

    /// Lock surrogate of a relationship
    pub fn relationship(id: u64) -> Self {
        Self {
            resource_type: ResourceType::Relationship,
            id,
        }
    }

    /// Lock surrogate of a relationship group
    pub fn group(id: u64) -> Self {
        Self {
            resource_type: ResourceType::RelationshipGroup,
            id,
        }
    }

    /// Lock surrogate of the graph property chain
    pub fn graph() -> Self {
        Self {
            resource_type: ResourceType::Graph,
            id: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LockHolder {
    tx_id: u64,
    acquired_at: Instant,
}

/// Write lock manager shared by all transactions of a database
#[derive(Debug, Clone)]
pub struct LockManager {
    locks: Arc<RwLock<HashMap<ResourceId, LockHolder>>>,
    default_timeout: Duration,
}

impl LockManager {
    /// Create a lock manager that waits at most `timeout` per acquisition
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Arc::new(RwLock::new(HashMap::new())),
            default_timeout: timeout,
        }
    }

    /// Acquire a write lock for `tx_id`.
    ///
    /// Returns `None` when `tx_id` already holds the lock.
    pub fn acquire_write(&self, tx_id: u64, resource: ResourceId) -> Result<Option<LockGuard>> {
        self.acquire_write_with_timeout(tx_id, resource, self.default_timeout)
    }

    /// Acquire a write lock, waiting at most `timeout`
    pub fn acquire_write_with_timeout(
        &self,
        tx_id: u64,
        resource: ResourceId,
        timeout: Duration,
    ) -> Result<Option<LockGuard>> {
        let start = Instant::now();

        loop {
            {
                let mut locks = self.locks.write();
                match locks.get(&resource) {
                    Some(holder) if holder.tx_id == tx_id => return Ok(None),
                    Some(_) => {}
                    None => {
                        locks.insert(
                            resource,
                            LockHolder {
                                tx_id,
                                acquired_at: Instant::now(),
                            },
                        );
                        return Ok(Some(LockGuard {
                            manager: self.clone(),
                            tx_id,
                            resource,
                        }));
                    }
                }
            }

            if start.elapsed() >= timeout {
                return Err(Error::LockTimeout(format!(
                    "Failed to acquire write lock on {:?} for tx {} within {:?}",
                    resource, tx_id, timeout
                )));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn release(&self, tx_id: u64, resource: ResourceId) {
        let mut locks = self.locks.write();
        if locks.get(&resource).is_some_and(|h| h.tx_id == tx_id) {
            locks.remove(&resource);
        }
    }

    /// Holder of `resource`, if locked
    pub fn holder(&self, resource: ResourceId) -> Option<u64> {
        self.locks.read().get(&resource).map(|h| h.tx_id)
    }

    /// Lock statistics
    pub fn stats(&self) -> LockStats {
        let locks = self.locks.read();
        let oldest = locks.values().map(|h| h.acquired_at.elapsed()).max();
        LockStats {
            held: locks.len(),
            oldest,
        }
    }
}

/// Lock guard that releases the lock when dropped
#[derive(Debug)]
pub struct LockGuard {
    manager: LockManager,
    tx_id: u64,
    resource: ResourceId,
}

impl LockGuard {
    /// Locked resource
    pub fn resource(&self) -> ResourceId {
        self.resource
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.manager.release(self.tx_id, self.resource);
    }
}

/// Lock statistics
#[derive(Debug, Clone)]
pub struct LockStats {
    /// Number of locked resources
    pub held: usize,
    /// Age of the oldest lock
    pub oldest: Option<Duration>,
}
