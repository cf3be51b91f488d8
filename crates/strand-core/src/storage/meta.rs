//! Store-wide metadata: last committed transaction and graph properties

use super::NO_NEXT;
use super::mapped_file::MappedFile;
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use parking_lot::{Mutex, RwLock};
use std::path::Path;

const META_MAGIC: [u8; 8] = *b"STRANDMS";

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MetaDisk {
    magic: [u8; 8],
    last_committed_tx: u64,
    graph_next_prop: u64,
    _reserved: u64,
}

#[derive(Debug, Clone, Copy)]
struct MetaState {
    last_committed_tx: u64,
    graph_next_prop: u64,
    recovered: bool,
}

/// Metadata record of a graph store
pub struct MetaStore {
    file: Mutex<MappedFile>,
    state: RwLock<MetaState>,
}

impl MetaStore {
    /// Open or create `meta.store` at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let size = std::mem::size_of::<MetaDisk>();
        let mut file = MappedFile::open(path, size)?;
        let disk = if file.was_created() {
            let disk = MetaDisk {
                magic: META_MAGIC,
                last_committed_tx: 0,
                graph_next_prop: NO_NEXT,
                _reserved: 0,
            };
            file.write(0, bytemuck::bytes_of(&disk))?;
            disk
        } else {
            let disk: MetaDisk = bytemuck::pod_read_unaligned(file.read(0, size)?);
            if disk.magic != META_MAGIC {
                return Err(Error::storage(format!("{:?} is not a meta store", file.path())));
            }
            disk
        };

        Ok(Self {
            file: Mutex::new(file),
            state: RwLock::new(MetaState {
                last_committed_tx: disk.last_committed_tx,
                graph_next_prop: disk.graph_next_prop,
                recovered: false,
            }),
        })
    }

    fn persist(&self, state: &MetaState) -> Result<()> {
        let disk = MetaDisk {
            magic: META_MAGIC,
            last_committed_tx: state.last_committed_tx,
            graph_next_prop: state.graph_next_prop,
            _reserved: 0,
        };
        self.file.lock().write(0, bytemuck::bytes_of(&disk))
    }

    /// Id of the last committed transaction
    pub fn last_committed_tx(&self) -> u64 {
        self.state.read().last_committed_tx
    }

    /// Advance the last committed transaction.
    ///
    /// Outside recovery `tx_id` must be exactly one past the current value.
    /// While recovering, replayed ids only ever move the marker forward.
    pub fn set_last_committed_tx(&self, tx_id: u64) -> Result<()> {
        let mut state = self.state.write();
        if state.recovered {
            state.last_committed_tx = state.last_committed_tx.max(tx_id);
        } else if tx_id == state.last_committed_tx + 1 {
            state.last_committed_tx = tx_id;
        } else {
            return Err(Error::invalid_state(format!(
                "Attempt to commit tx {} but last committed tx is {}",
                tx_id, state.last_committed_tx
            )));
        }
        self.persist(&state)
    }

    /// Head of the graph property chain
    pub fn graph_next_prop(&self) -> u64 {
        self.state.read().graph_next_prop
    }

    /// Replace the head of the graph property chain
    pub fn set_graph_next_prop(&self, id: u64) -> Result<()> {
        let mut state = self.state.write();
        state.graph_next_prop = id;
        self.persist(&state)
    }

    /// Flag recovery replay in progress
    pub fn set_recovered(&self, recovered: bool) {
        self.state.write().recovered = recovered;
    }

    /// Whether recovery replay is in progress
    pub fn is_recovered(&self) -> bool {
        self.state.read().recovered
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.file.lock().flush()
    }
}
