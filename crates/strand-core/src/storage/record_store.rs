//! Fixed-length record store with free-id reuse
//!
//! Layout: a 32-byte [`StoreHeader`] followed by records of
//! `size_of::<R::Disk>()` bytes each, so record `id` lives at
//! `HEADER_SIZE + id * record_size`.

use super::mapped_file::MappedFile;
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::path::Path;

const STORE_MAGIC: [u8; 8] = *b"STRANDRS";
const STORE_VERSION: u32 = 1;

/// Size of the store header in bytes
pub const HEADER_SIZE: usize = 32;

/// On-disk store header
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct StoreHeader {
    magic: [u8; 8],
    version: u32,
    record_size: u32,
    high_id: u64,
    _reserved: u64,
}

/// A record type that can live in a [`RecordStore`]
pub trait StoreRecord: Sized {
    /// Fixed-size on-disk representation
    type Disk: Pod;

    /// Human readable record kind, used in error messages
    const KIND: &'static str;

    /// Record id
    fn id(&self) -> u64;

    /// Whether the record is in use
    fn in_use(&self) -> bool;

    /// Encode to the on-disk layout
    fn to_disk(&self) -> Self::Disk;

    /// Decode from the on-disk layout
    fn from_disk(id: u64, disk: &Self::Disk) -> Self;

    /// In-use flag of an encoded record, checked without decoding it
    fn disk_in_use(disk: &Self::Disk) -> bool;
}

#[derive(Debug, Default)]
struct IdGenerator {
    high_id: u64,
    free: BTreeSet<u64>,
}

/// Store of fixed-length records keyed by sequential id
pub struct RecordStore<R: StoreRecord> {
    file: RwLock<MappedFile>,
    ids: Mutex<IdGenerator>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: StoreRecord> RecordStore<R> {
    const RECORD_SIZE: usize = std::mem::size_of::<R::Disk>();

    /// Open or create a store file
    pub fn open<P: AsRef<Path>>(path: P, initial_size: usize) -> Result<Self> {
        let mut file = MappedFile::open(path, initial_size.max(HEADER_SIZE))?;

        let high_id = if file.was_created() {
            let header = StoreHeader {
                magic: STORE_MAGIC,
                version: STORE_VERSION,
                record_size: Self::RECORD_SIZE as u32,
                high_id: 0,
                _reserved: 0,
            };
            file.write(0, bytemuck::bytes_of(&header))?;
            0
        } else {
            let header: StoreHeader = bytemuck::pod_read_unaligned(file.read(0, HEADER_SIZE)?);
            if header.magic != STORE_MAGIC {
                return Err(Error::storage(format!(
                    "{:?} is not a {} store",
                    file.path(),
                    R::KIND
                )));
            }
            if header.version != STORE_VERSION || header.record_size as usize != Self::RECORD_SIZE
            {
                return Err(Error::storage(format!(
                    "{:?}: unsupported layout (version {}, record size {}, expected {})",
                    file.path(),
                    header.version,
                    header.record_size,
                    Self::RECORD_SIZE
                )));
            }
            header.high_id
        };

        let store = Self {
            file: RwLock::new(file),
            ids: Mutex::new(IdGenerator {
                high_id,
                free: BTreeSet::new(),
            }),
            _marker: PhantomData,
        };
        store.rebuild_id_generator()?;
        Ok(store)
    }

    /// Rescan the store and rebuild the free-id list from not-in-use records.
    /// The high id is raised past any in-use record the header missed.
    pub fn rebuild_id_generator(&self) -> Result<()> {
        let mut ids = self.ids.lock();
        let file = self.file.read();
        let capacity = (file.len().saturating_sub(HEADER_SIZE) / Self::RECORD_SIZE) as u64;
        for id in (ids.high_id..capacity).rev() {
            if Self::read_disk(&file, id)?.is_some_and(|disk| R::disk_in_use(&disk)) {
                ids.high_id = id + 1;
                break;
            }
        }
        ids.free.clear();
        for id in 0..ids.high_id {
            let in_use = match Self::read_disk(&file, id)? {
                Some(disk) => R::disk_in_use(&disk),
                None => false,
            };
            if !in_use {
                ids.free.insert(id);
            }
        }
        tracing::debug!(
            "Rebuilt {} id generator: high_id={}, free={}",
            R::KIND,
            ids.high_id,
            ids.free.len()
        );
        Ok(())
    }

    fn offset(id: u64) -> usize {
        HEADER_SIZE + id as usize * Self::RECORD_SIZE
    }

    /// Records past the end of the mapped file read as `None` (never written)
    fn read_disk(file: &MappedFile, id: u64) -> Result<Option<R::Disk>> {
        let offset = Self::offset(id);
        if offset + Self::RECORD_SIZE > file.len() {
            return Ok(None);
        }
        let bytes = file.read(offset, Self::RECORD_SIZE)?;
        Ok(Some(bytemuck::pod_read_unaligned(bytes)))
    }

    /// Load a record, in use or not. Fails with `NotFound` when `id` is
    /// at or above the high id.
    pub fn get(&self, id: u64) -> Result<R> {
        let high_id = self.high_id();
        if id >= high_id {
            return Err(Error::not_found(format!(
                "{}[{}] (high id {})",
                R::KIND,
                id,
                high_id
            )));
        }
        let file = self.file.read();
        let disk = Self::read_disk(&file, id)?.unwrap_or_else(<R::Disk as Zeroable>::zeroed);
        Ok(R::from_disk(id, &disk))
    }

    /// Load a record that must be in use
    pub fn get_in_use(&self, id: u64) -> Result<R> {
        let record = self.get(id)?;
        if !record.in_use() {
            return Err(Error::not_found(format!("{}[{}] not in use", R::KIND, id)));
        }
        Ok(record)
    }

    /// Next id to use: the lowest freed id, otherwise the high id
    pub fn next_id(&self) -> u64 {
        let mut ids = self.ids.lock();
        if let Some(id) = ids.free.pop_first() {
            return id;
        }
        let id = ids.high_id;
        ids.high_id += 1;
        id
    }

    /// Return an id for reuse
    pub fn free_id(&self, id: u64) {
        let mut ids = self.ids.lock();
        if id < ids.high_id {
            ids.free.insert(id);
        }
    }

    /// Write a record. A record written as not in use has its id freed.
    pub fn update(&self, record: &R) -> Result<()> {
        let id = record.id();
        let disk = record.to_disk();
        {
            let mut file = self.file.write();
            file.write(Self::offset(id), bytemuck::bytes_of(&disk))?;
        }

        let mut ids = self.ids.lock();
        if id >= ids.high_id {
            // Replayed records can land past the current high id
            for gap in ids.high_id..id {
                ids.free.insert(gap);
            }
            ids.high_id = id + 1;
        }
        if record.in_use() {
            ids.free.remove(&id);
        } else {
            ids.free.insert(id);
        }
        Ok(())
    }

    /// One past the highest id ever handed out
    pub fn high_id(&self) -> u64 {
        self.ids.lock().high_id
    }

    /// Number of ids waiting for reuse
    pub fn free_count(&self) -> usize {
        self.ids.lock().free.len()
    }

    /// Ids of every in-use record, in ascending order
    pub fn in_use_ids(&self) -> Result<Vec<u64>> {
        let high_id = self.high_id();
        let file = self.file.read();
        let mut result = Vec::new();
        for id in 0..high_id {
            if let Some(disk) = Self::read_disk(&file, id)? {
                if R::disk_in_use(&disk) {
                    result.push(id);
                }
            }
        }
        Ok(result)
    }

    /// Persist the high id and flush the mapping
    pub fn flush(&self) -> Result<()> {
        let high_id = self.high_id();
        let mut file = self.file.write();
        let mut header: StoreHeader = bytemuck::pod_read_unaligned(file.read(0, HEADER_SIZE)?);
        header.high_id = high_id;
        file.write(0, bytemuck::bytes_of(&header))?;
        file.flush()
    }
}
