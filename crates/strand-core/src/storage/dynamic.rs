//! Chained overflow blocks for variable-length payloads

use super::NO_NEXT;
use super::record_store::RecordStore;
use super::records::{DYNAMIC_PAYLOAD_SIZE, DynamicRecord};
use crate::{Error, Result};
use std::path::Path;

/// Store of fixed-size blocks chained into variable-length values
pub struct DynamicStore {
    records: RecordStore<DynamicRecord>,
}

impl DynamicStore {
    /// Open or create a dynamic store file
    pub fn open<P: AsRef<Path>>(path: P, initial_size: usize) -> Result<Self> {
        Ok(Self {
            records: RecordStore::open(path, initial_size)?,
        })
    }

    /// Split `bytes` into a chain of freshly allocated records.
    ///
    /// The records are not written; they travel with the owning record's
    /// command until commit. An empty value still gets one record so that
    /// it has an address.
    pub fn allocate_records(&self, bytes: &[u8]) -> Vec<DynamicRecord> {
        let mut records: Vec<DynamicRecord> = if bytes.is_empty() {
            vec![DynamicRecord::new(self.records.next_id(), Vec::new())]
        } else {
            bytes
                .chunks(DYNAMIC_PAYLOAD_SIZE)
                .map(|chunk| DynamicRecord::new(self.records.next_id(), chunk.to_vec()))
                .collect()
        };
        for i in 1..records.len() {
            let next_id = records[i].id;
            records[i - 1].next = next_id;
        }
        records
    }

    /// Load the chain starting at `first`
    pub fn read_chain(&self, first: u64) -> Result<Vec<DynamicRecord>> {
        let limit = self.records.high_id();
        let mut chain = Vec::new();
        let mut next = first;
        while next != NO_NEXT {
            if chain.len() as u64 > limit {
                return Err(Error::invalid_record(format!(
                    "Dynamic chain starting at {} is cyclic",
                    first
                )));
            }
            let record = self.records.get_in_use(next)?;
            next = record.next;
            chain.push(record);
        }
        Ok(chain)
    }

    /// Concatenate the payloads of a chain
    pub fn concat(records: &[DynamicRecord]) -> Vec<u8> {
        records.iter().flat_map(|r| r.data.iter().copied()).collect()
    }

    /// Write one record
    pub fn update(&self, record: &DynamicRecord) -> Result<()> {
        self.records.update(record)
    }

    /// Return an id for reuse
    pub fn free_id(&self, id: u64) {
        self.records.free_id(id)
    }

    /// One past the highest id ever handed out
    pub fn high_id(&self) -> u64 {
        self.records.high_id()
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.records.flush()
    }
}
