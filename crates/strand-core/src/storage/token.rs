//! Name tokens: relationship types and property keys

use super::dynamic::DynamicStore;
use super::record_store::RecordStore;
use super::records::TokenRecord;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A resolved token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    /// Token id
    pub id: u32,
    /// Token name
    pub name: String,
}

/// Token records with their names in a dynamic store
pub struct TokenStore {
    records: RecordStore<TokenRecord>,
    names: DynamicStore,
}

impl TokenStore {
    /// Open `<name>.store` and `<name>.names.store` in `dir`
    pub fn open<P: AsRef<Path>>(dir: P, name: &str, initial_size: usize) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            records: RecordStore::open(dir.join(format!("{}.store", name)), initial_size)?,
            names: DynamicStore::open(dir.join(format!("{}.names.store", name)), initial_size)?,
        })
    }

    /// Next token id
    pub fn next_id(&self) -> Result<u32> {
        let id = self.records.next_id();
        u32::try_from(id).map_err(|_| Error::storage(format!("Token id space exhausted at {}", id)))
    }

    /// Return a token id for reuse
    pub fn free_id(&self, id: u32) {
        self.records.free_id(id as u64)
    }

    /// A new token record named `name`, not yet written
    pub fn create(&self, id: u32, name: &str) -> TokenRecord {
        TokenRecord::new(id, self.names.allocate_records(name.as_bytes()))
    }

    /// Load a token record light
    pub fn get(&self, id: u32) -> Result<TokenRecord> {
        self.records.get(id as u64)
    }

    /// Name of a token record, read from the store if the record is light
    pub fn name_of(&self, record: &TokenRecord) -> Result<String> {
        let bytes = if record.name_records.is_empty() {
            DynamicStore::concat(&self.names.read_chain(record.name_id)?)
        } else {
            DynamicStore::concat(&record.name_records)
        };
        String::from_utf8(bytes)
            .map_err(|e| Error::invalid_record(format!("Token[{}] name is not UTF-8: {}", record.id, e)))
    }

    /// Name of the in-use token `id`
    pub fn name(&self, id: u32) -> Result<String> {
        let record = self.records.get_in_use(id as u64)?;
        self.name_of(&record)
    }

    /// Every in-use token
    pub fn tokens(&self) -> Result<Vec<Token>> {
        self.records
            .in_use_ids()?
            .into_iter()
            .map(|id| {
                let id = id as u32;
                Ok(Token {
                    id,
                    name: self.name(id)?,
                })
            })
            .collect()
    }

    /// Write a token record and the name records it created
    pub fn update(&self, record: &TokenRecord) -> Result<()> {
        for name in record.name_records.iter().filter(|r| r.created) {
            self.names.update(name)?;
        }
        self.records.update(record)
    }

    /// Return the ids of name records created for a token that was never written
    pub fn free_name_ids(&self, record: &TokenRecord) {
        for name in record.name_records.iter().filter(|r| r.created) {
            self.names.free_id(name.id);
        }
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.records.flush()?;
        self.names.flush()
    }
}
