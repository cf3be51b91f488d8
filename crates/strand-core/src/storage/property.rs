//! Property records, packed property blocks and value encoding
//!
//! A property record carries up to [`PROPERTY_PAYLOAD_WORDS`] 64-bit words
//! of blocks. Each block starts with a header word:
//!
//! ```text
//! bits  0..24  property key id
//! bits 24..28  value type
//! bits 28..64  inline payload (36 bits)
//! ```
//!
//! Booleans and ints that fit 36 bits live in the header alone. Other ints
//! and floats take one extra word. Strings up to 24 bytes are stored inline
//! after the header; longer strings and arrays point at a dynamic record
//! chain.

use super::dynamic::DynamicStore;
use super::record_store::{RecordStore, StoreRecord};
use super::records::DynamicRecord;
use super::{KeyId, NO_NEXT};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Words of block payload a property record can hold
pub const PROPERTY_PAYLOAD_WORDS: usize = 4;

/// Bytes of block payload a property record can hold
pub const PROPERTY_PAYLOAD_SIZE: usize = PROPERTY_PAYLOAD_WORDS * 8;

/// Longest string stored inline in a block
pub const SHORT_STRING_MAX: usize = (PROPERTY_PAYLOAD_WORDS - 1) * 8;

/// Largest encodable property key id
pub const MAX_KEY_ID: KeyId = (1 << 24) - 1;

const KEY_MASK: u64 = 0xFF_FFFF;
const TYPE_SHIFT: u32 = 24;
const PAYLOAD_SHIFT: u32 = 28;
const SHORT_INT_MIN: i64 = -(1 << 35);
const SHORT_INT_MAX: i64 = (1 << 35) - 1;

/// A property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Array of 64-bit signed integers
    IntArray(Vec<i64>),
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<i64>> for PropertyValue {
    fn from(v: Vec<i64>) -> Self {
        Self::IntArray(v)
    }
}

/// Encoded value type stored in a block header
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    /// Boolean, inline
    Bool = 1,
    /// Integer fitting the 36-bit inline payload
    ShortInt = 2,
    /// Integer in a second word
    Int = 3,
    /// Float in a second word
    Float = 4,
    /// String of at most [`SHORT_STRING_MAX`] bytes, inline
    ShortString = 5,
    /// String in a dynamic record chain
    String = 6,
    /// Integer array in a dynamic record chain
    IntArray = 7,
}

impl TryFrom<u8> for PropertyType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Bool),
            2 => Ok(Self::ShortInt),
            3 => Ok(Self::Int),
            4 => Ok(Self::Float),
            5 => Ok(Self::ShortString),
            6 => Ok(Self::String),
            7 => Ok(Self::IntArray),
            other => Err(Error::invalid_record(format!(
                "Unknown property type {}",
                other
            ))),
        }
    }
}

impl PropertyType {
    /// Whether the value lives in dynamic records
    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::String | Self::IntArray)
    }
}

fn header(key_id: KeyId, kind: PropertyType, payload: u64) -> u64 {
    (key_id as u64 & KEY_MASK) | ((kind as u64) << TYPE_SHIFT) | (payload << PAYLOAD_SHIFT)
}

fn header_type(header: u64) -> Result<PropertyType> {
    PropertyType::try_from(((header >> TYPE_SHIFT) & 0xF) as u8)
}

fn header_payload(header: u64) -> u64 {
    header >> PAYLOAD_SHIFT
}

/// Number of words a block occupies, derived from its header
fn words_for_header(header: u64) -> Result<usize> {
    Ok(match header_type(header)? {
        PropertyType::Bool | PropertyType::ShortInt => 1,
        PropertyType::Int | PropertyType::Float => 2,
        PropertyType::String | PropertyType::IntArray => 2,
        PropertyType::ShortString => 1 + (header_payload(header) as usize).div_ceil(8),
    })
}

/// One encoded property inside a property record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyBlock {
    /// Encoded words, header first
    pub words: Vec<u64>,
    /// Dynamic records of a heavy block
    pub value_records: Vec<DynamicRecord>,
}

impl PropertyBlock {
    /// Property key id
    pub fn key_id(&self) -> KeyId {
        (self.words[0] & KEY_MASK) as KeyId
    }

    /// Encoded value type
    pub fn property_type(&self) -> Result<PropertyType> {
        header_type(self.words[0])
    }

    /// Size in bytes inside a property record
    pub fn size(&self) -> usize {
        self.words.len() * 8
    }

    /// First dynamic record of a dynamic value
    pub fn dynamic_pointer(&self) -> Option<u64> {
        match self.property_type() {
            Ok(kind) if kind.is_dynamic() => self.words.get(1).copied(),
            _ => None,
        }
    }

    /// A dynamic value whose records have not been loaded
    pub fn is_light(&self) -> bool {
        self.dynamic_pointer().is_some() && self.value_records.is_empty()
    }
}

/// Primitive a property chain belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyOwner {
    /// A node
    Node(u64),
    /// A relationship
    Relationship(u64),
    /// The graph itself (owner id -1)
    Graph,
}

impl PropertyOwner {
    fn to_raw(self) -> (u8, u64) {
        match self {
            Self::Node(id) => (1, id),
            Self::Relationship(id) => (2, id),
            Self::Graph => (3, NO_NEXT),
        }
    }

    fn from_raw(kind: u8, id: u64) -> Self {
        match kind {
            1 => Self::Node(id),
            2 => Self::Relationship(id),
            _ => Self::Graph,
        }
    }
}

/// Property record: one link in a primitive's property chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    /// Record id
    pub id: u64,
    /// In-use flag
    pub in_use: bool,
    /// Created by the transaction holding this copy
    pub created: bool,
    /// Previous record in the chain
    pub prev_prop: u64,
    /// Next record in the chain
    pub next_prop: u64,
    /// Owning primitive
    pub owner: PropertyOwner,
    /// Packed blocks
    pub blocks: Vec<PropertyBlock>,
    /// Blocks removed by the transaction; their dynamic records are
    /// released when the record is written
    pub removed_blocks: Vec<PropertyBlock>,
}

impl PropertyRecord {
    /// A freshly created, empty record
    pub fn new(id: u64, owner: PropertyOwner) -> Self {
        Self {
            id,
            in_use: true,
            created: true,
            prev_prop: NO_NEXT,
            next_prop: NO_NEXT,
            owner,
            blocks: Vec::new(),
            removed_blocks: Vec::new(),
        }
    }

    /// Bytes of payload in use
    pub fn size(&self) -> usize {
        self.blocks.iter().map(PropertyBlock::size).sum()
    }

    /// Whether `block` fits next to the existing blocks
    pub fn has_space_for(&self, block: &PropertyBlock) -> bool {
        self.size() + block.size() <= PROPERTY_PAYLOAD_SIZE
    }

    /// Block for `key_id`
    pub fn block(&self, key_id: KeyId) -> Option<&PropertyBlock> {
        self.blocks.iter().find(|b| b.key_id() == key_id)
    }

    /// Append a block
    pub fn add_block(&mut self, block: PropertyBlock) {
        self.blocks.push(block);
    }

    /// Take the block for `key_id` out of this record
    pub fn remove_block(&mut self, key_id: KeyId) -> Option<PropertyBlock> {
        let index = self.blocks.iter().position(|b| b.key_id() == key_id)?;
        Some(self.blocks.remove(index))
    }
}

/// Disk layout of [`PropertyRecord`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PropertyDisk {
    in_use: u8,
    owner_kind: u8,
    block_count: u8,
    _padding0: u8,
    _padding1: u32,
    prev_prop: u64,
    next_prop: u64,
    owner_id: u64,
    payload: [u64; PROPERTY_PAYLOAD_WORDS],
}

impl StoreRecord for PropertyRecord {
    type Disk = PropertyDisk;
    const KIND: &'static str = "Property";

    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn to_disk(&self) -> PropertyDisk {
        let mut payload = [0u64; PROPERTY_PAYLOAD_WORDS];
        let mut words = self.blocks.iter().flat_map(|b| b.words.iter().copied());
        for slot in payload.iter_mut() {
            match words.next() {
                Some(word) => *slot = word,
                None => break,
            }
        }
        let (owner_kind, owner_id) = self.owner.to_raw();
        PropertyDisk {
            in_use: self.in_use as u8,
            owner_kind,
            block_count: self.blocks.len() as u8,
            _padding0: 0,
            _padding1: 0,
            prev_prop: self.prev_prop,
            next_prop: self.next_prop,
            owner_id,
            payload,
        }
    }

    fn from_disk(id: u64, disk: &PropertyDisk) -> Self {
        let mut blocks = Vec::with_capacity(disk.block_count as usize);
        let mut offset = 0;
        for _ in 0..disk.block_count {
            let Some(&head) = disk.payload.get(offset) else {
                break;
            };
            let Ok(len) = words_for_header(head) else {
                break;
            };
            if offset + len > PROPERTY_PAYLOAD_WORDS {
                break;
            }
            blocks.push(PropertyBlock {
                words: disk.payload[offset..offset + len].to_vec(),
                value_records: Vec::new(),
            });
            offset += len;
        }
        Self {
            id,
            in_use: disk.in_use != 0,
            created: false,
            prev_prop: disk.prev_prop,
            next_prop: disk.next_prop,
            owner: PropertyOwner::from_raw(disk.owner_kind, disk.owner_id),
            blocks,
            removed_blocks: Vec::new(),
        }
    }

    fn disk_in_use(disk: &PropertyDisk) -> bool {
        disk.in_use != 0
    }
}

/// Property records plus the string and array overflow stores
pub struct PropertyStore {
    records: RecordStore<PropertyRecord>,
    strings: DynamicStore,
    arrays: DynamicStore,
}

impl PropertyStore {
    /// Open or create the property store files in `dir`
    pub fn open<P: AsRef<Path>>(dir: P, initial_size: usize) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            records: RecordStore::open(dir.join("properties.store"), initial_size)?,
            strings: DynamicStore::open(dir.join("properties.strings.store"), initial_size)?,
            arrays: DynamicStore::open(dir.join("properties.arrays.store"), initial_size)?,
        })
    }

    /// Load a record light: dynamic values are not read
    pub fn get(&self, id: u64) -> Result<PropertyRecord> {
        self.records.get(id)
    }

    /// Next property record id
    pub fn next_id(&self) -> u64 {
        self.records.next_id()
    }

    /// Return a property record id for reuse
    pub fn free_id(&self, id: u64) {
        self.records.free_id(id)
    }

    /// One past the highest property record id
    pub fn high_id(&self) -> u64 {
        self.records.high_id()
    }

    fn dynamic_store(&self, kind: PropertyType) -> &DynamicStore {
        match kind {
            PropertyType::IntArray => &self.arrays,
            _ => &self.strings,
        }
    }

    /// Encode `value` under `key_id`, allocating dynamic records if needed
    pub fn encode_value(&self, key_id: KeyId, value: &PropertyValue) -> Result<PropertyBlock> {
        if key_id > MAX_KEY_ID {
            return Err(Error::invalid_state(format!(
                "Property key id {} exceeds {}",
                key_id, MAX_KEY_ID
            )));
        }

        let block = match value {
            PropertyValue::Bool(v) => PropertyBlock {
                words: vec![header(key_id, PropertyType::Bool, *v as u64)],
                value_records: Vec::new(),
            },
            PropertyValue::Int(v) if (SHORT_INT_MIN..=SHORT_INT_MAX).contains(v) => {
                let payload = (*v as u64) & ((1 << 36) - 1);
                PropertyBlock {
                    words: vec![header(key_id, PropertyType::ShortInt, payload)],
                    value_records: Vec::new(),
                }
            }
            PropertyValue::Int(v) => PropertyBlock {
                words: vec![header(key_id, PropertyType::Int, 0), *v as u64],
                value_records: Vec::new(),
            },
            PropertyValue::Float(v) => PropertyBlock {
                words: vec![header(key_id, PropertyType::Float, 0), v.to_bits()],
                value_records: Vec::new(),
            },
            PropertyValue::String(s) if s.len() <= SHORT_STRING_MAX => {
                let bytes = s.as_bytes();
                let mut words = vec![header(key_id, PropertyType::ShortString, bytes.len() as u64)];
                for chunk in bytes.chunks(8) {
                    let mut buf = [0u8; 8];
                    buf[..chunk.len()].copy_from_slice(chunk);
                    words.push(u64::from_le_bytes(buf));
                }
                PropertyBlock {
                    words,
                    value_records: Vec::new(),
                }
            }
            PropertyValue::String(s) => {
                let records = self.strings.allocate_records(s.as_bytes());
                PropertyBlock {
                    words: vec![
                        header(key_id, PropertyType::String, s.len() as u64),
                        records[0].id,
                    ],
                    value_records: records,
                }
            }
            PropertyValue::IntArray(values) => {
                let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                let records = self.arrays.allocate_records(&bytes);
                PropertyBlock {
                    words: vec![
                        header(key_id, PropertyType::IntArray, values.len() as u64),
                        records[0].id,
                    ],
                    value_records: records,
                }
            }
        };
        Ok(block)
    }

    /// Load the dynamic records of a light block
    pub fn make_heavy(&self, block: &mut PropertyBlock) -> Result<()> {
        if let Some(pointer) = block.dynamic_pointer() {
            if block.value_records.is_empty() {
                let kind = block.property_type()?;
                block.value_records = self.dynamic_store(kind).read_chain(pointer)?;
            }
        }
        Ok(())
    }

    /// Decode the value of a block, reading dynamic records of light blocks
    pub fn value_of(&self, block: &PropertyBlock) -> Result<PropertyValue> {
        let head = block.words[0];
        let kind = header_type(head)?;
        let word = |i: usize| {
            block.words.get(i).copied().ok_or_else(|| {
                Error::invalid_record(format!("Property block of key {} is truncated", block.key_id()))
            })
        };

        match kind {
            PropertyType::Bool => Ok(PropertyValue::Bool(header_payload(head) != 0)),
            PropertyType::ShortInt => {
                let raw = header_payload(head);
                Ok(PropertyValue::Int(((raw << 28) as i64) >> 28))
            }
            PropertyType::Int => Ok(PropertyValue::Int(word(1)? as i64)),
            PropertyType::Float => Ok(PropertyValue::Float(f64::from_bits(word(1)?))),
            PropertyType::ShortString => {
                let len = header_payload(head) as usize;
                let bytes: Vec<u8> = block.words[1..]
                    .iter()
                    .flat_map(|w| w.to_le_bytes())
                    .take(len)
                    .collect();
                decode_string(bytes)
            }
            PropertyType::String | PropertyType::IntArray => {
                let loaded;
                let records = if block.value_records.is_empty() {
                    loaded = self.dynamic_store(kind).read_chain(word(1)?)?;
                    &loaded
                } else {
                    &block.value_records
                };
                let bytes = DynamicStore::concat(records);
                if kind == PropertyType::String {
                    decode_string(bytes)
                } else {
                    let values = bytes
                        .chunks_exact(8)
                        .map(|chunk| {
                            let mut buf = [0u8; 8];
                            buf.copy_from_slice(chunk);
                            i64::from_le_bytes(buf)
                        })
                        .collect();
                    Ok(PropertyValue::IntArray(values))
                }
            }
        }
    }

    /// Write a record along with the dynamic records it created or released
    pub fn update(&self, record: &PropertyRecord) -> Result<()> {
        if record.in_use {
            for block in &record.blocks {
                let store = self.dynamic_store(block.property_type()?);
                for value in block.value_records.iter().filter(|r| r.created) {
                    store.update(value)?;
                }
            }
        }
        for block in &record.removed_blocks {
            let store = self.dynamic_store(block.property_type()?);
            for value in &block.value_records {
                let mut released = value.clone();
                released.in_use = false;
                store.update(&released)?;
            }
        }
        self.records.update(record)
    }

    /// Return the ids of dynamic records a block created but never wrote
    pub fn free_value_ids(&self, block: &PropertyBlock) -> Result<()> {
        let store = self.dynamic_store(block.property_type()?);
        for value in block.value_records.iter().filter(|r| r.created) {
            store.free_id(value.id);
        }
        Ok(())
    }

    /// Flush all property files
    pub fn flush(&self) -> Result<()> {
        self.records.flush()?;
        self.strings.flush()?;
        self.arrays.flush()
    }
}

fn decode_string(bytes: Vec<u8>) -> Result<PropertyValue> {
    String::from_utf8(bytes)
        .map(PropertyValue::String)
        .map_err(|e| Error::invalid_record(format!("Property string is not UTF-8: {}", e)))
}
