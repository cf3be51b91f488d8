//! Logical log - write-ahead log of transaction commands
//!
//! `tx.log` is a sequence of frames:
//!
//! ```text
//! length: u32 LE | crc32(payload): u32 LE | payload: bincode(LogEntry)
//! ```
//!
//! A write transaction appends `Start`, its commands and `Prepare` when it
//! prepares, `Commit` before it touches the stores and `Done` afterwards.
//! A transaction with `Commit` but no `Done` is replayed on the next open.
//! A torn or corrupt tail ends the scan; everything before it is kept.
//!
//! Once every logged transaction has its `Done`, the stores hold all of
//! their effects and the log can be emptied; see [`LogicalLog::truncate_if_idle`].

use crate::transaction::Command;
use crate::{Error, Result};
use crc32fast::Hasher;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const FRAME_HEADER_SIZE: usize = 8;

/// One log entry. `identifier` tells interleaved transactions apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    /// Transaction started logging
    Start {
        /// Log identifier
        identifier: u64,
    },
    /// One command of the transaction
    Command {
        /// Log identifier
        identifier: u64,
        /// The command
        command: Command,
    },
    /// All commands are logged
    Prepare {
        /// Log identifier
        identifier: u64,
    },
    /// The transaction committed as `tx_id`
    Commit {
        /// Log identifier
        identifier: u64,
        /// Committed transaction id
        tx_id: u64,
    },
    /// Commands applied to the store (or transaction rolled back)
    Done {
        /// Log identifier
        identifier: u64,
    },
}

impl LogEntry {
    /// Identifier of the owning transaction
    pub fn identifier(&self) -> u64 {
        match self {
            Self::Start { identifier }
            | Self::Command { identifier, .. }
            | Self::Prepare { identifier }
            | Self::Commit { identifier, .. }
            | Self::Done { identifier } => *identifier,
        }
    }

    /// Encode as a frame
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }
}

/// A committed transaction whose commands may not all have reached the store
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredTransaction {
    /// Log identifier
    pub identifier: u64,
    /// Committed transaction id
    pub tx_id: u64,
    /// Commands in execution order
    pub commands: Vec<Command>,
}

/// Append-only logical log
pub struct LogicalLog {
    path: PathBuf,
    file: Mutex<File>,
    next_identifier: AtomicU64,
    sync_on_commit: bool,
    open: Mutex<BTreeSet<u64>>,
}

impl LogicalLog {
    /// Open or create the log at `path`
    pub fn open<P: AsRef<Path>>(path: P, sync_on_commit: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let log = Self {
            path,
            file: Mutex::new(file),
            next_identifier: AtomicU64::new(1),
            sync_on_commit,
            open: Mutex::new(BTreeSet::new()),
        };
        let next = log
            .read_entries()?
            .iter()
            .map(LogEntry::identifier)
            .max()
            .map_or(1, |max| max + 1);
        log.next_identifier.store(next, Ordering::SeqCst);
        Ok(log)
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, entries: &[LogEntry], sync: bool) -> Result<()> {
        let mut buf = Vec::new();
        for entry in entries {
            buf.extend_from_slice(&entry.encode()?);
        }
        let mut file = self.file.lock();
        file.write_all(&buf)
            .map_err(|e| Error::wal(format!("append to {:?} failed: {}", self.path, e)))?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Reserve an identifier for a new transaction
    pub fn next_identifier(&self) -> u64 {
        self.next_identifier.fetch_add(1, Ordering::SeqCst)
    }

    /// Log `Start`, every command and `Prepare`
    pub fn prepare(&self, identifier: u64, commands: &[Command]) -> Result<()> {
        let mut entries = Vec::with_capacity(commands.len() + 2);
        entries.push(LogEntry::Start { identifier });
        entries.extend(commands.iter().map(|command| LogEntry::Command {
            identifier,
            command: command.clone(),
        }));
        entries.push(LogEntry::Prepare { identifier });

        self.open.lock().insert(identifier);
        let result = self.append(&entries, false);
        if result.is_err() {
            self.open.lock().remove(&identifier);
        }
        result
    }

    /// Log `Commit`, syncing if configured
    pub fn commit(&self, identifier: u64, tx_id: u64) -> Result<()> {
        self.append(&[LogEntry::Commit { identifier, tx_id }], self.sync_on_commit)
    }

    /// Log `Done`
    pub fn done(&self, identifier: u64) -> Result<()> {
        self.append(&[LogEntry::Done { identifier }], false)?;
        self.open.lock().remove(&identifier);
        Ok(())
    }

    /// Number of transactions logged by this handle and not yet done
    pub fn open_transactions(&self) -> usize {
        self.open.lock().len()
    }

    /// Current size of the log file in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    /// Whether the log file is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Empty the log if it has grown to `min_len` bytes and no transaction
    /// is between `Start` and `Done`. `flush` runs first so the stores are
    /// durable before the entries that could rebuild them are dropped.
    /// Returns whether the log was truncated.
    pub fn truncate_if_idle(
        &self,
        min_len: u64,
        flush: impl FnOnce() -> Result<()>,
    ) -> Result<bool> {
        let open = self.open.lock();
        if !open.is_empty() || self.len()? < min_len {
            return Ok(false);
        }
        flush()?;
        self.truncate()?;
        Ok(true)
    }

    /// Every intact entry, stopping at the first torn or corrupt frame
    pub fn read_entries(&self) -> Result<Vec<LogEntry>> {
        let bytes = std::fs::read(&self.path)?;
        let mut entries = Vec::new();
        let mut offset = 0;

        while offset < bytes.len() {
            let Some(header) = bytes.get(offset..offset + FRAME_HEADER_SIZE) else {
                tracing::warn!("Ignoring torn frame header at offset {} of {:?}", offset, self.path);
                break;
            };
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let stored_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            let start = offset + FRAME_HEADER_SIZE;
            let Some(payload) = bytes.get(start..start + len) else {
                tracing::warn!("Ignoring torn frame at offset {} of {:?}", offset, self.path);
                break;
            };

            let mut hasher = Hasher::new();
            hasher.update(payload);
            if hasher.finalize() != stored_crc {
                tracing::warn!("CRC mismatch at offset {} of {:?}, ignoring tail", offset, self.path);
                break;
            }

            match bincode::deserialize::<LogEntry>(payload) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Undecodable frame at offset {} of {:?}: {}", offset, self.path, e);
                    break;
                }
            }
            offset = start + len;
        }
        Ok(entries)
    }

    /// Transactions with a `Commit` but no `Done`, ordered by transaction id
    pub fn recoverable_transactions(&self) -> Result<Vec<RecoveredTransaction>> {
        #[derive(Default)]
        struct Pending {
            commands: Vec<Command>,
            tx_id: Option<u64>,
            done: bool,
        }

        let mut pending: BTreeMap<u64, Pending> = BTreeMap::new();
        for entry in self.read_entries()? {
            let identifier = entry.identifier();
            match entry {
                LogEntry::Start { .. } => {
                    pending.insert(identifier, Pending::default());
                }
                LogEntry::Command { command, .. } => {
                    pending.entry(identifier).or_default().commands.push(command);
                }
                LogEntry::Prepare { .. } => {}
                LogEntry::Commit { tx_id, .. } => {
                    pending.entry(identifier).or_default().tx_id = Some(tx_id);
                }
                LogEntry::Done { .. } => {
                    pending.entry(identifier).or_default().done = true;
                }
            }
        }

        let mut recovered: Vec<RecoveredTransaction> = pending
            .into_iter()
            .filter(|(_, p)| !p.done)
            .filter_map(|(identifier, p)| {
                p.tx_id.map(|tx_id| RecoveredTransaction {
                    identifier,
                    tx_id,
                    commands: p.commands,
                })
            })
            .collect();
        recovered.sort_by_key(|tx| tx.tx_id);
        Ok(recovered)
    }

    /// Drop every entry
    pub fn truncate(&self) -> Result<()> {
        let file = self.file.lock();
        file.set_len(0)?;
        file.sync_all()?;
        tracing::debug!("Truncated logical log {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NodeRecord;
    use tempfile::TempDir;

    fn node_command(id: u64) -> Command {
        Command::Node(NodeRecord::new(id))
    }

    #[test]
    fn test_committed_without_done_is_recoverable() {
        let dir = TempDir::new().unwrap();
        let log = LogicalLog::open(dir.path().join("tx.log"), true).unwrap();

        let finished = log.next_identifier();
        log.prepare(finished, &[node_command(0)]).unwrap();
        log.commit(finished, 1).unwrap();
        log.done(finished).unwrap();

        let crashed = log.next_identifier();
        log.prepare(crashed, &[node_command(1), node_command(2)]).unwrap();
        log.commit(crashed, 2).unwrap();

        let prepared_only = log.next_identifier();
        log.prepare(prepared_only, &[node_command(3)]).unwrap();

        let recovered = log.recoverable_transactions().unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].identifier, crashed);
        assert_eq!(recovered[0].tx_id, 2);
        assert_eq!(recovered[0].commands, vec![node_command(1), node_command(2)]);
    }

    #[test]
    fn test_identifiers_continue_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.log");
        {
            let log = LogicalLog::open(&path, false).unwrap();
            let id = log.next_identifier();
            log.prepare(id, &[]).unwrap();
            let id = log.next_identifier();
            log.prepare(id, &[]).unwrap();
        }
        let log = LogicalLog::open(&path, false).unwrap();
        assert_eq!(log.next_identifier(), 3);
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.log");
        let log = LogicalLog::open(&path, false).unwrap();
        log.prepare(1, &[node_command(0)]).unwrap();
        log.commit(1, 1).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let intact = bytes.len();
        bytes.extend_from_slice(&LogEntry::Done { identifier: 1 }.encode().unwrap()[..5]);
        std::fs::write(&path, &bytes).unwrap();

        let entries = log.read_entries().unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, intact + 5);
        assert_eq!(log.recoverable_transactions().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_frame_stops_scan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.log");
        let log = LogicalLog::open(&path, false).unwrap();
        log.prepare(1, &[node_command(0)]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let entries = log.read_entries().unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_truncate_empties_log() {
        let dir = TempDir::new().unwrap();
        let log = LogicalLog::open(dir.path().join("tx.log"), false).unwrap();
        log.prepare(1, &[node_command(0)]).unwrap();
        log.commit(1, 1).unwrap();
        log.truncate().unwrap();
        assert!(log.read_entries().unwrap().is_empty());

        log.done(2).unwrap();
        assert_eq!(log.read_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_truncate_if_idle_waits_for_done() {
        let dir = TempDir::new().unwrap();
        let log = LogicalLog::open(dir.path().join("tx.log"), false).unwrap();
        let first = log.next_identifier();
        let second = log.next_identifier();
        log.prepare(first, &[node_command(0)]).unwrap();
        log.prepare(second, &[node_command(1)]).unwrap();
        log.commit(first, 1).unwrap();
        log.done(first).unwrap();
        assert_eq!(log.open_transactions(), 1);

        let mut flushed = false;
        assert!(!log.truncate_if_idle(0, || {
            flushed = true;
            Ok(())
        })
        .unwrap());
        assert!(!flushed);
        assert!(!log.is_empty().unwrap());

        log.done(second).unwrap();
        let size = log.len().unwrap();
        assert!(!log.truncate_if_idle(size + 1, || Ok(())).unwrap());
        assert!(log.truncate_if_idle(size, || {
            flushed = true;
            Ok(())
        })
        .unwrap());
        assert!(flushed);
        assert!(log.is_empty().unwrap());
    }

    #[test]
    fn test_truncate_if_idle_keeps_log_when_flush_fails() {
        let dir = TempDir::new().unwrap();
        let log = LogicalLog::open(dir.path().join("tx.log"), false).unwrap();
        log.prepare(1, &[node_command(0)]).unwrap();
        log.commit(1, 1).unwrap();
        log.done(1).unwrap();

        let result = log.truncate_if_idle(0, || Err(Error::internal("disk full")));
        assert!(result.is_err());
        assert_eq!(log.read_entries().unwrap().len(), 5);
    }
}
