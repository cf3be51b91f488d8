//! Growable memory-mapped file

use crate::{Error, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Memory-mapped file that doubles its size when a write lands past the end
pub(crate) struct MappedFile {
    file: File,
    mmap: MmapMut,
    path: PathBuf,
    current_size: usize,
    created: bool,
}

impl MappedFile {
    /// Create or open a memory-mapped file
    pub(crate) fn open<P: AsRef<Path>>(path: P, initial_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if initial_size == 0 {
            return Err(Error::storage(format!(
                "Cannot map {:?} with an initial size of 0",
                path
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let existing = file.metadata()?.len() as usize;
        let created = existing == 0;
        let current_size = if created {
            file.set_len(initial_size as u64)?;
            initial_size
        } else {
            existing
        };

        // Safety: the file is owned by this process for the lifetime of the store
        let mmap = unsafe { MmapOptions::new().len(current_size).map_mut(&file)? };

        Ok(Self {
            file,
            mmap,
            path,
            current_size,
            created,
        })
    }

    /// Whether the file was created empty by [`MappedFile::open`]
    pub(crate) fn was_created(&self) -> bool {
        self.created
    }

    /// Current mapped length in bytes
    pub(crate) fn len(&self) -> usize {
        self.current_size
    }

    /// Path of the underlying file
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        self.mmap.flush()?;
        self.file.set_len(new_size as u64)?;
        // Safety: see `open`
        let mmap = unsafe { MmapOptions::new().len(new_size).map_mut(&self.file)? };
        self.mmap = mmap;
        self.current_size = new_size;
        tracing::debug!("Grew {:?} to {} bytes", self.path, new_size);
        Ok(())
    }

    /// Read `size` bytes at `offset`
    pub(crate) fn read(&self, offset: usize, size: usize) -> Result<&[u8]> {
        if offset + size > self.current_size {
            return Err(Error::storage(format!(
                "Read beyond file size: offset={}, size={}, file_size={}",
                offset, size, self.current_size
            )));
        }
        Ok(&self.mmap[offset..offset + size])
    }

    /// Write `bytes` at `offset`, growing the file (doubling) if necessary
    pub(crate) fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let required_size = offset + bytes.len();
        if required_size > self.current_size {
            let new_size = (self.current_size * 2).max(required_size);
            self.resize(new_size)?;
        }
        self.mmap[offset..required_size].copy_from_slice(bytes);
        Ok(())
    }

    /// Flush to disk
    pub(crate) fn flush(&mut self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}
