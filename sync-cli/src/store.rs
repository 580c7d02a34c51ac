//! File-backed snapshot store for devices.
//!
//! The file has a fixed size and starts out filled with `0xFF`, like an
//! erased EEPROM. Only bytes that differ are rewritten.

use misync_core::{PersistenceError, SnapshotStore};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Fixed-size file holding a settings snapshot.
#[derive(Debug)]
pub struct FileStore {
    file: File,
    capacity: usize,
}

fn io_error(e: std::io::Error) -> PersistenceError {
    PersistenceError::Io(e.to_string())
}

impl FileStore {
    /// Open `path`, creating an erased file of `capacity` bytes if needed.
    ///
    /// An existing shorter file is extended with erased bytes.
    pub fn open(path: &Path, capacity: usize) -> Result<Self, PersistenceError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_error)?;
        let len = file.metadata().map_err(io_error)?.len() as usize;
        if len < capacity {
            file.seek(SeekFrom::Start(len as u64)).map_err(io_error)?;
            file.write_all(&vec![0xFF; capacity - len])
                .map_err(io_error)?;
            file.sync_data().map_err(io_error)?;
        }
        Ok(Self { file, capacity })
    }

    fn check(&self, pos: usize, len: usize) -> Result<(), PersistenceError> {
        match pos.checked_add(len) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(PersistenceError::OutOfBounds {
                pos,
                len,
                capacity: self.capacity,
            }),
        }
    }
}

impl SnapshotStore for FileStore {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self, pos: usize, buf: &mut [u8]) -> Result<(), PersistenceError> {
        self.check(pos, buf.len())?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(pos as u64)).map_err(io_error)?;
        file.read_exact(buf).map_err(io_error)
    }

    fn write_byte(&mut self, pos: usize, byte: u8) -> Result<(), PersistenceError> {
        self.check(pos, 1)?;
        self.file
            .seek(SeekFrom::Start(pos as u64))
            .map_err(io_error)?;
        self.file.write_all(&[byte]).map_err(io_error)?;
        self.file.sync_data().map_err(io_error)
    }
}
