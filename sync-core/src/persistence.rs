//! Settings snapshots in byte-addressable non-volatile storage.
//!
//! Layout at the start offset: `[magic:4][contract_id:4][len:1]` followed by
//! a `SetSettings` value message of `len` bytes. Writes only touch bytes that
//! differ from what is stored, so an unchanged snapshot causes no wear.

use crate::variable_set::{Applied, Role, ValueError, ValueSelection, VariableSet};
use misync_types::{Command, ContractId, SnapshotHeader, WireError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Default minimum time between snapshot writes.
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(600);

/// Snapshot could not be written or read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// Access outside the store
    #[error("store access out of bounds: {len} bytes at {pos}, capacity {capacity}")]
    OutOfBounds {
        /// Start offset
        pos: usize,
        /// Bytes requested
        len: usize,
        /// Store size
        capacity: usize,
    },

    /// Settings have no contract or no complete values yet
    #[error("settings not ready for persistence")]
    NotReady,

    /// Serialized settings do not fit the one-byte length field
    #[error("settings snapshot too large: {0} bytes")]
    TooLarge(usize),

    /// Buffer for the snapshot could not be allocated
    #[error("out of memory while building snapshot")]
    OutOfMemory,

    /// Stored header missing or corrupt
    #[error("invalid snapshot header: {0}")]
    Header(#[from] WireError),

    /// Snapshot belongs to another contract
    #[error("snapshot contract {stored} does not match {current}")]
    ContractMismatch {
        /// Contract in storage
        stored: ContractId,
        /// Contract of the live settings
        current: ContractId,
    },

    /// Stored values could not be applied
    #[error("stored values rejected: {0}")]
    Values(#[from] ValueError),

    /// Backing storage failed
    #[error("storage I/O error: {0}")]
    Io(String),
}

/// Byte-addressable persistent storage.
pub trait SnapshotStore {
    /// Size in bytes.
    fn capacity(&self) -> usize;

    /// Fill `buf` from offset `pos`.
    fn read(&self, pos: usize, buf: &mut [u8]) -> Result<(), PersistenceError>;

    /// Write one byte at `pos`.
    fn write_byte(&mut self, pos: usize, byte: u8) -> Result<(), PersistenceError>;
}

fn check_bounds(pos: usize, len: usize, capacity: usize) -> Result<(), PersistenceError> {
    match pos.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(PersistenceError::OutOfBounds { pos, len, capacity }),
    }
}

/// In-memory store, erased to `0xFF` like a fresh EEPROM.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    bytes: Vec<u8>,
    writes: usize,
}

impl MemoryStore {
    /// Erased store of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0xFF; capacity],
            writes: 0,
        }
    }

    /// Number of single-byte writes so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Raw contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl SnapshotStore for MemoryStore {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, pos: usize, buf: &mut [u8]) -> Result<(), PersistenceError> {
        check_bounds(pos, buf.len(), self.bytes.len())?;
        buf.copy_from_slice(&self.bytes[pos..pos + buf.len()]);
        Ok(())
    }

    fn write_byte(&mut self, pos: usize, byte: u8) -> Result<(), PersistenceError> {
        check_bounds(pos, 1, self.bytes.len())?;
        self.bytes[pos] = byte;
        self.writes += 1;
        Ok(())
    }
}

/// Write `bytes` at `pos`, skipping bytes already equal. Returns whether anything changed.
fn update_bytes<S: SnapshotStore + ?Sized>(
    store: &mut S,
    pos: usize,
    bytes: &[u8],
) -> Result<bool, PersistenceError> {
    check_bounds(pos, bytes.len(), store.capacity())?;
    let mut current = vec![0u8; bytes.len()];
    store.read(pos, &mut current)?;
    let mut modified = false;
    for (i, (&new, &old)) in bytes.iter().zip(&current).enumerate() {
        if new != old {
            store.write_byte(pos + i, new)?;
            modified = true;
        }
    }
    Ok(modified)
}

/// Store the settings at `start`. Returns whether any byte changed.
pub fn write_settings<S: SnapshotStore + ?Sized>(
    settings: &VariableSet,
    store: &mut S,
    start: usize,
) -> Result<bool, PersistenceError> {
    if !settings.got_contract() || !settings.is_updated() {
        return Err(PersistenceError::NotReady);
    }
    let message = settings
        .serialize_values(Command::SetSettings, ValueSelection::All)
        .ok_or(PersistenceError::OutOfMemory)?;
    let length =
        u8::try_from(message.len()).map_err(|_| PersistenceError::TooLarge(message.len()))?;
    let header = SnapshotHeader {
        contract_id: settings.contract_id(),
        length,
    };
    check_bounds(start, SnapshotHeader::LEN + message.len(), store.capacity())?;
    let mut modified = update_bytes(store, start, &header.encode())?;
    modified |= update_bytes(store, start + SnapshotHeader::LEN, &message)?;
    debug!(bytes = message.len(), modified, "settings snapshot written");
    Ok(modified)
}

/// Restore settings stored at `start`.
///
/// Only a snapshot with the right magic number and the settings' current,
/// non-zero contract id is applied.
pub fn read_settings<S: SnapshotStore + ?Sized>(
    settings: &mut VariableSet,
    store: &S,
    start: usize,
    role: Role,
    now: Instant,
) -> Result<Applied, PersistenceError> {
    if !settings.got_contract() {
        return Err(PersistenceError::NotReady);
    }
    let mut raw = [0u8; SnapshotHeader::LEN];
    store.read(start, &mut raw)?;
    let header = SnapshotHeader::decode(&raw)?;
    if header.contract_id != settings.contract_id() {
        return Err(PersistenceError::ContractMismatch {
            stored: header.contract_id,
            current: settings.contract_id(),
        });
    }
    let mut message = vec![0u8; header.length as usize];
    store.read(start + SnapshotHeader::LEN, &mut message)?;
    let body = message.get(1..).ok_or(WireError::BufferTooShort {
        expected: 1,
        actual: 0,
    })?;
    let applied = settings.apply_values(body, role, now)?;
    debug!(values = applied.values, "settings restored from snapshot");
    Ok(applied)
}

/// Bounds how often snapshots are written.
#[derive(Debug, Clone, Copy)]
pub struct SaveSchedule {
    interval: Duration,
    last: Instant,
}

impl SaveSchedule {
    /// Schedule whose first save is due one interval after `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last: now,
        }
    }

    /// Whether a save is due; starts the next interval if so.
    pub fn due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

/// Write the snapshot if the schedule allows. Returns whether bytes changed.
pub fn write_when_due<S: SnapshotStore + ?Sized>(
    settings: &VariableSet,
    store: &mut S,
    start: usize,
    schedule: &mut SaveSchedule,
    now: Instant,
) -> Result<bool, PersistenceError> {
    if !schedule.due(now) {
        return Ok(false);
    }
    write_settings(settings, store, start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use misync_types::Value;

    fn ready_settings(now: Instant) -> VariableSet {
        let mut set = VariableSet::declared("Temp:f4 Mode:u1").unwrap();
        set.set_value(0, Value::F32(21.0));
        set.set_value(1, Value::U8(2));
        set.set_updated(now);
        set
    }

    #[test]
    fn write_then_read_back() {
        let now = Instant::now();
        let settings = ready_settings(now);
        let mut store = MemoryStore::new(64);
        assert!(write_settings(&settings, &mut store, 4).unwrap());

        let mut restored = VariableSet::declared("Temp:f4 Mode:u1").unwrap();
        let applied = read_settings(&mut restored, &store, 4, Role::Module, now).unwrap();
        assert!(applied.complete);
        assert_eq!(restored.get_value(0), Some(Value::F32(21.0)));
        assert_eq!(restored.get_value(1), Some(Value::U8(2)));
        assert!(restored.is_updated());
    }

    #[test]
    fn unchanged_snapshot_causes_no_writes() {
        let now = Instant::now();
        let mut settings = ready_settings(now);
        let mut store = MemoryStore::new(64);
        write_settings(&settings, &mut store, 0).unwrap();
        let writes = store.writes();

        assert!(!write_settings(&settings, &mut store, 0).unwrap());
        assert_eq!(store.writes(), writes);

        settings.set_value(1, Value::U8(3));
        assert!(write_settings(&settings, &mut store, 0).unwrap());
        assert_eq!(store.writes(), writes + 1);
    }

    #[test]
    fn refuses_unready_settings() {
        let settings = VariableSet::declared("Temp:f4").unwrap();
        let mut store = MemoryStore::new(64);
        assert_eq!(
            write_settings(&settings, &mut store, 0),
            Err(PersistenceError::NotReady)
        );
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn erased_store_has_no_snapshot() {
        let mut settings = VariableSet::declared("Temp:f4").unwrap();
        let store = MemoryStore::new(64);
        assert!(matches!(
            read_settings(&mut settings, &store, 0, Role::Module, Instant::now()),
            Err(PersistenceError::Header(WireError::BadMagic(_)))
        ));
    }

    #[test]
    fn other_contract_is_not_applied() {
        let now = Instant::now();
        let mut store = MemoryStore::new(64);
        write_settings(&ready_settings(now), &mut store, 0).unwrap();

        let mut other = VariableSet::declared("Temp:f4 Mode:u2").unwrap();
        assert!(matches!(
            read_settings(&mut other, &store, 0, Role::Module, now),
            Err(PersistenceError::ContractMismatch { .. })
        ));
        assert_eq!(other.get_value(1), Some(Value::U16(0)));
    }

    #[test]
    fn out_of_bounds_write_fails_cleanly() {
        let now = Instant::now();
        let mut store = MemoryStore::new(8);
        assert!(matches!(
            write_settings(&ready_settings(now), &mut store, 0),
            Err(PersistenceError::OutOfBounds { .. })
        ));
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn schedule_limits_saves() {
        let now = Instant::now();
        let settings = ready_settings(now);
        let mut store = MemoryStore::new(64);
        let mut schedule = SaveSchedule::new(DEFAULT_SAVE_INTERVAL, now);

        assert!(!write_when_due(&settings, &mut store, 0, &mut schedule, now).unwrap());
        let later = now + DEFAULT_SAVE_INTERVAL;
        assert!(write_when_due(&settings, &mut store, 0, &mut schedule, later).unwrap());
        assert!(!schedule.due(later + Duration::from_secs(1)));
    }
}
