//! Per-sink delivery tracking for values shared by several external sinks.
//!
//! Every registered sink owns one pending bit per cell. A write made by one
//! sink flags the value for all the others; a sink clears only its own bit
//! once it has delivered the value. This keeps a value that sink A already
//! pushed from looking like a fresh external change when sink B polls it.

use crate::cell::{VariableCell, ALL_SINKS};
use misync_types::Value;
use thiserror::Error;

/// Most sinks that can be registered at once.
pub const MAX_SINKS: usize = 7;

/// Registering another sink failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkRegistryError {
    /// Every delivery bit is taken
    #[error("too many sinks (max {MAX_SINKS})")]
    Full,
}

/// What [`SinkSlot::set_and_mark`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkWrite {
    /// Value already current; this sink's bit cleared
    Confirmed,
    /// Value written and queued for the other sinks
    Applied,
    /// Sink read back an old value while a newer one awaits delivery to it
    Stale,
    /// Size did not match the cell
    Rejected,
}

/// A registered sink's handle on the delivery bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkSlot {
    index: u8,
}

impl SinkSlot {
    /// Bit index of this sink.
    pub fn index(self) -> u8 {
        self.index
    }

    /// Whether this sink still has to deliver the cell's value.
    pub fn is_pending(self, cell: &VariableCell) -> bool {
        cell.is_pending(self.index)
    }

    /// Mark the cell's value delivered by this sink.
    pub fn clear(self, cell: &mut VariableCell) {
        cell.set_pending(self.index, false);
    }

    /// Write a value fetched from this sink's external system.
    ///
    /// An equal value confirms delivery. A differing value while this sink's
    /// bit is still set means the external side has not seen the newer value
    /// yet, so it is ignored. Otherwise the value is written, marked changed
    /// and queued for every other sink.
    pub fn set_and_mark(self, cell: &mut VariableCell, bytes: &[u8]) -> SinkWrite {
        if bytes.len() != cell.size() || bytes.is_empty() {
            return SinkWrite::Rejected;
        }
        if cell.is_equal(bytes) {
            self.clear(cell);
            return SinkWrite::Confirmed;
        }
        if self.is_pending(cell) {
            return SinkWrite::Stale;
        }
        cell.set_tracked(bytes, Some(self.index));
        cell.set_changed(true);
        SinkWrite::Applied
    }

    /// Typed [`set_and_mark`](Self::set_and_mark).
    pub fn set_value_and_mark(self, cell: &mut VariableCell, value: Value) -> SinkWrite {
        if value.variable_type() != cell.variable_type() {
            return SinkWrite::Rejected;
        }
        self.set_and_mark(cell, &value.bytes())
    }
}

/// Hands out sink slots in registration order.
#[derive(Debug, Clone, Default)]
pub struct SinkRegistry {
    count: usize,
}

impl SinkRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next slot.
    pub fn register(&mut self) -> Result<SinkSlot, SinkRegistryError> {
        if self.count >= MAX_SINKS {
            return Err(SinkRegistryError::Full);
        }
        let slot = SinkSlot {
            index: self.count as u8,
        };
        self.count += 1;
        Ok(slot)
    }

    /// Registered sinks.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Bits of every registered sink.
    pub fn mask(&self) -> u8 {
        ALL_SINKS & (((1u16 << self.count) - 1) as u8)
    }
}
