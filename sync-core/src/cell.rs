//! A single typed variable value with change tracking.

use misync_types::{Value, VariableType};

/// Mask covering every possible sink delivery bit.
pub const ALL_SINKS: u8 = 0x7F;

/// One typed value plus its change, event and delivery bits.
///
/// The value buffer always holds exactly `size()` meaningful bytes; an
/// `Unknown` cell has size 0 and ignores every read and write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableCell {
    ty: VariableType,
    value: [u8; 4],
    changed: bool,
    event: bool,
    initialized: bool,
    pending: u8,
}

impl VariableCell {
    /// Create a zero-valued cell of the given type.
    pub fn new(ty: VariableType) -> Self {
        Self {
            ty,
            ..Self::default()
        }
    }

    /// Declared type.
    pub fn variable_type(&self) -> VariableType {
        self.ty
    }

    /// Value size in bytes.
    pub fn size(&self) -> usize {
        self.ty.size()
    }

    /// Current value bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.value[..self.size()]
    }

    /// Decoded value, `None` for `Unknown`.
    pub fn value(&self) -> Option<Value> {
        Value::from_le_bytes(self.ty, self.bytes())
    }

    /// Write `bytes` if the length matches the type's size.
    ///
    /// Sets the changed bit when the content differs. Returns whether the
    /// write took place.
    pub fn set(&mut self, bytes: &[u8]) -> bool {
        let size = self.size();
        if size == 0 || bytes.len() != size {
            return false;
        }
        if self.value[..size] != *bytes {
            self.changed = true;
        }
        self.value[..size].copy_from_slice(bytes);
        true
    }

    /// Master-side write: like [`set`](Self::set), additionally marks the cell
    /// initialized and, on a content change, flags every sink except `origin`
    /// as needing delivery.
    pub fn set_tracked(&mut self, bytes: &[u8], origin: Option<u8>) -> bool {
        let size = self.size();
        if size == 0 || bytes.len() != size {
            return false;
        }
        let differs = self.value[..size] != *bytes;
        self.set(bytes);
        self.initialized = true;
        if differs {
            let own = origin.map(|i| 1u8 << i).unwrap_or(0);
            self.pending |= ALL_SINKS & !own;
        }
        true
    }

    /// Typed write. Ignored when the value's type differs from the cell's.
    pub fn set_value(&mut self, value: Value) -> bool {
        if value.variable_type() != self.ty {
            return false;
        }
        self.set(&value.to_le_bytes()[..self.size()])
    }

    /// Copy the value into `buf` when its length matches; otherwise do nothing.
    pub fn get(&self, buf: &mut [u8]) -> bool {
        if buf.len() != self.size() || buf.is_empty() {
            return false;
        }
        buf.copy_from_slice(self.bytes());
        true
    }

    /// Compare against incoming bytes.
    ///
    /// Finite floats compare with relative tolerance 1e-5; everything else is
    /// byte-exact.
    pub fn is_equal(&self, bytes: &[u8]) -> bool {
        if bytes.len() != self.size() {
            return false;
        }
        if self.ty == VariableType::F32 {
            let a = f32::from_le_bytes(self.value);
            let b = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            if a.is_finite() && b.is_finite() {
                return (a - b).abs() < 1e-5 * a.abs() || a == b;
            }
        }
        self.bytes() == bytes
    }

    /// Changed since last cleared.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Set or clear the changed bit.
    pub fn set_changed(&mut self, changed: bool) {
        self.changed = changed;
    }

    /// Flagged for immediate delivery.
    pub fn is_event(&self) -> bool {
        self.event
    }

    /// Set or clear the event bit.
    pub fn set_event(&mut self, event: bool) {
        self.event = event;
    }

    /// Received at least one value (master side).
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether sink `index` still has to receive the current value.
    pub fn is_pending(&self, index: u8) -> bool {
        self.pending & (1 << index) != 0
    }

    /// Set or clear the delivery bit for one sink.
    pub fn set_pending(&mut self, index: u8, pending: bool) {
        if pending {
            self.pending |= 1 << index;
        } else {
            self.pending &= !(1 << index);
        }
    }

    /// Whether any sink selected by `mask` still has to receive the value.
    pub fn any_pending(&self, mask: u8) -> bool {
        self.pending & mask != 0
    }

    /// Raw delivery bits.
    pub fn pending_mask(&self) -> u8 {
        self.pending
    }
}
