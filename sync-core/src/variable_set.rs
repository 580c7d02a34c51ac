//! Ordered variable collection bound to a contract.
//!
//! A [`VariableSet`] holds the cells of one of a module's three groups
//! (settings, inputs, outputs) together with the contract that describes
//! their layout. Modules declare their contract from text; masters ingest it
//! from the wire. Values travel as value messages (see `misync_types`).

use crate::cell::VariableCell;
use crate::oom::try_buffer;
use misync_types::{
    Command, ContractEntry, ContractId, ContractMessage, Value, ValueHeader, VariableType,
    WireError, MAX_NAME_LENGTH, MAX_VARIABLES,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Which side of the link owns a variable set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Device declaring the contract
    Module,
    /// Coordinator ingesting contracts from modules
    Master,
}

/// Which cells a value message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSelection {
    /// Every cell, no index bytes
    All,
    /// Cells with the event bit set
    Events,
    /// Cells with the changed bit set (only once the set is update-ready)
    Changes,
    /// Union of events and changes
    EventsAndChanges,
}

impl ValueSelection {
    fn events(self) -> bool {
        matches!(self, Self::Events | Self::EventsAndChanges)
    }

    fn changes(self) -> bool {
        matches!(self, Self::Changes | Self::EventsAndChanges)
    }
}

/// Contract declaration or ingestion failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// More variables than the 7-bit count can carry
    #[error("too many variables: {0} (max 127)")]
    TooManyVariables(usize),

    /// Contract message could not be decoded
    #[error("malformed contract: {0}")]
    Malformed(#[from] WireError),
}

/// A value message was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// Body shorter than the fixed header
    #[error("malformed value message: {0}")]
    Malformed(#[from] WireError),

    /// Values belong to a different contract
    #[error("contract mismatch: have {expected:?}, got {actual:?}")]
    ContractMismatch {
        /// Contract held locally
        expected: ContractId,
        /// Contract named in the message
        actual: ContractId,
    },

    /// Message declares more values than the set holds
    #[error("message declares {count} values, set has {available}")]
    TooManyValues {
        /// Declared count
        count: usize,
        /// Cells in the set
        available: usize,
    },

    /// Per-value index outside the set
    #[error("value index {index} out of range ({count} variables)")]
    IndexOutOfRange {
        /// Offending index
        index: usize,
        /// Cells in the set
        count: usize,
    },

    /// Message ends inside a value
    #[error("value message truncated")]
    Truncated,
}

impl ValueError {
    /// Whether the sender works from a different contract than ours.
    pub fn is_contract_mismatch(&self) -> bool {
        matches!(
            self,
            Self::ContractMismatch { .. } | Self::TooManyValues { .. }
        )
    }
}

/// Result of [`VariableSet::ingest_contract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The set now holds the new contract
    Replaced,
    /// Same contract id as before; nothing changed
    Duplicate,
}

/// Summary of an applied value message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Applied {
    /// Values written
    pub values: usize,
    /// Values refused because a local change is pending (module role)
    pub rejected: usize,
    /// Message covered the whole set
    pub complete: bool,
    /// Event delivery
    pub event: bool,
}

/// Cut a name to the stored maximum, on a char boundary.
pub(crate) fn name_key(name: &str) -> &str {
    if name.len() <= MAX_NAME_LENGTH {
        return name;
    }
    let mut end = MAX_NAME_LENGTH;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Ordered cells plus the contract describing them.
#[derive(Debug, Clone, Default)]
pub struct VariableSet {
    cells: Vec<VariableCell>,
    names: Vec<String>,
    contract_id: ContractId,
    total_value_length: usize,
    updated_at: Option<Instant>,
}

impl VariableSet {
    /// Empty set without a contract.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a textual contract (module role).
    pub fn declared(contract: &str) -> Result<Self, ContractError> {
        let mut set = Self::new();
        set.declare_contract(contract)?;
        Ok(set)
    }

    // =========================================================================
    // Contract
    // =========================================================================

    /// Declare the contract from text like `"Temp:f4 Mode:u1 Level"`.
    ///
    /// A missing type means `f4`; an unknown code means `Unknown`. Empty text
    /// is a valid contract with no variables.
    pub fn declare_contract(&mut self, contract: &str) -> Result<ContractId, ContractError> {
        let mut cells = Vec::new();
        let mut names = Vec::new();
        for word in contract.split_whitespace() {
            let (name, ty) = match word.split_once(':') {
                Some((name, code)) => (name, VariableType::from_code(code)),
                None => (word, VariableType::F32),
            };
            cells.push(VariableCell::new(ty));
            names.push(name.to_string());
        }
        if cells.len() > MAX_VARIABLES {
            return Err(ContractError::TooManyVariables(cells.len()));
        }
        self.cells = cells;
        self.names = names;
        self.contract_id = ContractId::derive(
            self.cells
                .iter()
                .zip(&self.names)
                .map(|(c, n)| (c.variable_type(), n.as_str())),
        );
        self.recalculate_length();
        self.updated_at = None;
        debug!(contract_id = ?self.contract_id, count = self.cells.len(), "declared contract");
        Ok(self.contract_id)
    }

    /// Replace the contract from a serialized contract body (master role).
    ///
    /// A body carrying the current contract id is a duplicate and ignored.
    pub fn ingest_contract(&mut self, body: &[u8]) -> Result<IngestOutcome, ContractError> {
        let msg = ContractMessage::decode(body)?;
        if msg.contract_id == self.contract_id {
            debug!(contract_id = ?self.contract_id, "ignored duplicate contract");
            return Ok(IngestOutcome::Duplicate);
        }
        self.cells = msg
            .entries
            .iter()
            .map(|e| VariableCell::new(e.ty))
            .collect();
        self.names = msg.entries.into_iter().map(|e| e.name).collect();
        self.contract_id = msg.contract_id;
        self.recalculate_length();
        self.updated_at = None;
        debug!(contract_id = ?self.contract_id, count = self.cells.len(), "ingested contract");
        Ok(IngestOutcome::Replaced)
    }

    /// Serialize the contract as a full message starting with `cmd`.
    ///
    /// Returns `None` if the reply buffer cannot be allocated.
    pub fn serialize_contract(&self, cmd: Command) -> Option<Vec<u8>> {
        let msg = ContractMessage {
            contract_id: self.contract_id,
            entries: self
                .cells
                .iter()
                .zip(&self.names)
                .map(|(c, n)| ContractEntry {
                    ty: c.variable_type(),
                    name: n.clone(),
                })
                .collect(),
        };
        let mut out = try_buffer(msg.encoded_len())?;
        match msg.encode_into(cmd, &mut out) {
            Ok(()) => Some(out),
            Err(e) => {
                warn!(error = %e, "contract not serializable");
                None
            }
        }
    }

    /// Drop the contract. The sole recovery path for contract drift.
    pub fn invalidate_contract(&mut self) {
        if self.contract_id.is_set() {
            debug!(contract_id = ?self.contract_id, "invalidating contract");
        }
        self.contract_id = ContractId::NONE;
        self.updated_at = None;
    }

    /// Whether a contract is present.
    pub fn got_contract(&self) -> bool {
        self.contract_id.is_set()
    }

    /// Current contract id (zero when none).
    pub fn contract_id(&self) -> ContractId {
        self.contract_id
    }

    /// Contract rendered back to text, `"Name:tt"` separated by spaces.
    pub fn contract_text(&self) -> String {
        self.cells
            .iter()
            .zip(&self.names)
            .map(|(c, n)| format!("{}:{}", n, c.variable_type().code()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn recalculate_length(&mut self) {
        self.total_value_length = self.cells.iter().map(|c| c.size()).sum();
    }

    // =========================================================================
    // Values on the wire
    // =========================================================================

    /// Serialize values as a full message starting with `cmd`.
    ///
    /// Returns `None` when a filtered selection matches nothing, or when the
    /// buffer cannot be allocated. A set that is not update-ready reports a
    /// count of zero unless the selection carries events.
    pub fn serialize_values(&self, cmd: Command, selection: ValueSelection) -> Option<Vec<u8>> {
        let n = self.cells.len();
        if n > MAX_VARIABLES {
            warn!(count = n, "too many variables to serialize values");
            return None;
        }
        let updated = self.is_updated();
        let include = |c: &VariableCell| {
            (selection.events() && c.is_event()) || (selection.changes() && updated && c.is_changed())
        };
        let count = match selection {
            ValueSelection::All => n,
            _ => {
                let k = self.cells.iter().filter(|c| include(c)).count();
                if k == 0 {
                    return None;
                }
                k
            }
        };
        let all = count == n;
        let reported = if updated || selection.events() { count } else { 0 };

        let value_len = if reported == 0 {
            0
        } else if all {
            self.total_value_length
        } else {
            self.cells
                .iter()
                .filter(|c| include(c))
                .map(|c| 1 + c.size())
                .sum()
        };
        let mut out = try_buffer(1 + ValueHeader::LEN + value_len)?;
        ValueHeader {
            contract_id: self.contract_id,
            count: reported as u8,
            event: selection.events(),
        }
        .encode_into(cmd, &mut out);

        if reported != 0 {
            for (i, cell) in self.cells.iter().enumerate() {
                if all {
                    out.extend_from_slice(cell.bytes());
                } else if include(cell) {
                    out.push(i as u8);
                    out.extend_from_slice(cell.bytes());
                }
            }
        }
        Some(out)
    }

    /// Apply a value message body (bytes after the command byte).
    ///
    /// The whole message is validated before any cell is written. On a
    /// contract mismatch the master drops its contract so it gets
    /// re-requested. In the module role a cell with a pending local change
    /// only accepts an equal value, which confirms and clears the change;
    /// differing values are rejected for that cell alone.
    pub fn apply_values(
        &mut self,
        body: &[u8],
        role: Role,
        now: Instant,
    ) -> Result<Applied, ValueError> {
        let header = ValueHeader::decode(body)?;
        let n = self.cells.len();
        let count = header.count as usize;

        if header.contract_id != self.contract_id {
            let err = ValueError::ContractMismatch {
                expected: self.contract_id,
                actual: header.contract_id,
            };
            if role == Role::Master {
                self.invalidate_contract();
            }
            return Err(err);
        }
        if count > n {
            if role == Role::Master {
                self.invalidate_contract();
            }
            return Err(ValueError::TooManyValues {
                count,
                available: n,
            });
        }
        if count == 0 {
            return Ok(Applied {
                event: header.event,
                ..Applied::default()
            });
        }

        let indexed = count != n;
        let mut entries = Vec::with_capacity(count);
        let mut pos = ValueHeader::LEN;
        for i in 0..count {
            let ix = if indexed {
                let b = *body.get(pos).ok_or(ValueError::Truncated)?;
                pos += 1;
                b as usize
            } else {
                i
            };
            if ix >= n {
                return Err(ValueError::IndexOutOfRange { index: ix, count: n });
            }
            let size = self.cells[ix].size();
            let bytes = body.get(pos..pos + size).ok_or(ValueError::Truncated)?;
            pos += size;
            entries.push((ix, bytes));
        }

        let mut applied = Applied {
            complete: count == n,
            event: header.event,
            ..Applied::default()
        };
        for (ix, bytes) in entries {
            let cell = &mut self.cells[ix];
            match role {
                Role::Module => {
                    if cell.is_changed() {
                        if cell.is_equal(bytes) {
                            cell.set_changed(false);
                        } else {
                            applied.rejected += 1;
                            continue;
                        }
                    }
                    cell.set(bytes);
                    cell.set_changed(false);
                }
                Role::Master => {
                    cell.set_tracked(bytes, None);
                }
            }
            if header.event {
                cell.set_event(true);
            }
            applied.values += 1;
        }
        if applied.complete {
            self.set_updated(now);
        }
        Ok(applied)
    }

    // =========================================================================
    // Update-ready state
    // =========================================================================

    /// Whether a full-coverage value message has been applied since the contract was set.
    pub fn is_updated(&self) -> bool {
        self.updated_at.is_some()
    }

    /// When the set last became update-ready.
    pub fn updated_at(&self) -> Option<Instant> {
        self.updated_at
    }

    /// Mark update-ready. Ignored without a contract.
    pub fn set_updated(&mut self, now: Instant) {
        if self.got_contract() {
            self.updated_at = Some(now);
        }
    }

    /// Forget update-ready state.
    pub fn clear_updated(&mut self) {
        self.updated_at = None;
    }

    /// Forget update-ready state if it is older than `limit`.
    pub fn clear_updated_if_older_than(&mut self, limit: Duration, now: Instant) {
        if let Some(at) = self.updated_at {
            if now.saturating_duration_since(at) > limit {
                self.updated_at = None;
            }
        }
    }

    // =========================================================================
    // Cell access
    // =========================================================================

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the contract has no variables.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Sum of all value sizes.
    pub fn total_value_length(&self) -> usize {
        self.total_value_length
    }

    /// Cells in contract order.
    pub fn cells(&self) -> &[VariableCell] {
        &self.cells
    }

    /// Mutable cells in contract order.
    pub fn cells_mut(&mut self) -> &mut [VariableCell] {
        &mut self.cells
    }

    /// Cell at `ix`.
    pub fn cell(&self, ix: usize) -> Option<&VariableCell> {
        self.cells.get(ix)
    }

    /// Mutable cell at `ix`.
    pub fn cell_mut(&mut self, ix: usize) -> Option<&mut VariableCell> {
        self.cells.get_mut(ix)
    }

    /// Variable name at `ix`.
    pub fn name(&self, ix: usize) -> Option<&str> {
        self.names.get(ix).map(String::as_str)
    }

    /// Names in contract order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Index of a variable by name (compared up to the stored name length).
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let key = name_key(name);
        self.names.iter().position(|n| name_key(n) == key)
    }

    /// Case-insensitive [`index_of`](Self::index_of), for text-based sinks.
    pub fn index_of_ignore_case(&self, name: &str) -> Option<usize> {
        let key = name_key(name);
        self.names
            .iter()
            .position(|n| name_key(n).eq_ignore_ascii_case(key))
    }

    /// Typed value at `ix`.
    pub fn get_value(&self, ix: usize) -> Option<Value> {
        self.cells.get(ix).and_then(VariableCell::value)
    }

    /// Typed write at `ix`. Returns false on bad index or type mismatch.
    pub fn set_value(&mut self, ix: usize, value: Value) -> bool {
        self.cells
            .get_mut(ix)
            .map(|c| c.set_value(value))
            .unwrap_or(false)
    }

    /// Raw write at `ix`, size-checked by the cell.
    pub fn set_bytes(&mut self, ix: usize, bytes: &[u8]) -> bool {
        self.cells
            .get_mut(ix)
            .map(|c| c.set(bytes))
            .unwrap_or(false)
    }

    // =========================================================================
    // Change and event flags
    // =========================================================================

    /// Any cell changed.
    pub fn is_changed(&self) -> bool {
        self.cells.iter().any(VariableCell::is_changed)
    }

    /// Clear every changed bit.
    pub fn clear_changed(&mut self) {
        self.cells.iter_mut().for_each(|c| c.set_changed(false));
    }

    /// Any cell flagged as event.
    pub fn has_events(&self) -> bool {
        self.cells.iter().any(VariableCell::is_event)
    }

    /// Clear every event bit.
    pub fn clear_events(&mut self) {
        self.cells.iter_mut().for_each(|c| c.set_event(false));
    }

    /// Flag one cell as event.
    pub fn set_event(&mut self, ix: usize, event: bool) {
        if let Some(c) = self.cells.get_mut(ix) {
            c.set_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract_body(set: &VariableSet) -> Vec<u8> {
        set.serialize_contract(Command::SetSettingContract).unwrap()[1..].to_vec()
    }

    fn master_copy(module: &VariableSet) -> VariableSet {
        let mut master = VariableSet::new();
        master.ingest_contract(&contract_body(module)).unwrap();
        master
    }

    // ===========================================
    // Contract declaration
    // ===========================================

    #[test]
    fn declare_parses_types_and_defaults() {
        let set = VariableSet::declared("Temp:f4 Mode:u1 Level Odd:zz").unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(set.cell(0).unwrap().variable_type(), VariableType::F32);
        assert_eq!(set.cell(1).unwrap().variable_type(), VariableType::U8);
        assert_eq!(set.cell(2).unwrap().variable_type(), VariableType::F32);
        assert_eq!(set.cell(3).unwrap().variable_type(), VariableType::Unknown);
        assert_eq!(set.total_value_length(), 9);
        assert_eq!(set.name(2), Some("Level"));
    }

    #[test]
    fn empty_contract_is_valid() {
        let set = VariableSet::declared("").unwrap();
        assert!(set.got_contract());
        assert!(set.is_empty());
    }

    #[test]
    fn declare_rejects_oversized_contract() {
        let text: Vec<String> = (0..128).map(|i| format!("V{}:u1", i)).collect();
        let mut set = VariableSet::new();
        assert_eq!(
            set.declare_contract(&text.join(" ")),
            Err(ContractError::TooManyVariables(128))
        );
    }

    #[test]
    fn contract_text_round_trips() {
        let set = VariableSet::declared("Temp:f4 Mode:u1").unwrap();
        assert_eq!(set.contract_text(), "Temp:f4 Mode:u1");
    }

    // ===========================================
    // Contract ingestion
    // ===========================================

    #[test]
    fn ingest_is_idempotent() {
        let module = VariableSet::declared("Temp:f4 Mode:u1").unwrap();
        let body = contract_body(&module);

        let mut master = VariableSet::new();
        assert_eq!(master.ingest_contract(&body).unwrap(), IngestOutcome::Replaced);
        let id = master.contract_id();
        let names: Vec<String> = master.names().map(str::to_string).collect();

        assert_eq!(master.ingest_contract(&body).unwrap(), IngestOutcome::Duplicate);
        assert_eq!(master.contract_id(), id);
        assert_eq!(master.names().map(str::to_string).collect::<Vec<_>>(), names);
        assert_eq!(id, module.contract_id());
    }

    #[test]
    fn ingest_replaces_and_resets_ready_state() {
        let now = Instant::now();
        let a = VariableSet::declared("A:u1").unwrap();
        let b = VariableSet::declared("A:u1 B:u2").unwrap();
        let mut master = master_copy(&a);
        master.set_updated(now);

        master.ingest_contract(&contract_body(&b)).unwrap();
        assert_eq!(master.len(), 2);
        assert!(!master.is_updated());
    }

    #[test]
    fn ingest_rejects_malformed_without_side_effects() {
        let module = VariableSet::declared("A:u1").unwrap();
        let mut master = master_copy(&module);
        let id = master.contract_id();
        assert!(master.ingest_contract(&[1, 2, 3, 4, 1, 2, 9]).is_err());
        assert_eq!(master.contract_id(), id);
    }

    // ===========================================
    // Value serialization
    // ===========================================

    #[test]
    fn round_trip_all_types() {
        let now = Instant::now();
        let mut module =
            VariableSet::declared("B:b1 U1:u1 U2:u2 U4:u4 I1:i1 I2:i2 I4:i4 F:f4").unwrap();
        let values = [
            Value::Bool(true),
            Value::U8(200),
            Value::U16(60_000),
            Value::U32(4_000_000_000),
            Value::I8(-100),
            Value::I16(-30_000),
            Value::I32(-2_000_000_000),
            Value::F32(-12.25),
        ];
        for (i, v) in values.iter().enumerate() {
            assert!(module.set_value(i, *v));
        }
        module.set_updated(now);

        let msg = module
            .serialize_values(Command::SetOutputs, ValueSelection::All)
            .unwrap();
        assert_eq!(msg.len(), 6 + module.total_value_length());

        let mut master = master_copy(&module);
        let applied = master.apply_values(&msg[1..], Role::Master, now).unwrap();
        assert!(applied.complete);
        assert_eq!(applied.values, 8);
        for i in 0..8 {
            assert_eq!(master.cell(i).unwrap().bytes(), module.cell(i).unwrap().bytes());
        }
        assert!(master.is_updated());
    }

    #[test]
    fn not_updated_reports_zero_count() {
        let module = VariableSet::declared("A:u1 B:u1").unwrap();
        let msg = module
            .serialize_values(Command::SetOutputs, ValueSelection::All)
            .unwrap();
        assert_eq!(msg.len(), 6);
        assert_eq!(msg[5], 0);
    }

    #[test]
    fn event_subset_carries_indices() {
        let mut module = VariableSet::declared("A:u1 B:u2 C:u1").unwrap();
        module.set_value(1, Value::U16(0x0102));
        module.set_event(1, true);

        let msg = module
            .serialize_values(Command::SetOutputs, ValueSelection::Events)
            .unwrap();
        assert_eq!(msg[5], 0x81);
        assert_eq!(&msg[6..], &[1, 0x02, 0x01]);
    }

    #[test]
    fn empty_selection_yields_nothing() {
        let module = VariableSet::declared("A:u1").unwrap();
        assert!(module
            .serialize_values(Command::SetOutputs, ValueSelection::Events)
            .is_none());
        assert!(module
            .serialize_values(Command::SetOutputs, ValueSelection::Changes)
            .is_none());
    }

    #[test]
    fn changes_require_update_ready() {
        let now = Instant::now();
        let mut module = VariableSet::declared("A:u1 B:u1").unwrap();
        module.set_value(0, Value::U8(1));
        assert!(module
            .serialize_values(Command::SetOutputs, ValueSelection::Changes)
            .is_none());

        module.set_updated(now);
        let msg = module
            .serialize_values(Command::SetOutputs, ValueSelection::Changes)
            .unwrap();
        assert_eq!(msg[5], 1);
        assert_eq!(&msg[6..], &[0, 1]);
    }

    // ===========================================
    // Value application
    // ===========================================

    #[test]
    fn partial_coverage_never_marks_ready() {
        let now = Instant::now();
        let mut module = VariableSet::declared("A:u1 B:u1").unwrap();
        module.set_value(0, Value::U8(9));
        module.set_updated(now);
        let msg = module
            .serialize_values(Command::SetOutputs, ValueSelection::Changes)
            .unwrap();

        let mut master = master_copy(&module);
        let applied = master.apply_values(&msg[1..], Role::Master, now).unwrap();
        assert_eq!(applied.values, 1);
        assert!(!applied.complete);
        assert!(!master.is_updated());
        assert_eq!(master.get_value(0), Some(Value::U8(9)));
    }

    #[test]
    fn zero_count_confirms_contract_only() {
        let now = Instant::now();
        let module = VariableSet::declared("A:u1").unwrap();
        let msg = module
            .serialize_values(Command::SetOutputs, ValueSelection::All)
            .unwrap();
        let mut master = master_copy(&module);
        let applied = master.apply_values(&msg[1..], Role::Master, now).unwrap();
        assert_eq!(applied.values, 0);
        assert!(!master.is_updated());
        assert!(master.got_contract());
    }

    #[test]
    fn mismatch_invalidates_on_master_only() {
        let now = Instant::now();
        let mut master = master_copy(&VariableSet::declared("A:u1").unwrap());
        let body = [0xEE, 0xEE, 0xEE, 0xEE, 1, 5];
        let err = master.apply_values(&body, Role::Master, now).unwrap_err();
        assert!(err.is_contract_mismatch());
        assert!(!master.got_contract());

        let mut module = VariableSet::declared("A:u1").unwrap();
        let err = module.apply_values(&body, Role::Module, now).unwrap_err();
        assert!(err.is_contract_mismatch());
        assert!(module.got_contract());
    }

    #[test]
    fn count_above_cardinality_is_mismatch() {
        let now = Instant::now();
        let mut module = VariableSet::declared("A:u1").unwrap();
        let mut body = module.contract_id().to_le_bytes().to_vec();
        body.extend_from_slice(&[2, 0, 1, 1, 1]);
        let err = module.apply_values(&body, Role::Module, now).unwrap_err();
        assert_eq!(
            err,
            ValueError::TooManyValues {
                count: 2,
                available: 1
            }
        );
    }

    #[test]
    fn malformed_messages_leave_cells_untouched() {
        let now = Instant::now();
        let mut module = VariableSet::declared("A:u1 B:u1 C:u1").unwrap();
        let id = module.contract_id().to_le_bytes();

        let mut bad_index = id.to_vec();
        bad_index.extend_from_slice(&[2, 0, 7, 9, 1]);
        assert!(matches!(
            module.apply_values(&bad_index, Role::Module, now),
            Err(ValueError::IndexOutOfRange { index: 9, .. })
        ));
        assert_eq!(module.get_value(0), Some(Value::U8(0)));

        let mut truncated = id.to_vec();
        truncated.extend_from_slice(&[3, 1, 2]);
        assert_eq!(
            module.apply_values(&truncated, Role::Module, now),
            Err(ValueError::Truncated)
        );

        assert!(matches!(
            module.apply_values(&[1, 2], Role::Module, now),
            Err(ValueError::Malformed(_))
        ));
    }

    #[test]
    fn module_keeps_pending_local_change() {
        let now = Instant::now();
        let mut module = VariableSet::declared("Temp:f4 Mode:u1").unwrap();
        module.set_value(1, Value::U8(3));
        assert!(module.cell(1).unwrap().is_changed());

        let mut master = master_copy(&module);
        master.set_value(0, Value::F32(20.0));
        master.set_value(1, Value::U8(2));
        master.set_updated(now);
        let msg = master
            .serialize_values(Command::SetSettings, ValueSelection::All)
            .unwrap();

        let applied = module.apply_values(&msg[1..], Role::Module, now).unwrap();
        assert_eq!(applied.rejected, 1);
        assert_eq!(applied.values, 1);
        assert_eq!(module.get_value(0), Some(Value::F32(20.0)));
        assert_eq!(module.get_value(1), Some(Value::U8(3)));
        assert!(module.cell(1).unwrap().is_changed());
        assert!(module.is_updated());
    }

    #[test]
    fn module_change_clears_when_echoed() {
        let now = Instant::now();
        let mut module = VariableSet::declared("Temp:f4 Mode:u1").unwrap();
        module.set_value(1, Value::U8(3));

        let mut master = master_copy(&module);
        master.set_value(1, Value::U8(3));
        master.set_updated(now);
        let msg = master
            .serialize_values(Command::SetSettings, ValueSelection::All)
            .unwrap();

        module.apply_values(&msg[1..], Role::Module, now).unwrap();
        assert!(!module.cell(1).unwrap().is_changed());
        assert_eq!(module.get_value(1), Some(Value::U8(3)));
    }

    #[test]
    fn event_delivery_sets_event_bits() {
        let now = Instant::now();
        let mut module = VariableSet::declared("A:u1 B:u1").unwrap();
        module.set_value(1, Value::U8(4));
        module.set_event(1, true);
        let msg = module
            .serialize_values(Command::SetOutputs, ValueSelection::Events)
            .unwrap();

        let mut master = master_copy(&module);
        let applied = master.apply_values(&msg[1..], Role::Master, now).unwrap();
        assert!(applied.event);
        assert!(master.cell(1).unwrap().is_event());
        assert!(!master.cell(0).unwrap().is_event());
    }

    // ===========================================
    // Ready state and lookups
    // ===========================================

    #[test]
    fn set_updated_requires_contract() {
        let mut set = VariableSet::new();
        set.set_updated(Instant::now());
        assert!(!set.is_updated());
    }

    #[test]
    fn stale_ready_state_is_cleared() {
        let start = Instant::now();
        let mut set = VariableSet::declared("A:u1").unwrap();
        set.set_updated(start);
        set.clear_updated_if_older_than(Duration::from_secs(60), start + Duration::from_secs(30));
        assert!(set.is_updated());
        set.clear_updated_if_older_than(Duration::from_secs(60), start + Duration::from_secs(61));
        assert!(!set.is_updated());
    }

    #[test]
    fn name_lookup() {
        let set = VariableSet::declared("Temp:f4 Mode:u1").unwrap();
        assert_eq!(set.index_of("Mode"), Some(1));
        assert_eq!(set.index_of("mode"), None);
        assert_eq!(set.index_of_ignore_case("mode"), Some(1));
        assert_eq!(set.index_of("Missing"), None);
    }

    #[test]
    fn long_names_match_on_stored_prefix() {
        let module = VariableSet::declared("VeryLongName:u1").unwrap();
        let master = master_copy(&module);
        assert_eq!(master.name(0), Some("VeryLongNa"));
        assert_eq!(master.index_of("VeryLongName"), Some(0));
    }
}
