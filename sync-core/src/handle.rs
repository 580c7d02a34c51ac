//! Named variable lookup that survives contract changes.

use crate::variable_set::VariableSet;
use misync_types::{ContractId, Value};

/// A variable name plus the index it resolved to under a given contract.
///
/// The cached index is only trusted while the set's contract id is the one
/// it was resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableHandle {
    name: String,
    contract_id: ContractId,
    index: Option<usize>,
}

impl VariableHandle {
    /// Unresolved handle for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contract_id: ContractId::NONE,
            index: None,
        }
    }

    /// Variable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index in `set`, re-resolving when the cache is stale.
    pub fn resolve(&mut self, set: &VariableSet) -> Option<usize> {
        if !set.got_contract() {
            self.index = None;
            return None;
        }
        if self.index.is_none() || self.contract_id != set.contract_id() {
            self.index = set.index_of(&self.name);
            self.contract_id = set.contract_id();
        }
        self.index
    }

    /// Current value, if the variable exists.
    pub fn get(&mut self, set: &VariableSet) -> Option<Value> {
        let ix = self.resolve(set)?;
        set.get_value(ix)
    }

    /// Typed write. Returns false when the variable is missing or the type differs.
    pub fn set(&mut self, set: &mut VariableSet, value: Value) -> bool {
        match self.resolve(set) {
            Some(ix) => set.set_value(ix, value),
            None => false,
        }
    }

    /// Changed bit of the variable.
    pub fn is_changed(&mut self, set: &VariableSet) -> bool {
        self.resolve(set)
            .and_then(|ix| set.cell(ix))
            .map(|c| c.is_changed())
            .unwrap_or(false)
    }

    /// Event bit of the variable.
    pub fn is_event(&mut self, set: &VariableSet) -> bool {
        self.resolve(set)
            .and_then(|ix| set.cell(ix))
            .map(|c| c.is_event())
            .unwrap_or(false)
    }

    /// Flag the variable for immediate delivery.
    pub fn set_event(&mut self, set: &mut VariableSet, event: bool) {
        if let Some(ix) = self.resolve(set) {
            set.set_event(ix, event);
        }
    }
}
