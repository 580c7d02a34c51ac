//! The master's collection of remote modules.
//!
//! Besides owning the modules, the set resolves cross-module dependencies:
//! an input named like another module's prefixed output (`"heTemp"` for
//! output `Temp` of the module with prefix `he`) is fed from that output.

use crate::interface::ModuleInterface;
use crate::remote::{Liveness, RemoteModule};
use crate::variable_set::name_key;
use misync_types::{Address, StatusBits, WireError, PREFIX_LENGTH};
use std::time::Instant;
use tracing::{debug, info};

/// Whom to send time to in this round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeSyncPlan {
    /// Broadcast on the master's own bus
    pub broadcast: bool,
    /// Modules on other buses that need a directed message
    pub directed: Vec<usize>,
}

/// One entry of a module list, `Name:pf:44` or `Name:pf:44:0.0.0.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    /// Module name
    pub name: String,
    /// Namespace prefix
    pub prefix: String,
    /// Transport address
    pub address: Address,
}

impl ModuleEntry {
    /// Parse one list entry.
    pub fn parse(entry: &str) -> Result<Self, WireError> {
        let mut parts = entry.splitn(3, ':');
        let name = parts.next().unwrap_or_default();
        let prefix = parts.next().unwrap_or_default();
        let address = parts
            .next()
            .ok_or_else(|| WireError::InvalidAddress(entry.to_string()))?
            .parse()?;
        if name.is_empty() {
            return Err(WireError::InvalidAddress(entry.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            address,
        })
    }
}

/// Prefixed form of a variable name. Names starting lower-case already carry a prefix.
fn prefixed_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() || name.starts_with(|c: char| c.is_ascii_lowercase()) {
        name.to_string()
    } else {
        format!("{}{}", prefix, name)
    }
}

/// Ordered remote modules plus the derived dependency table.
#[derive(Debug, Default)]
pub struct ModuleInterfaceSet {
    modules: Vec<RemoteModule>,
    prefix: String,
    module_list: Option<String>,
    liveness: Liveness,
    dependencies_valid: bool,
    active_contract_count: usize,
}

impl ModuleInterfaceSet {
    /// Empty set with a shared prefix (cut to two characters).
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.chars().take(PREFIX_LENGTH).collect(),
            ..Self::default()
        }
    }

    /// Shared prefix of this master.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Liveness thresholds for current and future modules.
    pub fn set_liveness(&mut self, liveness: Liveness) {
        self.liveness = liveness;
        for m in &mut self.modules {
            m.set_liveness(liveness);
        }
    }

    /// Append a module.
    pub fn add_module(&mut self, mut module: RemoteModule) -> usize {
        module.set_liveness(self.liveness);
        self.modules.push(module);
        self.invalidate_dependencies();
        self.modules.len() - 1
    }

    /// Replace the modules from a space-separated list.
    ///
    /// Returns `Ok(false)` when the text is empty or unchanged. A malformed
    /// entry leaves the current modules in place.
    pub fn set_interface_list(&mut self, list: &str) -> Result<bool, WireError> {
        let list = list.trim();
        if list.is_empty() || self.module_list.as_deref() == Some(list) {
            return Ok(false);
        }
        let entries = list
            .split_whitespace()
            .map(ModuleEntry::parse)
            .collect::<Result<Vec<_>, _>>()?;
        self.modules = entries
            .into_iter()
            .map(|e| {
                let mut m = RemoteModule::new(&e.name, &e.prefix, e.address);
                m.set_liveness(self.liveness);
                m
            })
            .collect();
        self.module_list = Some(list.to_string());
        self.invalidate_dependencies();
        info!(count = self.modules.len(), "module list updated");
        Ok(true)
    }

    /// Module list text last applied.
    pub fn interface_list(&self) -> Option<&str> {
        self.module_list.as_deref()
    }

    // =========================================================================
    // Access
    // =========================================================================

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether there are no modules.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules in list order.
    pub fn modules(&self) -> &[RemoteModule] {
        &self.modules
    }

    /// Mutable modules in list order.
    pub fn modules_mut(&mut self) -> &mut [RemoteModule] {
        &mut self.modules
    }

    /// Module at `ix`.
    pub fn module(&self, ix: usize) -> Option<&RemoteModule> {
        self.modules.get(ix)
    }

    /// Mutable module at `ix`.
    pub fn module_mut(&mut self, ix: usize) -> Option<&mut RemoteModule> {
        self.modules.get_mut(ix)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Module sending from `address`.
    pub fn locate(&self, address: Address) -> Option<usize> {
        self.modules
            .iter()
            .position(|m| m.address().id == address.id && m.address().is_on_bus(address.bus))
    }

    /// Module whose prefix matches the first two characters of `name`.
    pub fn find_by_prefix(&self, name: &str) -> Option<usize> {
        let head = name.get(..PREFIX_LENGTH).unwrap_or(name);
        self.modules.iter().position(|m| m.prefix() == head)
    }

    /// Module by name, ignoring case.
    pub fn find_by_name_ignore_case(&self, name: &str) -> Option<usize> {
        self.modules
            .iter()
            .position(|m| m.core().name().eq_ignore_ascii_case(name))
    }

    /// Output whose prefixed name equals `name`, as `(module, output)`.
    pub fn find_output_by_name(&self, name: &str) -> Option<(usize, usize)> {
        let key = name_key(name);
        self.modules.iter().enumerate().find_map(|(i, m)| {
            m.core()
                .outputs
                .names()
                .position(|n| name_key(&prefixed_name(m.prefix(), n)) == key)
                .map(|j| (i, j))
        })
    }

    /// Setting addressed as prefix plus name, as `(module, setting)`.
    pub fn find_setting_by_name(&self, name: &str) -> Option<(usize, usize)> {
        let i = self.find_by_prefix(name)?;
        let rest = name.get(PREFIX_LENGTH..).filter(|r| !r.is_empty())?;
        let j = self.modules[i].core().settings.index_of(rest)?;
        Some((i, j))
    }

    // =========================================================================
    // Contracts and dependencies
    // =========================================================================

    /// Whether every active module has all three contracts.
    ///
    /// Any gap invalidates the dependency table.
    pub fn got_all_contracts(&mut self, now: Instant) -> bool {
        let all = self
            .modules
            .iter()
            .all(|m| m.got_contract() || !m.is_active(now));
        if !all {
            self.dependencies_valid = false;
        }
        all
    }

    /// Active modules with all contracts.
    pub fn count_active_contracts(&self, now: Instant) -> usize {
        self.modules
            .iter()
            .filter(|m| m.got_contract() && m.is_active(now))
            .count()
    }

    /// Modules currently inactive.
    pub fn inactive_count(&self, now: Instant) -> usize {
        self.modules.iter().filter(|m| !m.is_active(now)).count()
    }

    /// Force the dependency table to be rebuilt.
    pub fn invalidate_dependencies(&mut self) {
        self.dependencies_valid = false;
    }

    /// Whether the dependency table may be used.
    pub fn dependencies_valid(&self) -> bool {
        self.dependencies_valid
    }

    /// Rebuild the dependency table when the set of active contracts changed.
    pub fn update_dependencies(&mut self, now: Instant) {
        let mut replaced = false;
        for m in &mut self.modules {
            replaced |= m.take_contract_replaced();
        }
        let count = self.count_active_contracts(now);
        if replaced || count != self.active_contract_count {
            self.dependencies_valid = false;
        }
        if self.dependencies_valid || count <= 1 {
            return;
        }
        let mut resolved = 0;
        for i in 0..self.modules.len() {
            let sources: Vec<Option<(usize, usize)>> = self.modules[i]
                .core()
                .inputs
                .names()
                .map(|n| self.find_output_by_name(n))
                .collect();
            resolved += sources.iter().flatten().count();
            self.modules[i].input_sources = sources;
        }
        self.dependencies_valid = true;
        self.active_contract_count = count;
        debug!(active = count, resolved, "dependencies updated");
    }

    fn source_bytes(&self, source: Option<(usize, usize)>, events_only: bool) -> SourceValue {
        let Some((m, k)) = source else {
            return SourceValue::Unresolved;
        };
        let outputs = &self.modules[m].core().outputs;
        match outputs.cell(k) {
            Some(cell) if events_only && !cell.is_event() => SourceValue::Skip,
            Some(_) if !events_only && !outputs.is_updated() => SourceValue::Stale,
            Some(cell) => SourceValue::Value(cell.bytes().to_vec()),
            None => SourceValue::Unresolved,
        }
    }

    /// Copy outputs to the inputs depending on them.
    ///
    /// An input set becomes update-ready only if something was copied and
    /// every input has a source that is itself update-ready.
    pub fn transfer_outputs_to_inputs(&mut self, now: Instant) {
        if !self.got_all_contracts(now) {
            return;
        }
        self.update_dependencies(now);
        if !self.dependencies_valid {
            return;
        }
        for i in 0..self.modules.len() {
            let mut all_updated = true;
            let mut writes = Vec::new();
            for (j, source) in self.modules[i].input_sources.iter().enumerate() {
                match self.source_bytes(*source, false) {
                    SourceValue::Value(bytes) => writes.push((j, bytes)),
                    SourceValue::Stale | SourceValue::Unresolved => all_updated = false,
                    SourceValue::Skip => {}
                }
            }
            if writes.is_empty() {
                continue;
            }
            let inputs = &mut self.modules[i].core_mut().inputs;
            for (j, bytes) in writes {
                inputs.set_bytes(j, &bytes);
            }
            if all_updated {
                inputs.set_updated(now);
            }
        }
    }

    /// Copy event outputs to dependent inputs and flag those inputs as events.
    pub fn transfer_output_events(&mut self) {
        if !self.dependencies_valid {
            return;
        }
        for i in 0..self.modules.len() {
            let writes: Vec<(usize, Vec<u8>)> = self.modules[i]
                .input_sources
                .iter()
                .enumerate()
                .filter_map(|(j, s)| match self.source_bytes(*s, true) {
                    SourceValue::Value(bytes) => Some((j, bytes)),
                    _ => None,
                })
                .collect();
            let inputs = &mut self.modules[i].core_mut().inputs;
            for (j, bytes) in writes {
                inputs.set_bytes(j, &bytes);
                inputs.set_event(j, true);
            }
        }
    }

    // =========================================================================
    // Flags
    // =========================================================================

    /// Clear `changed` on settings that every registered sink has received.
    pub fn settle_settings(&mut self, sink_count: usize) {
        if sink_count == 0 {
            return;
        }
        let mask = ((1u16 << sink_count.min(7)) - 1) as u8;
        for m in &mut self.modules {
            for cell in m.core_mut().settings.cells_mut() {
                if cell.is_changed() && !cell.any_pending(mask) {
                    cell.set_changed(false);
                }
            }
        }
    }

    /// Clear event bits on every module's outputs.
    pub fn clear_output_events(&mut self) {
        for m in &mut self.modules {
            m.core_mut().outputs.clear_events();
        }
    }

    /// Clear event bits on every module's inputs.
    pub fn clear_input_events(&mut self) {
        for m in &mut self.modules {
            m.core_mut().inputs.clear_events();
        }
    }

    /// Clear event bits on every module's settings.
    pub fn clear_setting_events(&mut self) {
        for m in &mut self.modules {
            m.core_mut().settings.clear_events();
        }
    }

    /// Clear changed bits on every module's outputs.
    pub fn clear_output_changes(&mut self) {
        for m in &mut self.modules {
            m.core_mut().outputs.clear_changed();
        }
    }

    // =========================================================================
    // Time
    // =========================================================================

    /// Decide where to send time and clear the missing-time bits served.
    ///
    /// Modules on `local_bus` are reached by one broadcast, which happens
    /// when `scheduled` or when any of them reports missing time. Others get
    /// directed messages under the same conditions.
    pub fn plan_time_sync(&mut self, local_bus: [u8; 4], scheduled: bool) -> TimeSyncPlan {
        let missing = |m: &RemoteModule| m.core().status.is_missing_time();
        let local = |m: &RemoteModule| m.address().is_on_bus(local_bus);

        let broadcast = scheduled || self.modules.iter().any(|m| local(m) && missing(m));
        let mut plan = TimeSyncPlan {
            broadcast,
            directed: Vec::new(),
        };
        for (i, m) in self.modules.iter_mut().enumerate() {
            if local(&*m) {
                if broadcast {
                    m.core_mut().status.set(StatusBits::MISSING_TIME, false);
                }
            } else if scheduled || missing(&*m) {
                plan.directed.push(i);
                m.core_mut().status.set(StatusBits::MISSING_TIME, false);
            }
        }
        plan
    }
}

enum SourceValue {
    Unresolved,
    Skip,
    Stale,
    Value(Vec<u8>),
}
