//! Master-side view of one remote module.

use crate::interface::{
    InterfaceCore, ModuleInterface, NotifyFn, Notification, Notifier, Reply, SetKind,
};
use crate::variable_set::{IngestOutcome, Role, ValueSelection};
use misync_types::{split_command, Address, Command, StatusBits, StatusMessage, PREFIX_LENGTH};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Thresholds deciding whether a module counts as active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    /// Consecutive unacknowledged sends tolerated
    pub max_failures: u8,
    /// Longest silence tolerated
    pub max_silence: Duration,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            max_failures: 5,
            max_silence: Duration::from_secs(120),
        }
    }
}

/// One module as seen from the master.
#[derive(Debug)]
pub struct RemoteModule {
    core: InterfaceCore,
    notifier: Notifier,
    prefix: String,
    address: Address,
    failures: u8,
    remote_out_of_memory: bool,
    liveness: Liveness,
    contract_requested_at: Option<Instant>,
    contract_replaced: bool,
    pub(crate) input_sources: Vec<Option<(usize, usize)>>,
}

impl RemoteModule {
    /// New module without contracts. The prefix is cut to two characters.
    pub fn new(name: &str, prefix: &str, address: Address) -> Self {
        Self {
            core: InterfaceCore::new(name),
            notifier: Notifier::default(),
            prefix: prefix.chars().take(PREFIX_LENGTH).collect(),
            address,
            failures: 0,
            remote_out_of_memory: false,
            liveness: Liveness::default(),
            contract_requested_at: None,
            contract_replaced: false,
            input_sources: Vec::new(),
        }
    }

    /// Register the notification callback.
    pub fn set_notification_callback(&mut self, f: NotifyFn) {
        self.notifier = Notifier::new(f);
    }

    /// Override liveness thresholds.
    pub fn set_liveness(&mut self, liveness: Liveness) {
        self.liveness = liveness;
    }

    /// Namespace prefix for cross-module names.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Transport address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Update the transport address.
    pub fn set_address(&mut self, address: Address) {
        self.address = address;
    }

    /// Consecutive failed sends.
    pub fn failures(&self) -> u8 {
        self.failures
    }

    /// Out-of-memory flag as last reported by the module.
    pub fn remote_out_of_memory(&self) -> bool {
        self.remote_out_of_memory
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    /// Active while failures stay below the threshold and a life sign is recent.
    ///
    /// A module never heard from is inactive.
    pub fn is_active(&self, now: Instant) -> bool {
        if self.failures >= self.liveness.max_failures {
            return false;
        }
        match self.core.last_alive() {
            Some(at) => now.saturating_duration_since(at) < self.liveness.max_silence,
            None => false,
        }
    }

    /// Record the outcome of a send. Failures saturate.
    pub fn record_send(&mut self, acked: bool) {
        if !acked {
            self.failures = self.failures.saturating_add(1);
            if self.failures == self.liveness.max_failures {
                info!(module = %self.core.name(), "module stopped responding");
            }
        }
    }

    // =========================================================================
    // Contracts
    // =========================================================================

    /// All three contracts present.
    pub fn got_contract(&self) -> bool {
        self.core.settings.got_contract()
            && self.core.inputs.got_contract()
            && self.core.outputs.got_contract()
    }

    /// First set still lacking a contract.
    pub fn missing_contract(&self) -> Option<SetKind> {
        [SetKind::Settings, SetKind::Inputs, SetKind::Outputs]
            .into_iter()
            .find(|k| !self.core.set(*k).got_contract())
    }

    /// Whether a contract request is due after `interval`; records the attempt if so.
    pub fn take_contract_request(&mut self, interval: Duration, now: Instant) -> bool {
        let due = self
            .contract_requested_at
            .map(|at| now.saturating_duration_since(at) >= interval)
            .unwrap_or(true);
        if due {
            self.contract_requested_at = Some(now);
        }
        due
    }

    /// Whether a contract was replaced since the last call.
    pub fn take_contract_replaced(&mut self) -> bool {
        std::mem::take(&mut self.contract_replaced)
    }

    // =========================================================================
    // Outgoing messages
    // =========================================================================

    /// Full settings message, if the settings are ready to send.
    pub fn settings_message(&mut self) -> Option<Vec<u8>> {
        self.full_message(SetKind::Settings)
    }

    /// Full inputs message, if the inputs are ready to send.
    pub fn inputs_message(&mut self) -> Option<Vec<u8>> {
        self.full_message(SetKind::Inputs)
    }

    fn full_message(&mut self, kind: SetKind) -> Option<Vec<u8>> {
        let (sample, cmd) = match kind {
            SetKind::Settings => (Notification::SampleSettings, Command::SetSettings),
            _ => (Notification::SampleInputs, Command::SetInputs),
        };
        let set = self.core.set(kind);
        if !set.got_contract() || !set.is_updated() || set.is_empty() {
            return None;
        }
        self.notifier.fire(sample, &mut self.core);
        self.core
            .set(kind)
            .serialize_values(cmd, ValueSelection::All)
    }

    /// Record that the module acknowledged a full settings or inputs message.
    pub fn delivered(&mut self, kind: SetKind) {
        match kind {
            SetKind::Settings => self.core.status.set(StatusBits::MISSING_SETTINGS, false),
            SetKind::Inputs => self.core.status.set(StatusBits::MISSING_INPUTS, false),
            SetKind::Outputs => {}
        }
    }

    /// Event message for settings flagged as events.
    pub fn setting_events_message(&self) -> Option<Vec<u8>> {
        self.events_message(SetKind::Settings, Command::SetSettings)
    }

    /// Event message for inputs flagged as events.
    pub fn input_events_message(&self) -> Option<Vec<u8>> {
        self.events_message(SetKind::Inputs, Command::SetInputs)
    }

    fn events_message(&self, kind: SetKind, cmd: Command) -> Option<Vec<u8>> {
        let set = self.core.set(kind);
        if !set.got_contract() {
            return None;
        }
        set.serialize_values(cmd, ValueSelection::Events)
    }

    // =========================================================================
    // Incoming messages
    // =========================================================================

    fn ingest(&mut self, kind: SetKind, body: &[u8]) -> bool {
        let set = self.core.set_mut(kind);
        match set.ingest_contract(body) {
            Ok(outcome) => {
                if outcome == IngestOutcome::Replaced {
                    self.contract_replaced = true;
                    debug!(
                        module = %self.core.name(),
                        set = ?kind,
                        contract = %self.core.set(kind).contract_text(),
                        "new contract"
                    );
                }
                let (mismatch, notification) = match kind {
                    SetKind::Settings => (
                        StatusBits::CONTRACT_MISMATCH_SETTINGS,
                        Notification::NewSettingContract,
                    ),
                    SetKind::Inputs => (
                        StatusBits::CONTRACT_MISMATCH_INPUTS,
                        Notification::NewInputContract,
                    ),
                    SetKind::Outputs => (0, Notification::NewOutputContract),
                };
                self.core.status.set(mismatch, false);
                self.notifier.fire(notification, &mut self.core);
                true
            }
            Err(e) => {
                debug!(module = %self.core.name(), set = ?kind, error = %e, "bad contract");
                false
            }
        }
    }

    fn set_status(&mut self, body: &[u8]) -> bool {
        let Ok(msg) = StatusMessage::decode(body) else {
            return false;
        };
        self.core.status = msg.status;
        self.remote_out_of_memory = msg.out_of_memory;
        self.core.set_uptime(msg.uptime);
        if self.got_contract() {
            if msg.status.is_contract_mismatch_settings() {
                debug!(module = %self.core.name(), "module reports settings contract changed");
                self.core.settings.invalidate_contract();
            }
            if msg.status.is_contract_mismatch_inputs() {
                debug!(module = %self.core.name(), "module reports inputs contract changed");
                self.core.inputs.invalidate_contract();
            }
        }
        self.notifier.fire(Notification::NewStatus, &mut self.core);
        true
    }

    fn apply(&mut self, kind: SetKind, body: &[u8], now: Instant) -> bool {
        let result = self.core.set_mut(kind).apply_values(body, Role::Master, now);
        match result {
            Ok(_) => {
                let updated = self.core.set(kind).is_updated();
                match kind {
                    SetKind::Settings => {
                        self.core
                            .status
                            .set(StatusBits::CONTRACT_MISMATCH_SETTINGS, false);
                        if updated {
                            self.notifier.fire(Notification::NewSettings, &mut self.core);
                        }
                    }
                    _ => {
                        if updated {
                            self.notifier.fire(Notification::NewOutputs, &mut self.core);
                        }
                    }
                }
                true
            }
            Err(e) if e.is_contract_mismatch() => {
                debug!(module = %self.core.name(), set = ?kind, error = %e, "values for another contract");
                if kind == SetKind::Settings {
                    self.core
                        .status
                        .set(StatusBits::CONTRACT_MISMATCH_SETTINGS, true);
                }
                true
            }
            Err(e) => {
                debug!(module = %self.core.name(), set = ?kind, error = %e, "rejected values");
                false
            }
        }
    }
}

impl ModuleInterface for RemoteModule {
    fn core(&self) -> &InterfaceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut InterfaceCore {
        &mut self.core
    }

    fn handle_input_message(&mut self, message: &[u8], now: Instant) -> bool {
        let Some((Ok(cmd), body)) = split_command(message) else {
            return false;
        };
        match cmd {
            Command::SetSettingContract => self.ingest(SetKind::Settings, body),
            Command::SetInputContract => self.ingest(SetKind::Inputs, body),
            Command::SetOutputContract => self.ingest(SetKind::Outputs, body),
            Command::SetOutputs => self.apply(SetKind::Outputs, body, now),
            Command::SetSettings => self.apply(SetKind::Settings, body, now),
            Command::SetStatus => self.set_status(body),
            _ => false,
        }
    }

    fn handle_request_message(&mut self, message: &[u8], _now: Instant) -> Option<Reply> {
        let Some((Ok(cmd), _)) = split_command(message) else {
            return None;
        };
        let (kind, sample, reply_cmd) = match cmd {
            Command::SendSettings => (
                SetKind::Settings,
                Notification::SampleSettings,
                Command::SetSettings,
            ),
            Command::SendInputs => (
                SetKind::Inputs,
                Notification::SampleInputs,
                Command::SetInputs,
            ),
            _ => return None,
        };
        self.notifier.fire(sample, &mut self.core);
        Some(Reply::from_buffer(
            self.core
                .set(kind)
                .serialize_values(reply_cmd, ValueSelection::All),
        ))
    }

    fn record_alive(&mut self, now: Instant) {
        if self.failures >= self.liveness.max_failures {
            info!(module = %self.core.name(), "module responding again");
        }
        self.failures = 0;
        self.core.set_last_alive(now);
    }
}
