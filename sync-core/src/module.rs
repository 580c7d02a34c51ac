//! Device-side module interface.

use crate::interface::{
    InterfaceCore, ModuleInterface, NotifyFn, Notification, Notifier, Reply,
};
use crate::oom::out_of_memory;
use crate::time::TIME_UTC_2017;
use crate::variable_set::{ContractError, Role, ValueError, ValueSelection, VariableSet};
use misync_types::{
    split_command, Command, StatusBits, StatusMessage, TimeMessage, Value,
};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Without a sync for this long the module asks for time again.
pub const TIME_RESYNC_AFTER: Duration = Duration::from_secs(12 * 3600);

/// A sync older than this no longer counts as a set clock.
pub const TIME_VALID_FOR: Duration = Duration::from_secs(48 * 3600);

#[derive(Debug, Clone, Copy)]
struct TimeSync {
    utc: u32,
    received: Instant,
}

/// The module (device) side of the protocol.
///
/// Declares its three contracts at construction, answers the master's
/// requests and applies settings, inputs and time pushed to it.
#[derive(Debug)]
pub struct ModuleEndpoint {
    core: InterfaceCore,
    notifier: Notifier,
    started: Instant,
    time: Option<TimeSync>,
}

impl ModuleEndpoint {
    /// Declare the three contracts from text like `"Temp:f4 Mode:u1"`.
    pub fn new(
        name: &str,
        settings: &str,
        inputs: &str,
        outputs: &str,
        now: Instant,
    ) -> Result<Self, ContractError> {
        let mut core = InterfaceCore::new(name);
        core.settings = VariableSet::declared(settings)?;
        core.inputs = VariableSet::declared(inputs)?;
        core.outputs = VariableSet::declared(outputs)?;

        let mut status = StatusBits::new(StatusBits::MISSING_TIME);
        status.set(StatusBits::MISSING_SETTINGS, !core.settings.is_empty());
        status.set(StatusBits::MISSING_INPUTS, !core.inputs.is_empty());
        core.status = status;

        debug!(
            module = %core.name(),
            settings = %core.settings.contract_id(),
            inputs = %core.inputs.contract_id(),
            outputs = %core.outputs.contract_id(),
            "module contracts declared"
        );
        Ok(Self {
            core,
            notifier: Notifier::default(),
            started: now,
            time: None,
        })
    }

    /// Register the notification callback.
    pub fn set_notification_callback(&mut self, f: NotifyFn) {
        self.notifier = Notifier::new(f);
    }

    // =========================================================================
    // Local edits
    // =========================================================================

    /// Change a setting locally (e.g. from a front panel).
    ///
    /// Flags `MODIFIED_SETTINGS` so the master fetches the new value. The
    /// setting stays changed until the master echoes the same value.
    pub fn set_setting(&mut self, ix: usize, value: Value) -> bool {
        if !self.core.settings.set_value(ix, value) {
            return false;
        }
        if self.core.settings.is_changed() {
            self.core
                .status
                .set(StatusBits::MODIFIED_SETTINGS, true);
        }
        true
    }

    /// Write an output value.
    pub fn set_output(&mut self, ix: usize, value: Value) -> bool {
        self.core.outputs.set_value(ix, value)
    }

    /// Write an output value and push it as an event.
    pub fn set_output_event(&mut self, ix: usize, value: Value) -> bool {
        if !self.core.outputs.set_value(ix, value) {
            return false;
        }
        self.core.outputs.set_event(ix, true);
        true
    }

    /// Mark outputs as sampled and valid, so they are reported with values.
    pub fn outputs_ready(&mut self, now: Instant) {
        self.core.outputs.set_updated(now);
    }

    /// Event message for outputs flagged as events, or `None` if there are none.
    pub fn output_events_message(&self) -> Option<Vec<u8>> {
        self.core
            .outputs
            .serialize_values(Command::SetOutputs, ValueSelection::Events)
    }

    /// Clear output event bits after an event message was acknowledged.
    pub fn clear_output_events(&mut self) {
        self.core.outputs.clear_events();
    }

    // =========================================================================
    // Time
    // =========================================================================

    /// Accept a UTC time from the master. Implausible values are ignored.
    pub fn set_time(&mut self, utc_seconds: u32, now: Instant) -> bool {
        if utc_seconds <= TIME_UTC_2017 {
            warn!(utc_seconds, "ignoring implausible time");
            return false;
        }
        self.time = Some(TimeSync {
            utc: utc_seconds,
            received: now,
        });
        self.core.status.set(StatusBits::MISSING_TIME, false);
        true
    }

    /// Re-flag `MISSING_TIME` when no sync has arrived recently.
    pub fn update_time(&mut self, now: Instant) {
        let stale = match self.time {
            Some(sync) => now.saturating_duration_since(sync.received) > TIME_RESYNC_AFTER,
            None => true,
        };
        if stale {
            self.core.status.set(StatusBits::MISSING_TIME, true);
        }
    }

    /// Extrapolated UTC seconds, or 0 if never synchronised.
    pub fn time_utc(&self, now: Instant) -> u32 {
        match self.time {
            Some(sync) => {
                let elapsed = now.saturating_duration_since(sync.received).as_secs();
                sync.utc.wrapping_add(elapsed as u32)
            }
            None => 0,
        }
    }

    /// Whether the clock was synchronised within the validity window.
    pub fn is_time_set(&self, now: Instant) -> bool {
        self.time
            .map(|sync| now.saturating_duration_since(sync.received) < TIME_VALID_FOR)
            .unwrap_or(false)
    }

    /// Seconds since construction.
    pub fn uptime(&self, now: Instant) -> u32 {
        now.saturating_duration_since(self.started).as_secs() as u32
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    fn apply_pushed(&mut self, cmd: Command, body: &[u8], now: Instant) -> bool {
        let (set, mismatch, missing, notification) = match cmd {
            Command::SetSettings => (
                &mut self.core.settings,
                StatusBits::CONTRACT_MISMATCH_SETTINGS,
                StatusBits::MISSING_SETTINGS,
                Notification::NewSettings,
            ),
            _ => (
                &mut self.core.inputs,
                StatusBits::CONTRACT_MISMATCH_INPUTS,
                StatusBits::MISSING_INPUTS,
                Notification::NewInputs,
            ),
        };
        match set.apply_values(body, Role::Module, now) {
            Ok(applied) => {
                let ready = set.is_updated();
                if cmd == Command::SetSettings && !set.is_changed() {
                    self.core
                        .status
                        .set(StatusBits::MODIFIED_SETTINGS, false);
                }
                if applied.rejected > 0 {
                    debug!(module = %self.core.name(), rejected = applied.rejected, "kept locally modified values");
                }
                self.core.status.set(mismatch, false);
                if ready {
                    self.core.status.set(missing, false);
                    self.notifier.fire(notification, &mut self.core);
                }
                true
            }
            Err(e) if e.is_contract_mismatch() => {
                debug!(module = %self.core.name(), cmd = ?cmd, error = %e, "contract mismatch");
                self.core.status.set(mismatch, true);
                true
            }
            Err(ValueError::Malformed(e)) => {
                debug!(module = %self.core.name(), cmd = ?cmd, error = %e, "malformed values");
                false
            }
            Err(e) => {
                debug!(module = %self.core.name(), cmd = ?cmd, error = %e, "rejected values");
                false
            }
        }
    }

    fn status_reply(&mut self, now: Instant) -> Reply {
        self.update_time(now);
        let msg = StatusMessage {
            status: self.core.status,
            out_of_memory: out_of_memory(),
            uptime: self.uptime(now),
        };
        Reply::from_bytes(&msg.encode())
    }
}

impl ModuleInterface for ModuleEndpoint {
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
            Command::SetSettings | Command::SetInputs => self.apply_pushed(cmd, body, now),
            Command::SetTime => match TimeMessage::decode(body) {
                Ok(t) => {
                    if self.set_time(t.utc_seconds, now) {
                        self.notifier.fire(Notification::NewTime, &mut self.core);
                    }
                    true
                }
                Err(_) => false,
            },
            _ => false,
        }
    }

    fn handle_request_message(&mut self, message: &[u8], now: Instant) -> Option<Reply> {
        let Some((Ok(cmd), _)) = split_command(message) else {
            return None;
        };
        let core = &mut self.core;
        let reply = match cmd {
            Command::SendSettingContract => {
                core.status.set(StatusBits::CONTRACT_MISMATCH_SETTINGS, false);
                Reply::from_buffer(core.settings.serialize_contract(Command::SetSettingContract))
            }
            Command::SendInputContract => {
                core.status.set(StatusBits::CONTRACT_MISMATCH_INPUTS, false);
                Reply::from_buffer(core.inputs.serialize_contract(Command::SetInputContract))
            }
            Command::SendOutputContract => {
                Reply::from_buffer(core.outputs.serialize_contract(Command::SetOutputContract))
            }
            Command::SendSettings => {
                self.notifier.fire(Notification::SampleSettings, core);
                Reply::from_buffer(
                    core.settings
                        .serialize_values(Command::SetSettings, ValueSelection::All),
                )
            }
            Command::SendOutputs => {
                self.notifier.fire(Notification::SampleOutputs, core);
                let reply = Reply::from_buffer(
                    core.outputs
                        .serialize_values(Command::SetOutputs, ValueSelection::All),
                );
                core.outputs.clear_events();
                core.outputs.clear_changed();
                reply
            }
            Command::SendStatus => {
                self.notifier.fire(Notification::SampleStatus, core);
                self.status_reply(now)
            }
            _ => return None,
        };
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::Handled;
    use misync_types::ValueHeader;
    use std::sync::{Arc, Mutex};

    fn endpoint(now: Instant) -> ModuleEndpoint {
        ModuleEndpoint::new("Heater", "Temp:f4 Mode:u1", "Ext:f4", "Power:u2", now).unwrap()
    }

    fn master_settings(module: &ModuleEndpoint) -> VariableSet {
        let msg = module
            .core()
            .settings
            .serialize_contract(Command::SetSettingContract)
            .unwrap();
        let mut set = VariableSet::new();
        set.ingest_contract(&msg[1..]).unwrap();
        set
    }

    // ===========================================
    // Construction
    // ===========================================

    #[test]
    fn initial_status_flags_missing_data() {
        let m = endpoint(Instant::now());
        let s = m.core().status;
        assert!(s.is_missing_settings());
        assert!(s.is_missing_inputs());
        assert!(s.is_missing_time());
    }

    #[test]
    fn empty_contracts_are_not_missing() {
        let m = ModuleEndpoint::new("Sensor", "", "", "T:f4", Instant::now()).unwrap();
        let s = m.core().status;
        assert!(!s.is_missing_settings());
        assert!(!s.is_missing_inputs());
        assert!(s.is_missing_time());
    }

    // ===========================================
    // Requests
    // ===========================================

    #[test]
    fn contract_request_clears_mismatch() {
        let now = Instant::now();
        let mut m = endpoint(now);
        m.core_mut()
            .status
            .set(StatusBits::CONTRACT_MISMATCH_SETTINGS, true);
        let handled = m.handle_message(&[Command::SendSettingContract.as_byte()], now);
        let Handled::Reply(reply) = handled else {
            panic!("expected reply");
        };
        assert_eq!(reply[0], Command::SetSettingContract.as_byte());
        assert!(!m.core().status.is_contract_mismatch_settings());
        assert_eq!(m.core().last_alive(), Some(now));
    }

    #[test]
    fn send_outputs_samples_then_clears_flags() {
        let now = Instant::now();
        let mut m = endpoint(now);
        m.set_notification_callback(Box::new(|n, core: &mut InterfaceCore| {
            if n == Notification::SampleOutputs {
                core.outputs.set_value(0, Value::U16(1500));
                core.outputs.set_updated(Instant::now());
            }
        }));
        m.core_mut().outputs.set_event(0, true);

        let reply = m
            .handle_request_message(&[Command::SendOutputs.as_byte()], now)
            .unwrap();
        let Reply::Message(msg) = reply else {
            panic!("expected message");
        };
        let header = ValueHeader::decode(&msg[1..]).unwrap();
        assert_eq!(header.count, 1);
        assert_eq!(&msg[6..], &1500u16.to_le_bytes());
        assert!(!m.core().outputs.has_events());
        assert!(!m.core().outputs.is_changed());
    }

    #[test]
    fn status_reply_layout() {
        let now = Instant::now();
        let mut m = endpoint(now);
        let later = now + Duration::from_secs(42);
        let Some(Reply::Message(msg)) =
            m.handle_request_message(&[Command::SendStatus.as_byte()], later)
        else {
            panic!("expected status");
        };
        assert_eq!(msg.len(), 7);
        let status = StatusMessage::decode(&msg[1..]).unwrap();
        assert!(status.status.is_missing_time());
        assert_eq!(status.uptime, 42);
    }

    #[test]
    fn master_directions_are_unrecognized() {
        let now = Instant::now();
        let mut m = endpoint(now);
        assert_eq!(
            m.handle_message(&[Command::SendInputs.as_byte()], now),
            Handled::Unrecognized
        );
        assert_eq!(
            m.handle_message(&[Command::SetOutputs.as_byte(), 0, 0, 0, 0, 0], now),
            Handled::Unrecognized
        );
        assert_eq!(m.handle_message(&[], now), Handled::Unrecognized);
        assert_eq!(m.handle_message(&[0xF0], now), Handled::Unrecognized);
        assert_eq!(m.core().last_alive(), None);
    }

    // ===========================================
    // Pushed values
    // ===========================================

    #[test]
    fn settings_clear_missing_and_notify() {
        let now = Instant::now();
        let mut m = endpoint(now);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        m.set_notification_callback(Box::new(move |n, _core: &mut InterfaceCore| {
            log.lock().unwrap().push(n);
        }));

        let mut master = master_settings(&m);
        master.set_value(0, Value::F32(21.5));
        master.set_updated(now);
        let msg = master
            .serialize_values(Command::SetSettings, ValueSelection::All)
            .unwrap();

        assert!(m.handle_input_message(&msg, now));
        assert!(!m.core().status.is_missing_settings());
        assert_eq!(m.core().settings.get_value(0), Some(Value::F32(21.5)));
        assert_eq!(*seen.lock().unwrap(), vec![Notification::NewSettings]);
    }

    #[test]
    fn mismatched_settings_flag_contract_mismatch() {
        let now = Instant::now();
        let mut m = endpoint(now);
        let msg = [Command::SetSettings.as_byte(), 1, 2, 3, 4, 2, 0, 0, 0, 0, 0];
        assert!(m.handle_input_message(&msg, now));
        assert!(m.core().status.is_contract_mismatch_settings());
        assert!(m.core().status.is_missing_settings());
    }

    #[test]
    fn undersized_settings_are_unhandled() {
        let now = Instant::now();
        let mut m = endpoint(now);
        assert!(!m.handle_input_message(&[Command::SetSettings.as_byte(), 1, 2], now));
        assert!(!m.core().status.is_contract_mismatch_settings());
    }

    #[test]
    fn modified_settings_round_trip() {
        let now = Instant::now();
        let mut m = endpoint(now);
        assert!(m.set_setting(1, Value::U8(2)));
        assert!(m.core().status.is_modified_settings());

        // Master fetches the settings...
        let Some(Reply::Message(fetched)) =
            m.handle_request_message(&[Command::SendSettings.as_byte()], now)
        else {
            panic!("expected settings");
        };
        let mut master = master_settings(&m);
        master.set_updated(now);
        master
            .apply_values(&fetched[1..], Role::Master, now)
            .unwrap_or_default();
        master.set_value(1, Value::U8(2));

        // ...and echoes them back unchanged.
        let echo = master
            .serialize_values(Command::SetSettings, ValueSelection::All)
            .unwrap();
        assert!(m.handle_input_message(&echo, now));
        assert!(!m.core().settings.cell(1).unwrap().is_changed());
        assert!(!m.core().status.is_modified_settings());
    }

    #[test]
    fn temp_mode_scenario() {
        let now = Instant::now();
        let mut m = ModuleEndpoint::new("Heater", "Temp:f4 Mode:u1", "", "", now).unwrap();
        let contract = m
            .core()
            .settings
            .serialize_contract(Command::SetSettingContract)
            .unwrap();

        let mut master = VariableSet::new();
        master.ingest_contract(&contract[1..]).unwrap();
        let id = master.contract_id();
        assert!(id.is_set());
        master.ingest_contract(&contract[1..]).unwrap();
        master.ingest_contract(&contract[1..]).unwrap();
        assert_eq!(master.contract_id(), id);

        // Module edits Mode locally; master pushes Mode=2.
        m.set_setting(1, Value::U8(5));
        master.set_value(1, Value::U8(2));
        master.set_updated(now);
        let push = master
            .serialize_values(Command::SetSettings, ValueSelection::All)
            .unwrap();
        m.handle_input_message(&push, now);
        assert!(m.core().settings.cell(1).unwrap().is_changed());
        assert_eq!(m.core().settings.get_value(1), Some(Value::U8(5)));

        // Master adopts the module's value and echoes it back.
        master.set_value(1, Value::U8(5));
        let echo = master
            .serialize_values(Command::SetSettings, ValueSelection::All)
            .unwrap();
        m.handle_input_message(&echo, now);
        assert!(!m.core().settings.cell(1).unwrap().is_changed());
    }

    // ===========================================
    // Time
    // ===========================================

    #[test]
    fn time_sync_and_extrapolation() {
        let now = Instant::now();
        let mut m = endpoint(now);
        let msg = TimeMessage {
            utc_seconds: TIME_UTC_2017 + 1000,
        }
        .encode();
        assert!(m.handle_input_message(&msg, now));
        assert!(!m.core().status.is_missing_time());
        assert!(m.is_time_set(now));
        assert_eq!(m.time_utc(now + Duration::from_secs(30)), TIME_UTC_2017 + 1030);
    }

    #[test]
    fn implausible_time_is_ignored() {
        let now = Instant::now();
        let mut m = endpoint(now);
        let msg = TimeMessage { utc_seconds: 1000 }.encode();
        assert!(m.handle_input_message(&msg, now));
        assert!(m.core().status.is_missing_time());
        assert_eq!(m.time_utc(now), 0);
    }

    #[test]
    fn stale_time_requests_resync() {
        let now = Instant::now();
        let mut m = endpoint(now);
        m.set_time(TIME_UTC_2017 + 1, now);
        m.update_time(now + Duration::from_secs(3600));
        assert!(!m.core().status.is_missing_time());

        let later = now + TIME_RESYNC_AFTER + Duration::from_secs(1);
        m.update_time(later);
        assert!(m.core().status.is_missing_time());
        assert!(m.is_time_set(later));
        assert!(!m.is_time_set(now + TIME_VALID_FOR));
    }

    // ===========================================
    // Events
    // ===========================================

    #[test]
    fn output_events() {
        let now = Instant::now();
        let mut m = endpoint(now);
        assert!(m.output_events_message().is_none());
        m.set_output_event(0, Value::U16(9));
        let msg = m.output_events_message().unwrap();
        let header = ValueHeader::decode(&msg[1..]).unwrap();
        assert!(header.event);
        assert_eq!(header.count, 1);
        m.clear_output_events();
        assert!(m.output_events_message().is_none());
    }
}
