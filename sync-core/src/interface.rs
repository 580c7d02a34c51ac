//! Shared state and dispatch for one module's three variable sets.
//!
//! Two variants implement [`ModuleInterface`]: [`ModuleEndpoint`](crate::ModuleEndpoint)
//! runs on the device, [`RemoteModule`](crate::RemoteModule) is the master's
//! view of one device. Each only recognises the command directions of its
//! role; anything else is reported as unrecognised without side effects.

use crate::oom::try_buffer;
use crate::variable_set::VariableSet;
use misync_types::StatusBits;
use std::fmt;
use std::time::Instant;

/// Longest module name kept.
pub const MAX_MODULE_NAME_LENGTH: usize = 8;

/// One of the three variable groups of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetKind {
    /// Configuration, master to module (and back when edited locally)
    Settings,
    /// Values fed to the module
    Inputs,
    /// Values produced by the module
    Outputs,
}

/// Observable events raised while handling messages.
///
/// `Sample*` notifications fire right before a reply is built, so a callback
/// can refresh the values about to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Settings contract received
    NewSettingContract,
    /// Inputs contract received
    NewInputContract,
    /// Outputs contract received
    NewOutputContract,
    /// Settings applied and ready
    NewSettings,
    /// Inputs applied and ready
    NewInputs,
    /// Outputs applied and ready
    NewOutputs,
    /// Status received
    NewStatus,
    /// Clock synchronised
    NewTime,
    /// About to send settings
    SampleSettings,
    /// About to send inputs
    SampleInputs,
    /// About to send outputs
    SampleOutputs,
    /// About to send status
    SampleStatus,
}

/// Callback type for [`Notification`]s.
pub type NotifyFn = Box<dyn FnMut(Notification, &mut InterfaceCore) + Send>;

/// Optional notification callback.
#[derive(Default)]
pub struct Notifier(Option<NotifyFn>);

impl Notifier {
    /// Wrap a callback.
    pub fn new(f: NotifyFn) -> Self {
        Self(Some(f))
    }

    /// Invoke the callback, if any.
    pub fn fire(&mut self, notification: Notification, core: &mut InterfaceCore) {
        if let Some(f) = self.0.as_mut() {
            f(notification, core);
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.is_some() { "Notifier(set)" } else { "Notifier(none)" })
    }
}

/// State common to both roles.
#[derive(Debug, Clone, Default)]
pub struct InterfaceCore {
    name: String,
    /// Settings set
    pub settings: VariableSet,
    /// Inputs set
    pub inputs: VariableSet,
    /// Outputs set
    pub outputs: VariableSet,
    /// Status flags
    pub status: StatusBits,
    last_alive: Option<Instant>,
    uptime: u32,
}

impl InterfaceCore {
    /// Core with empty sets. The name is cut to eight characters.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.chars().take(MAX_MODULE_NAME_LENGTH).collect(),
            ..Self::default()
        }
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set by kind.
    pub fn set(&self, kind: SetKind) -> &VariableSet {
        match kind {
            SetKind::Settings => &self.settings,
            SetKind::Inputs => &self.inputs,
            SetKind::Outputs => &self.outputs,
        }
    }

    /// Mutable set by kind.
    pub fn set_mut(&mut self, kind: SetKind) -> &mut VariableSet {
        match kind {
            SetKind::Settings => &mut self.settings,
            SetKind::Inputs => &mut self.inputs,
            SetKind::Outputs => &mut self.outputs,
        }
    }

    /// Last life sign, `None` if never heard from.
    pub fn last_alive(&self) -> Option<Instant> {
        self.last_alive
    }

    /// Record a life sign.
    pub fn set_last_alive(&mut self, now: Instant) {
        self.last_alive = Some(now);
    }

    /// Seconds since the last life sign.
    pub fn last_alive_age(&self, now: Instant) -> Option<u64> {
        self.last_alive
            .map(|at| now.saturating_duration_since(at).as_secs())
    }

    /// Uptime in seconds as last known.
    pub fn uptime(&self) -> u32 {
        self.uptime
    }

    /// Store a reported uptime.
    pub fn set_uptime(&mut self, seconds: u32) {
        self.uptime = seconds;
    }
}

/// Outcome of a request handler that recognised the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Full reply message, command byte first
    Message(Vec<u8>),
    /// Reply could not be allocated; the out-of-memory flag is raised
    Suppressed,
}

impl Reply {
    /// Wrap the result of a fallible serialization.
    pub(crate) fn from_buffer(buffer: Option<Vec<u8>>) -> Self {
        match buffer {
            Some(m) => Self::Message(m),
            None => Self::Suppressed,
        }
    }

    /// Copy a fixed-size message into a fallibly allocated reply.
    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_buffer(try_buffer(bytes.len()).map(|mut b| {
            b.extend_from_slice(bytes);
            b
        }))
    }
}

/// What [`ModuleInterface::handle_message`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// Fire-and-forget command applied
    Input,
    /// Request answered; send this back
    Reply(Vec<u8>),
    /// Request recognised but the reply was suppressed
    ReplySuppressed,
    /// Not a command for this role, or malformed
    Unrecognized,
}

impl Handled {
    /// Whether the message was recognised.
    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::Unrecognized)
    }
}

/// Capability shared by the module and master variants.
pub trait ModuleInterface {
    /// Shared state.
    fn core(&self) -> &InterfaceCore;

    /// Mutable shared state.
    fn core_mut(&mut self) -> &mut InterfaceCore;

    /// Apply a fire-and-forget command. Returns false if not recognised.
    fn handle_input_message(&mut self, message: &[u8], now: Instant) -> bool;

    /// Answer a request. Returns `None` if not recognised.
    fn handle_request_message(&mut self, message: &[u8], now: Instant) -> Option<Reply>;

    /// Note a life sign after a handled message.
    fn record_alive(&mut self, now: Instant) {
        self.core_mut().set_last_alive(now);
    }

    /// Try both command classes.
    fn handle_message(&mut self, message: &[u8], now: Instant) -> Handled {
        if self.handle_input_message(message, now) {
            self.record_alive(now);
            return Handled::Input;
        }
        match self.handle_request_message(message, now) {
            Some(Reply::Message(m)) => {
                self.record_alive(now);
                Handled::Reply(m)
            }
            Some(Reply::Suppressed) => {
                self.record_alive(now);
                Handled::ReplySuppressed
            }
            None => Handled::Unrecognized,
        }
    }
}
