//! External systems the master exchanges values with.
//!
//! A sink is anything outside the module bus that wants to see settings and
//! outputs or feed settings in: a file, a web service, a log. The master
//! calls each registered sink with its own [`SinkSlot`], and a sink only
//! ever clears its own pending bits.

use async_trait::async_trait;
use misync_core::{ModuleInterface, ModuleInterfaceSet, SetKind, SinkSlot, SinkWrite, VariableSet};
use misync_types::Value;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Underlying storage failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// External data could not be understood.
    #[error("format error: {0}")]
    Format(String),

    /// The other side went away.
    #[error("sink disconnected")]
    Disconnected,
}

/// An external system synchronised with the master's modules.
///
/// All methods default to doing nothing, so a sink implements only the
/// directions it supports.
#[async_trait]
pub trait Sink: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Housekeeping, called once per master round.
    async fn update(
        &mut self,
        _modules: &mut ModuleInterfaceSet,
        _slot: SinkSlot,
        _now: Instant,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    /// Import settings from the external system.
    async fn get_settings(
        &mut self,
        _modules: &mut ModuleInterfaceSet,
        _slot: SinkSlot,
        _now: Instant,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    /// Export settings pending for this sink.
    async fn put_settings(
        &mut self,
        _modules: &mut ModuleInterfaceSet,
        _slot: SinkSlot,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    /// Import values from the external system.
    async fn get_values(
        &mut self,
        _modules: &mut ModuleInterfaceSet,
        _slot: SinkSlot,
        _now: Instant,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    /// Export output values after a periodic transfer.
    async fn put_values(
        &mut self,
        _modules: &mut ModuleInterfaceSet,
        _slot: SinkSlot,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    /// Export outputs flagged as events.
    async fn put_events(
        &mut self,
        _modules: &mut ModuleInterfaceSet,
        _slot: SinkSlot,
    ) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Mark settings update-ready once every value has been written at least once.
///
/// Returns whether the set is ready.
pub fn mark_ready_when_complete(set: &mut VariableSet, now: Instant) -> bool {
    if set.is_updated() {
        return true;
    }
    if !set.got_contract() || set.is_empty() {
        return false;
    }
    if set.cells().iter().all(|c| c.is_initialized()) {
        set.set_updated(now);
        return true;
    }
    false
}

/// Write a named value through `slot`, looked up without regard to case.
pub fn write_named(
    set: &mut VariableSet,
    slot: SinkSlot,
    name: &str,
    text: &str,
) -> Result<SinkWrite, SinkError> {
    let Some(ix) = set.index_of_ignore_case(name) else {
        return Err(SinkError::Format(format!("unknown variable {}", name)));
    };
    let Some(cell) = set.cell_mut(ix) else {
        return Err(SinkError::Format(format!("unknown variable {}", name)));
    };
    let value = Value::parse(cell.variable_type(), text)
        .map_err(|e| SinkError::Format(format!("{}: {}", name, e)))?;
    Ok(slot.set_value_and_mark(cell, value))
}

/// One value leaving the master through a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SinkUpdate {
    /// Module name
    pub module: String,
    /// Which set the value belongs to
    pub kind: SetKind,
    /// Variable name
    pub name: String,
    /// Current value
    pub value: Value,
    /// Delivered as an event
    pub event: bool,
}

/// A setting change arriving through a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SettingWrite {
    /// Module name, case-insensitive
    pub module: String,
    /// Setting name, case-insensitive
    pub name: String,
    /// New value
    pub value: Value,
}

/// In-process sink backed by tokio channels.
///
/// Pending settings and outputs go out as [`SinkUpdate`]s; [`SettingWrite`]s
/// received on the other channel are applied on the next settings import.
#[derive(Debug)]
pub struct ChannelSink {
    updates: mpsc::UnboundedSender<SinkUpdate>,
    writes: mpsc::UnboundedReceiver<SettingWrite>,
}

impl ChannelSink {
    /// Sink plus the application's ends of both channels.
    pub fn new() -> (
        Self,
        mpsc::UnboundedReceiver<SinkUpdate>,
        mpsc::UnboundedSender<SettingWrite>,
    ) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        (
            Self {
                updates: update_tx,
                writes: write_rx,
            },
            update_rx,
            write_tx,
        )
    }

    fn emit(
        &self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
        kind: SetKind,
        events_only: bool,
    ) -> Result<(), SinkError> {
        for module in modules.modules_mut() {
            let name = module.core().name().to_string();
            let set = module.core_mut().set_mut(kind);
            if !set.is_updated() && !events_only {
                continue;
            }
            for ix in 0..set.len() {
                let var = set.name(ix).unwrap_or_default().to_string();
                let Some(cell) = set.cell_mut(ix) else { continue };
                let wanted = if events_only {
                    cell.is_event()
                } else {
                    slot.is_pending(cell)
                };
                if !wanted {
                    continue;
                }
                let Some(value) = cell.value() else { continue };
                self.updates
                    .send(SinkUpdate {
                        module: name.clone(),
                        kind,
                        name: var,
                        value,
                        event: events_only,
                    })
                    .map_err(|_| SinkError::Disconnected)?;
                slot.clear(cell);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn get_settings(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
        now: Instant,
    ) -> Result<(), SinkError> {
        while let Ok(write) = self.writes.try_recv() {
            let Some(m) = modules.find_by_name_ignore_case(&write.module) else {
                debug!(module = %write.module, "setting for unknown module");
                continue;
            };
            let Some(module) = modules.module_mut(m) else { continue };
            let settings = &mut module.core_mut().settings;
            let Some(ix) = settings.index_of_ignore_case(&write.name) else {
                debug!(module = %write.module, name = %write.name, "unknown setting");
                continue;
            };
            if let Some(cell) = settings.cell_mut(ix) {
                let outcome = slot.set_value_and_mark(cell, write.value);
                debug!(module = %write.module, name = %write.name, ?outcome, "setting imported");
            }
            mark_ready_when_complete(settings, now);
        }
        Ok(())
    }

    async fn put_settings(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
    ) -> Result<(), SinkError> {
        self.emit(modules, slot, SetKind::Settings, false)
    }

    async fn put_values(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
    ) -> Result<(), SinkError> {
        self.emit(modules, slot, SetKind::Outputs, false)
    }

    async fn put_events(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
    ) -> Result<(), SinkError> {
        self.emit(modules, slot, SetKind::Outputs, true)
    }
}
