//! Log sink - reports outputs (and optionally settings) through `tracing`.

use async_trait::async_trait;
use misync_client::{Sink, SinkError};
use misync_core::{ModuleInterface, ModuleInterfaceSet, SetKind, SinkSlot};
use tracing::info;

/// Sink that logs every value it has not yet seen.
#[derive(Debug, Default)]
pub struct LogSink {
    settings: bool,
    logged: usize,
}

impl LogSink {
    /// Log outputs, plus settings if `settings` is set.
    pub fn new(settings: bool) -> Self {
        Self {
            settings,
            logged: 0,
        }
    }

    /// Values logged so far.
    pub fn logged(&self) -> usize {
        self.logged
    }

    fn log_pending(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
        kind: SetKind,
        events_only: bool,
    ) {
        for module in modules.modules_mut() {
            let name = module.core().name().to_string();
            let set = module.core_mut().set_mut(kind);
            if !events_only && !set.is_updated() {
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
                if let Some(value) = cell.value() {
                    info!(module = %name, kind = ?kind, name = %var, %value, event = events_only, "value");
                    self.logged += 1;
                }
                slot.clear(cell);
            }
        }
    }
}

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn put_settings(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
    ) -> Result<(), SinkError> {
        if self.settings {
            self.log_pending(modules, slot, SetKind::Settings, false);
        } else {
            // Not logged; drop the bits so the settings can settle.
            for module in modules.modules_mut() {
                for cell in module.core_mut().settings.cells_mut() {
                    slot.clear(cell);
                }
            }
        }
        Ok(())
    }

    async fn put_values(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
    ) -> Result<(), SinkError> {
        self.log_pending(modules, slot, SetKind::Outputs, false);
        Ok(())
    }

    async fn put_events(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
    ) -> Result<(), SinkError> {
        self.log_pending(modules, slot, SetKind::Outputs, true);
        Ok(())
    }
}
