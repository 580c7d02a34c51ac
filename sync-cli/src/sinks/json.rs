//! JSON file sink.
//!
//! The file holds one object per module:
//!
//! ```json
//! {
//!   "Heater": {
//!     "settings": { "Target": 21.5, "Mode": 2 },
//!     "outputs": { "Power": 120 }
//!   }
//! }
//! ```
//!
//! Settings edited in the file are imported on the next transfer. Outputs and
//! settings that changed elsewhere are written back. Values this sink fed in
//! are not written back to it.

use async_trait::async_trait;
use misync_client::{mark_ready_when_complete, write_named, Sink, SinkError};
use misync_core::{ModuleInterface, ModuleInterfaceSet, SetKind, SinkSlot};
use misync_types::Value;
use serde_json::{Map, Number, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

const SETTINGS_KEY: &str = "settings";
const OUTPUTS_KEY: &str = "outputs";

/// Sink backed by a JSON document on disk.
#[derive(Debug)]
pub struct JsonFileSink {
    path: PathBuf,
    document: Map<String, JsonValue>,
    last_text: Option<String>,
    dirty: bool,
}

impl JsonFileSink {
    /// Sink for the file at `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Map::new(),
            last_text: None,
            dirty: false,
        }
    }

    /// File the sink reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file if its contents changed. Returns whether it did.
    async fn reload(&mut self) -> Result<bool, SinkError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if self.last_text.as_deref() == Some(text.as_str()) {
            return Ok(false);
        }
        let document: Map<String, JsonValue> = serde_json::from_str(&text)
            .map_err(|e| SinkError::Format(format!("{}: {}", self.path.display(), e)))?;
        debug!(path = %self.path.display(), modules = document.len(), "sink file loaded");
        self.document = document;
        self.last_text = Some(text);
        Ok(true)
    }

    async fn save(&mut self) -> Result<(), SinkError> {
        if !self.dirty {
            return Ok(());
        }
        let mut text = serde_json::to_string_pretty(&self.document)
            .map_err(|e| SinkError::Format(e.to_string()))?;
        text.push('\n');
        tokio::fs::write(&self.path, &text).await?;
        self.last_text = Some(text);
        self.dirty = false;
        Ok(())
    }

    fn insert(&mut self, module: &str, key: &str, name: String, value: JsonValue) {
        let mut entry = match self.document.remove(module) {
            Some(JsonValue::Object(map)) => map,
            _ => Map::new(),
        };
        let mut section = match entry.remove(key) {
            Some(JsonValue::Object(map)) => map,
            _ => Map::new(),
        };
        section.insert(name, value);
        entry.insert(key.to_string(), JsonValue::Object(section));
        self.document
            .insert(module.to_string(), JsonValue::Object(entry));
        self.dirty = true;
    }

    fn export(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
        kind: SetKind,
        events_only: bool,
    ) {
        let key = match kind {
            SetKind::Settings => SETTINGS_KEY,
            _ => OUTPUTS_KEY,
        };
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
                    self.insert(&name, key, var, to_json(value));
                }
                slot.clear(cell);
            }
        }
    }
}

/// JSON form of a value. Non-finite floats become `null`.
fn to_json(value: Value) -> JsonValue {
    match value {
        Value::Bool(v) => JsonValue::Bool(v),
        Value::F32(v) => v
            .to_string()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        other => JsonValue::from(other.as_f64() as i64),
    }
}

/// Text handed to the value parser, `None` for unusable JSON.
fn to_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Bool(v) => Some(v.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[async_trait]
impl Sink for JsonFileSink {
    fn name(&self) -> &str {
        "json"
    }

    async fn get_settings(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
        now: Instant,
    ) -> Result<(), SinkError> {
        if !self.reload().await? {
            return Ok(());
        }
        for (module_name, entry) in &self.document {
            let Some(settings) = entry.get(SETTINGS_KEY).and_then(JsonValue::as_object) else {
                continue;
            };
            let Some(ix) = modules.find_by_name_ignore_case(module_name) else {
                debug!(module = %module_name, "sink file names unknown module");
                continue;
            };
            let Some(module) = modules.module_mut(ix) else { continue };
            let set = &mut module.core_mut().settings;
            if !set.got_contract() {
                continue;
            }
            for (name, value) in settings {
                let Some(text) = to_text(value) else {
                    warn!(module = %module_name, name = %name, "unusable setting value");
                    continue;
                };
                match write_named(set, slot, name, &text) {
                    Ok(outcome) => {
                        debug!(module = %module_name, name = %name, ?outcome, "setting imported")
                    }
                    Err(e) => warn!(module = %module_name, error = %e, "setting not imported"),
                }
            }
            if mark_ready_when_complete(set, now) {
                debug!(module = %module_name, "settings complete");
            }
        }
        Ok(())
    }

    async fn put_settings(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
    ) -> Result<(), SinkError> {
        self.export(modules, slot, SetKind::Settings, false);
        self.save().await
    }

    async fn put_values(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
    ) -> Result<(), SinkError> {
        self.export(modules, slot, SetKind::Outputs, false);
        if self.dirty {
            info!(path = %self.path.display(), "outputs written");
        }
        self.save().await
    }

    async fn put_events(
        &mut self,
        modules: &mut ModuleInterfaceSet,
        slot: SinkSlot,
    ) -> Result<(), SinkError> {
        self.export(modules, slot, SetKind::Outputs, true);
        self.save().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use misync_core::{Handled, ModuleEndpoint, RemoteModule, SinkRegistry};
    use misync_types::{Address, Command};
    use tempfile::TempDir;

    /// Master-side set with one `Heater` module whose contracts are known.
    pub(crate) fn connected(now: Instant) -> (ModuleInterfaceSet, ModuleEndpoint) {
        let mut device =
            ModuleEndpoint::new("Heater", "Target:f4 Mode:u1", "", "Power:u2", now).unwrap();
        let mut set = ModuleInterfaceSet::new("ma");
        set.add_module(RemoteModule::new("Heater", "he", Address::local(44)));
        for cmd in [
            Command::SendSettingContract,
            Command::SendInputContract,
            Command::SendOutputContract,
        ] {
            if let Handled::Reply(reply) = device.handle_message(&[cmd.as_byte()], now) {
                set.module_mut(0).unwrap().handle_message(&reply, now);
            }
        }
        (set, device)
    }

    /// Fetch the device's outputs into the master-side set.
    pub(crate) fn outputs_from(
        set: &mut ModuleInterfaceSet,
        device: &mut ModuleEndpoint,
        now: Instant,
    ) {
        if let Handled::Reply(reply) = device.handle_message(&[Command::SendOutputs.as_byte()], now)
        {
            set.module_mut(0).unwrap().handle_message(&reply, now);
        }
    }

    fn read(path: &Path) -> JsonValue {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    // ===========================================
    // Import Tests
    // ===========================================

    #[tokio::test]
    async fn imports_settings_from_file() {
        let now = Instant::now();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sink.json");
        std::fs::write(
            &path,
            r#"{"heater": {"settings": {"TARGET": 21.5, "Mode": "2"}}, "Ghost": {}}"#,
        )
        .unwrap();

        let (mut set, _) = connected(now);
        let slot = SinkRegistry::new().register().unwrap();
        let mut sink = JsonFileSink::new(&path);
        sink.get_settings(&mut set, slot, now).await.unwrap();

        let settings = &set.module(0).unwrap().core().settings;
        assert_eq!(settings.get_value(0), Some(Value::F32(21.5)));
        assert_eq!(settings.get_value(1), Some(Value::U8(2)));
        assert!(settings.is_updated());
    }

    #[tokio::test]
    async fn bad_values_are_skipped() {
        let now = Instant::now();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sink.json");
        std::fs::write(
            &path,
            r#"{"Heater": {"settings": {"Target": [1], "Mode": 999}}}"#,
        )
        .unwrap();

        let (mut set, _) = connected(now);
        let slot = SinkRegistry::new().register().unwrap();
        let mut sink = JsonFileSink::new(&path);
        sink.get_settings(&mut set, slot, now).await.unwrap();

        let settings = &set.module(0).unwrap().core().settings;
        assert!(!settings.is_updated());
        assert!(!settings.cell(1).unwrap().is_initialized());
    }

    #[tokio::test]
    async fn missing_file_is_not_an_error() {
        let now = Instant::now();
        let dir = TempDir::new().unwrap();
        let (mut set, _) = connected(now);
        let slot = SinkRegistry::new().register().unwrap();
        let mut sink = JsonFileSink::new(dir.path().join("absent.json"));
        sink.get_settings(&mut set, slot, now).await.unwrap();
    }

    #[tokio::test]
    async fn malformed_file_is_a_format_error() {
        let now = Instant::now();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sink.json");
        std::fs::write(&path, "{not json").unwrap();

        let (mut set, _) = connected(now);
        let slot = SinkRegistry::new().register().unwrap();
        let mut sink = JsonFileSink::new(&path);
        assert!(matches!(
            sink.get_settings(&mut set, slot, now).await,
            Err(SinkError::Format(_))
        ));
    }

    // ===========================================
    // Export Tests
    // ===========================================

    #[tokio::test]
    async fn writes_outputs_to_file() {
        let now = Instant::now();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sink.json");
        let (mut set, mut device) = connected(now);
        let slot = SinkRegistry::new().register().unwrap();
        let mut sink = JsonFileSink::new(&path);

        device.set_output(0, Value::U16(120));
        device.outputs_ready(now);
        outputs_from(&mut set, &mut device, now);
        sink.put_values(&mut set, slot).await.unwrap();

        let doc = read(&path);
        assert_eq!(doc["Heater"]["outputs"]["Power"], JsonValue::from(120));
        assert!(!slot.is_pending(set.module(0).unwrap().core().outputs.cell(0).unwrap()));
    }

    #[tokio::test]
    async fn imported_settings_are_not_written_back() {
        let now = Instant::now();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sink.json");
        let original = r#"{"Heater":{"settings":{"Target":18,"Mode":1}}}"#;
        std::fs::write(&path, original).unwrap();

        let (mut set, _) = connected(now);
        let slot = SinkRegistry::new().register().unwrap();
        let mut sink = JsonFileSink::new(&path);
        sink.get_settings(&mut set, slot, now).await.unwrap();
        sink.put_settings(&mut set, slot).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[tokio::test]
    async fn settings_from_elsewhere_are_written() {
        let now = Instant::now();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sink.json");
        let (mut set, _) = connected(now);
        let mut registry = SinkRegistry::new();
        let other = registry.register().unwrap();
        let mine = registry.register().unwrap();

        let settings = &mut set.module_mut(0).unwrap().core_mut().settings;
        write_named(settings, other, "Target", "19.25").unwrap();
        write_named(settings, other, "Mode", "3").unwrap();
        settings.set_updated(now);

        let mut sink = JsonFileSink::new(&path);
        sink.put_settings(&mut set, mine).await.unwrap();

        let doc = read(&path);
        assert_eq!(doc["Heater"]["settings"]["Target"], JsonValue::from(19.25));
        assert_eq!(doc["Heater"]["settings"]["Mode"], JsonValue::from(3));
    }

    #[test]
    fn json_forms() {
        assert_eq!(to_json(Value::Bool(true)), JsonValue::Bool(true));
        assert_eq!(to_json(Value::F32(0.1)).to_string(), "0.1");
        assert_eq!(to_json(Value::F32(f32::NAN)), JsonValue::Null);
        assert_eq!(to_json(Value::I16(-5)), JsonValue::from(-5));
        assert_eq!(to_text(&JsonValue::Bool(false)).as_deref(), Some("false"));
        assert_eq!(to_text(&JsonValue::Null), None);
    }
}
