use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Per-run event log.
///
/// - default fields are `type`, `run_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - every event is kept in memory; when a path is set it is also appended
///   to that file as one compact JSON object per line
///
/// A writer belongs to exactly one run and is never shared.
#[derive(Debug)]
pub struct EventWriter {
    path: Option<PathBuf>,
    run_id: String,
    events: Vec<Value>,
}

impl EventWriter {
    pub fn new(path: Option<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path,
            run_id: run_id.into(),
            events: Vec::new(),
        }
    }

    pub fn in_memory(run_id: impl Into<String>) -> Self {
        Self::new(None, run_id)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn events(&self) -> &[Value] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Value> {
        self.events
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| event.get("type").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    pub fn emit(&mut self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }
        let event = Value::Object(event);

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let line = serde_json::to_string(&event)?;
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }

        self.events.push(event.clone());
        Ok(event)
    }

    /// Like [`EventWriter::emit`] but never fails: a file write error is
    /// dropped and the event is still kept in memory. Used by pipeline stages
    /// that must not fail because of observability.
    pub fn record(&mut self, event_type: &str, payload: EventPayload) -> Value {
        match self.emit(event_type, payload.clone()) {
            Ok(event) => event,
            Err(_) => {
                self.path = None;
                self.emit(event_type, payload).unwrap_or(Value::Null)
            }
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let mut writer = EventWriter::new(Some(path.clone()), "run-123");

        let mut payload = EventPayload::new();
        payload.insert("role".to_string(), Value::String("logo".to_string()));
        let emitted = writer.emit("asset_validated", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("asset_validated".to_string()));
        assert_eq!(parsed["run_id"], Value::String("run-123".to_string()));
        assert_eq!(parsed["role"], Value::String("logo".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let mut writer = EventWriter::in_memory("run-123");

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("override".to_string()));
        let emitted = writer.emit("run_started", payload)?;

        assert_eq!(emitted["type"], Value::String("override".to_string()));
        assert_eq!(emitted["run_id"], Value::String("run-123".to_string()));
        Ok(())
    }

    #[test]
    fn in_memory_writer_keeps_event_order() -> anyhow::Result<()> {
        let mut writer = EventWriter::in_memory("run-123");
        writer.emit("one", EventPayload::new())?;
        writer.emit("two", EventPayload::new())?;
        assert_eq!(writer.event_types(), vec!["one", "two"]);
        assert!(writer.path().is_none());
        Ok(())
    }

    #[test]
    fn record_survives_unwritable_path() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, b"file")?;
        let mut writer = EventWriter::new(Some(blocker.join("events.jsonl")), "run-123");

        let event = writer.record("degraded", EventPayload::new());
        assert_eq!(event["type"], Value::String("degraded".to_string()));
        assert_eq!(writer.events().len(), 1);
        assert!(writer.path().is_none());
        Ok(())
    }
}
