use crate::config::LoggingSettings;
use crate::errors::ReplayError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

/// Sink for structured activity events.
pub trait ActivityLog: Send + Sync {
    fn append(&self, event: &LogEvent<'_>) -> Result<(), ReplayError>;

    /// Fire-and-forget variant; logging never interrupts replay or recording.
    fn record(&self, level: &str, event_type: &str, payload: Value) {
        let _ = self.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }
}

/// File-backed log when a path is configured, otherwise an in-process one.
pub fn activity_log_for(settings: &LoggingSettings) -> Arc<dyn ActivityLog> {
    match &settings.path {
        Some(path) => Arc::new(JsonlLogger {
            path: path.clone(),
            max_payload_bytes: settings.max_payload_bytes,
            budget_bytes: settings.budget_bytes,
        }),
        None => Arc::new(MemoryLog::new()),
    }
}

impl ActivityLog for JsonlLogger {
    fn append(&self, event: &LogEvent<'_>) -> Result<(), ReplayError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ReplayError::Io(e.to_string()))?;
        }
        let line = render_line(event, self.max_payload_bytes)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ReplayError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| ReplayError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| ReplayError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            let _ = enforce_total_budget(parent, self.budget_bytes)?;
        }

        Ok(())
    }
}

/// In-process log, used when no log file is configured and by tests.
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("memory log lock").clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|value| value["event_type"].as_str().map(str::to_string))
            .collect()
    }
}

impl ActivityLog for MemoryLog {
    fn append(&self, event: &LogEvent<'_>) -> Result<(), ReplayError> {
        let line = render_line(event, DEFAULT_MAX_PAYLOAD_BYTES)?;
        self.lines.lock().expect("memory log lock").push(line);
        Ok(())
    }
}

pub fn structured_fallback_line(cell_id: &str, state: &str, message: &str) -> String {
    format!(
        "cell_id={cell_id} state={state} message={} ",
        message.replace('\n', "\\n")
    )
}

fn render_line(event: &LogEvent<'_>, max_payload_bytes: usize) -> Result<String, ReplayError> {
    let truncated = truncate_json(event.payload.clone(), max_payload_bytes);
    serde_json::to_string(&LogEvent {
        level: event.level,
        event_type: event.event_type,
        payload: truncated,
    })
    .map_err(|e| ReplayError::Serialization(e.to_string()))
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
