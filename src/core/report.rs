// Run reporting. The pipeline talks to a `RunLog` so hosts can route
// messages wherever they like; fatal conditions travel as typed errors, not
// through the log.

use std::path::PathBuf;
use std::sync::Mutex;

/// Receives progress and diagnostics from a translation run.
///
/// `error` reports a recoverable, row- or sheet-level problem; it never
/// aborts the run. `write_all_text` persists a raw payload snapshot under a
/// logical file name.
pub trait RunLog: Send + Sync {
    fn debug(&self, message: &str);
    fn progress(&self, message: &str);
    fn error(&self, message: &str);
    fn write_all_text(&self, name: &str, contents: &str);
}

/// Routes messages to `tracing` and payload snapshots to an optional
/// directory. With no directory configured, snapshots are dropped.
#[derive(Debug, Default)]
pub struct TracingLog {
    payload_dir: Option<PathBuf>,
}

impl TracingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            payload_dir: Some(dir.into()),
        }
    }
}

impl RunLog for TracingLog {
    fn debug(&self, message: &str) {
        tracing::debug!("{message}");
    }

    fn progress(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }

    fn write_all_text(&self, name: &str, contents: &str) {
        let Some(dir) = &self.payload_dir else {
            return;
        };
        let path = dir.join(name);
        if let Err(err) = std::fs::write(&path, contents) {
            tracing::error!("failed to write {}: {err}", path.display());
        }
    }
}

/// A log entry captured by [`MemoryLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Debug(String),
    Progress(String),
    Error(String),
    File { name: String, contents: String },
}

/// Captures everything in memory. Used by tests and by hosts that present
/// run output in their own UI.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                LogEntry::Error(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn progress_messages(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                LogEntry::Progress(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn files(&self) -> Vec<(String, String)> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                LogEntry::File { name, contents } => Some((name, contents)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

impl RunLog for MemoryLog {
    fn debug(&self, message: &str) {
        self.push(LogEntry::Debug(message.to_string()));
    }

    fn progress(&self, message: &str) {
        self.push(LogEntry::Progress(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.push(LogEntry::Error(message.to_string()));
    }

    fn write_all_text(&self, name: &str, contents: &str) {
        self.push(LogEntry::File {
            name: name.to_string(),
            contents: contents.to_string(),
        });
    }
}
