use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorLevel {
    Warning,
    Error,
}

/// A warning or error captured from the log stream.
#[derive(Clone, Debug)]
pub struct ErrorEntry {
    pub timestamp: SystemTime,
    pub level: ErrorLevel,
    pub message: String,
    pub target: String,
    pub fields: BTreeMap<String, String>,
}

impl ErrorEntry {
    /// The conversation the event was logged for, if it carried one.
    pub fn conversation_id(&self) -> Option<&str> {
        self.fields.get("conversation_id").map(String::as_str)
    }
}

/// Bounded diagnostics log shared between the tracing layer and the UI.
/// Cloning yields another handle to the same entries.
#[derive(Clone)]
pub struct ErrorStore {
    entries: Arc<Mutex<VecDeque<ErrorEntry>>>,
    max_entries: usize,
}

impl ErrorStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(max_entries))),
            max_entries,
        }
    }

    pub fn add_entry(&self, entry: ErrorEntry) {
        if self.max_entries == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        // FIFO eviction when exceeding max
        while entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn get_all_entries(&self) -> Vec<ErrorEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn error_count(&self) -> usize {
        self.count_level(ErrorLevel::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count_level(ErrorLevel::Warning)
    }

    fn count_level(&self, level: ErrorLevel) -> usize {
        self.entries.lock().iter().filter(|e| e.level == level).count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
