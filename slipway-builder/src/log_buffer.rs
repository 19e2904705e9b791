//! Log buffer service
//!
//! Collects the build transcript. Stages append entries while they run and
//! the CLI drains the buffer to print it.

use slipway_core::domain::log::{LogEntry, LogLevel};
use std::sync::{Arc, Mutex};

/// Service for managing log buffers
pub trait LogBufferService: Send + Sync {
    /// Adds a log entry to the buffer
    fn add_entry(&self, entry: LogEntry);

    /// Drains all log entries from the buffer
    ///
    /// # Returns
    /// All entries that were in the buffer, oldest first
    fn drain(&self) -> Vec<LogEntry>;

    fn info(&self, message: String) {
        self.add_entry(LogEntry::new(LogLevel::Info, message));
    }

    fn error(&self, message: String) {
        self.add_entry(LogEntry::new(LogLevel::Error, message));
    }
}

/// In-memory implementation of LogBufferService
#[derive(Clone, Default)]
pub struct InMemoryLogBuffer {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogBufferService for InMemoryLogBuffer {
    fn add_entry(&self, entry: LogEntry) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push(entry);
    }

    fn drain(&self) -> Vec<LogEntry> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = InMemoryLogBuffer::new();
        buffer.info("provisioned".to_string());
        buffer.error("install failed".to_string());

        let entries = buffer.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[1].level, LogLevel::Error);
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let buffer = InMemoryLogBuffer::new();
        let clone = buffer.clone();
        clone.info("from clone".to_string());

        assert_eq!(buffer.drain().len(), 1);
    }
}
