//! Logging sink for connection failures.
//!
//! Failed connection establishment is reported once, as a human-readable
//! line, to a [`LogSink`] supplied by the host application. The default sink
//! forwards to `tracing`.

use std::sync::Mutex;

/// Receives human-readable failure lines from the ORM.
pub trait LogSink: Send + Sync {
    fn error(&self, message: &str);
}

/// Sink that emits every line as a `tracing` error event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn error(&self, message: &str) {
        tracing::error!(target: "ormkit", "{}", message);
    }
}

/// Sink that keeps every line in memory. Useful in tests and for surfacing
/// connection problems in a status endpoint.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn error(&self, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(message.to_string());
        }
    }
}
