//! Rolling console of server-side events shown next to the sandbox

use chrono::Local;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Lines kept in the console
pub const CONSOLE_CAPACITY: usize = 15;

/// Thread-safe, bounded, newest-first console
#[derive(Debug, Clone, Default)]
pub struct ConsoleLog {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps and records a line, dropping the oldest beyond capacity
    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), message);

        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.push_front(line);
        lines.truncate(CONSOLE_CAPACITY);
    }

    /// All lines, newest first
    pub fn lines(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }

    /// True if any retained line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().any(|l| l.contains(needle))
    }

    pub fn len(&self) -> usize {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
