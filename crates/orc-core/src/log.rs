use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of the append-only log stream (§3). Carries the raw formatted
/// text verbatim, ANSI escapes included (§9 "ANSI-colored log passthrough")
/// so the UI's own ANSI parser keeps working — this crate never strips them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the line was emitted.
    pub timestamp: DateTime<Utc>,
    /// The raw formatted line, colors and all.
    pub line: String,
}

impl LogRecord {
    /// Wrap a raw line, stamping it with the current time.
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            line: line.into(),
        }
    }
}

/// A bounded in-memory tail of log records (§3, §9 decision: 10,000 lines),
/// held for replay to newly connected UI subscribers. Oldest lines are
/// dropped first once the cap is reached.
#[derive(Debug)]
pub struct LogTail {
    capacity: usize,
    lines: VecDeque<LogRecord>,
}

impl LogTail {
    /// Create an empty tail bounded to `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Append a line, evicting the oldest if the tail is at capacity.
    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(LogRecord::new(line));
    }

    /// The current contents, oldest first.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.lines.iter().cloned().collect()
    }

    /// Number of lines currently held.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the tail is empty.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
