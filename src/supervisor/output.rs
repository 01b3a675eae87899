//! Bounded console history shared between the capture task and readers.
//!
//! The capture task is the only writer. Any number of readers can take
//! snapshots or follow new lines through [`OutputBuffer::subscribe`].

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::broadcast;

/// Capacity of the live-follow channel. Slow followers lose the oldest lines.
const FOLLOW_CHANNEL_CAPACITY: usize = 256;

/// One captured console line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    /// When the line was captured.
    pub timestamp: DateTime<Local>,
    /// Line text without the trailing newline.
    pub text: String,
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.text)
    }
}

/// Thread-safe ring buffer of the most recent console lines.
pub struct OutputBuffer {
    lines: Mutex<VecDeque<OutputLine>>,
    capacity: usize,
    follow: broadcast::Sender<OutputLine>,
}

impl OutputBuffer {
    /// Creates a buffer holding at most `capacity` lines (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (follow, _) = broadcast::channel(FOLLOW_CHANNEL_CAPACITY);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            follow,
        }
    }

    /// Appends a line stamped with the current local time.
    pub fn append(&self, text: impl Into<String>) {
        self.push(OutputLine {
            timestamp: Local::now(),
            text: text.into(),
        });
    }

    /// Appends an already stamped line, evicting the oldest when full.
    pub fn push(&self, line: OutputLine) {
        {
            let mut lines = self.lines.lock();
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(line.clone());
        }
        // No followers is not an error.
        let _ = self.follow.send(line);
    }

    /// Returns the last `n` lines (or fewer) in insertion order.
    pub fn snapshot(&self, n: usize) -> Vec<OutputLine> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    /// Returns every retained line.
    pub fn all(&self) -> Vec<OutputLine> {
        self.snapshot(self.capacity)
    }

    /// Subscribes to lines appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OutputLine> {
        self.follow.subscribe()
    }

    /// Number of retained lines.
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// True when no line has been captured.
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Fixed capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
