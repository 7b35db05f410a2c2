//! Console ring buffer shared across worker runs.
//!
//! Unlike the worker process itself, the buffer belongs to the supervisor:
//! state notes keep arriving between runs and the retro log window shows
//! one continuous stream.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Default maximum number of log lines to keep in the ring buffer.
/// Can be overridden via `log_buffer_size` in config/global.toml.
pub const DEFAULT_LOG_BUFFER: usize = 2_000;

/// How much of a stderr line is kept as the last-error headline.
pub const ERROR_HEADLINE_MAX: usize = 200;

/// A single line of worker output, or a supervisor state note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Sequential ID for polling (`GET /api/worker/logs?since=<id>`)
    pub id: u64,
    /// Unix timestamp (seconds)
    pub timestamp: u64,
    /// Where the line came from
    pub channel: LogChannel,
    /// Raw text content
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogChannel {
    Stdout,
    Stderr,
    /// Messages from hako-core itself (state transitions, stop notices)
    System,
}

/// Ring buffer that stores recent log lines with sequential IDs.
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    next_id: u64,
    max_size: usize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_BUFFER)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_size),
            next_id: 0,
            max_size,
        }
    }

    /// Push a new line and return the created `LogEntry`. The oldest entry
    /// is evicted once the ring is full.
    pub fn push(&mut self, channel: LogChannel, text: String) -> LogEntry {
        let entry = LogEntry {
            id: self.next_id,
            timestamp: current_timestamp(),
            channel,
            text,
        };
        self.next_id += 1;

        if self.entries.len() >= self.max_size {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        entry
    }

    /// Get all lines with id > `since_id` (for polling).
    pub fn get_since(&self, since_id: u64) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.id > since_id)
            .cloned()
            .collect()
    }

    /// Get the most recent `count` lines.
    pub fn get_recent(&self, count: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(count).rev().cloned().collect()
    }

    /// Drop all entries. IDs stay monotonic so pollers holding a `since`
    /// cursor never see reuse.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Bounded headline for the last-error field, cut on a char boundary.
pub(crate) fn error_headline(line: &str) -> String {
    if line.chars().count() <= ERROR_HEADLINE_MAX {
        line.to_string()
    } else {
        line.chars().take(ERROR_HEADLINE_MAX).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_eviction() {
        let mut buf = LogBuffer::with_capacity(3);
        for i in 0..5 {
            buf.push(LogChannel::Stdout, format!("line {}", i));
        }
        assert_eq!(buf.len(), 3);
        let recent = buf.get_recent(10);
        assert_eq!(recent[0].text, "line 2");
        assert_eq!(recent[2].text, "line 4");
        assert_eq!(recent[2].id, 4);
    }

    #[test]
    fn test_get_since() {
        let mut buf = LogBuffer::with_capacity(10);
        for i in 0..5 {
            buf.push(LogChannel::Stdout, format!("line {}", i));
        }
        let newer = buf.get_since(2);
        assert_eq!(newer.len(), 2);
        assert_eq!(newer[0].text, "line 3");
    }

    #[test]
    fn test_get_recent_caps_at_len() {
        let mut buf = LogBuffer::with_capacity(10);
        buf.push(LogChannel::System, "only".to_string());
        assert_eq!(buf.get_recent(100).len(), 1);
    }

    #[test]
    fn test_clear_keeps_ids_monotonic() {
        let mut buf = LogBuffer::with_capacity(10);
        buf.push(LogChannel::Stdout, "a".to_string());
        buf.push(LogChannel::Stderr, "b".to_string());
        buf.clear();
        assert!(buf.is_empty());

        let entry = buf.push(LogChannel::System, "c".to_string());
        assert_eq!(entry.id, 2);
        assert_eq!(buf.get_since(1).len(), 1);
    }

    #[test]
    fn test_error_headline_truncation() {
        let short = "connection refused";
        assert_eq!(error_headline(short), short);

        let long = "x".repeat(500);
        assert_eq!(error_headline(&long).chars().count(), ERROR_HEADLINE_MAX);

        // 멀티바이트 문자 경계에서 자르지 않는지 확인
        let wide = "에러".repeat(300);
        let headline = error_headline(&wide);
        assert_eq!(headline.chars().count(), ERROR_HEADLINE_MAX);
    }
}
