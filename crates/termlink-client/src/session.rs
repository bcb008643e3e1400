//! Client-side view of one remote PTY session.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use termlink_core::SessionId;

/// Options for creating a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Terminal columns.
    pub cols: u16,
    /// Terminal rows.
    pub rows: u16,
    /// Shell to launch; the host picks its default when unset.
    pub shell: Option<String>,
    /// Working directory for the shell.
    pub cwd: Option<String>,
    /// Extra environment variables.
    pub env: Option<HashMap<String, String>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            shell: None,
            cwd: None,
            env: None,
        }
    }
}

/// Snapshot of a session, as reported by `SessionTransport::sessions`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub cols: u16,
    pub rows: u16,
    pub attached: bool,
    /// The host reported the PTY as exited.
    pub closed: bool,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    /// Output chunks waiting for the next attach.
    pub buffered_chunks: usize,
    /// Chunks discarded because the buffer was full.
    pub dropped_chunks: u64,
    pub created_at: DateTime<Utc>,
}

/// Bounded FIFO of output chunks received while a session is detached.
///
/// Holds whole chunks rather than bytes so a replay never splits a UTF-8
/// sequence or an escape code in half.
#[derive(Debug)]
pub(crate) struct OutputBuffer {
    chunks: VecDeque<String>,
    capacity: usize,
    dropped: u64,
}

impl OutputBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Append a chunk. Returns `true` if the oldest chunk was evicted.
    pub(crate) fn push(&mut self, chunk: String) -> bool {
        if self.capacity == 0 {
            self.dropped += 1;
            return true;
        }
        let evicted = self.chunks.len() >= self.capacity;
        if evicted {
            self.chunks.pop_front();
            self.dropped += 1;
        }
        self.chunks.push_back(chunk);
        evicted
    }

    /// Remove and return every chunk, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<String> {
        self.chunks.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Registry record for one session.
#[derive(Debug)]
pub(crate) struct SessionEntry {
    pub(crate) options: SessionOptions,
    pub(crate) closed: bool,
    pub(crate) exit_code: Option<i32>,
    pub(crate) signal: Option<String>,
    pub(crate) buffer: OutputBuffer,
    pub(crate) created_at: DateTime<Utc>,
    /// Insertion order, for stable listings.
    pub(crate) seq: u64,
}

impl SessionEntry {
    pub(crate) fn new(options: SessionOptions, buffer_capacity: usize, seq: u64) -> Self {
        Self {
            options,
            closed: false,
            exit_code: None,
            signal: None,
            buffer: OutputBuffer::new(buffer_capacity),
            created_at: Utc::now(),
            seq,
        }
    }

    pub(crate) fn info(&self, session_id: &SessionId, attached: bool) -> SessionInfo {
        SessionInfo {
            session_id: session_id.clone(),
            cols: self.options.cols,
            rows: self.options.rows,
            attached,
            closed: self.closed,
            exit_code: self.exit_code,
            signal: self.signal.clone(),
            buffered_chunks: self.buffer.len(),
            dropped_chunks: self.buffer.dropped(),
            created_at: self.created_at,
        }
    }
}
