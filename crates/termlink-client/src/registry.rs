//! Session bookkeeping: which sessions exist, which one is attached, and
//! what output is waiting for the others.
//!
//! At most one session is attached. Output for the attached session is
//! delivered straight away; output for any other known session is buffered
//! and replayed in arrival order on the next attach.

use std::collections::{BTreeMap, HashMap};

use termlink_core::{LinkError, LinkResult, SessionId};

use crate::session::{SessionEntry, SessionInfo, SessionOptions};

/// Default per-session output buffer, in chunks.
pub const DEFAULT_OUTPUT_BUFFER_CHUNKS: usize = 1000;

/// Where an output chunk went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// The session is attached; hand the chunk to the caller.
    Deliver(String),
    /// Stored for replay. `evicted` is set when the oldest chunk was dropped.
    Buffered { evicted: bool },
    /// No such session.
    Unknown,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionEntry>,
    attached: Option<SessionId>,
    buffer_capacity: usize,
    pending_resizes: BTreeMap<SessionId, (u16, u16)>,
    next_seq: u64,
}

impl SessionRegistry {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            attached: None,
            buffer_capacity,
            pending_resizes: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Register a session the host just created. Returns `false` if the id
    /// was already known, in which case the existing entry is kept.
    pub fn insert(&mut self, session_id: SessionId, options: SessionOptions) -> bool {
        if self.sessions.contains_key(&session_id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.sessions
            .insert(session_id, SessionEntry::new(options, self.buffer_capacity, seq));
        true
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn is_closed(&self, session_id: &SessionId) -> Option<bool> {
        self.sessions.get(session_id).map(|e| e.closed)
    }

    pub fn attached(&self) -> Option<&SessionId> {
        self.attached.as_ref()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn route_output(&mut self, session_id: &SessionId, data: String) -> Routed {
        let Some(entry) = self.sessions.get_mut(session_id) else {
            return Routed::Unknown;
        };
        if self.attached.as_ref() == Some(session_id) {
            Routed::Deliver(data)
        } else {
            Routed::Buffered {
                evicted: entry.buffer.push(data),
            }
        }
    }

    /// Make `session_id` the attached session and return its buffered
    /// output, oldest first. The previously attached session starts
    /// buffering.
    pub fn attach(&mut self, session_id: &SessionId) -> LinkResult<Vec<String>> {
        let entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| LinkError::SessionNotFound(session_id.clone()))?;
        let replay = entry.buffer.drain();
        self.attached = Some(session_id.clone());
        Ok(replay)
    }

    /// Detach the current session, if any, and return its id.
    pub fn detach(&mut self) -> Option<SessionId> {
        self.attached.take()
    }

    /// Record that the host's PTY exited. Returns `false` if the session is
    /// unknown or was already marked.
    pub fn mark_exited(
        &mut self,
        session_id: &SessionId,
        exit_code: Option<i32>,
        signal: Option<String>,
    ) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(entry) if !entry.closed => {
                entry.closed = true;
                entry.exit_code = exit_code;
                entry.signal = signal;
                self.pending_resizes.remove(session_id);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, session_id: &SessionId) -> bool {
        if self.attached.as_ref() == Some(session_id) {
            self.attached = None;
        }
        self.pending_resizes.remove(session_id);
        self.sessions.remove(session_id).is_some()
    }

    /// Whether input, commands or resizes may target this session.
    pub fn check_writable(&self, session_id: &SessionId) -> LinkResult<()> {
        match self.sessions.get(session_id) {
            None => Err(LinkError::SessionNotFound(session_id.clone())),
            Some(entry) if entry.closed => Err(LinkError::SessionClosed(session_id.clone())),
            Some(_) => Ok(()),
        }
    }

    /// Record a resize. A later resize for the same session replaces one
    /// that has not been taken yet.
    pub fn queue_resize(&mut self, session_id: &SessionId, cols: u16, rows: u16) -> LinkResult<()> {
        self.check_writable(session_id)?;
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.options.cols = cols;
            entry.options.rows = rows;
        }
        self.pending_resizes.insert(session_id.clone(), (cols, rows));
        Ok(())
    }

    pub fn has_pending_resizes(&self) -> bool {
        !self.pending_resizes.is_empty()
    }

    pub fn take_resizes(&mut self) -> Vec<(SessionId, u16, u16)> {
        std::mem::take(&mut self.pending_resizes)
            .into_iter()
            .map(|(id, (cols, rows))| (id, cols, rows))
            .collect()
    }

    /// Sessions in creation order.
    pub fn infos(&self) -> Vec<SessionInfo> {
        let mut entries: Vec<_> = self.sessions.iter().collect();
        entries.sort_by_key(|(_, e)| e.seq);
        entries
            .into_iter()
            .map(|(id, e)| e.info(id, self.attached.as_ref() == Some(id)))
            .collect()
    }

    /// Forget everything, e.g. after the connection is abandoned.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.attached = None;
        self.pending_resizes.clear();
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_BUFFER_CHUNKS)
    }
}
