//! Bounded audit trail of every sanitize attempt.
//!
//! Entries are appended in call order and evicted oldest-first once the log
//! reaches its capacity, so memory stays fixed no matter how long a session
//! runs.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::level::SecurityLevel;

/// Default number of retained entries.
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// One sanitize call and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub original: String,
    /// The command that was allowed through; `None` when blocked.
    pub sanitized: Option<String>,
    pub level: SecurityLevel,
    pub duration_ms: f64,
    pub blocked: bool,
    pub reason: Option<String>,
}

impl AuditLogEntry {
    /// Allowed, but not verbatim.
    pub fn was_rewritten(&self) -> bool {
        !self.blocked && self.sanitized.as_deref() != Some(self.original.as_str())
    }
}

/// Criteria for [`AuditLog::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub blocked: Option<bool>,
    pub level: Option<SecurityLevel>,
    pub since: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn blocked(mut self, blocked: bool) -> Self {
        self.blocked = Some(blocked);
        self
    }

    pub fn level(mut self, level: SecurityLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.blocked.map_or(true, |b| entry.blocked == b)
            && self.level.map_or(true, |l| entry.level == l)
            && self.since.map_or(true, |t| entry.timestamp >= t)
    }
}

/// Aggregate counts over the retained entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditStats {
    pub total: usize,
    pub blocked: usize,
    pub rewritten: usize,
}

/// Fixed-capacity ring of audit entries.
#[derive(Debug)]
pub struct AuditLog {
    entries: VecDeque<AuditLogEntry>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest once full.
    pub fn push(&mut self, entry: AuditLogEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// All retained entries, oldest first.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditLogEntry> {
        self.entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> AuditStats {
        self.entries.iter().fold(
            AuditStats {
                total: self.entries.len(),
                ..Default::default()
            },
            |mut stats, e| {
                if e.blocked {
                    stats.blocked += 1;
                } else if e.was_rewritten() {
                    stats.rewritten += 1;
                }
                stats
            },
        )
    }

    /// Serialize the retained entries as JSON lines for offline replay.
    pub fn export_jsonl(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}
