//! # Audit Log
//!
//! Bounded in-memory ring of routing outcomes and credential changes.
//! Oldest entries fall off once `capacity` is reached.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: String,
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub detail: String,
}

pub struct AuditLog {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub async fn record(
        &self,
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        detail: impl Into<String>,
    ) {
        let entry = AuditEntry {
            id: format!("audit-{}", uuid::Uuid::new_v4().as_simple()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            actor: actor.into(),
            action: action.into(),
            resource: resource.into(),
            detail: detail.into(),
        };

        let mut log = self.entries.write().await;
        if log.len() >= self.capacity {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// Most recent entries first.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let log = self.entries.read().await;
        log.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ring_drops_oldest() {
        let log = AuditLog::new(2);
        log.record("alice", "submit", "query:1", "first").await;
        log.record("alice", "submit", "query:2", "second").await;
        log.record("bob", "submit", "query:3", "third").await;

        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].detail, "third");
        assert_eq!(recent[1].detail, "second");
    }

    #[tokio::test]
    async fn test_recent_respects_limit() {
        let log = AuditLog::new(10);
        for i in 0..5 {
            log.record("svc", "submit", format!("query:{}", i), "").await;
        }
        let recent = log.recent(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].resource, "query:4");
    }
}
