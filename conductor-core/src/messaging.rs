//! Per-agent ordered inboxes with priority, at-most-once delivery, and
//! retention sweeping.
//!
//! Durability covers enqueue and acknowledge; delivery marks are in-memory
//! only (a `DashMap`), so a crash between `receive` and `acknowledge`
//! reverts the message to delivered-unread on restart — the Store is
//! re-scanned and nothing in it remembers the in-memory flag.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::clock::{fingerprint, Clock};
use crate::error::Result;
use crate::store::{ns, Namespace, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Priorities in drain order, highest first.
const PRIORITIES: [Priority; 4] = [Priority::Urgent, Priority::High, Priority::Normal, Priority::Low];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub priority: Priority,
    pub content_type: String,
    pub body: Vec<u8>,
    pub created_at_millis: i64,
    pub acknowledged_at_millis: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub queued: usize,
    pub delivered: usize,
    pub acknowledged: usize,
}

fn namespace(recipient: &str) -> Namespace {
    ns(&["messages", "inbox", recipient])
}

/// Per-agent priority inboxes backed by the Store, with an in-memory
/// delivered-flag table for the current process lifetime.
pub struct Messaging {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    delivered: DashMap<String, ()>,
}

impl Messaging {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            delivered: DashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn new_in_memory_for_test() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::store::SqliteStore::new(dir.path().join("msg.db")).unwrap());
        std::mem::forget(dir);
        Self::new(store, Arc::new(crate::clock::SystemClock))
    }

    /// Enqueues a message, atomically and durably. Idempotent on the
    /// message id: sending the identical `(sender, recipient, body,
    /// created_at)` tuple twice enqueues it only once, since the id is a
    /// fingerprint of those fields and `put` is an upsert.
    pub async fn send(
        &self,
        sender: &str,
        recipient: &str,
        body: &[u8],
        content_type: &str,
        priority: Priority,
    ) -> Result<String> {
        let now = self.clock.now_wall();
        let created_at_millis = crate::clock::system_time_to_millis(now);
        let id = fingerprint(&[sender.as_bytes(), &created_at_millis.to_le_bytes(), body]);

        let msg = Message {
            id: id.clone(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            priority,
            content_type: content_type.to_string(),
            body: body.to_vec(),
            created_at_millis,
            acknowledged_at_millis: None,
        };

        let key = format!("{priority:?}/{created_at_millis:020}/{id}");
        self.store
            .put(&namespace(recipient), &key, &serde_json::to_value(&msg)?, None)
            .await?;
        Ok(id)
    }

    async fn scan_inbox(&self, recipient: &str) -> Result<Vec<(String, Message)>> {
        let now = self.clock.now_wall();
        let rows = self.store.scan(&namespace(recipient), None, now).await?;
        let mut out = Vec::with_capacity(rows.len());
        for (key, stored) in rows {
            out.push((key, serde_json::from_value(stored.value)?));
        }
        Ok(out)
    }

    /// Returns undelivered messages in inbox order (priority desc, FIFO
    /// within a priority) and marks them delivered. `max` caps how many are
    /// returned; pass `usize::MAX` for unbounded.
    pub async fn receive(&self, recipient: &str, max: usize, mark_delivered: bool) -> Result<Vec<Message>> {
        let rows = self.scan_inbox(recipient).await?;
        let mut by_priority: Vec<(String, Message)> = rows
            .into_iter()
            .filter(|(key, msg)| msg.acknowledged_at_millis.is_none() && !self.is_delivered(key))
            .collect();
        by_priority.sort_by_key(|(key, _)| key.clone());

        let mut out = Vec::new();
        for priority in PRIORITIES {
            for (key, msg) in by_priority.iter().filter(|(_, m)| m.priority == priority) {
                if out.len() >= max {
                    break;
                }
                if mark_delivered {
                    self.delivered.insert(key.clone(), ());
                }
                out.push(msg.clone());
            }
            if out.len() >= max {
                break;
            }
        }
        Ok(out)
    }

    fn is_delivered(&self, key: &str) -> bool {
        self.delivered.contains_key(key)
    }

    /// Non-destructive: returns undelivered messages without marking them.
    pub async fn peek(&self, recipient: &str) -> Result<Vec<Message>> {
        self.receive(recipient, usize::MAX, false).await
    }

    /// Moves a delivered message to acknowledged. No-op (but not an error)
    /// if the message id is unknown or already acknowledged.
    pub async fn acknowledge(&self, recipient: &str, message_id: &str) -> Result<()> {
        let rows = self.scan_inbox(recipient).await?;
        let Some((key, mut msg)) = rows.into_iter().find(|(_, m)| m.id == message_id) else {
            return Ok(());
        };
        if msg.acknowledged_at_millis.is_some() {
            return Ok(());
        }
        msg.acknowledged_at_millis = Some(crate::clock::system_time_to_millis(self.clock.now_wall()));
        self.store
            .put(&namespace(recipient), &key, &serde_json::to_value(&msg)?, None)
            .await?;
        self.delivered.remove(&key);
        Ok(())
    }

    /// Admin op: deletes acknowledged messages, optionally only those
    /// acknowledged before `older_than` (wall-clock age).
    pub async fn clear(&self, recipient: &str, older_than: Option<Duration>) -> Result<usize> {
        let now = self.clock.now_wall();
        let now_millis = crate::clock::system_time_to_millis(now);
        let rows = self.scan_inbox(recipient).await?;
        let mut removed = 0;
        for (key, msg) in rows {
            let Some(ack_millis) = msg.acknowledged_at_millis else {
                continue;
            };
            if let Some(window) = older_than {
                if now_millis - ack_millis < window.as_millis() as i64 {
                    continue;
                }
            }
            self.store.delete(&namespace(recipient), &key).await?;
            removed += 1;
        }
        Ok(removed)
    }

    pub async fn counts(&self, recipient: &str) -> Result<Counts> {
        let rows = self.scan_inbox(recipient).await?;
        let mut counts = Counts::default();
        for (key, msg) in rows {
            if msg.acknowledged_at_millis.is_some() {
                counts.acknowledged += 1;
            } else if self.is_delivered(&key) {
                counts.delivered += 1;
            } else {
                counts.queued += 1;
            }
        }
        Ok(counts)
    }

    /// Sweeps one recipient's acknowledged backlog, dropping entries older
    /// than `retention_window`. The runtime's retention task (a
    /// `tokio::time::interval` no tighter than once a minute) loops this
    /// over every registered agent name.
    pub async fn sweep_recipient(&self, recipient: &str, retention_window: Duration) -> Result<usize> {
        self.clear(recipient, Some(retention_window)).await
    }
}
