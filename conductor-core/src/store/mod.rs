//! Durable key/value store plus an append-only log, shared by every
//! component that needs crash-safe state: messages, health samples, cache
//! entries, cron state, and workflow runs.
//!
//! Generalizes a fixed-schema `store_kv` table and a `workspaces` table
//! into one namespaced table so every component above gets
//! `put`/`get`/`delete`/`scan`/`cas` over its own namespace instead of a
//! bespoke table per concern.

mod sqlite;

pub use sqlite::SqliteStore;

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A namespace is a path of segments, e.g. `["messages", "inbox", "printer"]`.
pub type Namespace = Vec<String>;

pub fn ns(parts: &[&str]) -> Namespace {
    parts.iter().map(|s| s.to_string()).collect()
}

/// A stored value with its bookkeeping metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: serde_json::Value,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub expires_at: Option<SystemTime>,
    /// Monotonically increasing per key, for `cas`.
    pub version: i64,
}

/// One row appended to a namespace's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub seq: i64,
    pub record: serde_json::Value,
    pub recorded_at: SystemTime,
}

/// Durable key/value + append-only log. Every method is atomic with respect
/// to its own key; cross-namespace transactions are not provided (callers
/// use `cas` where coordination across a read and a write is needed).
#[async_trait]
pub trait Store: Send + Sync {
    /// Writes `value` under `namespace`/`key`. If the key already exists its
    /// `created_at` and `version` are preserved; `updated_at` advances and
    /// `version` increments. `ttl`, if given, sets `expires_at` relative to
    /// the store's own wall clock at write time.
    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: &serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Reads the value, or `None` if absent or expired (`expires_at` in the
    /// past relative to `now`).
    async fn get(&self, namespace: &Namespace, key: &str, now: SystemTime) -> Result<Option<StoredValue>>;

    /// Deletes the key. Returns whether it existed.
    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<bool>;

    /// Lists `(key, value)` pairs in `namespace` whose key starts with
    /// `prefix` (or all keys, if `prefix` is `None`) and whose `created_at`
    /// is `<= until`, ordered by key.
    async fn scan(
        &self,
        namespace: &Namespace,
        prefix: Option<&str>,
        until: SystemTime,
    ) -> Result<Vec<(String, StoredValue)>>;

    /// Compare-and-set: writes `new_value` only if the current version of
    /// the key equals `expected_version`. Returns the new version on
    /// success, or a `conflict` error if the versions didn't match (or the
    /// key doesn't exist and `expected_version != 0`).
    async fn cas(
        &self,
        namespace: &Namespace,
        key: &str,
        expected_version: i64,
        new_value: &serde_json::Value,
    ) -> Result<i64>;

    /// Appends `record` to the namespace's log, returning its sequence
    /// number.
    async fn log(&self, namespace: &Namespace, record: &serde_json::Value) -> Result<i64>;

    /// Reads up to `limit` log records with `seq > since_seq`, in order.
    async fn log_scan(&self, namespace: &Namespace, since_seq: i64, limit: usize) -> Result<Vec<LogRecord>>;

    /// Deletes log records recorded strictly before `before`. Returns the
    /// number removed.
    async fn log_delete_before(&self, namespace: &Namespace, before: SystemTime) -> Result<usize>;
}
