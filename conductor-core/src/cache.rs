//! Function-result cache with content-addressed keys, TTL, and
//! invalidation by glob-style tag pattern.
//!
//! Generalizes a `Cache<K, V>` trait shape (get/set/delete/clear with
//! `Option<Duration>` TTL) into a single `get_or_fill` + `invalidate`
//! contract, backed by the Store instead of an in-process map so entries
//! survive restart.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use globset::Glob;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{ns, Store};

/// A boxed, one-shot producer: computes the value on a cache miss.
pub type Producer = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send>;

/// Wraps a plain async closure as a [`Producer`].
pub fn producer<F, Fut>(f: F) -> Producer
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hit: u64,
    pub miss: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    payload: Value,
    tags: Vec<String>,
}

/// Computes the content-addressed cache key for a function name and its
/// canonical (serialized) arguments. Same function + same args always
/// yields the same key.
pub fn cache_key(fn_name: &str, args: &Value) -> String {
    let canonical = serde_json::to_vec(args).unwrap_or_default();
    crate::clock::fingerprint(&[fn_name.as_bytes(), &canonical])
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// On hit, returns the cached value. On miss, invokes `producer` exactly
    /// once even under concurrent callers for the same `key` (the losers
    /// wait for the winner and share its result), stores the result with
    /// `ttl` and `tags`, and returns it. A failing producer leaves nothing
    /// cached; the error is reported to every waiting caller.
    async fn get_or_fill(
        &self,
        key: &str,
        ttl: Option<Duration>,
        tags: &[String],
        producer: Producer,
    ) -> Result<Value>;

    /// Removes every entry whose tag set contains a tag matching the
    /// glob-style `tag_pattern`. Returns the number of entries removed.
    async fn invalidate(&self, tag_pattern: &str) -> Result<u64>;

    async fn stats(&self) -> CacheStats;
}

/// Store-backed [`Cache`]. Single-flight is enforced with one
/// `tokio::sync::Mutex` per in-flight key, held in a `DashMap` for the
/// duration of the fill and removed afterward so the map doesn't grow
/// unbounded.
pub struct FunctionCache {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    inflight: DashMap<String, Arc<AsyncMutex<()>>>,
    hit: AtomicU64,
    miss: AtomicU64,
}

impl FunctionCache {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            inflight: DashMap::new(),
            hit: AtomicU64::new(0),
            miss: AtomicU64::new(0),
        }
    }

    fn namespace() -> crate::store::Namespace {
        ns(&["cache"])
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl Cache for FunctionCache {
    async fn get_or_fill(
        &self,
        key: &str,
        ttl: Option<Duration>,
        tags: &[String],
        producer: Producer,
    ) -> Result<Value> {
        let now = self.clock.now_wall();
        if let Some(stored) = self.store.get(&Self::namespace(), key, now).await? {
            self.hit.fetch_add(1, Ordering::Relaxed);
            let entry: Entry = serde_json::from_value(stored.value)?;
            return Ok(entry.payload);
        }

        let lock = self.lock_for(key);
        let guard = lock.lock().await;

        // Re-check under the single-flight lock: another caller may have
        // already filled the key while we were waiting for the lock.
        let now = self.clock.now_wall();
        if let Some(stored) = self.store.get(&Self::namespace(), key, now).await? {
            drop(guard);
            self.inflight.remove(key);
            self.hit.fetch_add(1, Ordering::Relaxed);
            let entry: Entry = serde_json::from_value(stored.value)?;
            return Ok(entry.payload);
        }

        self.miss.fetch_add(1, Ordering::Relaxed);
        let result = producer().await;

        // Hold the single-flight guard through the store write: releasing it
        // any earlier would let a waiter observe a still-empty store and
        // invoke its own producer, duplicating the fill this lock exists to
        // prevent.
        let outcome = match result {
            Ok(payload) => {
                let entry = Entry {
                    payload: payload.clone(),
                    tags: tags.to_vec(),
                };
                match serde_json::to_value(entry) {
                    Ok(v) => self.store.put(&Self::namespace(), key, &v, ttl).await.map(|_| payload),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e),
        };

        drop(guard);
        self.inflight.remove(key);
        outcome
    }

    async fn invalidate(&self, tag_pattern: &str) -> Result<u64> {
        let glob = Glob::new(tag_pattern)
            .map_err(|e| crate::error::RuntimeError::usage(format!("invalid tag pattern: {e}")))?
            .compile_matcher();

        let now = self.clock.now_wall();
        let entries = self.store.scan(&Self::namespace(), None, now).await?;
        let mut removed = 0u64;
        for (key, stored) in entries {
            let Ok(entry) = serde_json::from_value::<Entry>(stored.value) else {
                continue;
            };
            if entry.tags.iter().any(|t| glob.is_match(t)) {
                self.store.delete(&Self::namespace(), &key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn stats(&self) -> CacheStats {
        let now = self.clock.now_wall();
        let entries = self
            .store
            .scan(&Self::namespace(), None, now)
            .await
            .unwrap_or_default();
        let size_bytes = entries
            .iter()
            .map(|(_, v)| serde_json::to_vec(&v.value).map(|b| b.len() as u64).unwrap_or(0))
            .sum();
        CacheStats {
            entry_count: entries.len(),
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            size_bytes,
        }
    }
}

/// A cache that never stores anything: every call is a miss. Used to wire
/// up an [`crate::agent::AgentContext`] in tests that don't exercise
/// caching.
pub struct NullCache;

#[async_trait]
impl Cache for NullCache {
    async fn get_or_fill(
        &self,
        _key: &str,
        _ttl: Option<Duration>,
        _tags: &[String],
        producer: Producer,
    ) -> Result<Value> {
        producer().await
    }

    async fn invalidate(&self, _tag_pattern: &str) -> Result<u64> {
        Ok(0)
    }

    async fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}
