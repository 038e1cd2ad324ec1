//! TTL-scoped shared key/value state, and named exclusive locks with FIFO
//! wait-queue fairness and lease-based forfeiture.
//!
//! The lock half generalizes a `NamedBarrierValue` shape (which tracks a
//! fixed set of named participants that must all "arrive" before the
//! barrier opens) into mutual exclusion over an open-ended set of named
//! resources, each with at most one holder at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::clock::Clock;
use crate::error::{Result, RuntimeError};
use crate::store::{ns, Namespace, Store};

/// Write-through TTL-scoped key/value state, backed by the Store.
pub struct SharedState {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    locks: LockManager,
}

fn namespace() -> Namespace {
    ns(&["state"])
}

impl SharedState {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: LockManager::new(clock.clone()),
            store,
            clock,
        }
    }

    #[cfg(test)]
    pub fn new_in_memory_for_test() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::store::SqliteStore::new(dir.path().join("state.db")).unwrap());
        std::mem::forget(dir);
        Self::new(store, Arc::new(crate::clock::SystemClock))
    }

    pub async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()> {
        self.store.put(&namespace(), key, &value, ttl).await
    }

    /// Absent if never set or expired; expiry is always re-checked against
    /// the injected clock's wall time at read time, never trusted from a
    /// prior check.
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let now = self.clock.now_wall();
        Ok(self.store.get(&namespace(), key, now).await?.map(|v| v.value))
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(&namespace(), key).await
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Acquires `lock_name` for `holder`, runs `body`, and releases the lock
    /// on every exit path (success, error, or the future being dropped
    /// before completion) via the returned guard's `Drop` impl.
    pub async fn with_lock<F, Fut, T>(
        &self,
        lock_name: &str,
        holder: &str,
        lease: Duration,
        timeout: Duration,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let _guard = self.locks.acquire(lock_name, holder, lease, timeout).await?;
        body().await
    }
}

struct Waiter {
    holder: String,
    lease: Duration,
    tx: oneshot::Sender<()>,
}

struct LockState {
    holder: Option<(String, String)>,
    acquired_at: Instant,
    lease_until: Instant,
    waiters: VecDeque<Waiter>,
}

struct LockManagerInner {
    clock: Arc<dyn Clock>,
    table: StdMutex<HashMap<String, LockState>>,
}

/// Named exclusive locks. Locks do not survive process restart: each
/// `LockManager` starts with an empty table — on startup all locks are
/// released and all wait-queues empty.
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<LockManagerInner>,
}

/// RAII guard returned by [`LockManager::acquire`]. Releasing happens in
/// `Drop` so every exit path — success, error propagation via `?`,
/// cancellation — releases the lock exactly once.
pub struct LockGuard {
    inner: Arc<LockManagerInner>,
    name: String,
    holder: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        LockManager::release_sync(&self.inner, &self.name, &self.holder);
    }
}

impl LockManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(LockManagerInner {
                clock,
                table: StdMutex::new(HashMap::new()),
            }),
        }
    }

    /// Acquires `lock_name` for `holder`, blocking up to `timeout`. If the
    /// lock is already held and not forfeit, the caller joins the FIFO
    /// wait-queue. Re-acquiring with the same holder refreshes the lease
    /// (renewal).
    pub async fn acquire(
        &self,
        lock_name: &str,
        holder: &str,
        lease: Duration,
        timeout: Duration,
    ) -> Result<LockGuard> {
        let deadline = self.inner.clock.now_monotonic() + timeout;

        loop {
            let wait_rx = {
                let mut table = self.inner.table.lock().expect("lock table poisoned");
                let now = self.inner.clock.now_monotonic();
                let state = table.entry(lock_name.to_string()).or_insert_with(|| LockState {
                    holder: None,
                    acquired_at: now,
                    lease_until: now,
                    waiters: VecDeque::new(),
                });

                let forfeit = state.holder.is_some() && now > state.lease_until;
                if forfeit {
                    state.holder = None;
                }

                let renewing = state
                    .holder
                    .as_ref()
                    .is_some_and(|(_, h)| h == holder);

                if state.holder.is_none() || renewing {
                    state.holder = Some((lock_name.to_string(), holder.to_string()));
                    state.acquired_at = now;
                    state.lease_until = now + lease;
                    return Ok(LockGuard {
                        inner: self.inner.clone(),
                        name: lock_name.to_string(),
                        holder: holder.to_string(),
                    });
                }

                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(Waiter {
                    holder: holder.to_string(),
                    lease,
                    tx,
                });
                rx
            };

            let now = self.inner.clock.now_monotonic();
            if now >= deadline {
                return Err(RuntimeError::timeout(format!("acquire '{lock_name}' timed out")));
            }
            let remaining = deadline - now;

            match tokio::time::timeout(remaining, wait_rx).await {
                Ok(Ok(())) => {
                    // release_sync already transferred `holder` to us directly,
                    // under the same critical section it cleared the previous
                    // holder in -- no other caller could have barged in between.
                    return Ok(LockGuard {
                        inner: self.inner.clone(),
                        name: lock_name.to_string(),
                        holder: holder.to_string(),
                    });
                }
                Ok(Err(_)) => continue, // sender dropped without handoff; re-check
                Err(_) => {
                    // Our own timeout elapsed. We never got a handoff, so the
                    // lock (if still held by someone) is untouched by us; if
                    // release_sync still pops our now-dead sender later, the
                    // failed `send` just moves it on to the next waiter.
                    return Err(RuntimeError::timeout(format!("acquire '{lock_name}' timed out")));
                }
            }
        }
    }

    /// Idempotent: a no-op if `holder` does not currently hold `lock_name`.
    pub fn release(&self, lock_name: &str, holder: &str) {
        Self::release_sync(&self.inner, lock_name, holder);
    }

    fn release_sync(inner: &LockManagerInner, lock_name: &str, holder: &str) {
        let mut table = inner.table.lock().expect("lock table poisoned");
        let Some(state) = table.get_mut(lock_name) else {
            return;
        };
        let matches = state.holder.as_ref().is_some_and(|(_, h)| h == holder);
        if !matches {
            return;
        }
        // Hand the lock directly to the next live waiter, still under this
        // lock's critical section, so `holder` never observes a gap where a
        // brand-new (non-queued) acquirer could barge ahead of the queue (P4).
        let now = inner.clock.now_monotonic();
        while let Some(next) = state.waiters.pop_front() {
            state.holder = Some((lock_name.to_string(), next.holder.clone()));
            state.acquired_at = now;
            state.lease_until = now + next.lease;
            if next.tx.send(()).is_ok() {
                return;
            }
            // Receiver already gave up (timed out); try the next waiter.
        }
        state.holder = None;
    }
}
