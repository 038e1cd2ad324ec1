//! Wall-clock and monotonic time, identity generation, content fingerprints.
//!
//! Every subsystem that deals in TTLs, leases, or retention windows takes a
//! `Arc<dyn Clock>` instead of calling `SystemTime::now()`/`Instant::now()`
//! directly, so tests can drive time deterministically with [`FakeClock`].

use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Source of wall-clock and monotonic time for the runtime.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_wall(&self) -> SystemTime;
    fn now_monotonic(&self) -> Instant;
}

/// Clock backed by `std::time`. Used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_wall(&self) -> SystemTime {
        SystemTime::now()
    }

    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic clock for tests. `now_monotonic` starts at construction and
/// only moves when [`FakeClock::advance`] is called; `now_wall` tracks the
/// same offset applied to an epoch anchor so wall and monotonic time stay in
/// lockstep under test.
#[derive(Debug, Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<FakeClockState>>,
}

#[derive(Debug)]
struct FakeClockState {
    monotonic_base: Instant,
    wall_base: SystemTime,
    offset: std::time::Duration,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeClockState {
                monotonic_base: Instant::now(),
                wall_base: SystemTime::now(),
                offset: std::time::Duration::ZERO,
            })),
        }
    }

    /// Moves both the wall and monotonic clocks forward by `d`.
    pub fn advance(&self, d: std::time::Duration) {
        let mut state = self.inner.lock().expect("fake clock poisoned");
        state.offset += d;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now_wall(&self) -> SystemTime {
        let state = self.inner.lock().expect("fake clock poisoned");
        state.wall_base + state.offset
    }

    fn now_monotonic(&self) -> Instant {
        let state = self.inner.lock().expect("fake clock poisoned");
        state.monotonic_base + state.offset
    }
}

/// A fresh random identifier, used for message ids (combined with a
/// fingerprint), run ids, job ids, binding ids, and dispatch ids.
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

/// Content digest of the given parts, hex-encoded and truncated to 32 hex
/// characters (128 bits). Deterministic: same inputs always produce the same
/// digest, which the Message id and Cache key contracts both depend on.
pub fn fingerprint(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();
    hex::encode(digest)[..32].to_string()
}

pub fn system_time_to_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn millis_to_system_time(millis: i64) -> SystemTime {
    UNIX_EPOCH + std::time::Duration::from_millis(millis.max(0) as u64)
}
