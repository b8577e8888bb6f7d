//! Per-caller request budget on a fixed wall-clock window.
//!
//! The counter for `floor(now/window)` is bumped with an atomic INCR whose
//! TTL is set on the first increment; the bucket evaporates when the window
//! rolls over. Counters live in the shared cache so the budget holds across
//! edge replicas; the in-process adapter exists for development and tests.
//!
//! An unreachable cache fails OPEN: a stateless edge that failed closed
//! would be a one-request DoS.

use dashmap::DashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic increment-with-ttl port.
#[async_trait::async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key`, setting `ttl` when this increment created the key,
    /// and return the post-increment count.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, CounterError>;
}

/// Redis adapter; the production choice for horizontally scaled edges.
pub struct RedisCounterStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisCounterStore {
    pub async fn connect(url: &str) -> Result<Self, CounterError> {
        let client =
            redis::Client::open(url).map_err(|e| CounterError::Unavailable(e.to_string()))?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| CounterError::Unavailable(e.to_string()))?;
        Ok(Self { manager })
    }
}

#[async_trait::async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, CounterError> {
        let mut conn = self.manager.clone();
        let count: u64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CounterError::Unavailable(e.to_string()))?;
        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl.as_secs())
                .query_async(&mut conn)
                .await
                .map_err(|e| CounterError::Unavailable(e.to_string()))?;
        }
        Ok(count)
    }
}

/// In-process adapter. Correct for one replica only.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, (u64, Instant)>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, CounterError> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert((0, now + ttl));
        if entry.1 <= now {
            *entry = (0, now + ttl);
        }
        entry.0 += 1;
        let count = entry.0;
        drop(entry);
        // keep dead windows from accumulating
        if self.counters.len() > 8192 {
            self.counters.retain(|_, (_, expiry)| *expiry > now);
        }
        Ok(count)
    }
}

/// Admission verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Allowed,
    Limited { retry_after_secs: u64 },
}

pub struct WindowLimiter {
    store: Box<dyn CounterStore>,
    max_per_window: u64,
    window_secs: u64,
}

impl WindowLimiter {
    pub fn new(store: Box<dyn CounterStore>, max_per_window: u64, window_secs: u64) -> Self {
        Self {
            store,
            max_per_window,
            window_secs,
        }
    }

    pub async fn check(&self, caller: &str) -> Gate {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.check_at(caller, now).await
    }

    /// Window math split out so the roll-over is testable.
    pub async fn check_at(&self, caller: &str, now: u64) -> Gate {
        let window = now / self.window_secs;
        let key = format!("rl:{caller}:{window}");
        match self
            .store
            .incr(&key, Duration::from_secs(self.window_secs))
            .await
        {
            Ok(count) if count <= self.max_per_window => Gate::Allowed,
            Ok(_) => Gate::Limited {
                retry_after_secs: self.window_secs - now % self.window_secs,
            },
            Err(e) => {
                // fail open; never let the cache take the edge down
                warn!(event = "rate_limiter_unavailable", error = %e);
                Gate::Allowed
            }
        }
    }
}
