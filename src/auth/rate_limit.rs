// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixed-window rate limiting of payment initiations per client.
//!
//! Buckets live behind [`RateLimitStore`]. The in-process store keeps them in
//! a bounded LRU; losing them on restart (or eviction) fails open.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::warn;

use super::error::GuardError;

/// Clients tracked by the in-process store before the oldest are evicted.
pub const DEFAULT_BUCKET_CAPACITY: usize = 10_000;

/// Counter state after a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Hits in the current window, this one included.
    pub count: u32,
    /// Time until the window resets.
    pub resets_in: Duration,
}

/// Atomic increment of a fixed-window counter.
///
/// Implementations must increment and read in one step so concurrent hits
/// from the same client are never undercounted.
pub trait RateLimitStore: Send + Sync {
    fn hit(&self, key: &str, window: Duration, now: Instant) -> WindowCount;
}

struct Bucket {
    count: u32,
    reset_at: Instant,
}

/// Process-local store.
pub struct InMemoryRateLimitStore {
    buckets: Mutex<LruCache<String, Bucket>>,
}

impl InMemoryRateLimitStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            buckets: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_CAPACITY)
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn hit(&self, key: &str, window: Duration, now: Instant) -> WindowCount {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Expired buckets are reset lazily on next access.
        let bucket = buckets.get_or_insert_mut(key.to_string(), || Bucket {
            count: 0,
            reset_at: now + window,
        });
        if now >= bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + window;
        }
        bucket.count = bucket.count.saturating_add(1);

        WindowCount {
            count: bucket.count,
            resets_in: bucket.reset_at.saturating_duration_since(now),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    max_attempts: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, max_attempts: u32, window: Duration) -> Self {
        Self {
            store,
            max_attempts,
            window,
        }
    }

    /// Count an attempt from `client` and reject it when over the limit.
    pub fn check(&self, client: &str, now: Instant) -> Result<WindowCount, GuardError> {
        let state = self.store.hit(client, self.window, now);
        if state.count > self.max_attempts {
            let retry_after_secs = state.resets_in.as_secs().max(1);
            warn!(
                client,
                attempts = state.count,
                retry_after_secs,
                "payment initiation rate limited"
            );
            return Err(GuardError::RateLimited { retry_after_secs });
        }
        Ok(state)
    }
}
