// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Short-lived status cache shadowing the durable store.
//!
//! Entries are never updated in place after a durable write; writers call
//! [`StatusCache::invalidate`] and the next reader re-fetches. The cache is
//! process-local, so several instances each hold their own view.

use crate::clock::Clock;
use crate::model::{Policy, RateLimitRecord, RecordKey};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Policy,
    Record(RecordKey),
}

/// Cached value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedStatus {
    Policy(Policy),
    Record(RateLimitRecord),
}

/// TTL-aware cache interface injected into the engine.
#[async_trait]
pub trait StatusCache: Send + Sync {
    /// Fetch a live entry; expired entries are treated as absent.
    async fn get(&self, key: &CacheKey) -> Option<CachedStatus>;
    async fn set(&self, key: CacheKey, value: CachedStatus, ttl: Duration);
    async fn invalidate(&self, key: &CacheKey);
    /// Drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> usize;
}

#[derive(Debug)]
struct Entry {
    value: CachedStatus,
    expires_at: DateTime<Utc>,
}

/// Process-local TTL map.
#[derive(Debug)]
pub struct MemoryCache {
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<CacheKey, Entry>>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StatusCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<CachedStatus> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                debug!(?key, "Cache entry expired");
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: CacheKey, value: CachedStatus, ttl: Duration) {
        if ttl <= Duration::zero() {
            return;
        }
        // A TTL past the end of representable time means no expiry.
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries
            .write()
            .await
            .insert(key, Entry { value, expires_at });
    }

    async fn invalidate(&self, key: &CacheKey) {
        self.entries.write().await.remove(key);
    }

    async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }
}
