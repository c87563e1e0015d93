// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Process-local store. Every operation takes the state lock once, so the
//! conditional writes are atomic with respect to each other.

use super::{BanStore, PolicyStore, RecordStore, StoreResult, UsageStore, WriteOutcome};
use crate::model::{Ban, Policy, RateLimitRecord, RecordKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    policy: Option<Policy>,
    bans: HashMap<String, Ban>,
    records: HashMap<RecordKey, RateLimitRecord>,
    usage: HashMap<String, (RecordKey, DateTime<Utc>)>,
}

/// In-memory durable store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a policy row.
    pub fn with_policy(policy: Policy) -> Self {
        Self {
            state: RwLock::new(State {
                policy: Some(policy),
                ..Default::default()
            }),
        }
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn get_policy(&self) -> StoreResult<Option<Policy>> {
        Ok(self.state.read().await.policy)
    }

    async fn put_policy(&self, policy: Policy) -> StoreResult<()> {
        self.state.write().await.policy = Some(policy);
        Ok(())
    }
}

#[async_trait]
impl BanStore for MemoryStore {
    async fn get_ban(&self, source: &str) -> StoreResult<Option<Ban>> {
        Ok(self.state.read().await.bans.get(source).cloned())
    }

    async fn put_ban(&self, ban: Ban) -> StoreResult<()> {
        self.state
            .write()
            .await
            .bans
            .insert(ban.ip_address.clone(), ban);
        Ok(())
    }

    async fn delete_ban(&self, source: &str) -> StoreResult<bool> {
        Ok(self.state.write().await.bans.remove(source).is_some())
    }

    async fn list_bans(&self) -> StoreResult<Vec<Ban>> {
        let state = self.state.read().await;
        let mut bans: Vec<Ban> = state.bans.values().cloned().collect();
        bans.sort_by(|a, b| a.ip_address.cmp(&b.ip_address));
        Ok(bans)
    }

    async fn delete_expired_ban(&self, source: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let expired = state
            .bans
            .get(source)
            .is_some_and(|ban| ban.is_expired(now));
        if expired {
            state.bans.remove(source);
        }
        Ok(expired)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_record(&self, key: &RecordKey) -> StoreResult<Option<RateLimitRecord>> {
        Ok(self.state.read().await.records.get(key).cloned())
    }

    async fn insert_record(&self, record: &RateLimitRecord) -> StoreResult<WriteOutcome> {
        let mut state = self.state.write().await;
        match state.records.entry(record.key()) {
            Entry::Occupied(_) => Ok(WriteOutcome::Conflict),
            Entry::Vacant(slot) => {
                let mut stored = record.clone();
                stored.version = 1;
                slot.insert(stored);
                Ok(WriteOutcome::Written(1))
            }
        }
    }

    async fn compare_and_swap(
        &self,
        record: &RateLimitRecord,
        expected_version: u64,
    ) -> StoreResult<WriteOutcome> {
        let mut state = self.state.write().await;
        match state.records.get_mut(&record.key()) {
            Some(current) if current.version == expected_version => {
                let mut stored = record.clone();
                stored.version = expected_version + 1;
                *current = stored;
                Ok(WriteOutcome::Written(expected_version + 1))
            }
            _ => Ok(WriteOutcome::Conflict),
        }
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn record_usage(
        &self,
        message_id: &str,
        key: &RecordKey,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.usage.entry(message_id.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert((key.clone(), at));
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tokio_test::{assert_ok, block_on};

    #[test]
    fn test_with_policy_seeds_row() {
        let policy = Policy {
            max_per_day: 7,
            max_per_hour: 2,
            block_duration_hours: 12,
        };
        let seeded = MemoryStore::with_policy(policy);
        assert_eq!(assert_ok!(block_on(seeded.get_policy())), Some(policy));
        assert_eq!(assert_ok!(block_on(MemoryStore::new().get_policy())), None);
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let store = MemoryStore::new();
        let key = RecordKey::new("10.0.0.1", "alice");
        let now = Utc::now();
        let record = RateLimitRecord::first(&key, now);

        assert_eq!(store.insert_record(&record).await.unwrap(), WriteOutcome::Written(1));
        assert_eq!(store.insert_record(&record).await.unwrap(), WriteOutcome::Conflict);

        let mut next = record.clone();
        next.attempt_count = 2;
        assert_eq!(store.compare_and_swap(&next, 1).await.unwrap(), WriteOutcome::Written(2));

        // A second writer that also read version 1 loses.
        next.attempt_count = 3;
        assert_eq!(store.compare_and_swap(&next, 1).await.unwrap(), WriteOutcome::Conflict);

        let stored = store.get_record(&key).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 2);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_delete_expired_ban_keeps_permanent_and_active() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .put_ban(Ban {
                ip_address: "perm".to_string(),
                is_permanent: true,
                blocked_until: None,
            })
            .await
            .unwrap();
        store
            .put_ban(Ban {
                ip_address: "active".to_string(),
                is_permanent: false,
                blocked_until: Some(now + Duration::hours(2)),
            })
            .await
            .unwrap();
        store
            .put_ban(Ban {
                ip_address: "lapsed".to_string(),
                is_permanent: false,
                blocked_until: Some(now - Duration::seconds(1)),
            })
            .await
            .unwrap();

        assert!(!store.delete_expired_ban("perm", now).await.unwrap());
        assert!(!store.delete_expired_ban("active", now).await.unwrap());
        assert!(store.delete_expired_ban("lapsed", now).await.unwrap());
        assert!(!store.delete_expired_ban("lapsed", now).await.unwrap());
        assert_eq!(store.list_bans().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_usage_is_idempotent_per_message() {
        let store = MemoryStore::new();
        let key = RecordKey::new("10.0.0.1", "alice");
        let now = Utc::now();

        assert!(store.record_usage("msg-1", &key, now).await.unwrap());
        assert!(!store.record_usage("msg-1", &key, now).await.unwrap());
        assert!(store.record_usage("msg-2", &key, now).await.unwrap());
    }
}
