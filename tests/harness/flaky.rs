// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Store wrapper that fails selected operations on demand.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use message_admission::{
    store::{
        BanStore, MemoryStore, PolicyStore, RecordStore, StoreError, StoreResult, UsageStore,
        WriteOutcome,
    },
    Ban, Policy, RateLimitRecord, RecordKey,
};
use std::sync::atomic::{AtomicBool, Ordering};

/// Delegates to a [`MemoryStore`] unless a failure switch is on.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_policy: AtomicBool,
    pub fail_records: AtomicBool,
    pub fail_ban_cleanup: AtomicBool,
}

impl FlakyStore {
    pub fn with_policy(policy: Policy) -> Self {
        Self {
            inner: MemoryStore::with_policy(policy),
            ..Default::default()
        }
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }
}

fn check(flag: &AtomicBool, what: &str) -> StoreResult<()> {
    if flag.load(Ordering::SeqCst) {
        Err(StoreError::Unavailable(format!("{what} offline")))
    } else {
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for FlakyStore {
    async fn get_policy(&self) -> StoreResult<Option<Policy>> {
        check(&self.fail_policy, "policy")?;
        self.inner.get_policy().await
    }

    async fn put_policy(&self, policy: Policy) -> StoreResult<()> {
        check(&self.fail_policy, "policy")?;
        self.inner.put_policy(policy).await
    }
}

#[async_trait]
impl BanStore for FlakyStore {
    async fn get_ban(&self, source: &str) -> StoreResult<Option<Ban>> {
        self.inner.get_ban(source).await
    }

    async fn put_ban(&self, ban: Ban) -> StoreResult<()> {
        self.inner.put_ban(ban).await
    }

    async fn delete_ban(&self, source: &str) -> StoreResult<bool> {
        self.inner.delete_ban(source).await
    }

    async fn list_bans(&self) -> StoreResult<Vec<Ban>> {
        self.inner.list_bans().await
    }

    async fn delete_expired_ban(&self, source: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        check(&self.fail_ban_cleanup, "ban cleanup")?;
        self.inner.delete_expired_ban(source, now).await
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get_record(&self, key: &RecordKey) -> StoreResult<Option<RateLimitRecord>> {
        check(&self.fail_records, "records")?;
        self.inner.get_record(key).await
    }

    async fn insert_record(&self, record: &RateLimitRecord) -> StoreResult<WriteOutcome> {
        check(&self.fail_records, "records")?;
        self.inner.insert_record(record).await
    }

    async fn compare_and_swap(
        &self,
        record: &RateLimitRecord,
        expected_version: u64,
    ) -> StoreResult<WriteOutcome> {
        check(&self.fail_records, "records")?;
        self.inner.compare_and_swap(record, expected_version).await
    }
}

#[async_trait]
impl UsageStore for FlakyStore {
    async fn record_usage(
        &self,
        message_id: &str,
        key: &RecordKey,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        check(&self.fail_records, "usage")?;
        self.inner.record_usage(message_id, key, at).await
    }
}
