// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Durable stores: the authority of record for policy, bans and counters.
//!
//! Two backends are provided:
//! - [`MemoryStore`]: process-local, for tests and single-node development
//! - [`SqliteStore`]: SQLite via `sqlx`
//!
//! Record writes are optimistic: [`RecordStore::compare_and_swap`] only
//! succeeds if the stored version still matches the one the caller read.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::{Ban, Policy, RateLimitRecord, RecordKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Durable-store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row for {entity}: {detail}")]
    Corrupt { entity: &'static str, detail: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of a conditional record write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Row written; carries the version now stored.
    Written(u64),
    /// Another writer got there first.
    Conflict,
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_policy(&self) -> StoreResult<Option<Policy>>;
    async fn put_policy(&self, policy: Policy) -> StoreResult<()>;
}

#[async_trait]
pub trait BanStore: Send + Sync {
    async fn get_ban(&self, source: &str) -> StoreResult<Option<Ban>>;
    async fn put_ban(&self, ban: Ban) -> StoreResult<()>;
    /// Returns whether a row was removed.
    async fn delete_ban(&self, source: &str) -> StoreResult<bool>;
    async fn list_bans(&self) -> StoreResult<Vec<Ban>>;
    /// Remove the source's ban only if it is temporary and `blocked_until <= now`.
    /// Safe to repeat.
    async fn delete_expired_ban(&self, source: &str, now: DateTime<Utc>) -> StoreResult<bool>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, key: &RecordKey) -> StoreResult<Option<RateLimitRecord>>;

    /// Create the first record for a key. Conflicts if one already exists.
    async fn insert_record(&self, record: &RateLimitRecord) -> StoreResult<WriteOutcome>;

    /// Overwrite the record if its stored version equals `expected_version`.
    /// The stored version becomes `expected_version + 1`.
    async fn compare_and_swap(
        &self,
        record: &RateLimitRecord,
        expected_version: u64,
    ) -> StoreResult<WriteOutcome>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Record that `message_id` was delivered for `key`. Returns `false`
    /// when the message id was already recorded.
    async fn record_usage(
        &self,
        message_id: &str,
        key: &RecordKey,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// Everything the admission engine needs from the durable layer.
pub trait Store: PolicyStore + BanStore + RecordStore + UsageStore {}

impl<T> Store for T where T: PolicyStore + BanStore + RecordStore + UsageStore {}
