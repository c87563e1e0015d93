// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! SQLite-backed durable store.
//!
//! Timestamps are stored as unix milliseconds. The record CAS is a single
//! `UPDATE ... WHERE version = ?`, so concurrent writers across processes
//! sharing the database file cannot both win.

use super::{
    BanStore, PolicyStore, RecordStore, StoreError, StoreResult, UsageStore, WriteOutcome,
};
use crate::model::{Ban, Policy, RateLimitRecord, RecordKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

/// Durable store over an `sqlx` SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and ensure the schema.
    ///
    /// `sqlite::memory:` is supported; the pool is then pinned to a single
    /// connection so every query sees the same database.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let in_memory = url.contains(":memory:");
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            });

        let pool_opts = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let db = pool_opts.connect_with(opts).await?;
        init_schema(&db).await?;
        info!(url = %url, "SQLite store ready");

        Ok(Self { db })
    }
}

async fn init_schema(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut tx = db.begin().await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rate_limit_config (
            id integer NOT NULL CHECK (id = 1),
            max_messages_per_day integer NOT NULL,
            max_messages_per_hour integer NOT NULL,
            block_duration_hours integer NOT NULL,
            PRIMARY KEY(id)
        )",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS ip_blocklist (
            ip_address text NOT NULL,
            is_permanent boolean NOT NULL DEFAULT 0,
            blocked_until integer,
            PRIMARY KEY(ip_address)
        )",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rate_limits (
            ip_address text NOT NULL,
            recipient_id text NOT NULL,
            attempt_count integer NOT NULL,
            first_attempt integer NOT NULL,
            last_attempt integer NOT NULL,
            is_blocked boolean NOT NULL DEFAULT 0,
            version integer NOT NULL,
            PRIMARY KEY(ip_address, recipient_id)
        )",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS message_usage (
            message_id text NOT NULL,
            ip_address text NOT NULL,
            recipient_id text NOT NULL,
            recorded_at integer NOT NULL,
            PRIMARY KEY(message_id)
        )",
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(entity: &'static str, ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt {
        entity,
        detail: format!("timestamp out of range: {ms}"),
    })
}

fn to_u32(entity: &'static str, value: i64) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt {
        entity,
        detail: format!("value out of range: {value}"),
    })
}

fn record_from_row(row: &SqliteRow) -> StoreResult<RateLimitRecord> {
    let version: i64 = row.try_get("version")?;
    Ok(RateLimitRecord {
        ip_address: row.try_get("ip_address")?,
        recipient_id: row.try_get("recipient_id")?,
        attempt_count: to_u32("rate_limits", row.try_get("attempt_count")?)?,
        first_attempt: from_millis("rate_limits", row.try_get("first_attempt")?)?,
        last_attempt: from_millis("rate_limits", row.try_get("last_attempt")?)?,
        is_blocked: row.try_get("is_blocked")?,
        version: u64::try_from(version).map_err(|_| StoreError::Corrupt {
            entity: "rate_limits",
            detail: format!("negative version: {version}"),
        })?,
    })
}

fn ban_from_row(row: &SqliteRow) -> StoreResult<Ban> {
    let blocked_until: Option<i64> = row.try_get("blocked_until")?;
    Ok(Ban {
        ip_address: row.try_get("ip_address")?,
        is_permanent: row.try_get("is_permanent")?,
        blocked_until: blocked_until
            .map(|ms| from_millis("ip_blocklist", ms))
            .transpose()?,
    })
}

#[async_trait]
impl PolicyStore for SqliteStore {
    async fn get_policy(&self) -> StoreResult<Option<Policy>> {
        let row = sqlx::query(
            "SELECT max_messages_per_day, max_messages_per_hour, block_duration_hours
             FROM rate_limit_config WHERE id = 1",
        )
        .fetch_optional(&self.db)
        .await?;

        row.map(|row| -> StoreResult<Policy> {
            Ok(Policy {
                max_per_day: to_u32("rate_limit_config", row.try_get("max_messages_per_day")?)?,
                max_per_hour: to_u32("rate_limit_config", row.try_get("max_messages_per_hour")?)?,
                block_duration_hours: to_u32(
                    "rate_limit_config",
                    row.try_get("block_duration_hours")?,
                )?,
            })
        })
        .transpose()
    }

    async fn put_policy(&self, policy: Policy) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO rate_limit_config
                (id, max_messages_per_day, max_messages_per_hour, block_duration_hours)
             VALUES (1, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                max_messages_per_day = excluded.max_messages_per_day,
                max_messages_per_hour = excluded.max_messages_per_hour,
                block_duration_hours = excluded.block_duration_hours",
        )
        .bind(i64::from(policy.max_per_day))
        .bind(i64::from(policy.max_per_hour))
        .bind(i64::from(policy.block_duration_hours))
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BanStore for SqliteStore {
    async fn get_ban(&self, source: &str) -> StoreResult<Option<Ban>> {
        let row = sqlx::query(
            "SELECT ip_address, is_permanent, blocked_until FROM ip_blocklist WHERE ip_address = ?",
        )
        .bind(source)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(ban_from_row).transpose()
    }

    async fn put_ban(&self, ban: Ban) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO ip_blocklist (ip_address, is_permanent, blocked_until) VALUES (?, ?, ?)
             ON CONFLICT(ip_address) DO UPDATE SET
                is_permanent = excluded.is_permanent,
                blocked_until = excluded.blocked_until",
        )
        .bind(&ban.ip_address)
        .bind(ban.is_permanent)
        .bind(ban.blocked_until.map(to_millis))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn delete_ban(&self, source: &str) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM ip_blocklist WHERE ip_address = ?")
            .bind(source)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_bans(&self) -> StoreResult<Vec<Ban>> {
        let rows = sqlx::query(
            "SELECT ip_address, is_permanent, blocked_until FROM ip_blocklist ORDER BY ip_address",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(ban_from_row).collect()
    }

    async fn delete_expired_ban(&self, source: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let res = sqlx::query(
            "DELETE FROM ip_blocklist
             WHERE ip_address = ? AND is_permanent = 0
               AND (blocked_until IS NULL OR blocked_until <= ?)",
        )
        .bind(source)
        .bind(to_millis(now))
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get_record(&self, key: &RecordKey) -> StoreResult<Option<RateLimitRecord>> {
        let row = sqlx::query(
            "SELECT ip_address, recipient_id, attempt_count, first_attempt, last_attempt,
                    is_blocked, version
             FROM rate_limits WHERE ip_address = ? AND recipient_id = ?",
        )
        .bind(&key.source)
        .bind(&key.recipient)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn insert_record(&self, record: &RateLimitRecord) -> StoreResult<WriteOutcome> {
        let res = sqlx::query(
            "INSERT OR IGNORE INTO rate_limits
                (ip_address, recipient_id, attempt_count, first_attempt, last_attempt,
                 is_blocked, version)
             VALUES (?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(&record.ip_address)
        .bind(&record.recipient_id)
        .bind(i64::from(record.attempt_count))
        .bind(to_millis(record.first_attempt))
        .bind(to_millis(record.last_attempt))
        .bind(record.is_blocked)
        .execute(&self.db)
        .await?;

        if res.rows_affected() == 0 {
            debug!(key = %record.key(), "Insert lost to concurrent writer");
            return Ok(WriteOutcome::Conflict);
        }
        Ok(WriteOutcome::Written(1))
    }

    async fn compare_and_swap(
        &self,
        record: &RateLimitRecord,
        expected_version: u64,
    ) -> StoreResult<WriteOutcome> {
        let expected = i64::try_from(expected_version).map_err(|_| StoreError::Corrupt {
            entity: "rate_limits",
            detail: format!("version out of range: {expected_version}"),
        })?;

        let res = sqlx::query(
            "UPDATE rate_limits SET
                attempt_count = ?, first_attempt = ?, last_attempt = ?, is_blocked = ?,
                version = version + 1
             WHERE ip_address = ? AND recipient_id = ? AND version = ?",
        )
        .bind(i64::from(record.attempt_count))
        .bind(to_millis(record.first_attempt))
        .bind(to_millis(record.last_attempt))
        .bind(record.is_blocked)
        .bind(&record.ip_address)
        .bind(&record.recipient_id)
        .bind(expected)
        .execute(&self.db)
        .await?;

        if res.rows_affected() == 0 {
            return Ok(WriteOutcome::Conflict);
        }
        Ok(WriteOutcome::Written(expected_version + 1))
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn record_usage(
        &self,
        message_id: &str,
        key: &RecordKey,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            "INSERT OR IGNORE INTO message_usage (message_id, ip_address, recipient_id, recorded_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(&key.source)
        .bind(&key.recipient)
        .bind(to_millis(at))
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }
}
