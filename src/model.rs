// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Persisted shapes: policy, bans and per-(source, recipient) records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest block a policy may impose: ten years.
pub const MAX_BLOCK_HOURS: u32 = 24 * 365 * 10;

/// Admin-configurable thresholds. Singleton row in the policy store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(rename = "max_messages_per_day")]
    pub max_per_day: u32,
    #[serde(rename = "max_messages_per_hour")]
    pub max_per_hour: u32,
    pub block_duration_hours: u32,
}

impl Policy {
    pub fn block_duration(&self) -> Duration {
        Duration::hours(i64::from(self.block_duration_hours))
    }

    /// Reject zero caps, an hourly cap above the daily one, and blocks
    /// longer than [`MAX_BLOCK_HOURS`].
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_per_day == 0 || self.max_per_hour == 0 || self.block_duration_hours == 0 {
            return Err("all policy values must be positive");
        }
        if self.max_per_hour > self.max_per_day {
            return Err("max_messages_per_hour must not exceed max_messages_per_day");
        }
        if self.block_duration_hours > MAX_BLOCK_HOURS {
            return Err("block_duration_hours must not exceed ten years");
        }
        Ok(())
    }
}

/// Source-level denial, independent of per-recipient counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    pub ip_address: String,
    pub is_permanent: bool,
    #[serde(default)]
    pub blocked_until: Option<DateTime<Utc>>,
}

impl Ban {
    /// A temporary ban whose deadline has passed. Permanent bans never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_permanent && self.blocked_until.map_or(true, |until| until <= now)
    }
}

/// Key of a rate-limit record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub source: String,
    pub recipient: String,
}

impl RecordKey {
    pub fn new(source: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            recipient: recipient.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.recipient)
    }
}

/// Per-(source, recipient) counters.
///
/// `version` starts at 1 and is bumped by every durable write; writers
/// must present the version they read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub ip_address: String,
    pub recipient_id: String,
    pub attempt_count: u32,
    pub first_attempt: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,
    pub is_blocked: bool,
    pub version: u64,
}

impl RateLimitRecord {
    /// Record for a first attempt (count=1, both anchors at `now`).
    pub fn first(key: &RecordKey, now: DateTime<Utc>) -> Self {
        Self {
            ip_address: key.source.clone(),
            recipient_id: key.recipient.clone(),
            attempt_count: 1,
            first_attempt: now,
            last_attempt: now,
            is_blocked: false,
            version: 1,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.ip_address.clone(), self.recipient_id.clone())
    }

    /// Full reset: count=1, fresh anchors, unblocked. Version is left to the writer.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.attempt_count = 1;
        self.first_attempt = now;
        self.last_attempt = now;
        self.is_blocked = false;
    }
}

/// Whole hours left until `until`, rounded up; never below 1 while time remains.
pub fn remaining_hours(now: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    let secs = (until - now).num_seconds();
    if secs <= 0 {
        0
    } else {
        (secs + 3599) / 3600
    }
}
