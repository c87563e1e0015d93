// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Source-level ban gate, evaluated before any per-recipient counter.

use crate::model::{remaining_hours, Ban};
use crate::store::{BanStore, StoreResult};
use chrono::{DateTime, Utc};
use tracing::info;

/// Ban state of a source at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanStatus {
    NotBanned,
    PermanentlyBanned,
    TemporarilyBanned { remaining_hours: i64 },
    /// A temporary ban whose deadline has passed; the row is still present.
    BanExpired,
}

impl BanStatus {
    /// Classify a ban row.
    pub fn of(ban: Option<&Ban>, now: DateTime<Utc>) -> Self {
        match ban {
            None => Self::NotBanned,
            Some(ban) if ban.is_permanent => Self::PermanentlyBanned,
            Some(ban) if ban.is_expired(now) => Self::BanExpired,
            Some(ban) => Self::TemporarilyBanned {
                remaining_hours: ban
                    .blocked_until
                    .map_or(0, |until| remaining_hours(now, until)),
            },
        }
    }
}

/// Look up the ban state of `source`.
pub async fn ban_status<S>(store: &S, source: &str, now: DateTime<Utc>) -> StoreResult<BanStatus>
where
    S: BanStore + ?Sized,
{
    let ban = store.get_ban(source).await?;
    Ok(BanStatus::of(ban.as_ref(), now))
}

/// Remove the source's ban if it is temporary and has lapsed.
///
/// Idempotent: permanent and still-active bans are left alone, and a
/// missing row is not an error.
pub async fn expire_bans<S>(store: &S, source: &str, now: DateTime<Utc>) -> StoreResult<bool>
where
    S: BanStore + ?Sized,
{
    let removed = store.delete_expired_ban(source, now).await?;
    if removed {
        info!(ip = %source, "Expired temporary ban removed");
    }
    Ok(removed)
}
