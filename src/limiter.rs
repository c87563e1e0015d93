// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Admission decision engine for anonymous messages.
//!
//! Each `(source, recipient)` pair moves through three states:
//!
//! - **Unseen**: no record yet; the first attempt creates one with count=1
//! - **Active**: counting attempts inside a 24h window anchored at
//!   `first_attempt`
//! - **Blocked**: every attempt is denied until `last_attempt` plus the
//!   policy's block duration
//!
//! The transition table lives in [`evaluate`] and is pure. The engine feeds
//! it either a cached record (fast path) or the stored one (slow path) and
//! persists the result with a version-checked write. A lost race reloads
//! from the store and re-evaluates, so two concurrent requests can never
//! both spend the same slot.
//!
//! ## Known quirk: cumulative hourly check
//!
//! The hourly cap compares the *cumulative* `attempt_count` against
//! `max_per_hour` whenever the last attempt was under an hour ago. It does
//! not count only the trailing hour, so a source that sent several
//! messages slowly earlier in the day can be held back by the hourly rule
//! on a later quick follow-up.

use crate::bans::{self, BanStatus};
use crate::cache::{CacheKey, CachedStatus, StatusCache};
use crate::clock::Clock;
use crate::config::{AdmissionConfig, CacheConfig};
use crate::error::{AppError, Result};
use crate::metrics::Metrics;
use crate::model::{remaining_hours, Ban, Policy, RateLimitRecord, RecordKey};
use crate::store::{Store, StoreError, WriteOutcome};
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Length of the daily window.
fn day_window() -> Duration {
    Duration::hours(24)
}

/// Recency threshold for the hourly check.
fn hour_window() -> Duration {
    Duration::hours(1)
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    PermanentlyBanned,
    TemporarilyBanned { remaining_hours: i64 },
    DailyLimitReached { block_hours: u32 },
    HourlyLimitReached,
    Blocked { remaining_hours: i64 },
}

impl DenialReason {
    /// 403 for source bans, 429 for counter limits.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PermanentlyBanned | Self::TemporarilyBanned { .. } => StatusCode::FORBIDDEN,
            Self::DailyLimitReached { .. } | Self::HourlyLimitReached | Self::Blocked { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
        }
    }

    /// Metric label.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::PermanentlyBanned => "permanent_ban",
            Self::TemporarilyBanned { .. } => "temporary_ban",
            Self::DailyLimitReached { .. } => "daily_limit",
            Self::HourlyLimitReached => "hourly_limit",
            Self::Blocked { .. } => "blocked",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermanentlyBanned => {
                write!(f, "This IP has been permanently blocked for suspicious activity.")
            }
            Self::TemporarilyBanned { remaining_hours } => write!(
                f,
                "This IP is temporarily blocked. Try again in {} {}.",
                remaining_hours,
                hours_word(*remaining_hours)
            ),
            Self::DailyLimitReached { block_hours } => write!(
                f,
                "Daily limit reached. You have been blocked for {} {}.",
                block_hours,
                hours_word(i64::from(*block_hours))
            ),
            Self::HourlyLimitReached => {
                write!(f, "Hourly limit reached. Please try again later.")
            }
            Self::Blocked { remaining_hours } => write!(
                f,
                "You are blocked from sending messages. Try again in {} {}.",
                remaining_hours,
                hours_word(*remaining_hours)
            ),
        }
    }
}

fn hours_word(n: i64) -> &'static str {
    if n == 1 {
        "hour"
    } else {
        "hours"
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Allowed; carries the count stored after this attempt.
    Allowed { attempt_count: u32 },
    Denied(DenialReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn reason(&self) -> Option<DenialReason> {
        match self {
            Self::Allowed { .. } => None,
            Self::Denied(reason) => Some(*reason),
        }
    }
}

/// One step of the per-key state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Unseen -> Active.
    Create,
    /// Active -> Active, count + 1.
    Increment,
    /// Day window lapsed without a block; start over.
    ResetWindow,
    /// Daily cap hit inside the window; Active -> Blocked.
    Block,
    /// Hourly cap hit; denied, nothing written.
    HourlyLimited,
    /// Blocked -> Blocked; nothing written.
    StillBlocked { remaining_hours: i64 },
    /// Block elapsed; Blocked -> Active with fresh counters.
    Unblock,
}

/// Decide the transition for one attempt. Checks run in a fixed order:
/// block, day window expiry, daily cap, hourly cap.
pub fn evaluate(record: Option<&RateLimitRecord>, policy: &Policy, now: DateTime<Utc>) -> Transition {
    let Some(record) = record else {
        return Transition::Create;
    };

    if record.is_blocked {
        // An unrepresentable deadline never lapses.
        return match record.last_attempt.checked_add_signed(policy.block_duration()) {
            Some(until) if now >= until => Transition::Unblock,
            Some(until) => Transition::StillBlocked {
                remaining_hours: remaining_hours(now, until),
            },
            None => Transition::StillBlocked {
                remaining_hours: i64::from(policy.block_duration_hours),
            },
        };
    }

    if now - record.first_attempt >= day_window() {
        return Transition::ResetWindow;
    }

    if record.attempt_count >= policy.max_per_day {
        return Transition::Block;
    }

    if now - record.last_attempt < hour_window() && record.attempt_count >= policy.max_per_hour {
        return Transition::HourlyLimited;
    }

    Transition::Increment
}

impl Transition {
    /// Record to persist, if this transition writes.
    pub fn next_record(
        &self,
        current: Option<&RateLimitRecord>,
        key: &RecordKey,
        now: DateTime<Utc>,
    ) -> Option<RateLimitRecord> {
        match (self, current) {
            (Self::HourlyLimited | Self::StillBlocked { .. }, _) => None,
            (_, None) => Some(RateLimitRecord::first(key, now)),
            (Self::Create | Self::ResetWindow | Self::Unblock, Some(current)) => {
                let mut next = current.clone();
                next.reset(now);
                Some(next)
            }
            (Self::Increment, Some(current)) => {
                let mut next = current.clone();
                next.attempt_count = next.attempt_count.saturating_add(1);
                next.last_attempt = now;
                Some(next)
            }
            (Self::Block, Some(current)) => {
                let mut next = current.clone();
                next.is_blocked = true;
                next.last_attempt = now;
                Some(next)
            }
        }
    }

    /// Denial carried by this transition, if any.
    pub fn denial(&self, policy: &Policy) -> Option<DenialReason> {
        match self {
            Self::Block => Some(DenialReason::DailyLimitReached {
                block_hours: policy.block_duration_hours,
            }),
            Self::HourlyLimited => Some(DenialReason::HourlyLimitReached),
            Self::StillBlocked { remaining_hours } => Some(DenialReason::Blocked {
                remaining_hours: *remaining_hours,
            }),
            Self::Create | Self::Increment | Self::ResetWindow | Self::Unblock => None,
        }
    }
}

/// Tunables resolved from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_policy: Policy,
    pub policy_ttl: Duration,
    pub record_ttl: Duration,
    pub max_write_retries: u32,
}

impl EngineSettings {
    /// Resolve settings, rejecting a configured default policy that the
    /// admin endpoint would refuse.
    pub fn new(admission: &AdmissionConfig, cache: &CacheConfig) -> Result<Self> {
        let default_policy = admission.default_policy();
        default_policy
            .validate()
            .map_err(|msg| AppError::InvalidConfig(format!("default policy: {msg}")))?;

        Ok(Self {
            default_policy,
            policy_ttl: cache.policy_ttl(),
            record_ttl: cache.record_ttl(),
            max_write_retries: admission.max_write_retries.max(1),
        })
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        let cache = CacheConfig::default();
        Self {
            default_policy: AdmissionConfig::default().default_policy(),
            policy_ttl: cache.policy_ttl(),
            record_ttl: cache.record_ttl(),
            max_write_retries: AdmissionConfig::default().max_write_retries,
        }
    }
}

/// Orchestrates ban gate, cache and store into a single verdict.
pub struct AdmissionEngine {
    store: Arc<dyn Store>,
    cache: Arc<dyn StatusCache>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    metrics: Metrics,
}

impl AdmissionEngine {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn StatusCache>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            settings,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Is `source` allowed to message `recipient` right now?
    ///
    /// An allowed verdict has already reserved the slot in the durable store.
    pub async fn check(&self, source: &str, recipient: &str) -> Result<Verdict> {
        let now = self.clock.now();

        match self.ban_gate(source, now).await? {
            BanStatus::PermanentlyBanned => {
                return Ok(self.finish(source, recipient, Verdict::Denied(DenialReason::PermanentlyBanned)));
            }
            BanStatus::TemporarilyBanned { remaining_hours } => {
                let verdict = Verdict::Denied(DenialReason::TemporarilyBanned { remaining_hours });
                return Ok(self.finish(source, recipient, verdict));
            }
            BanStatus::NotBanned | BanStatus::BanExpired => {}
        }

        let policy = self.policy().await?;
        let key = RecordKey::new(source, recipient);
        let verdict = self.reserve(&key, &policy, now).await?;
        Ok(self.finish(source, recipient, verdict))
    }

    /// Classify the source and clear a lapsed temporary ban before the
    /// counters are touched. Cleanup failures do not fail the request.
    async fn ban_gate(&self, source: &str, now: DateTime<Utc>) -> Result<BanStatus> {
        let status = bans::ban_status(self.store.as_ref(), source, now)
            .await
            .map_err(|e| self.store_failure(e))?;

        if status == BanStatus::BanExpired {
            self.metrics.expired_bans.inc();
            if let Err(err) = bans::expire_bans(self.store.as_ref(), source, now).await {
                warn!(ip = %source, error = %err, "Failed to remove expired ban, continuing");
            }
            return Ok(BanStatus::NotBanned);
        }

        Ok(status)
    }

    /// Apply the transition table and persist the outcome atomically.
    async fn reserve(&self, key: &RecordKey, policy: &Policy, now: DateTime<Utc>) -> Result<Verdict> {
        let cache_key = CacheKey::Record(key.clone());

        let (mut current, mut from_store) = match self.cache.get(&cache_key).await {
            Some(CachedStatus::Record(record)) => {
                self.metrics.cache_hit();
                debug!(%key, "Record cache hit");
                (Some(record), false)
            }
            _ => {
                self.metrics.cache_miss();
                (self.load_record(key).await?, true)
            }
        };

        for attempt in 1..=self.settings.max_write_retries {
            let transition = evaluate(current.as_ref(), policy, now);
            debug!(%key, ?transition, attempt, "Evaluated attempt");

            let Some(next) = transition.next_record(current.as_ref(), key, now) else {
                // Denied without a write. Cache the canonical row so a flood
                // of denied attempts stays off the store.
                if let (true, Some(record)) = (from_store, current) {
                    self.cache
                        .set(cache_key, CachedStatus::Record(record), self.settings.record_ttl)
                        .await;
                }
                return Ok(transition
                    .denial(policy)
                    .map_or(Verdict::Allowed { attempt_count: 0 }, Verdict::Denied));
            };

            let outcome = match current.as_ref() {
                None => self.store.insert_record(&next).await,
                Some(read) => self.store.compare_and_swap(&next, read.version).await,
            }
            .map_err(|e| self.store_failure(e))?;

            self.cache.invalidate(&cache_key).await;

            match outcome {
                WriteOutcome::Written(_) => {
                    return Ok(match transition.denial(policy) {
                        Some(reason) => Verdict::Denied(reason),
                        None => Verdict::Allowed {
                            attempt_count: next.attempt_count,
                        },
                    });
                }
                WriteOutcome::Conflict => {
                    self.metrics.write_conflicts.inc();
                    debug!(%key, attempt, "Record changed underneath us, reloading");
                    current = self.load_record(key).await?;
                    from_store = true;
                }
            }
        }

        warn!(%key, attempts = self.settings.max_write_retries, "Giving up on contended record");
        Err(AppError::WriteConflict {
            key: key.to_string(),
            attempts: self.settings.max_write_retries,
        })
    }

    async fn load_record(&self, key: &RecordKey) -> Result<Option<RateLimitRecord>> {
        self.store
            .get_record(key)
            .await
            .map_err(|e| self.store_failure(e))
    }

    fn store_failure(&self, err: StoreError) -> AppError {
        self.metrics.store_errors.inc();
        AppError::Store(err)
    }

    fn finish(&self, source: &str, recipient: &str, verdict: Verdict) -> Verdict {
        match verdict {
            Verdict::Allowed { attempt_count } => {
                self.metrics.verdicts.with_label_values(&["allowed"]).inc();
                debug!(ip = %source, recipient = %recipient, attempt_count, "Message allowed");
            }
            Verdict::Denied(reason) => {
                self.metrics.verdicts.with_label_values(&[reason.outcome()]).inc();
                info!(ip = %source, recipient = %recipient, reason = reason.outcome(), "Message denied");
            }
        }
        verdict
    }

    /// Current policy, read through the cache.
    ///
    /// Admin updates are picked up when the cached copy expires, not
    /// immediately. While the store has no policy row the configured
    /// default applies.
    pub async fn policy(&self) -> Result<Policy> {
        if let Some(CachedStatus::Policy(policy)) = self.cache.get(&CacheKey::Policy).await {
            self.metrics.cache_hit();
            return Ok(policy);
        }
        self.metrics.cache_miss();

        let stored = self.store.get_policy().await.map_err(|e| {
            self.metrics.store_errors.inc();
            AppError::ConfigUnavailable(e)
        })?;
        let policy = stored.unwrap_or(self.settings.default_policy);

        self.cache
            .set(CacheKey::Policy, CachedStatus::Policy(policy), self.settings.policy_ttl)
            .await;
        Ok(policy)
    }

    /// Persist a new policy. The cached copy is left to expire.
    pub async fn update_policy(&self, policy: Policy) -> Result<()> {
        policy
            .validate()
            .map_err(|msg| AppError::InvalidRequest(msg.to_string()))?;
        self.store
            .put_policy(policy)
            .await
            .map_err(|e| self.store_failure(e))?;
        info!(
            max_per_day = policy.max_per_day,
            max_per_hour = policy.max_per_hour,
            block_duration_hours = policy.block_duration_hours,
            "Policy updated"
        );
        Ok(())
    }

    /// Record a delivered message for audit. Idempotent per `message_id`;
    /// counters are not touched because [`check`](Self::check) already
    /// reserved the slot.
    pub async fn report_usage(&self, source: &str, recipient: &str, message_id: &str) -> Result<bool> {
        let key = RecordKey::new(source, recipient);
        let recorded = self
            .store
            .record_usage(message_id, &key, self.clock.now())
            .await
            .map_err(|e| self.store_failure(e))?;
        self.cache.invalidate(&CacheKey::Record(key.clone())).await;

        if !recorded {
            debug!(%key, message_id, "Usage already recorded");
        }
        Ok(recorded)
    }

    pub async fn list_bans(&self) -> Result<Vec<Ban>> {
        self.store.list_bans().await.map_err(|e| self.store_failure(e))
    }

    pub async fn put_ban(&self, ban: Ban) -> Result<()> {
        if ban.ip_address.trim().is_empty() {
            return Err(AppError::InvalidRequest("ip_address is required".to_string()));
        }
        if !ban.is_permanent && ban.blocked_until.is_none() {
            return Err(AppError::InvalidRequest(
                "temporary bans need blocked_until".to_string(),
            ));
        }
        info!(ip = %ban.ip_address, permanent = ban.is_permanent, "Ban stored");
        self.store.put_ban(ban).await.map_err(|e| self.store_failure(e))
    }

    pub async fn remove_ban(&self, source: &str) -> Result<bool> {
        self.store
            .delete_ban(source)
            .await
            .map_err(|e| self.store_failure(e))
    }

    /// Drop expired cache entries.
    pub async fn purge_cache(&self) -> usize {
        self.cache.purge_expired().await
    }
}
