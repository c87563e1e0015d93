// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Abuse patterns replayed against the admission engine.

use super::generators::{generate_ips, generate_recipients};
use super::metrics::{AttackMetrics, Outcome};
use chrono::Duration;
use message_admission::{clock::ManualClock, AdmissionEngine, DenialReason, Verdict};
use std::time::Instant;

/// Attack pattern configuration.
#[derive(Debug, Clone)]
pub struct AttackConfig {
    /// Total number of checks to send
    pub total_requests: usize,
    /// Number of distinct source addresses, used round-robin
    pub unique_sources: usize,
    /// Number of distinct recipients, used round-robin
    pub unique_recipients: usize,
    /// Simulated time between consecutive checks
    pub interval: Duration,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            total_requests: 100,
            unique_sources: 1,
            unique_recipients: 1,
            interval: Duration::seconds(1),
        }
    }
}

/// Predefined attack patterns.
impl AttackConfig {
    /// One source hammering one recipient.
    pub fn single_source_flood() -> Self {
        Self {
            total_requests: 200,
            interval: Duration::milliseconds(100),
            ..Default::default()
        }
    }

    /// One source spacing messages just past the hourly window.
    pub fn slow_drip() -> Self {
        Self {
            total_requests: 30,
            interval: Duration::minutes(61),
            ..Default::default()
        }
    }

    /// Many sources targeting one recipient, a few messages each.
    pub fn distributed_flood() -> Self {
        Self {
            total_requests: 300,
            unique_sources: 100,
            interval: Duration::seconds(2),
            ..Default::default()
        }
    }

    /// One source sending to many recipients.
    pub fn recipient_spray() -> Self {
        Self {
            total_requests: 60,
            unique_recipients: 60,
            interval: Duration::seconds(1),
            ..Default::default()
        }
    }

    /// Simulated wall time the attack spans.
    pub fn span(&self) -> Duration {
        self.interval * self.total_requests as i32
    }
}

/// Map a verdict onto a harness outcome.
pub fn classify(verdict: &Verdict) -> Outcome {
    match verdict {
        Verdict::Allowed { .. } => Outcome::Allowed,
        Verdict::Denied(DenialReason::HourlyLimitReached) => Outcome::HourlyLimited,
        Verdict::Denied(DenialReason::DailyLimitReached { .. }) => Outcome::DailyLimited,
        Verdict::Denied(DenialReason::Blocked { .. }) => Outcome::Blocked,
        Verdict::Denied(
            DenialReason::PermanentlyBanned | DenialReason::TemporarilyBanned { .. },
        ) => Outcome::Banned,
    }
}

/// Replay `config` against `engine`, advancing `clock` between checks.
pub async fn run_attack(
    engine: &AdmissionEngine,
    clock: &ManualClock,
    config: &AttackConfig,
) -> AttackMetrics {
    let sources = generate_ips(config.unique_sources);
    let recipients = generate_recipients(config.unique_recipients);
    let mut metrics = AttackMetrics::new();
    metrics.start();

    for i in 0..config.total_requests {
        let source = sources[i % sources.len()].to_string();
        let recipient = &recipients[i % recipients.len()];

        let started = Instant::now();
        let verdict = engine
            .check(&source, recipient)
            .await
            .expect("check should not fail against the in-memory store");
        metrics.record(classify(&verdict), &source, recipient, started.elapsed());

        clock.advance(config.interval);
    }

    metrics.finish();
    metrics
}
