// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test harness for message admission.
//!
//! Abuse-pattern simulation, data generators, outcome metrics, and a
//! fault-injecting store wrapper. Each test binary uses a different subset.
#![allow(dead_code)]

pub mod attacks;
pub mod flaky;
pub mod generators;
pub mod metrics;

use chrono::{DateTime, TimeZone, Utc};
use message_admission::{
    cache::MemoryCache,
    clock::ManualClock,
    limiter::{AdmissionEngine, EngineSettings},
    metrics::Metrics,
    store::Store,
    Policy,
};
use std::sync::Arc;

/// Policy used by the documented scenarios.
pub fn scenario_policy() -> Policy {
    Policy {
        max_per_day: 5,
        max_per_hour: 3,
        block_duration_hours: 24,
    }
}

/// Fixed start time so failures are reproducible.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap()
}

/// Engine over `store` with a manual clock and in-memory cache.
pub fn engine_with(
    store: Arc<dyn Store>,
    clock: &ManualClock,
    settings: EngineSettings,
) -> (AdmissionEngine, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new(Arc::new(clock.clone())));
    let engine = AdmissionEngine::new(
        store,
        cache.clone(),
        Arc::new(clock.clone()),
        settings,
        Metrics::new().unwrap(),
    );
    (engine, cache)
}
