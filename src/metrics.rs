// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus counters for admission decisions.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters owned by one engine instance.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub verdicts: IntCounterVec,
    pub cache_lookups: IntCounterVec,
    pub store_errors: IntCounter,
    pub write_conflicts: IntCounter,
    pub expired_bans: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let verdicts = IntCounterVec::new(
            Opts::new("admission_verdicts_total", "Admission verdicts by outcome"),
            &["outcome"],
        )?;
        let cache_lookups = IntCounterVec::new(
            Opts::new("admission_cache_lookups_total", "Status cache lookups"),
            &["result"],
        )?;
        let store_errors = IntCounter::new(
            "admission_store_errors_total",
            "Durable store failures surfaced to clients",
        )?;
        let write_conflicts = IntCounter::new(
            "admission_write_conflicts_total",
            "Optimistic record writes that lost a race",
        )?;
        let expired_bans = IntCounter::new(
            "admission_expired_bans_total",
            "Lapsed temporary bans seen by the gate",
        )?;

        registry.register(Box::new(verdicts.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;
        registry.register(Box::new(write_conflicts.clone()))?;
        registry.register(Box::new(expired_bans.clone()))?;

        Ok(Self {
            registry,
            verdicts,
            cache_lookups,
            store_errors,
            write_conflicts,
            expired_bans,
        })
    }

    pub fn cache_hit(&self) {
        self.cache_lookups.with_label_values(&["hit"]).inc();
    }

    pub fn cache_miss(&self) {
        self.cache_lookups.with_label_values(&["miss"]).inc();
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
