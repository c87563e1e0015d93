// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the message admission service.
//!
//! The default policy only applies while the policy store holds no row;
//! once an administrator saves one, the stored policy wins.

use crate::model::Policy;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Configuration for the message admission service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// `memory` or an `sqlite:` URL (default: memory)
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Take the source address from `X-Forwarded-For` (default: false)
    #[serde(default)]
    pub trust_forwarded_for: bool,

    #[serde(default)]
    pub admission: AdmissionConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Admission engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Daily cap used until a policy is stored (default: 10)
    #[serde(default = "default_max_per_day")]
    pub default_max_per_day: u32,

    /// Hourly cap used until a policy is stored (default: 3)
    #[serde(default = "default_max_per_hour")]
    pub default_max_per_hour: u32,

    /// Block duration used until a policy is stored (default: 24)
    #[serde(default = "default_block_hours")]
    pub default_block_hours: u32,

    /// Attempts at an optimistic record write before giving up (default: 5)
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: u32,
}

/// Status cache TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Policy TTL in seconds (default: 60)
    #[serde(default = "default_policy_ttl_secs")]
    pub policy_ttl_secs: u64,

    /// Rate-limit record TTL in seconds (default: 30)
    #[serde(default = "default_record_ttl_secs")]
    pub record_ttl_secs: u64,
}

/// Identity lookup settings. Lookups are audit-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Session service base URL; lookups are skipped when unset
    #[serde(default)]
    pub session_api_url: Option<String>,

    /// Per-lookup timeout in milliseconds (default: 2000)
    #[serde(default = "default_identity_timeout_ms")]
    pub timeout_ms: u64,
}

/// Admin endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Bearer token for the admin endpoints; open when unset
    #[serde(default)]
    pub token: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_url() -> String {
    "memory".to_string()
}

fn default_max_per_day() -> u32 {
    10
}

fn default_max_per_hour() -> u32 {
    3
}

fn default_block_hours() -> u32 {
    24
}

fn default_max_write_retries() -> u32 {
    5
}

fn default_policy_ttl_secs() -> u64 {
    60
}

fn default_record_ttl_secs() -> u64 {
    30
}

fn default_identity_timeout_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_url: default_database_url(),
            trust_forwarded_for: false,
            admission: AdmissionConfig::default(),
            cache: CacheConfig::default(),
            identity: IdentityConfig::default(),
            admin: AdminConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            default_max_per_day: default_max_per_day(),
            default_max_per_hour: default_max_per_hour(),
            default_block_hours: default_block_hours(),
            max_write_retries: default_max_write_retries(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy_ttl_secs: default_policy_ttl_secs(),
            record_ttl_secs: default_record_ttl_secs(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            session_api_url: None,
            timeout_ms: default_identity_timeout_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl AdmissionConfig {
    /// Policy in force while the store is empty.
    pub fn default_policy(&self) -> Policy {
        Policy {
            max_per_day: self.default_max_per_day,
            max_per_hour: self.default_max_per_hour,
            block_duration_hours: self.default_block_hours,
        }
    }
}

impl CacheConfig {
    pub fn policy_ttl(&self) -> Duration {
        ttl_from_secs(self.policy_ttl_secs)
    }

    pub fn record_ttl(&self) -> Duration {
        ttl_from_secs(self.record_ttl_secs)
    }
}

/// Saturates at the largest representable duration.
fn ttl_from_secs(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

impl IdentityConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Load configuration from environment variables, honouring a `.env` file.
pub fn from_env() -> Config {
    dotenvy::dotenv().ok();

    let defaults = Config::default();
    Config {
        bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        trust_forwarded_for: env_parse("TRUST_FORWARDED_FOR").unwrap_or(false),
        admission: AdmissionConfig {
            default_max_per_day: env_parse("DEFAULT_MAX_PER_DAY")
                .unwrap_or(defaults.admission.default_max_per_day),
            default_max_per_hour: env_parse("DEFAULT_MAX_PER_HOUR")
                .unwrap_or(defaults.admission.default_max_per_hour),
            default_block_hours: env_parse("DEFAULT_BLOCK_HOURS")
                .unwrap_or(defaults.admission.default_block_hours),
            max_write_retries: env_parse("MAX_WRITE_RETRIES")
                .unwrap_or(defaults.admission.max_write_retries),
        },
        cache: CacheConfig {
            policy_ttl_secs: env_parse("POLICY_CACHE_TTL_SECS")
                .unwrap_or(defaults.cache.policy_ttl_secs),
            record_ttl_secs: env_parse("RECORD_CACHE_TTL_SECS")
                .unwrap_or(defaults.cache.record_ttl_secs),
        },
        identity: IdentityConfig {
            session_api_url: std::env::var("SESSION_API_URL").ok(),
            timeout_ms: env_parse("SESSION_API_TIMEOUT_MS")
                .unwrap_or(defaults.identity.timeout_ms),
        },
        admin: AdminConfig {
            token: std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
        },
        metrics: MetricsConfig {
            enabled: env_parse("METRICS_ENABLED").unwrap_or(defaults.metrics.enabled),
        },
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
