// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Message Admission
//!
//! Gates anonymous messages to a recipient, keyed by the sender's network
//! address:
//!
//! - Source-level ban list (permanent or time-bounded)
//! - Per-(source, recipient) daily cap with a timed block
//! - Per-(source, recipient) hourly cap
//! - Cache-fronted reads with explicit invalidation after every write
//! - Version-checked writes so concurrent requests cannot under-count

pub mod bans;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod limiter;
pub mod metrics;
pub mod model;
pub mod store;

pub use config::Config;
pub use error::AppError;
pub use limiter::{AdmissionEngine, DenialReason, EngineSettings, Verdict};
pub use model::{Ban, Policy, RateLimitRecord, RecordKey};
