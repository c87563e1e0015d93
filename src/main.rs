// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Message Admission Service
//!
//! Answers "may this address message this recipient right now?" before an
//! anonymous message is accepted.
//!
//! ## Endpoints
//!
//! - `POST /rate-limit/check`: admission verdict (200 / 403 / 429)
//! - `POST /rate-limit/usage`: record a delivered message (idempotent)
//! - `GET|POST /rate-limit/config`: policy (admin)
//! - `GET|POST /rate-limit/bans`, `DELETE /rate-limit/bans/:ip`: ban list (admin)
//! - `GET /metrics`, `GET /health`
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables (a `.env` file is
//! honoured):
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `DATABASE_URL`: `memory` or an `sqlite:` URL (default: memory)
//! - `TRUST_FORWARDED_FOR`: use `X-Forwarded-For` as the source (default: false)
//! - `POLICY_CACHE_TTL_SECS` / `RECORD_CACHE_TTL_SECS`: cache TTLs (60 / 30)
//! - `DEFAULT_MAX_PER_DAY` / `DEFAULT_MAX_PER_HOUR` / `DEFAULT_BLOCK_HOURS`:
//!   policy used until one is stored (10 / 3 / 24)
//! - `MAX_WRITE_RETRIES`: optimistic write attempts (default: 5)
//! - `SESSION_API_URL`: optional identity service for audit logging
//! - `SESSION_API_TIMEOUT_MS`: identity lookup timeout (default: 2000)
//! - `ADMIN_TOKEN`: bearer token for admin endpoints
//! - `METRICS_ENABLED`: serve `/metrics` (default: true)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use message_admission::{
    cache::MemoryCache,
    clock::{Clock, SystemClock},
    config,
    handlers::{router, AppState},
    identity::{IdentityVerifier, SessionClient},
    limiter::{AdmissionEngine, EngineSettings},
    metrics::Metrics,
    store::{MemoryStore, SqliteStore, Store},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = config::from_env();
    info!(
        bind_addr = %config.bind_addr,
        database = if config.database_url == "memory" { "memory" } else { "sqlite" },
        trust_forwarded_for = config.trust_forwarded_for,
        policy_ttl_secs = config.cache.policy_ttl_secs,
        record_ttl_secs = config.cache.record_ttl_secs,
        "Starting message admission service"
    );

    let store: Arc<dyn Store> = if config.database_url == "memory" {
        warn!("Using in-memory store; counters are lost on restart");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::connect(&config.database_url).await?)
    };

    // Refuse to start on a default policy the admin API would reject.
    let settings = EngineSettings::new(&config.admission, &config.cache)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = Arc::new(MemoryCache::new(clock.clone()));
    let engine = AdmissionEngine::new(
        store,
        cache,
        clock,
        settings,
        Metrics::new()?,
    );

    let identity: Option<Arc<dyn IdentityVerifier>> = match &config.identity.session_api_url {
        Some(url) => {
            let client = SessionClient::new(url, config.identity.timeout())?;
            info!(session_url = %client.session_url(), "Identity lookups enabled");
            Some(Arc::new(client) as Arc<dyn IdentityVerifier>)
        }
        None => None,
    };

    let state = Arc::new(AppState {
        engine,
        identity,
        config: config.clone(),
    });

    // Spawn cleanup task
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let purged = cleanup_state.engine.purge_cache().await;
            if purged > 0 {
                debug!(purged, "Purged expired cache entries");
            }
        }
    });

    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
