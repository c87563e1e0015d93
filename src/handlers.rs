// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the message admission service.
//!
//! The source identifier always comes from transport metadata (peer
//! address, or `X-Forwarded-For` when the proxy in front is trusted),
//! never from the request body.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::identity::{audit_identity, IdentityVerifier};
use crate::limiter::{AdmissionEngine, Verdict};
use crate::model::{Ban, Policy};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Shared application state.
pub struct AppState {
    pub engine: AdmissionEngine,
    pub identity: Option<Arc<dyn IdentityVerifier>>,
    pub config: Config,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Admission check request.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    #[serde(rename = "recipientId")]
    pub recipient_id: String,
}

/// Admission check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Usage report request.
#[derive(Debug, Deserialize)]
pub struct UsageRequest {
    #[serde(rename = "recipientId")]
    pub recipient_id: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub recorded: bool,
}

#[derive(Debug, Serialize)]
pub struct RemoveBanResponse {
    pub removed: bool,
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/rate-limit/check", post(check))
        .route("/rate-limit/config", get(get_config).post(update_config))
        .route("/rate-limit/usage", post(report_usage))
        .route("/rate-limit/bans", get(list_bans).post(put_ban))
        .route("/rate-limit/bans/:ip", delete(remove_ban))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "message-admission",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response> {
    if !state.config.metrics.enabled {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let body = state.engine.metrics().render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// Decide whether the caller may message `recipientId` right now.
pub async fn check(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = payload?;
    let ip = source_ip(&state.config, &headers, connect_info.map(|ci| ci.0))?;
    let recipient = req.recipient_id.trim();
    if recipient.is_empty() {
        return Err(AppError::InvalidRequest("recipientId is required".to_string()));
    }

    let identity = audit_identity(state.identity.as_deref(), authorization(&headers)).await;
    debug!(ip = %ip, recipient = %recipient, identity = ?identity, "Processing admission check");

    let verdict = state.engine.check(&ip.to_string(), recipient).await?;

    Ok(match verdict {
        Verdict::Allowed { .. } => (
            StatusCode::OK,
            Json(CheckResponse {
                allowed: true,
                reason: None,
            }),
        )
            .into_response(),
        Verdict::Denied(reason) => (
            reason.status_code(),
            Json(CheckResponse {
                allowed: false,
                reason: Some(reason.to_string()),
            }),
        )
            .into_response(),
    })
}

/// Record a persisted message. Idempotent per `messageId`.
pub async fn report_usage(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<UsageRequest>, JsonRejection>,
) -> Result<Json<UsageResponse>> {
    let Json(req) = payload?;
    let ip = source_ip(&state.config, &headers, connect_info.map(|ci| ci.0))?;
    if req.recipient_id.trim().is_empty() || req.message_id.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "recipientId and messageId are required".to_string(),
        ));
    }

    let recorded = state
        .engine
        .report_usage(&ip.to_string(), req.recipient_id.trim(), req.message_id.trim())
        .await?;
    Ok(Json(UsageResponse { recorded }))
}

pub async fn get_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Policy>> {
    require_admin(&state.config, &headers)?;
    Ok(Json(state.engine.policy().await?))
}

/// Persist a new policy. Readers see it once their cached copy expires.
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<Policy>, JsonRejection>,
) -> Result<Json<Policy>> {
    require_admin(&state.config, &headers)?;
    let Json(policy) = payload?;
    state.engine.update_policy(policy).await?;
    Ok(Json(policy))
}

pub async fn list_bans(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Ban>>> {
    require_admin(&state.config, &headers)?;
    Ok(Json(state.engine.list_bans().await?))
}

pub async fn put_ban(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<Ban>, JsonRejection>,
) -> Result<Json<Ban>> {
    require_admin(&state.config, &headers)?;
    let Json(ban) = payload?;
    state.engine.put_ban(ban.clone()).await?;
    Ok(Json(ban))
}

pub async fn remove_ban(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ip): Path<String>,
) -> Result<Json<RemoveBanResponse>> {
    require_admin(&state.config, &headers)?;
    let removed = state.engine.remove_ban(&ip).await?;
    if removed {
        info!(ip = %ip, "Ban removed by admin");
    }
    Ok(Json(RemoveBanResponse { removed }))
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

fn require_admin(config: &Config, headers: &HeaderMap) -> Result<()> {
    let Some(token) = config.admin.token.as_deref() else {
        return Ok(());
    };
    let presented = authorization(headers).and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(token) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Resolve the source address for rate limiting.
pub fn source_ip(
    config: &Config,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> Result<IpAddr> {
    if config.trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return Ok(ip);
        }
    }

    peer.map(|addr| addr.ip())
        .ok_or_else(|| AppError::InvalidRequest("Unable to determine client address".to_string()))
}
