// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Request-level error types.

use crate::store::StoreError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Policy store unavailable: {0}")]
    ConfigUnavailable(#[source] StoreError),

    #[error("Durable store error: {0}")]
    Store(#[from] StoreError),

    #[error("Record {key} still contended after {attempts} write attempts")]
    WriteConflict { key: String, attempts: u32 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::ConfigUnavailable(_)
            | Self::InvalidConfig(_)
            | Self::Store(_)
            | Self::WriteConflict { .. }
            | Self::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Storage details stay in the logs.
        let message = match &self {
            Self::InvalidRequest(msg) => msg.clone(),
            Self::Unauthorized => "Unauthorized".to_string(),
            _ => {
                error!(error = %self, "Request failed");
                "Internal server error".to_string()
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
