// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Audit-only identity lookup for senders.
//!
//! Senders are anonymous by default. When a session token is present the
//! service asks the session API who it belongs to, purely so the decision
//! can be logged against an identity. A failed lookup never changes the
//! verdict.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid session API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Session API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Session API error: {0}")]
    Status(u16),
}

/// Verified requester.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub user_id: String,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolve an `Authorization` header value. `Ok(None)` means the
    /// session is unknown or anonymous.
    async fn verify(&self, authorization: &str) -> Result<Option<Identity>, IdentityError>;
}

/// Session API client.
pub struct SessionClient {
    session_url: Url,
    client: reqwest::Client,
}

impl SessionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IdentityError> {
        let base = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            session_url: base.join("session")?,
            client,
        })
    }

    pub fn session_url(&self) -> &Url {
        &self.session_url
    }
}

#[async_trait]
impl IdentityVerifier for SessionClient {
    async fn verify(&self, authorization: &str) -> Result<Option<Identity>, IdentityError> {
        let response = self
            .client
            .get(self.session_url.clone())
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => Ok(Some(response.json().await?)),
            401 | 404 => Ok(None),
            code => Err(IdentityError::Status(code)),
        }
    }
}

/// Fail-open wrapper: any error is logged and treated as anonymous.
pub async fn audit_identity(
    verifier: Option<&dyn IdentityVerifier>,
    authorization: Option<&str>,
) -> Option<Identity> {
    let (verifier, authorization) = match (verifier, authorization) {
        (Some(v), Some(a)) => (v, a),
        _ => return None,
    };

    match verifier.verify(authorization).await {
        Ok(identity) => {
            debug!(identity = ?identity, "Identity lookup complete");
            identity
        }
        Err(err) => {
            warn!(error = %err, "Identity lookup failed, continuing anonymously");
            None
        }
    }
}
