//! # Auth Client Module
//!
//! This module provides a client for the external identity verifier
//! (the auth service). Every station endpoint requires a bearer token;
//! the token itself is opaque here — verification is fully delegated.
//!
//! ## Verification Flow
//!
//! ```text
//! 1. Handler extracts the Authorization header
//!              ↓
//! 2. AuthClient.verify(token)
//!              ↓
//! 3. GET {AUTH_SERVICE_URL}/verify with the token forwarded
//!              ↓
//! 4. 200 + {"user": {"username": ...}} → verified principal
//!    other status                      → invalid token (401)
//!    transport failure                 → upstream unavailable (502)
//! ```
//!
//! Failures on this path are authentication errors, never reservation
//! errors.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from the token verification path.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No Authorization header on the request.
    #[error("Authorization token is missing")]
    MissingToken,

    /// The auth service rejected the token.
    #[error("Invalid token")]
    InvalidToken,

    /// The auth service answered 200 but without a usable principal.
    #[error("Invalid user info in verifier response")]
    InvalidUserInfo,

    /// The auth service could not be reached.
    #[error("Authentication service error: {0}")]
    Unavailable(String),
}

/// Body of a successful `/verify` response.
#[derive(Debug, Deserialize)]
struct VerifyResponse {
    user: Option<UserInfo>,
}

/// The `user` object inside a `/verify` response. All fields optional so
/// a malformed principal is detected here rather than as a parse error.
#[derive(Debug, Deserialize)]
struct UserInfo {
    username: Option<String>,
}

/// The verified principal returned by the auth service.
#[derive(Debug, Clone)]
pub struct VerifiedUser {
    /// Account name of the caller.
    pub username: String,
}

/// Client for the external identity verifier.
///
/// ## Usage
///
/// ```rust,ignore
/// let auth = AuthClient::new(&config.auth_service_url)?;
/// let user = auth.verify(token).await?;
/// info!("request by {}", user.username);
/// ```
#[derive(Clone)]
pub struct AuthClient {
    /// Base URL of the auth service.
    base_url: String,

    /// Shared HTTP client.
    http: reqwest::Client,
}

impl AuthClient {
    /// Create a new AuthClient.
    ///
    /// ## Arguments
    ///
    /// * `base_url` - Auth service base URL, e.g. `http://auth-service:3000`
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        info!("Auth client initialized:");
        info!("  Verifier: {}", base_url);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Verify a caller-supplied token against the auth service.
    ///
    /// Returns the verified principal, or the appropriate
    /// [`AuthError`] for missing/rejected tokens and transport failures.
    pub async fn verify(&self, token: Option<&str>) -> Result<VerifiedUser, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;

        let url = format!("{}/verify", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", token)
            .send()
            .await
            .map_err(|e| {
                warn!("Auth service unreachable: {}", e);
                AuthError::Unavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            debug!("Auth service rejected token: {}", response.status());
            return Err(AuthError::InvalidToken);
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        match body.user.and_then(|u| u.username) {
            Some(username) => Ok(VerifiedUser { username }),
            None => Err(AuthError::InvalidUserInfo),
        }
    }

    /// Probe the auth service for the health endpoint.
    ///
    /// Any HTTP answer counts as reachable; only transport failures
    /// report unhealthy.
    pub async fn is_reachable(&self) -> bool {
        let url = format!("{}/verify", self.base_url);
        match self.http.get(&url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Auth service health probe failed: {}", e);
                false
            }
        }
    }
}
