//! Bearer token exchange with the registry's authorization service

use crate::error::handlers::HttpErrorHandler;
use crate::error::{MirrorError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Token endpoint of Docker Hub
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io/token";

/// Service name Docker Hub tokens are scoped to
pub const DEFAULT_SERVICE: &str = "registry.docker.io";

/// Issuer Docker Hub puts in its token claims
pub const DEFAULT_ISSUER: &str = "auth.docker.io";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// One grant inside the `access` claim
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Claims carried in the middle segment of an issued token
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub exp: u64,
    #[serde(default)]
    pub access: Vec<AccessEntry>,
}

/// A freshly exchanged credential and the instant it stops being valid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    /// Expiry as unix seconds, taken verbatim from the `exp` claim
    pub expires_at: u64,
}

/// Source of scoped pull credentials
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, repository: &str) -> Result<IssuedToken>;
}

/// Pull scope requested for a repository
pub fn pull_scope(repository: &str) -> String {
    format!("repository:{}:pull", repository)
}

/// Decode the claims segment of a `header.claims.signature` token.
///
/// The segment is padded to a multiple of four before decoding; the URL-safe
/// alphabet is tried first and the standard alphabet second.
pub fn decode_claims(token: &str) -> Result<TokenClaims> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next()) {
        (Some(_), Some(payload)) if !payload.is_empty() => payload,
        _ => {
            return Err(MirrorError::TokenValidation(
                "Token does not contain a claims segment".to_string(),
            ));
        }
    };

    let trimmed = payload.trim_end_matches('=');
    let padding = (4 - trimmed.len() % 4) % 4;
    let padded = format!("{}{}", trimmed, "=".repeat(padding));

    let bytes = match URL_SAFE.decode(&padded) {
        Ok(bytes) => bytes,
        Err(_) => STANDARD.decode(&padded)?,
    };

    serde_json::from_slice(&bytes).map_err(|e| {
        MirrorError::TokenValidation(format!("Claims segment is not a claims object: {}", e))
    })
}

/// Reject claims from the wrong issuer or without any grant
pub fn validate_claims(claims: &TokenClaims, expected_issuer: &str) -> Result<()> {
    if claims.iss != expected_issuer {
        return Err(MirrorError::TokenValidation(format!(
            "Unexpected token issuer '{}', expected '{}'",
            claims.iss, expected_issuer
        )));
    }

    if claims.access.is_empty() {
        return Err(MirrorError::TokenValidation(
            "Token grants no access".to_string(),
        ));
    }

    Ok(())
}

/// Anonymous token exchange against a token endpoint over HTTP
#[derive(Debug, Clone)]
pub struct HttpTokenExchange {
    client: Client,
    auth_url: Url,
    service: String,
    issuer: String,
}

impl HttpTokenExchange {
    pub fn new(auth_url: &str, service: &str, issuer: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MirrorError::Config(format!("Failed to create auth client: {}", e)))?;

        Ok(Self {
            client,
            auth_url: Url::parse(auth_url)?,
            service: service.to_string(),
            issuer: issuer.to_string(),
        })
    }

    fn token_url(&self, repository: &str) -> Result<Url> {
        Ok(Url::parse_with_params(
            self.auth_url.as_str(),
            &[
                ("scope", pull_scope(repository)),
                ("service", self.service.clone()),
            ],
        )?)
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn exchange(&self, repository: &str) -> Result<IssuedToken> {
        let url = self.token_url(repository)?;
        tracing::debug!(repository = %repository, url = %url, "Requesting pull token");

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            tracing::warn!(
                repository = %repository,
                status = %status,
                "Token request failed"
            );
            return Err(HttpErrorHandler::handle_auth_error(status, &error_text));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            MirrorError::TokenValidation(format!("Failed to parse token response: {}", e))
        })?;

        let token = body.token.or(body.access_token).ok_or_else(|| {
            MirrorError::TokenValidation("Token response carries no token".to_string())
        })?;

        let claims = decode_claims(&token)?;
        validate_claims(&claims, &self.issuer)?;

        tracing::debug!(
            repository = %repository,
            expires_at = claims.exp,
            grants = claims.access.len(),
            "Pull token obtained"
        );

        Ok(IssuedToken {
            token,
            expires_at: claims.exp,
        })
    }
}
