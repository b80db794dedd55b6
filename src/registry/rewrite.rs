//! Authorization of outgoing upstream requests

use crate::error::Result;
use crate::proxy::RequestDecorator;
use crate::registry::token_manager::TokenManager;
use async_trait::async_trait;
use axum::http::HeaderValue;
use axum::http::header::AUTHORIZATION;
use std::sync::Arc;

/// Sets `Authorization: Bearer <token>` for one repository's pull scope
pub struct BearerAuth {
    repository: String,
    tokens: Arc<TokenManager>,
}

impl BearerAuth {
    pub fn new(repository: impl Into<String>, tokens: Arc<TokenManager>) -> Self {
        Self {
            repository: repository.into(),
            tokens,
        }
    }
}

#[async_trait]
impl RequestDecorator for BearerAuth {
    async fn decorate(&self, mut request: reqwest::Request) -> Result<reqwest::Request> {
        let token = self.tokens.get_token(&self.repository).await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(request)
    }
}
