//! Per-repository bearer token cache
//!
//! Tokens are cached by repository name until the expiry their claims carry.
//! The table is shared by every request task: reads take the read lock, a miss
//! exchanges a new token without holding any lock and then replaces the entry.
//! Concurrent misses for one repository may both exchange; the last write wins.

use crate::error::{MirrorError, Result};
use crate::registry::auth::{IssuedToken, TokenExchange};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall clock in unix seconds, injectable for tests
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: u64,
}

/// Thread-safe token cache that exchanges on miss or expiry
#[derive(Clone)]
pub struct TokenManager {
    exchange: Arc<dyn TokenExchange>,
    clock: Arc<dyn Clock>,
    tokens: Arc<RwLock<HashMap<String, CachedToken>>>,
    expiry_margin: u64,
}

impl TokenManager {
    pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
        Self {
            exchange,
            clock: Arc::new(SystemClock),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            expiry_margin: 0,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Treat tokens as stale this long before their claimed expiry
    pub fn with_expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin.as_secs();
        self
    }

    /// Get a valid token for `repository`, exchanging a new one if needed
    pub async fn get_token(&self, repository: &str) -> Result<String> {
        if let Some(token) = self.cached(repository)? {
            tracing::trace!(repository = %repository, "Using cached pull token");
            return Ok(token);
        }

        tracing::debug!(repository = %repository, "No fresh pull token cached, exchanging");
        let IssuedToken { token, expires_at } = self.exchange.exchange(repository).await?;

        let mut guard = self.tokens.write().map_err(|_| {
            MirrorError::Registry("Failed to acquire token write lock".to_string())
        })?;
        guard.insert(
            repository.to_string(),
            CachedToken {
                token: token.clone(),
                expires_at,
            },
        );

        Ok(token)
    }

    /// Number of entries in the table, fresh or stale
    pub fn len(&self) -> usize {
        self.tokens.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, repository: &str) -> Result<Option<String>> {
        let guard = self.tokens.read().map_err(|_| {
            MirrorError::Registry("Failed to acquire token read lock".to_string())
        })?;

        let now = self.clock.now().saturating_add(self.expiry_margin);
        Ok(guard
            .get(repository)
            .filter(|cached| cached.expires_at > now)
            .map(|cached| cached.token.clone()))
    }
}
