//! Configuration management module

use crate::error::{MirrorError, Result};
use crate::registry::auth::{DEFAULT_AUTH_URL, DEFAULT_ISSUER, DEFAULT_SERVICE};
use crate::registry::path::{DEFAULT_NAMESPACE, is_valid_repository_name};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Docker Hub registry endpoint
pub const DEFAULT_UPSTREAM_URL: &str = "https://registry-1.docker.io";

const ENV_PREFIX: &str = "REGISTRY_MIRROR_";

/// Mirror configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Socket address the mirror listens on
    pub listen: String,
    pub upstream_url: String,
    pub auth_url: String,
    /// Service name tokens are requested for
    pub service: String,
    /// Issuer expected in token claims
    pub issuer: String,
    /// Namespace applied to single-segment repository names
    pub namespace: String,
    pub cache_dir: String,
    /// Seconds allowed to establish upstream connections
    pub connect_timeout: u64,
    /// Seconds allowed between reads of an upstream body
    pub read_timeout: u64,
    /// Seconds allowed for a whole token exchange
    pub token_timeout: u64,
    /// Seconds before claimed expiry at which a cached token counts as stale
    pub token_expiry_margin: u64,
    pub verbose: bool,
    pub quiet: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".to_string(),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            service: DEFAULT_SERVICE.to_string(),
            issuer: DEFAULT_ISSUER.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            cache_dir: ".cache/registry-mirror".to_string(),
            connect_timeout: 10,
            read_timeout: 300,
            token_timeout: 30,
            token_expiry_margin: 0,
            verbose: false,
            quiet: false,
        }
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(MirrorError::Validation(format!(
            "Invalid {}: {}. Must start with http:// or https://",
            field, value
        )));
    }
    url::Url::parse(value)
        .map_err(|e| MirrorError::Validation(format!("Invalid {}: {}: {}", field, value, e)))?;
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name)).ok()
}

fn env_flag(name: &str) -> Option<bool> {
    env_var(name).map(|val| val.eq_ignore_ascii_case("true") || val == "1")
}

impl MirrorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(MirrorError::Validation(format!(
                "Invalid listen address: {}",
                self.listen
            )));
        }

        validate_url("upstream URL", &self.upstream_url)?;
        validate_url("auth URL", &self.auth_url)?;

        if self.service.is_empty() {
            return Err(MirrorError::Validation(
                "Service name cannot be empty".to_string(),
            ));
        }
        if self.issuer.is_empty() {
            return Err(MirrorError::Validation(
                "Token issuer cannot be empty".to_string(),
            ));
        }
        if !is_valid_repository_name(&self.namespace) || self.namespace.contains('/') {
            return Err(MirrorError::Validation(format!(
                "Invalid namespace: {}",
                self.namespace
            )));
        }
        if self.cache_dir.is_empty() {
            return Err(MirrorError::Validation(
                "Cache directory cannot be empty".to_string(),
            ));
        }
        if self.connect_timeout == 0 || self.read_timeout == 0 || self.token_timeout == 0 {
            return Err(MirrorError::Validation(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Create config from environment variables and defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_var("LISTEN") {
            config.listen = val;
        }
        if let Some(val) = env_var("UPSTREAM_URL") {
            config.upstream_url = val;
        }
        if let Some(val) = env_var("AUTH_URL") {
            config.auth_url = val;
        }
        if let Some(val) = env_var("SERVICE") {
            config.service = val;
        }
        if let Some(val) = env_var("ISSUER") {
            config.issuer = val;
        }
        if let Some(val) = env_var("NAMESPACE") {
            config.namespace = val;
        }
        if let Some(val) = env_var("CACHE_DIR") {
            config.cache_dir = val;
        }
        if let Some(Ok(secs)) = env_var("CONNECT_TIMEOUT").map(|v| v.parse()) {
            config.connect_timeout = secs;
        }
        if let Some(Ok(secs)) = env_var("READ_TIMEOUT").map(|v| v.parse()) {
            config.read_timeout = secs;
        }
        if let Some(Ok(secs)) = env_var("TOKEN_TIMEOUT").map(|v| v.parse()) {
            config.token_timeout = secs;
        }
        if let Some(Ok(secs)) = env_var("TOKEN_EXPIRY_MARGIN").map(|v| v.parse()) {
            config.token_expiry_margin = secs;
        }
        if let Some(verbose) = env_flag("VERBOSE") {
            config.verbose = verbose;
        }
        if let Some(quiet) = env_flag("QUIET") {
            config.quiet = quiet;
        }

        config
    }

    /// Merge with another config, preferring its non-default values
    pub fn merge(mut self, other: &MirrorConfig) -> Self {
        let default = MirrorConfig::default();

        if other.listen != default.listen {
            self.listen = other.listen.clone();
        }
        if other.upstream_url != default.upstream_url {
            self.upstream_url = other.upstream_url.clone();
        }
        if other.auth_url != default.auth_url {
            self.auth_url = other.auth_url.clone();
        }
        if other.service != default.service {
            self.service = other.service.clone();
        }
        if other.issuer != default.issuer {
            self.issuer = other.issuer.clone();
        }
        if other.namespace != default.namespace {
            self.namespace = other.namespace.clone();
        }
        if other.cache_dir != default.cache_dir {
            self.cache_dir = other.cache_dir.clone();
        }
        if other.connect_timeout != default.connect_timeout {
            self.connect_timeout = other.connect_timeout;
        }
        if other.read_timeout != default.read_timeout {
            self.read_timeout = other.read_timeout;
        }
        if other.token_timeout != default.token_timeout {
            self.token_timeout = other.token_timeout;
        }
        if other.token_expiry_margin != default.token_expiry_margin {
            self.token_expiry_margin = other.token_expiry_margin;
        }
        if other.verbose != default.verbose {
            self.verbose = other.verbose;
        }
        if other.quiet != default.quiet {
            self.quiet = other.quiet;
        }

        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout)
    }

    pub fn token_expiry_margin(&self) -> Duration {
        Duration::from_secs(self.token_expiry_margin)
    }
}
