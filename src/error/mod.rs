//! Error types for the registry mirror

pub mod handlers;

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Error, Debug)]
pub enum MirrorError {
    /// Request path is not a well-formed registry API call
    #[error("Parse error: {0}")]
    Parse(String),

    /// Token endpoint refused or failed the exchange
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Token was issued but its claims do not hold up
    #[error("Token validation error: {0}")]
    TokenValidation(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Upstream answered with something we cannot relay
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Cache error: {message}")]
    Cache {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl MirrorError {
    pub fn cache(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        MirrorError::Cache {
            message: message.into(),
            path,
        }
    }

    /// True when the failure came from an elapsed client timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, MirrorError::Network(err) if err.is_timeout())
    }
}

impl From<url::ParseError> for MirrorError {
    fn from(err: url::ParseError) -> Self {
        MirrorError::Validation(err.to_string())
    }
}

impl From<base64::DecodeError> for MirrorError {
    fn from(err: base64::DecodeError) -> Self {
        MirrorError::TokenValidation(format!("Claims segment is not valid base64: {}", err))
    }
}

impl From<axum::http::header::InvalidHeaderValue> for MirrorError {
    fn from(err: axum::http::header::InvalidHeaderValue) -> Self {
        MirrorError::Http(format!("Invalid header value: {}", err))
    }
}

impl From<axum::http::Error> for MirrorError {
    fn from(err: axum::http::Error) -> Self {
        MirrorError::Http(err.to_string())
    }
}
