//! Standardized mapping between HTTP statuses and mirror errors

use crate::error::MirrorError;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Body returned for requests outside the registry API
pub const NOT_FOUND_BODY: &str = "Not Found";

/// Body returned for `/v2/` paths that are not a registry call we serve
pub const UNPARSEABLE_BODY: &str = "404 Not Found";

/// Registry-style error envelope: `{"errors":[{"code":..,"message":..}]}`
#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Standard error handler for HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Handle authentication-related HTTP errors from the token endpoint
    pub fn handle_auth_error(status: StatusCode, error_text: &str) -> MirrorError {
        let error_msg = match status.as_u16() {
            400 => "Invalid token request parameters".to_string(),
            401 => "Token endpoint rejected anonymous access".to_string(),
            403 => "Access denied - insufficient permissions".to_string(),
            404 => "Authentication endpoint not found".to_string(),
            429 => format!("Rate limited by token endpoint: {}", error_text),
            500..=599 => format!("Token endpoint unavailable (status {}): {}", status, error_text),
            _ => format!("Authentication failed (status {}): {}", status, error_text),
        };

        MirrorError::Auth(error_msg)
    }

    /// Status code surfaced to the client for a given failure
    pub fn status_for(error: &MirrorError) -> StatusCode {
        if error.is_timeout() {
            return StatusCode::GATEWAY_TIMEOUT;
        }

        match error {
            MirrorError::Parse(_) => StatusCode::NOT_FOUND,
            MirrorError::Auth(_) | MirrorError::TokenValidation(_) => StatusCode::BAD_GATEWAY,
            MirrorError::Network(_) | MirrorError::Upstream(_) => StatusCode::BAD_GATEWAY,
            MirrorError::Cache { .. }
            | MirrorError::Io(_)
            | MirrorError::Registry(_)
            | MirrorError::Http(_)
            | MirrorError::Config(_)
            | MirrorError::Validation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(error: &MirrorError) -> &'static str {
        match error {
            MirrorError::Parse(_) => "NAME_UNKNOWN",
            MirrorError::Auth(_) | MirrorError::TokenValidation(_) => "UNAUTHORIZED",
            MirrorError::Network(_) | MirrorError::Upstream(_) => "UNAVAILABLE",
            _ => "UNKNOWN",
        }
    }

    /// Plain-text 404 with a fixed body
    pub fn not_found(body: &'static str) -> Response {
        (StatusCode::NOT_FOUND, body).into_response()
    }

    pub fn method_not_allowed() -> Response {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
            "Method Not Allowed",
        )
            .into_response()
    }

    /// Convert a pipeline failure into a registry-style error response
    pub fn into_response(error: MirrorError) -> Response {
        let status = Self::status_for(&error);
        if status == StatusCode::NOT_FOUND {
            return Self::not_found(UNPARSEABLE_BODY);
        }

        let envelope = ErrorEnvelope {
            errors: vec![ErrorDetail {
                code: Self::error_code(&error),
                message: error.to_string(),
            }],
        };

        match serde_json::to_string(&envelope) {
            Ok(body) => (status, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
            Err(_) => (status, error.to_string()).into_response(),
        }
    }
}

impl IntoResponse for MirrorError {
    fn into_response(self) -> Response {
        HttpErrorHandler::into_response(self)
    }
}
