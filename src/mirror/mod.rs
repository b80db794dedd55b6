//! Pull-through mirror orchestration
//!
//! [`Mirror::handle`] ties the pipeline together for one request:
//!
//! 1. interpret the path, answering non-API paths and the `/v2/` probe locally
//! 2. compute the upstream URL for the normalized repository
//! 3. forward with a bearer token for the repository's pull scope
//! 4. serve `307` blob redirects through the file cache

pub mod redirect;

pub use redirect::BlobRedirect;

use crate::cache::{BlobCache, FileCache};
use crate::cli::config::MirrorConfig;
use crate::error::handlers::{HttpErrorHandler, NOT_FOUND_BODY, UNPARSEABLE_BODY};
use crate::error::Result;
use crate::proxy::Forwarder;
use crate::registry::{
    ApiPath, BearerAuth, HttpTokenExchange, ParsedReference, PathError, PathInterpreter,
    TokenManager,
};
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Body of the API version probe
pub const API_ROOT_BODY: &str = "OK";

pub struct Mirror {
    upstream: Url,
    interpreter: PathInterpreter,
    tokens: Arc<TokenManager>,
    forwarder: Forwarder,
    cache: Arc<dyn BlobCache>,
}

impl Mirror {
    pub fn new(
        upstream: Url,
        interpreter: PathInterpreter,
        tokens: Arc<TokenManager>,
        forwarder: Forwarder,
        cache: Arc<dyn BlobCache>,
    ) -> Self {
        Self {
            upstream,
            interpreter,
            tokens,
            forwarder,
            cache,
        }
    }

    /// Wire up the HTTP token exchange, forwarder and file cache from config
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let upstream = Url::parse(&config.upstream_url)?;

        let exchange = HttpTokenExchange::new(
            &config.auth_url,
            &config.service,
            &config.issuer,
            config.token_timeout(),
        )?;
        let tokens = TokenManager::new(Arc::new(exchange))
            .with_expiry_margin(config.token_expiry_margin());

        let forwarder = Forwarder::new(config.connect_timeout(), config.read_timeout())?;
        let cache = FileCache::new(
            PathBuf::from(&config.cache_dir),
            config.connect_timeout(),
            config.read_timeout(),
        )?;

        Ok(Self::new(
            upstream,
            PathInterpreter::new(config.namespace.clone()),
            Arc::new(tokens),
            forwarder,
            Arc::new(cache),
        ))
    }

    /// Upstream URL for a parsed reference, keeping the client's query
    pub fn upstream_url(&self, parsed: &ParsedReference, query: Option<&str>) -> Result<Url> {
        let mut url = self.upstream.join(&parsed.upstream_path())?;
        url.set_query(query);
        Ok(url)
    }

    pub async fn handle(&self, request: Request) -> Response {
        let path = request.uri().path().to_string();

        let parsed = match self.interpreter.interpret(&path) {
            Ok(ApiPath::ApiRoot) => return (StatusCode::OK, API_ROOT_BODY).into_response(),
            Ok(ApiPath::Reference(parsed)) => parsed,
            Err(PathError::OutsideApi(_)) => return HttpErrorHandler::not_found(NOT_FOUND_BODY),
            Err(err) => {
                tracing::debug!(path = %path, error = %err, "Rejected registry path");
                return HttpErrorHandler::not_found(UNPARSEABLE_BODY);
            }
        };

        if request.method() != Method::GET && request.method() != Method::HEAD {
            return HttpErrorHandler::method_not_allowed();
        }

        match self.mirror(request, &path, parsed).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "Mirror request failed");
                err.into_response()
            }
        }
    }

    async fn mirror(
        &self,
        request: Request,
        path: &str,
        parsed: ParsedReference,
    ) -> Result<Response> {
        let target = self.upstream_url(&parsed, request.uri().query())?;
        tracing::info!(
            path = %path,
            repository = %parsed.repository,
            resource = %parsed.resource,
            reference = %parsed.reference,
            target = %target,
            "Mirroring request"
        );

        let auth = BearerAuth::new(parsed.repository, Arc::clone(&self.tokens));
        let redirect = BlobRedirect::new(Arc::clone(&self.cache));
        self.forwarder
            .forward(request, target, Some(&auth), Some(&redirect))
            .await
    }
}
