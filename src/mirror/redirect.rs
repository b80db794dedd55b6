//! Blob redirect interception
//!
//! Docker Hub answers blob requests with `307 Temporary Redirect` pointing at
//! its content distribution network. The redirect is consumed here and the
//! content is served from the local cache instead, so clients never follow it.

use crate::cache::BlobCache;
use crate::error::{MirrorError, Result};
use crate::proxy::ResponseTransformer;
use async_trait::async_trait;
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::Response;
use std::sync::Arc;
use url::Url;

/// Resolve the `Location` of a redirect against the URL that produced it
pub fn redirect_location(target: &Url, response: &Response) -> Result<Url> {
    let location = response
        .headers()
        .get(header::LOCATION)
        .ok_or_else(|| {
            MirrorError::Upstream(format!("Redirect from {} carries no Location", target))
        })?
        .to_str()
        .map_err(|_| {
            MirrorError::Upstream(format!("Redirect from {} has an unreadable Location", target))
        })?;

    target.join(location).map_err(|e| {
        MirrorError::Upstream(format!(
            "Redirect from {} has an invalid Location {}: {}",
            target, location, e
        ))
    })
}

/// Serves `307` responses through a [`BlobCache`], passing others through
pub struct BlobRedirect {
    cache: Arc<dyn BlobCache>,
}

impl BlobRedirect {
    pub fn new(cache: Arc<dyn BlobCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ResponseTransformer for BlobRedirect {
    async fn transform(
        &self,
        request: &Parts,
        target: &Url,
        response: Response,
    ) -> Result<Response> {
        if response.status() != StatusCode::TEMPORARY_REDIRECT {
            return Ok(response);
        }

        let location = redirect_location(target, &response)?;
        tracing::info!(target = %target, location = %location, "Serving redirect through cache");
        self.cache.fetch_or_serve(request, &location).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCache {
        locations: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobCache for RecordingCache {
        async fn fetch_or_serve(&self, _request: &Parts, location: &Url) -> Result<Response> {
            self.locations.lock().unwrap().push(location.to_string());
            Ok(Response::new(Body::from("cached")))
        }
    }

    fn head() -> Parts {
        let (parts, _) = Request::builder()
            .method(Method::GET)
            .uri("/v2/library/alpine/blobs/sha256:abc")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    fn target() -> Url {
        Url::parse("https://registry.example/v2/library/alpine/blobs/sha256:abc").unwrap()
    }

    fn redirect(location: Option<&str>) -> Response {
        let mut builder = Response::builder().status(StatusCode::TEMPORARY_REDIRECT);
        if let Some(location) = location {
            builder = builder.header(header::LOCATION, location);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn redirects_are_served_from_cache() {
        let cache = Arc::new(RecordingCache::default());
        let hook = BlobRedirect::new(cache.clone());

        let response = hook
            .transform(
                &head(),
                &target(),
                redirect(Some("https://cdn.example/blobs/abc?sig=1")),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *cache.locations.lock().unwrap(),
            vec!["https://cdn.example/blobs/abc?sig=1".to_string()]
        );
    }

    #[tokio::test]
    async fn relative_locations_resolve_against_the_target() {
        let cache = Arc::new(RecordingCache::default());
        let hook = BlobRedirect::new(cache.clone());

        hook.transform(&head(), &target(), redirect(Some("/storage/abc")))
            .await
            .unwrap();

        assert_eq!(
            *cache.locations.lock().unwrap(),
            vec!["https://registry.example/storage/abc".to_string()]
        );
    }

    #[tokio::test]
    async fn other_statuses_pass_through() {
        let cache = Arc::new(RecordingCache::default());
        let hook = BlobRedirect::new(cache.clone());

        for status in [StatusCode::OK, StatusCode::FOUND, StatusCode::NOT_FOUND] {
            let response = Response::builder()
                .status(status)
                .header(header::LOCATION, "https://cdn.example/x")
                .body(Body::empty())
                .unwrap();
            let response = hook.transform(&head(), &target(), response).await.unwrap();
            assert_eq!(response.status(), status);
        }
        assert!(cache.locations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_location_is_an_upstream_error() {
        let hook = BlobRedirect::new(Arc::new(RecordingCache::default()));
        let result = hook.transform(&head(), &target(), redirect(None)).await;
        assert!(matches!(result, Err(MirrorError::Upstream(_))));
    }
}
