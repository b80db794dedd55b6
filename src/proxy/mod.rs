//! Forwarding of client requests to an upstream URL
//!
//! [`Forwarder::forward`] relays a request, streams the upstream response back
//! and lets callers hook in on both sides: a [`RequestDecorator`] adjusts the
//! outgoing request just before it is sent, and a [`ResponseTransformer`] may
//! replace the upstream response before it reaches the client.

use crate::error::{MirrorError, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, header};
use axum::response::Response;
use reqwest::Client;
use reqwest::redirect::Policy;
use std::time::Duration;
use url::Url;

/// Largest request body relayed upstream; pulls carry none
const MAX_FORWARD_BODY: usize = 1024 * 1024;

/// Pre-send hook run on the outgoing upstream request
#[async_trait]
pub trait RequestDecorator: Send + Sync {
    async fn decorate(&self, request: reqwest::Request) -> Result<reqwest::Request>;
}

/// Post-receive hook run on the upstream response
#[async_trait]
pub trait ResponseTransformer: Send + Sync {
    /// `request` is the client's original request head, `target` the URL the
    /// request was forwarded to.
    async fn transform(&self, request: &Parts, target: &Url, response: Response)
    -> Result<Response>;
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Headers that survive a hop, minus any name in `extra`
pub fn end_to_end_headers(headers: &HeaderMap, extra: &[HeaderName]) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || extra.contains(name) {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

/// Relay a streamed upstream response as an axum response
pub fn relay_response(upstream: reqwest::Response) -> Result<Response> {
    let mut builder = Response::builder().status(upstream.status());
    if let Some(headers) = builder.headers_mut() {
        headers.extend(end_to_end_headers(upstream.headers(), &[]));
    }
    Ok(builder.body(Body::from_stream(upstream.bytes_stream()))?)
}

/// HTTP forwarder with redirects disabled so hooks observe them
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
}

impl Forwarder {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| MirrorError::Config(format!("Failed to create forward client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn forward(
        &self,
        request: Request,
        target: Url,
        decorator: Option<&dyn RequestDecorator>,
        transformer: Option<&dyn ResponseTransformer>,
    ) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, MAX_FORWARD_BODY)
            .await
            .map_err(|e| MirrorError::Http(format!("Failed to read request body: {}", e)))?;

        let headers = end_to_end_headers(&parts.headers, &[header::HOST, header::CONTENT_LENGTH]);
        let mut builder = self
            .client
            .request(parts.method.clone(), target.clone())
            .headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let mut outgoing = builder.build()?;
        if let Some(decorator) = decorator {
            outgoing = decorator.decorate(outgoing).await?;
        }

        let upstream = self.client.execute(outgoing).await?;
        tracing::debug!(
            method = %parts.method,
            target = %target,
            status = %upstream.status(),
            "Upstream responded"
        );

        let response = relay_response(upstream)?;
        match transformer {
            Some(transformer) => transformer.transform(&parts, &target, response).await,
            None => Ok(response),
        }
    }
}
