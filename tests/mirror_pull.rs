//! End-to-end pulls through a running mirror against mocked upstream services

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use docker_registry_mirror::server::{build_router, serve};
use docker_registry_mirror::{Mirror, MirrorConfig};
use reqwest::{Method, Response, StatusCode, header};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use tokio::net::TcpListener;
use wiremock::matchers::{header as header_eq, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIGEST: &str = "sha256:4c0fdd3a7f0bb0a2d8c4a1d7e6f3b2a19087c6d5e4f3a2b1c0d9e8f7a6b5c4d3";

struct Fixture {
    registry: MockServer,
    auth: MockServer,
    cdn: MockServer,
    base: String,
    client: reqwest::Client,
    cache: TempDir,
}

impl Fixture {
    async fn start() -> Self {
        let registry = MockServer::start().await;
        let auth = MockServer::start().await;
        let cdn = MockServer::start().await;
        let cache = tempfile::tempdir().unwrap();

        let config = MirrorConfig {
            listen: "127.0.0.1:0".to_string(),
            upstream_url: registry.uri(),
            auth_url: format!("{}/token", auth.uri()),
            cache_dir: cache.path().to_string_lossy().into_owned(),
            ..MirrorConfig::default()
        };
        config.validate().unwrap();

        let mirror = Arc::new(Mirror::from_config(&config).unwrap());
        let listener = TcpListener::bind(&config.listen).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve(listener, build_router(mirror), std::future::pending()));

        // Redirects stay visible to assertions
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        Self {
            registry,
            auth,
            cdn,
            base,
            client,
            cache,
        }
    }

    async fn send(&self, method: Method, uri: &str) -> Response {
        self.client
            .request(method, format!("{}{}", self.base, uri))
            .header(header::ACCEPT, "application/vnd.docker.distribution.manifest.v2+json")
            .send()
            .await
            .unwrap()
    }

    fn cached_files(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, files: &mut Vec<PathBuf>) {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path, files);
                } else {
                    files.push(path);
                }
            }
        }

        let mut files = Vec::new();
        walk(self.cache.path(), &mut files);
        files
    }

    async fn upstream_calls(&self) -> usize {
        self.registry.received_requests().await.unwrap().len()
            + self.auth.received_requests().await.unwrap().len()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn pull_token(issuer: &str, repository: &str, exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let claims = json!({
        "iss": issuer,
        "exp": exp,
        "access": [{"type": "repository", "name": repository, "actions": ["pull"]}],
    });
    let claims = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, claims)
}

async fn mount_token(auth: &MockServer, repository: &str, token: &str, calls: u64) {
    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("scope", format!("repository:{}:pull", repository)))
        .and(query_param("service", "registry.docker.io"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })))
        .expect(calls)
        .mount(auth)
        .await;
}

async fn body_text(response: Response) -> String {
    response.text().await.unwrap()
}

#[tokio::test]
async fn non_api_paths_are_answered_locally() {
    let fixture = Fixture::start().await;

    let response = fixture.send(Method::GET, "/").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(response).await, "Not Found");

    let response = fixture.send(Method::GET, "/v2/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "OK");

    let response = fixture
        .send(Method::GET, "/v2/library/alpine/uploads/abc")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(response).await, "404 Not Found");

    assert_eq!(fixture.upstream_calls().await, 0);
}

#[tokio::test]
async fn manifest_pull_is_authorized_and_token_is_reused() {
    let fixture = Fixture::start().await;
    let token = pull_token("auth.docker.io", "library/alpine", unix_now() + 300);
    mount_token(&fixture.auth, "library/alpine", &token, 1).await;

    let manifest = json!({"schemaVersion": 2, "layers": []}).to_string();
    Mock::given(method("GET"))
        .and(path("/v2/library/alpine/manifests/3.12"))
        .and(header_eq("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "content-type",
                    "application/vnd.docker.distribution.manifest.v2+json",
                )
                .insert_header("docker-content-digest", DIGEST)
                .set_body_string(manifest.clone()),
        )
        .expect(2)
        .mount(&fixture.registry)
        .await;

    for uri in ["/v2/alpine/manifests/3.12", "/v2/library/alpine/manifests/3.12"] {
        let response = fixture.send(Method::GET, uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("docker-content-digest").unwrap(),
            DIGEST
        );
        assert_eq!(body_text(response).await, manifest);
    }
}

#[tokio::test]
async fn upstream_errors_are_relayed_unchanged() {
    let fixture = Fixture::start().await;
    let token = pull_token("auth.docker.io", "library/missing", unix_now() + 300);
    mount_token(&fixture.auth, "library/missing", &token, 1).await;

    let body = json!({"errors": [{"code": "MANIFEST_UNKNOWN", "message": "manifest unknown"}]});
    Mock::given(method("GET"))
        .and(path("/v2/library/missing/manifests/latest"))
        .respond_with(ResponseTemplate::new(404).set_body_json(body.clone()))
        .mount(&fixture.registry)
        .await;

    let response = fixture.send(Method::GET, "/v2/missing/manifests/latest").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let relayed: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(relayed, body);
}

#[tokio::test]
async fn blob_redirects_are_served_from_the_cache() {
    let fixture = Fixture::start().await;
    let token = pull_token("auth.docker.io", "library/alpine", unix_now() + 300);
    mount_token(&fixture.auth, "library/alpine", &token, 1).await;

    let blob_path = format!("/v2/library/alpine/blobs/{}", DIGEST);
    Mock::given(method("GET"))
        .and(path(blob_path.as_str()))
        .respond_with(ResponseTemplate::new(307).insert_header(
            "location",
            format!("{}/registry-v2/blobs/4c0f/data?expires=1&signature=x", fixture.cdn.uri())
                .as_str(),
        ))
        .expect(2)
        .mount(&fixture.registry)
        .await;

    Mock::given(method("GET"))
        .and(path("/registry-v2/blobs/4c0f/data"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"layer-bytes".to_vec()))
        .expect(1)
        .mount(&fixture.cdn)
        .await;

    for _ in 0..2 {
        let response = fixture.send(Method::GET, &blob_path).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::LOCATION).is_none());
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            "11"
        );
        assert_eq!(body_text(response).await, "layer-bytes");
    }
}

#[tokio::test]
async fn head_blob_pull_returns_length_without_body() {
    let fixture = Fixture::start().await;
    let token = pull_token("auth.docker.io", "library/alpine", unix_now() + 300);
    mount_token(&fixture.auth, "library/alpine", &token, 1).await;

    Mock::given(method("HEAD"))
        .and(path(format!("/v2/library/alpine/blobs/{}", DIGEST).as_str()))
        .respond_with(ResponseTemplate::new(307).insert_header(
            "location",
            format!("{}/registry-v2/blobs/4c0f/data?signature=y", fixture.cdn.uri()).as_str(),
        ))
        .expect(1)
        .mount(&fixture.registry)
        .await;

    Mock::given(method("GET"))
        .and(path("/registry-v2/blobs/4c0f/data"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"layer-bytes".to_vec()))
        .expect(1)
        .mount(&fixture.cdn)
        .await;

    let response = fixture
        .send(Method::HEAD, &format!("/v2/alpine/blobs/{}", DIGEST))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_LENGTH).unwrap(),
        "11"
    );
    assert!(body_text(response).await.is_empty());
    assert_eq!(fixture.cached_files().len(), 1);
}

#[tokio::test]
async fn failed_cdn_fetch_is_a_bad_gateway_and_caches_nothing() {
    let fixture = Fixture::start().await;
    let token = pull_token("auth.docker.io", "library/alpine", unix_now() + 300);
    mount_token(&fixture.auth, "library/alpine", &token, 1).await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/library/alpine/blobs/{}", DIGEST).as_str()))
        .respond_with(ResponseTemplate::new(307).insert_header(
            "location",
            format!("{}/registry-v2/blobs/4c0f/data", fixture.cdn.uri()).as_str(),
        ))
        .expect(2)
        .mount(&fixture.registry)
        .await;

    Mock::given(method("GET"))
        .and(path("/registry-v2/blobs/4c0f/data"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&fixture.cdn)
        .await;

    Mock::given(method("GET"))
        .and(path("/registry-v2/blobs/4c0f/data"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&fixture.cdn)
        .await;

    for _ in 0..2 {
        let response = fixture
            .send(Method::GET, &format!("/v2/alpine/blobs/{}", DIGEST))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(fixture.cached_files().is_empty());
    }
}

#[tokio::test]
async fn redirect_without_location_is_a_bad_gateway() {
    let fixture = Fixture::start().await;
    let token = pull_token("auth.docker.io", "library/alpine", unix_now() + 300);
    mount_token(&fixture.auth, "library/alpine", &token, 1).await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/library/alpine/blobs/{}", DIGEST).as_str()))
        .respond_with(ResponseTemplate::new(307))
        .mount(&fixture.registry)
        .await;

    let response = fixture
        .send(Method::GET, &format!("/v2/alpine/blobs/{}", DIGEST))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn foreign_issuer_is_rejected_before_forwarding() {
    let fixture = Fixture::start().await;
    let token = pull_token("evil.example", "library/alpine", unix_now() + 300);
    mount_token(&fixture.auth, "library/alpine", &token, 1).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fixture.registry)
        .await;

    let response = fixture.send(Method::GET, "/v2/alpine/manifests/latest").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["errors"][0]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn token_endpoint_failure_is_a_bad_gateway() {
    let fixture = Fixture::start().await;

    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&fixture.auth)
        .await;

    let response = fixture.send(Method::GET, "/v2/alpine/tags/list").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(fixture.registry.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn only_pull_methods_are_forwarded() {
    let fixture = Fixture::start().await;

    let response = fixture.send(Method::PUT, "/v2/alpine/manifests/latest").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get(header::ALLOW).unwrap(), "GET, HEAD");
    assert_eq!(fixture.upstream_calls().await, 0);
}
