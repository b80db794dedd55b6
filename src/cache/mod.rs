//! URL-keyed blob cache on local disk
//!
//! Entries are keyed by the host, port and path of the location they were
//! fetched from. Query strings are left out of the key: content-distribution
//! URLs carry per-request signatures there while the path names the content.
//!
//! # Cache Structure
//!
//! `{root}/{key[..2]}/{key}` where `key` is the hex SHA-256 of the location.
//! Downloads land in a uniquely named `.part` file next to the entry and are
//! renamed into place once synced, so readers never observe partial files.
//! A `.part` file whose download fails or is cancelled is removed.

use crate::error::{MirrorError, Result};
use crate::logging::{format_duration, format_size};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Method, StatusCode, header};
use axum::response::Response;
use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;
use uuid::Uuid;

/// Serves content for a location, fetching and storing it on first use
#[async_trait]
pub trait BlobCache: Send + Sync {
    async fn fetch_or_serve(&self, request: &Parts, location: &Url) -> Result<Response>;
}

/// Disk-backed [`BlobCache`]
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
    client: Client,
}

impl FileCache {
    pub fn new(root: PathBuf, connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| MirrorError::Config(format!("Failed to create cache client: {}", e)))?;
        Self::with_client(root, client)
    }

    pub fn with_client(root: PathBuf, client: Client) -> Result<Self> {
        std::fs::create_dir_all(&root).map_err(|e| {
            MirrorError::cache(
                format!("Failed to create cache directory: {}", e),
                Some(root.clone()),
            )
        })?;

        Ok(Self { root, client })
    }

    /// Cache key of a location: hex SHA-256 over host, port and path
    pub fn cache_key(location: &Url) -> String {
        let mut hasher = Sha256::new();
        hasher.update(location.host_str().unwrap_or_default().as_bytes());
        if let Some(port) = location.port() {
            hasher.update(format!(":{}", port).as_bytes());
        }
        hasher.update(location.path().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn entry_path(&self, location: &Url) -> PathBuf {
        let key = Self::cache_key(location);
        self.root.join(&key[..2]).join(key)
    }

    /// Size of a complete entry, `None` when absent.
    ///
    /// Entries only appear through a rename after a finished download, so a
    /// zero-length entry is an empty blob rather than a partial one.
    pub async fn cached_size(&self, location: &Url) -> Option<u64> {
        match fs::metadata(self.entry_path(location)).await {
            Ok(metadata) if metadata.is_file() => Some(metadata.len()),
            _ => None,
        }
    }

    async fn download(&self, location: &Url, path: &Path) -> Result<u64> {
        let started = Instant::now();
        let response = self.client.get(location.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::Upstream(format!(
                "Fetching {} for the cache failed with status {}",
                location, status
            )));
        }

        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).await.map_err(|e| {
            MirrorError::cache(
                format!("Failed to create cache shard: {}", e),
                Some(dir.to_path_buf()),
            )
        })?;

        let part = PartFile::new(dir);
        let written = write_body(response, part.path()).await?;
        part.persist(path).await.map_err(|e| {
            MirrorError::cache(
                format!("Failed to move download into place: {}", e),
                Some(path.to_path_buf()),
            )
        })?;

        let elapsed = started.elapsed();
        tracing::info!(
            location = %location,
            size = %format_size(written),
            elapsed = %format_duration(elapsed),
            "Stored blob in cache"
        );
        Ok(written)
    }
}

/// In-progress download, deleted on drop unless persisted
struct PartFile {
    path: PathBuf,
    persisted: bool,
}

impl PartFile {
    fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(format!(".{}.part", Uuid::new_v4())),
            persisted: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(mut self, target: &Path) -> std::io::Result<()> {
        fs::rename(&self.path, target).await?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn write_body(response: reqwest::Response, part: &Path) -> Result<u64> {
    let mut file = fs::File::create(part).await.map_err(|e| {
        MirrorError::cache(
            format!("Failed to create cache file: {}", e),
            Some(part.to_path_buf()),
        )
    })?;

    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn serve_file(request: &Parts, path: &Path, size: u64) -> Result<Response> {
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, size);

    if request.method == Method::HEAD {
        return Ok(builder.body(Body::empty())?);
    }

    let file = fs::File::open(path).await.map_err(|e| {
        MirrorError::cache(
            format!("Failed to open cached blob: {}", e),
            Some(path.to_path_buf()),
        )
    })?;
    Ok(builder.body(Body::from_stream(ReaderStream::new(file)))?)
}

#[async_trait]
impl BlobCache for FileCache {
    async fn fetch_or_serve(&self, request: &Parts, location: &Url) -> Result<Response> {
        let path = self.entry_path(location);

        if let Some(size) = self.cached_size(location).await {
            tracing::info!(location = %location, size = %format_size(size), "Cache hit");
            return serve_file(request, &path, size).await;
        }

        tracing::info!(location = %location, "Cache miss, fetching");
        let size = self.download(location, &path).await?;
        serve_file(request, &path, size).await
    }
}
