//! Docker Registry Mirror Library
//!
//! This file serves as the library root for the docker-registry-mirror crate.
//! Requests under `/v2/` are interpreted, authorized with a cached bearer token,
//! forwarded upstream, and blob redirects are served through a local file cache.

pub mod cache;
pub mod cli;
pub mod error;
pub mod logging;
pub mod mirror;
pub mod proxy;
pub mod registry;
pub mod server;

pub use cache::{BlobCache, FileCache};
pub use cli::config::MirrorConfig;
pub use error::{MirrorError, Result};
pub use mirror::Mirror;
pub use registry::{ParsedReference, Resource, TokenManager};
