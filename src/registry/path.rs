//! Registry API path interpretation
//!
//! Turns an incoming request path into the repository, resource kind and
//! reference it addresses, following the distribution naming grammar:
//! <https://github.com/opencontainers/distribution-spec/blob/main/spec.md>

use crate::error::MirrorError;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Fixed prefix every registry API call starts with
pub const API_PREFIX: &str = "/v2/";

/// Namespace Docker Hub applies to single-segment image names
pub const DEFAULT_NAMESPACE: &str = "library";

const NAME_COMPONENT: &str = r"[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*";
const TAG: &str = r"[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}";
const DIGEST: &str = r"[a-z0-9]+(?:[+._-][a-z0-9]+)*:[a-zA-Z0-9=_-]+";

static REPOSITORY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^{c}(?:/{c})*$", c = NAME_COMPONENT))
        .expect("repository grammar is a valid regex")
});

static API_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^/v2/(?P<name>{c}(?:/{c})*)/(?P<resource>[a-zA-Z]+)/(?P<reference>{tag}|{digest})$",
        c = NAME_COMPONENT,
        tag = TAG,
        digest = DIGEST,
    ))
    .expect("api path grammar is a valid regex")
});

/// Kind of registry resource a request addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Manifest,
    Blob,
    Tag,
}

impl Resource {
    /// Path segment used by the registry API
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Manifest => "manifests",
            Resource::Blob => "blobs",
            Resource::Tag => "tags",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = PathError;

    fn from_str(segment: &str) -> Result<Self, Self::Err> {
        match segment {
            "manifests" => Ok(Resource::Manifest),
            "blobs" => Ok(Resource::Blob),
            "tags" => Ok(Resource::Tag),
            other => Err(PathError::UnsupportedResource(other.to_string())),
        }
    }
}

/// Repository, resource and reference extracted from a registry API path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    pub repository: String,
    pub resource: Resource,
    pub reference: String,
}

impl ParsedReference {
    /// Path of the same resource on the upstream registry
    pub fn upstream_path(&self) -> String {
        format!(
            "/v2/{}/{}/{}",
            self.repository, self.resource, self.reference
        )
    }
}

/// Successful interpretation of a path under the API prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiPath {
    /// `/v2/` itself, the API version probe
    ApiRoot,
    Reference(ParsedReference),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is not under the registry API prefix: {0}")]
    OutsideApi(String),

    #[error("path does not match the registry API grammar: {0}")]
    Unparseable(String),

    #[error("unsupported registry resource kind: {0}")]
    UnsupportedResource(String),
}

impl From<PathError> for MirrorError {
    fn from(err: PathError) -> Self {
        MirrorError::Parse(err.to_string())
    }
}

/// Prefix single-segment names with the implicit namespace.
///
/// Names that already contain a `/` are returned unchanged, so applying this
/// twice yields the same result as applying it once.
pub fn normalize_repository(name: &str, namespace: &str) -> String {
    if name.contains('/') {
        name.to_string()
    } else {
        format!("{}/{}", namespace, name)
    }
}

/// Whether `name` is a complete repository name under the naming grammar
pub fn is_valid_repository_name(name: &str) -> bool {
    REPOSITORY_NAME.is_match(name)
}

/// Interprets request paths against the registry API grammar
#[derive(Debug, Clone)]
pub struct PathInterpreter {
    namespace: String,
}

impl Default for PathInterpreter {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl PathInterpreter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn interpret(&self, path: &str) -> Result<ApiPath, PathError> {
        if !path.starts_with(API_PREFIX) {
            return Err(PathError::OutsideApi(path.to_string()));
        }

        if path == API_PREFIX {
            return Ok(ApiPath::ApiRoot);
        }

        let captures = API_PATH
            .captures(path)
            .ok_or_else(|| PathError::Unparseable(path.to_string()))?;

        // Groups are non-optional in the pattern, so a match always carries all three
        let (name, resource, reference) = match (
            captures.name("name"),
            captures.name("resource"),
            captures.name("reference"),
        ) {
            (Some(name), Some(resource), Some(reference)) => {
                (name.as_str(), resource.as_str(), reference.as_str())
            }
            _ => return Err(PathError::Unparseable(path.to_string())),
        };

        let resource = resource.parse::<Resource>()?;

        Ok(ApiPath::Reference(ParsedReference {
            repository: normalize_repository(name, &self.namespace),
            resource,
            reference: reference.to_string(),
        }))
    }
}
