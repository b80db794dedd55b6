//! Command-line argument parsing

use crate::cli::config::{DEFAULT_UPSTREAM_URL, MirrorConfig};
use crate::registry::auth::{DEFAULT_AUTH_URL, DEFAULT_ISSUER, DEFAULT_SERVICE};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "docker-registry-mirror")]
#[command(about = "A pull-through mirror for Docker Hub image pulls")]
#[command(version, author)]
pub struct Args {
    /// Listen address
    #[arg(
        long = "listen",
        short = 'l',
        default_value = "0.0.0.0:5000",
        help = "Socket address to accept registry clients on"
    )]
    pub listen: String,

    /// Upstream registry
    #[arg(
        long = "upstream-url",
        short = 'u',
        default_value = DEFAULT_UPSTREAM_URL,
        help = "Registry the mirror pulls from"
    )]
    pub upstream_url: String,

    #[arg(
        long = "auth-url",
        default_value = DEFAULT_AUTH_URL,
        help = "Token endpoint for anonymous pull tokens"
    )]
    pub auth_url: String,

    #[arg(
        long = "service",
        default_value = DEFAULT_SERVICE,
        help = "Service name sent with token requests"
    )]
    pub service: String,

    #[arg(
        long = "issuer",
        default_value = DEFAULT_ISSUER,
        help = "Issuer a token must carry to be accepted"
    )]
    pub issuer: String,

    #[arg(
        long = "namespace",
        default_value = "library",
        help = "Namespace applied to single-segment image names"
    )]
    pub namespace: String,

    /// Blob cache directory
    #[arg(
        long = "cache-dir",
        short = 'c',
        default_value = ".cache/registry-mirror",
        help = "Directory redirected blobs are cached in"
    )]
    pub cache_dir: String,

    #[arg(
        long = "connect-timeout",
        default_value = "10",
        help = "Timeout for establishing upstream connections in seconds"
    )]
    pub connect_timeout: u64,

    #[arg(
        long = "read-timeout",
        short = 't',
        default_value = "300",
        help = "Timeout between upstream body reads in seconds"
    )]
    pub read_timeout: u64,

    #[arg(
        long = "token-timeout",
        default_value = "30",
        help = "Timeout for a whole token exchange in seconds"
    )]
    pub token_timeout: u64,

    #[arg(
        long = "token-expiry-margin",
        default_value = "0",
        help = "Seconds before expiry at which cached tokens are refreshed"
    )]
    pub token_expiry_margin: u64,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet mode
    #[arg(
        long = "quiet",
        short = 'q',
        help = "Only log warnings and errors",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Configuration expressed by the command line alone
    pub fn to_config(&self) -> MirrorConfig {
        MirrorConfig {
            listen: self.listen.clone(),
            upstream_url: self.upstream_url.clone(),
            auth_url: self.auth_url.clone(),
            service: self.service.clone(),
            issuer: self.issuer.clone(),
            namespace: self.namespace.clone(),
            cache_dir: self.cache_dir.clone(),
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            token_timeout: self.token_timeout,
            token_expiry_margin: self.token_expiry_margin,
            verbose: self.verbose,
            quiet: self.quiet,
        }
    }
}
