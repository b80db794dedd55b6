//! Runner that wires configuration, logging and the server together

use crate::cli::args::Args;
use crate::cli::config::MirrorConfig;
use crate::error::{MirrorError, Result};
use crate::logging;
use crate::mirror::Mirror;
use crate::server;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct Runner {
    config: MirrorConfig,
}

impl Runner {
    /// Environment settings overridden by explicit command-line values
    pub fn new(args: Args) -> Result<Self> {
        let config = MirrorConfig::from_env().merge(&args.to_config());
        config.validate()?;
        Ok(Self { config })
    }

    pub async fn run(&self) -> Result<()> {
        logging::init(self.config.verbose, self.config.quiet);

        tracing::info!(
            upstream = %self.config.upstream_url,
            auth = %self.config.auth_url,
            cache_dir = %self.config.cache_dir,
            "Starting registry mirror"
        );

        let mirror = Arc::new(Mirror::from_config(&self.config)?);
        let listener = TcpListener::bind(&self.config.listen).await.map_err(|e| {
            MirrorError::Config(format!("Failed to bind {}: {}", self.config.listen, e))
        })?;

        server::serve(
            listener,
            server::build_router(mirror),
            server::shutdown_signal(),
        )
        .await
    }
}
