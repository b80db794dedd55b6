//! Command line interface module
//!
//! Argument parsing, environment-backed configuration and the runner that
//! starts the mirror.

pub mod args;
pub mod config;
pub mod runner;

pub use args::Args;
pub use config::MirrorConfig;
pub use runner::Runner;
