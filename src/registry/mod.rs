//! Registry module for Docker registry interactions
//!
//! Path interpretation for the Registry HTTP API v2, the anonymous pull token
//! exchange, the per-repository token cache and the request rewriter that
//! attaches tokens to upstream calls.

pub mod auth;
pub mod path;
pub mod rewrite;
pub mod token_manager;

pub use auth::{HttpTokenExchange, IssuedToken, TokenClaims, TokenExchange};
pub use path::{ApiPath, ParsedReference, PathError, PathInterpreter, Resource};
pub use rewrite::BearerAuth;
pub use token_manager::{Clock, SystemClock, TokenManager};
