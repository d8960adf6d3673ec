//! Configuration system
//!
//! Loads ~/.config/mailroute/config.yaml with support for:
//! - This server's name and listen address
//! - The account/server directory
//! - Mailboxes hosted by this server (demo and test deployments)
//! - Forwarding timeout, reconnects and the peer token
//! - Route table overrides

mod router_config;
pub mod validation;

pub use router_config::{DirectoryConfig, ProxyConfig, RouterConfig, ServerConfig};
pub use validation::{validate_config, validate_config_result, ValidationError};
