//! mailroute - mountpoint and cross-account request routing for a groupware SOAP server
//!
//! A request names items by id. When an id points at another account's data,
//! either directly (`account:id`) or through a mountpoint in the caller's
//! mailbox, the request has to run on the server hosting that account. This
//! crate decides where each request goes, rewrites ids on the way out and on
//! the way back, and forwards over HTTP.
//!
//! # Architecture
//!
//! - **soap**: Element tree, path navigation, envelopes and faults
//! - **context**: Per-request identity and hop bookkeeping
//! - **directory** / **mailbox**: Account, server and item lookups
//! - **route**: Per-request routing rules (which path holds the id)
//! - **resolver**: Mountpoint resolution and loop detection
//! - **proxy**: Routing decisions and forwarding
//! - **rewrite**: Mapping remote ids back into the caller's namespace
//! - **partition**: Multi-item actions split by owning account
//! - **engine**: Handler registry and the proxy-then-handle pipeline
//! - **transport**: HTTP forwarding, peer token, reconnects
//! - **server**: axum SOAP endpoint
//! - **config**: YAML configuration and validation

pub mod config;
pub mod context;
pub mod directory;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod partition;
pub mod proxy;
pub mod resolver;
pub mod rewrite;
pub mod route;
pub mod server;
pub mod soap;
pub mod transport;

// Re-exports
pub use error::{Result, RouteError};
pub use itemid::{ItemId, ItemIdError};
