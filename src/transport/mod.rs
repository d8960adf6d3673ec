//! Forwarding requests to the server that hosts an account
//!
//! [`Forwarder`] is the seam between routing decisions and the network.
//! [`HttpForwarder`] posts SOAP envelopes over reqwest.

pub mod http;
pub mod reconnect;

pub use http::HttpForwarder;
pub use reconnect::{send_reconnecting, ReconnectConfig, SendFailure};

use crate::context::RequestContext;
use crate::directory::Server;
use crate::soap::Element;
use crate::Result;
use async_trait::async_trait;

/// HTTP header naming the authenticated account on forwarded requests
pub const AUTH_ACCOUNT_HEADER: &str = "X-Auth-Account";

/// HTTP header carrying the shared secret of server-to-server hops
pub const PEER_TOKEN_HEADER: &str = "X-Peer-Token";

/// Sends a request to another server on behalf of a context
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Forward `request` to `server` and return the response body element
    ///
    /// # Errors
    /// `Transport` when the server cannot be reached, `RemoteFault` when it
    /// answers with a SOAP fault.
    async fn forward(
        &self,
        request: &Element,
        server: &Server,
        ctx: &RequestContext,
    ) -> Result<Element>;
}
