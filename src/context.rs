//! Per-request routing context
//!
//! Built once per inbound request from the SOAP `<context>` header and the
//! authenticated identity, then derived (never mutated) for each proxy hop.

use crate::soap::Element;
use crate::{Result, RouteError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace of the `<context>` SOAP header
pub const CONTEXT_NAMESPACE: &str = "urn:zimbra";

/// Hard limit on how many times one request may be forwarded
pub const MAX_HOP_COUNT: u32 = 5;

/// Wire format the client wants responses in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Xml,
    Js,
}

impl ResponseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Xml => "xml",
            ResponseFormat::Js => "js",
        }
    }

    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("js") {
            ResponseFormat::Js
        } else {
            ResponseFormat::Xml
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity, target account and hop bookkeeping for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Account that authenticated the request
    pub authenticated_account_id: String,

    /// Account whose data the request targets
    pub requested_account_id: String,

    /// Opaque token relayed verbatim to remote servers
    pub auth_token: Option<String>,

    /// Number of proxy hops taken so far
    pub hop_count: u32,

    /// Set once any hop has gone through a mountpoint
    pub mountpoint_traversed: bool,

    pub locale: Option<String>,
    pub format: ResponseFormat,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,

    /// Servers this request has passed through
    pub via: Vec<String>,
}

impl RequestContext {
    /// Context for a caller acting on its own mailbox
    pub fn new(account_id: impl Into<String>) -> Self {
        let account_id = account_id.into();
        Self {
            requested_account_id: account_id.clone(),
            authenticated_account_id: account_id,
            auth_token: None,
            hop_count: 0,
            mountpoint_traversed: false,
            locale: None,
            format: ResponseFormat::Xml,
            user_agent: None,
            request_id: None,
            via: Vec::new(),
        }
    }

    /// Context for `authenticated` acting on `requested`'s mailbox
    pub fn delegated(authenticated: impl Into<String>, requested: impl Into<String>) -> Self {
        let mut ctx = Self::new(authenticated);
        ctx.requested_account_id = requested.into();
        ctx
    }

    /// Whether the caller is acting on someone else's mailbox
    pub fn is_delegated(&self) -> bool {
        !self
            .authenticated_account_id
            .eq_ignore_ascii_case(&self.requested_account_id)
    }

    /// Derive the context for forwarding to `target_account`
    ///
    /// # Errors
    /// Returns `TooManyHops` once the hop count would exceed [`MAX_HOP_COUNT`].
    pub fn for_account(&self, target_account: &str, mountpoint: bool) -> Result<Self> {
        let hop_count = self.hop_count + 1;
        if hop_count > MAX_HOP_COUNT {
            return Err(RouteError::TooManyHops(hop_count));
        }

        let mut ctx = self.clone();
        ctx.requested_account_id = target_account.to_string();
        ctx.hop_count = hop_count;
        ctx.mountpoint_traversed = self.mountpoint_traversed || mountpoint;
        Ok(ctx)
    }

    /// Record that the request passed through `server`
    pub fn push_via(&mut self, server: &str) {
        self.via.push(server.to_string());
    }

    /// Forget what only a peer server may claim about earlier hops
    ///
    /// A client cannot have traversed a mountpoint or passed through another
    /// server, so on requests not authenticated as coming from a peer the
    /// `<mountpoint/>` flag and the `via` list are dropped. The hop count is
    /// kept; a client raising it only limits itself.
    pub fn clear_peer_claims(&mut self) {
        if self.mountpoint_traversed || !self.via.is_empty() {
            tracing::debug!(
                account = %self.authenticated_account_id,
                via = %self.via.join(","),
                "Ignoring hop claims from a non-peer caller"
            );
        }
        self.mountpoint_traversed = false;
        self.via.clear();
    }

    /// Read a context from the SOAP `<context>` header
    ///
    /// `authenticated` comes from the transport; without it the request is
    /// rejected. A missing `<account>` means the caller targets itself.
    pub fn from_header(header: Option<&Element>, authenticated: Option<&str>) -> Result<Self> {
        let authenticated = authenticated
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or(RouteError::AuthRequired)?;
        let mut ctx = Self::new(authenticated);

        let Some(header) = header else {
            return Ok(ctx);
        };

        if let Some(account) = header.child("account") {
            match account.attribute("by") {
                None | Some("id") => {}
                Some(other) => {
                    return Err(RouteError::InvalidRequest(format!(
                        "unsupported account selector: {}",
                        other
                    )))
                }
            }
            let requested = account.text().trim();
            if !requested.is_empty() {
                ctx.requested_account_id = requested.to_string();
            }
        }

        ctx.auth_token = text_of(header, "authToken");
        if let Some(hops) = text_of(header, "hops") {
            ctx.hop_count = hops
                .parse()
                .map_err(|_| RouteError::InvalidRequest(format!("invalid hop count: {}", hops)))?;
            if ctx.hop_count > MAX_HOP_COUNT {
                return Err(RouteError::TooManyHops(ctx.hop_count));
            }
        }
        ctx.mountpoint_traversed = header.child("mountpoint").is_some();
        ctx.locale = header
            .child("locale")
            .and_then(|l| l.attribute("id"))
            .map(String::from);
        ctx.format = header
            .child("format")
            .and_then(|f| f.attribute("type"))
            .map(ResponseFormat::parse)
            .unwrap_or_default();
        ctx.user_agent = header
            .child("userAgent")
            .and_then(|ua| ua.attribute("name"))
            .map(String::from);
        ctx.request_id = text_of(header, "requestId");
        ctx.via = text_of(header, "via")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(ctx)
    }

    /// Render as a `<context>` header for a forwarded request
    ///
    /// The authenticated account travels out of band, not in the header.
    pub fn to_header(&self) -> Element {
        let mut header = Element::new("context").with_attr("xmlns", CONTEXT_NAMESPACE);
        if let Some(token) = &self.auth_token {
            header.add_child(Element::new("authToken").with_text(token.as_str()));
        }
        header.add_child(
            Element::new("account")
                .with_attr("by", "id")
                .with_text(self.requested_account_id.as_str()),
        );
        header.add_child(Element::new("hops").with_text(self.hop_count.to_string()));
        if self.mountpoint_traversed {
            header.add_child(Element::new("mountpoint"));
        }
        if let Some(locale) = &self.locale {
            header.add_child(Element::new("locale").with_attr("id", locale.as_str()));
        }
        if self.format != ResponseFormat::Xml {
            header.add_child(Element::new("format").with_attr("type", self.format.as_str()));
        }
        if let Some(ua) = &self.user_agent {
            header.add_child(Element::new("userAgent").with_attr("name", ua.as_str()));
        }
        if let Some(id) = &self.request_id {
            header.add_child(Element::new("requestId").with_text(id.as_str()));
        }
        if !self.via.is_empty() {
            header.add_child(Element::new("via").with_text(self.via.join(",")));
        }
        header
    }
}

fn text_of(parent: &Element, name: &str) -> Option<String> {
    parent
        .child(name)
        .map(|e| e.text().trim().to_string())
        .filter(|t| !t.is_empty())
}
