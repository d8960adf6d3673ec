//! Request pipeline
//!
//! For every request: find its handler, let the proxy dispatcher decide
//! where it runs, then either run the handler here or forward. A hop whose
//! target account also lives on this server is re-dispatched in process
//! with the hop's rewritten request and context.

use crate::config::RouterConfig;
use crate::context::RequestContext;
use crate::mailbox::{ItemKind, MailboxStore, MemoryMailbox};
use crate::partition::{ItemActionProxy, MailboxItemAction};
use crate::proxy::{ProxyDispatcher, ResponseRewrite};
use crate::resolver::MountpointResolver;
use crate::soap::Element;
use crate::transport::HttpForwarder;
use crate::{Result, RouteError};
use async_trait::async_trait;
use itemid::ItemId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Handles one request type against the local mailbox
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: &Element, ctx: &RequestContext) -> Result<Element>;
}

/// Answers `NoOpRequest`
pub struct NoOpHandler;

#[async_trait]
impl Handler for NoOpHandler {
    async fn handle(&self, _request: &Element, _ctx: &RequestContext) -> Result<Element> {
        Ok(Element::new("NoOpResponse"))
    }
}

/// Answers `GetItemRequest` from the mailbox store
pub struct GetItemHandler {
    mailbox: Arc<dyn MailboxStore>,
}

impl GetItemHandler {
    pub fn new(mailbox: Arc<dyn MailboxStore>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Handler for GetItemHandler {
    async fn handle(&self, request: &Element, ctx: &RequestContext) -> Result<Element> {
        let raw = request.require_child("item")?.require_attribute("id")?;
        let iid = ItemId::parse(raw, &ctx.requested_account_id)?;
        let item = self.mailbox.get_item(iid.account_id(), iid.id())?;

        let viewer = &ctx.authenticated_account_id;
        let parent = ItemId::new(iid.account_id(), item.folder_id);
        let tag = match &item.kind {
            ItemKind::Folder => "folder",
            ItemKind::Mountpoint { .. } => "link",
            ItemKind::Message => "m",
            ItemKind::Contact => "cn",
            ItemKind::Document => "doc",
            ItemKind::Other => "item",
        };

        let mut element = Element::new(tag)
            .with_attr("id", iid.to_string_relative(viewer))
            .with_attr("l", parent.to_string_relative(viewer));
        if !item.name.is_empty() {
            element.set_attribute("name", item.name.as_str());
        }
        if let ItemKind::Mountpoint {
            owner_id,
            remote_id,
        } = &item.kind
        {
            element.set_attribute("zid", owner_id.as_str());
            element.set_attribute("rid", remote_id.to_string());
        }

        Ok(Element::new("GetItemResponse").with_child(element))
    }
}

/// Request names handled by [`ItemActionProxy`]
pub const ITEM_ACTION_REQUESTS: &[&str] = &[
    "ItemActionRequest",
    "MsgActionRequest",
    "ConvActionRequest",
    "ContactActionRequest",
];

/// Per-request pipeline: proxy check, then local handler
pub struct Engine {
    dispatcher: Arc<ProxyDispatcher>,
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Engine {
    /// An engine with no handlers
    pub fn new(dispatcher: Arc<ProxyDispatcher>) -> Self {
        Self {
            dispatcher,
            handlers: HashMap::new(),
        }
    }

    /// An engine with the built-in handlers registered
    pub fn with_defaults(dispatcher: Arc<ProxyDispatcher>, mailbox: Arc<dyn MailboxStore>) -> Self {
        let mut engine = Self::new(dispatcher.clone());
        engine.register("NoOpRequest", Arc::new(NoOpHandler));
        engine.register("GetItemRequest", Arc::new(GetItemHandler::new(mailbox.clone())));

        let item_actions: Arc<dyn Handler> = Arc::new(ItemActionProxy::new(
            dispatcher,
            Arc::new(MailboxItemAction::new(mailbox)),
        ));
        for name in ITEM_ACTION_REQUESTS {
            engine.register(*name, item_actions.clone());
        }
        engine
    }

    /// Wire up an engine from configuration
    ///
    /// Mailboxes come from `config.mailboxes`; every account homed on this
    /// server gets one, even if it lists no items.
    pub fn from_config(config: &RouterConfig) -> Result<Self> {
        let mailbox = Arc::new(MemoryMailbox::from_items(&config.mailboxes)?);
        for account in &config.directory.accounts {
            if account.is_on(&config.server.name) {
                mailbox.create_mailbox(&account.id)?;
            }
        }

        let forwarder = HttpForwarder::new(config.proxy.timeout())?
            .with_reconnect(config.proxy.reconnect.clone())
            .with_peer_token(config.proxy.peer_token.clone());
        let dispatcher = Arc::new(ProxyDispatcher::new(
            Arc::new(config.directory.to_directory()),
            MountpointResolver::new(mailbox.clone()),
            Arc::new(forwarder),
            Arc::new(config.route_table()),
            config.server.name.as_str(),
        ));
        Ok(Self::with_defaults(dispatcher, mailbox))
    }

    /// Register (or replace) the handler for a request name
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn dispatcher(&self) -> &ProxyDispatcher {
        &self.dispatcher
    }

    /// Request names with a registered handler, sorted
    pub fn request_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Handle a request, proxying wherever the routing rules say
    ///
    /// A request whose `via` already names this server has come back around
    /// and fails with `ProxyLoop` before anything else runs.
    pub async fn handle(&self, request: Element, ctx: &RequestContext) -> Result<Element> {
        if let Some(seen) = ctx.via.iter().find(|s| self.dispatcher.is_local_server(s)) {
            return Err(RouteError::ProxyLoop(format!(
                "server {} (via {})",
                seen,
                ctx.via.join(",")
            )));
        }

        let mut request = request;
        let mut hop_ctx = ctx.clone();
        let mut rewrites: Vec<ResponseRewrite> = Vec::new();

        let mut response = loop {
            let name = request.local_name().to_string();
            let handler = self
                .handlers
                .get(&name)
                .cloned()
                .ok_or_else(|| RouteError::UnknownRequest(name.clone()))?;

            let Some(prepared) = self.dispatcher.plan(&request, &hop_ctx)? else {
                break handler.handle(&request, &hop_ctx).await?;
            };

            if !self.dispatcher.is_local_server(&prepared.server.name) {
                break self.dispatcher.execute(&prepared).await?;
            }

            debug!(
                request = %name,
                account = %prepared.ctx.requested_account_id,
                hops = prepared.ctx.hop_count,
                "Target is local, re-dispatching"
            );
            rewrites.extend(prepared.rewrite);
            request = prepared.request;
            hop_ctx = prepared.ctx;
        };

        for rewrite in rewrites.iter().rev() {
            rewrite.apply(&mut response, ctx);
        }
        Ok(response)
    }
}
