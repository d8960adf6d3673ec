//! Proxy dispatch
//!
//! Runs before any local handler. Decides from the request and its context
//! whether the work belongs to another account or, through a mountpoint, to
//! the owner of a shared folder, and if so prepares and performs the hop:
//!
//! 1. account level: the requested account is homed on another server
//! 2. item level: the routed id names another account's item, or a local
//!    mountpoint that is followed for this request type
//!
//! Everything that can be rejected locally (bad ids, unknown accounts,
//! loops, hop limit) is rejected before the forwarder is called.

use crate::context::RequestContext;
use crate::directory::{Account, Directory, Server};
use crate::resolver::MountpointResolver;
use crate::rewrite::rewrite_mountpoint_references;
use crate::route::RouteTable;
use crate::soap::{get_xpath, set_xpath, Element, XPath};
use crate::transport::Forwarder;
use crate::{Result, RouteError};
use itemid::ItemId;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Where a request has to be handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyDecision {
    /// Handle against the local mailbox
    Local,

    /// Forward to the server hosting the account
    ProxyToAccount(String),

    /// Forward to the owner of the folder a local mountpoint stands in for
    ProxyThroughMountpoint {
        account: String,
        mountpoint: ItemId,
        target: ItemId,
    },
}

impl fmt::Display for ProxyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyDecision::Local => write!(f, "local"),
            ProxyDecision::ProxyToAccount(account) => write!(f, "proxy to account {}", account),
            ProxyDecision::ProxyThroughMountpoint {
                account,
                mountpoint,
                target,
            } => write!(
                f,
                "proxy to account {} through mountpoint {} -> {}",
                account, mountpoint, target
            ),
        }
    }
}

/// Folder ids to map back once a mountpoint hop returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRewrite {
    pub path: XPath,
    pub mountpoint: ItemId,
    pub target: ItemId,
}

impl ResponseRewrite {
    pub fn apply(&self, response: &mut Element, ctx: &RequestContext) -> usize {
        rewrite_mountpoint_references(response, &self.path, &self.mountpoint, &self.target, ctx)
    }
}

/// A hop ready to be executed
#[derive(Debug, Clone)]
pub struct PreparedForward {
    /// Outgoing copy of the request, id field rewritten
    pub request: Element,

    /// Context scoped to the target account
    pub ctx: RequestContext,

    pub account: Account,
    pub server: Server,

    /// Set for mountpoint hops whose request type declares a response path
    pub rewrite: Option<ResponseRewrite>,
}

/// Result of the decision step, before any directory lookups
struct Evaluation {
    decision: ProxyDecision,
    /// Id field to rewrite and the owner-qualified id to put there
    id_rewrite: Option<(XPath, ItemId)>,
    response_path: Option<XPath>,
}

impl Evaluation {
    fn local() -> Self {
        Self {
            decision: ProxyDecision::Local,
            id_rewrite: None,
            response_path: None,
        }
    }
}

/// Routes requests to the server that owns their data
pub struct ProxyDispatcher {
    directory: Arc<dyn Directory>,
    resolver: MountpointResolver,
    forwarder: Arc<dyn Forwarder>,
    routes: Arc<RouteTable>,
    local_server: String,
}

impl ProxyDispatcher {
    pub fn new(
        directory: Arc<dyn Directory>,
        resolver: MountpointResolver,
        forwarder: Arc<dyn Forwarder>,
        routes: Arc<RouteTable>,
        local_server: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            resolver,
            forwarder,
            routes,
            local_server: local_server.into(),
        }
    }

    pub fn local_server(&self) -> &str {
        &self.local_server
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn resolver(&self) -> &MountpointResolver {
        &self.resolver
    }

    /// Whether `server` names this process
    pub fn is_local_server(&self, server: &str) -> bool {
        server.eq_ignore_ascii_case(&self.local_server)
    }

    /// Where `request` has to be handled, without side effects
    pub fn decide(&self, request: &Element, ctx: &RequestContext) -> Result<ProxyDecision> {
        Ok(self.evaluate(request, ctx)?.decision)
    }

    fn evaluate(&self, request: &Element, ctx: &RequestContext) -> Result<Evaluation> {
        let requested = &ctx.requested_account_id;

        if ctx.is_delegated()
            && !ctx.mountpoint_traversed
            && !self
                .directory
                .can_access(&ctx.authenticated_account_id, requested)
        {
            return Err(RouteError::PermissionDenied(format!(
                "{} cannot access account {}",
                ctx.authenticated_account_id, requested
            )));
        }

        let account = self
            .directory
            .account_by_id(requested)
            .ok_or_else(|| RouteError::NoSuchAccount(requested.clone()))?;
        if !account.is_on(&self.local_server) {
            return Ok(Evaluation {
                decision: ProxyDecision::ProxyToAccount(account.id),
                id_rewrite: None,
                response_path: None,
            });
        }

        let Some(route) = self.routes.for_request(request) else {
            return Ok(Evaluation::local());
        };
        let Some(id_path) = route.id_path(request) else {
            return Ok(Evaluation::local());
        };
        let Some(raw) = get_xpath(request, id_path) else {
            return Ok(Evaluation::local());
        };

        let requested_id = ItemId::parse(raw, requested)?;
        let check_mountpoint = route.check_mountpoint(request);
        let Some(target) =
            self.resolver
                .resolve_proxy_target(ctx, &requested_id, check_mountpoint)?
        else {
            return Ok(Evaluation::local());
        };

        let decision = if requested_id.belongs_to(requested) {
            ProxyDecision::ProxyThroughMountpoint {
                account: target.account_id().to_string(),
                mountpoint: requested_id,
                target: target.clone(),
            }
        } else {
            ProxyDecision::ProxyToAccount(target.account_id().to_string())
        };

        Ok(Evaluation {
            decision,
            id_rewrite: Some((id_path.clone(), target)),
            response_path: route.response_path.clone(),
        })
    }

    /// Prepare the hop for `request`, None when it is handled locally
    ///
    /// The returned server may be this one (the target account is local);
    /// the engine re-dispatches such hops without touching the network.
    pub fn plan(&self, request: &Element, ctx: &RequestContext) -> Result<Option<PreparedForward>> {
        let eval = self.evaluate(request, ctx)?;

        let (account_id, mountpoint) = match &eval.decision {
            ProxyDecision::Local => {
                debug!(request = request.local_name(), "Handling locally");
                return Ok(None);
            }
            ProxyDecision::ProxyToAccount(account) => (account.as_str(), None),
            ProxyDecision::ProxyThroughMountpoint {
                account,
                mountpoint,
                target,
            } => (account.as_str(), Some((mountpoint, target))),
        };

        let (account, server) = self.lookup(account_id)?;

        let mut outgoing = request.clone();
        if let Some((path, target)) = &eval.id_rewrite {
            set_xpath(&mut outgoing, path, &target.to_string())?;
        }

        let mut hop_ctx = ctx.for_account(&account.id, mountpoint.is_some())?;
        hop_ctx.push_via(&self.local_server);

        let rewrite = match (mountpoint, &eval.response_path) {
            (Some((mountpoint, target)), Some(path)) => Some(ResponseRewrite {
                path: path.clone(),
                mountpoint: mountpoint.clone(),
                target: target.clone(),
            }),
            _ => None,
        };

        info!(
            request = request.local_name(),
            decision = %eval.decision,
            server = %server.name,
            hops = hop_ctx.hop_count,
            "Proxying request"
        );

        Ok(Some(PreparedForward {
            request: outgoing,
            ctx: hop_ctx,
            account,
            server,
            rewrite,
        }))
    }

    /// Send a prepared hop and rewrite the response
    pub async fn execute(&self, prepared: &PreparedForward) -> Result<Element> {
        let mut response = self
            .forwarder
            .forward(&prepared.request, &prepared.server, &prepared.ctx)
            .await?;
        if let Some(rewrite) = &prepared.rewrite {
            rewrite.apply(&mut response, &prepared.ctx);
        }
        Ok(response)
    }

    /// Forward `request` if it belongs elsewhere
    ///
    /// Returns the (rewritten) remote response, or None to let the local
    /// handler run.
    pub async fn proxy_if_necessary(
        &self,
        request: &Element,
        ctx: &RequestContext,
    ) -> Result<Option<Element>> {
        match self.plan(request, ctx)? {
            Some(prepared) => Ok(Some(self.execute(&prepared).await?)),
            None => Ok(None),
        }
    }

    /// Forward an arbitrary request on behalf of `account_id`
    pub async fn proxy_request(
        &self,
        request: &Element,
        ctx: &RequestContext,
        account_id: &str,
        mountpoint: bool,
    ) -> Result<Element> {
        let (account, server) = self.lookup(account_id)?;
        let mut hop_ctx = ctx.for_account(&account.id, mountpoint)?;
        hop_ctx.push_via(&self.local_server);

        info!(
            request = request.local_name(),
            account = %account.id,
            server = %server.name,
            hops = hop_ctx.hop_count,
            "Proxying request to account"
        );
        self.forwarder.forward(request, &server, &hop_ctx).await
    }

    fn lookup(&self, account_id: &str) -> Result<(Account, Server)> {
        let account = self
            .directory
            .account_by_id(account_id)
            .ok_or_else(|| RouteError::NoSuchAccount(account_id.to_string()))?;
        let server = self
            .directory
            .server(&account.server)
            .ok_or_else(|| RouteError::NoSuchServer(account.server.clone()))?;
        Ok((account, server))
    }
}
