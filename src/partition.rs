//! Multi-item actions spanning several mailboxes
//!
//! An action like `<action op="move" id="300,acct-b:55,301,acct-c:7"/>` may
//! name items from several accounts. The ids are split into one local batch
//! and one batch per remote account; the local batch runs here, each remote
//! batch is forwarded to its owner, and the completed ids are merged local
//! first, then remote accounts in the order they first appear.

use crate::context::RequestContext;
use crate::engine::Handler;
use crate::mailbox::MailboxStore;
use crate::proxy::ProxyDispatcher;
use crate::soap::Element;
use crate::{Result, RouteError};
use async_trait::async_trait;
use itemid::ItemId;
use std::sync::Arc;
use tracing::{debug, warn};

/// Attribute on `<action>` listing ids that did not exist
pub const NON_EXISTENT_IDS: &str = "nei";

/// Attribute on `<action>` listing ids created by the action (copies)
pub const NEWLY_CREATED_IDS: &str = "nci";

/// Ids split by owning account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionedItems {
    /// Ids in the requested account's mailbox, in request order
    pub local: Vec<ItemId>,

    /// Other accounts' ids, grouped by account in first-encounter order
    pub remote: Vec<(String, Vec<ItemId>)>,
}

impl PartitionedItems {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }
}

/// Split a comma-separated id list by owning account
pub fn partition_items(ids_csv: &str, ctx: &RequestContext) -> Result<PartitionedItems> {
    let mut parts = PartitionedItems::default();
    if ids_csv.trim().is_empty() {
        return Ok(parts);
    }

    for raw in ids_csv.split(',') {
        let iid = ItemId::parse(raw, &ctx.requested_account_id)?;
        if iid.belongs_to(&ctx.requested_account_id) {
            parts.local.push(iid);
            continue;
        }
        match parts
            .remote
            .iter_mut()
            .find(|(account, _)| iid.belongs_to(account))
        {
            Some((_, ids)) => ids.push(iid),
            None => parts.remote.push((iid.account_id().to_string(), vec![iid])),
        }
    }
    Ok(parts)
}

/// Outcome of an item action, ids formatted for the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemActionResult {
    pub op: String,
    pub success_ids: Vec<String>,
    pub non_existent_ids: Vec<String>,
    pub newly_created_ids: Vec<String>,
}

impl ItemActionResult {
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            ..Default::default()
        }
    }

    /// Append another batch's ids after ours
    pub fn append(&mut self, other: ItemActionResult) {
        self.success_ids.extend(other.success_ids);
        self.non_existent_ids.extend(other.non_existent_ids);
        self.newly_created_ids.extend(other.newly_created_ids);
    }

    /// Append the ids reported in a forwarded response's `<action>`
    ///
    /// Returns false when the response has no `<action id>` to read.
    fn append_remote(&mut self, response: &Element) -> bool {
        let Some(action) = response.child("action") else {
            return false;
        };
        let Some(ids) = action.attribute("id") else {
            return false;
        };
        self.success_ids.extend(split_ids(ids));
        if let Some(nei) = action.attribute(NON_EXISTENT_IDS) {
            self.non_existent_ids.extend(split_ids(nei));
        }
        if let Some(nci) = action.attribute(NEWLY_CREATED_IDS) {
            self.newly_created_ids.extend(split_ids(nci));
        }
        true
    }

    /// Render as `<{name}><action op=".." id=".."/></{name}>`
    pub fn to_response(&self, name: &str) -> Element {
        let mut action = Element::new("action")
            .with_attr("op", self.op.as_str())
            .with_attr("id", self.success_ids.join(","));
        if !self.non_existent_ids.is_empty() {
            action.set_attribute(NON_EXISTENT_IDS, self.non_existent_ids.join(","));
        }
        if !self.newly_created_ids.is_empty() {
            action.set_attribute(NEWLY_CREATED_IDS, self.newly_created_ids.join(","));
        }
        Element::new(name).with_child(action)
    }
}

fn split_ids(csv: &str) -> impl Iterator<Item = String> + '_ {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Performs an action on items of the requested account's local mailbox
pub trait LocalItemAction: Send + Sync {
    fn apply(
        &self,
        op: &str,
        ids: &[ItemId],
        action: &Element,
        ctx: &RequestContext,
    ) -> Result<ItemActionResult>;
}

/// Local action that confirms each item exists and reports it done
///
/// Stands in for the mailbox engine's real operations, which are out of
/// scope here; missing items are reported as non-existent.
pub struct MailboxItemAction {
    mailbox: Arc<dyn MailboxStore>,
}

impl MailboxItemAction {
    pub fn new(mailbox: Arc<dyn MailboxStore>) -> Self {
        Self { mailbox }
    }
}

impl LocalItemAction for MailboxItemAction {
    fn apply(
        &self,
        op: &str,
        ids: &[ItemId],
        _action: &Element,
        ctx: &RequestContext,
    ) -> Result<ItemActionResult> {
        let mut result = ItemActionResult::new(op);
        for iid in ids {
            let formatted = iid.to_string_relative(&ctx.authenticated_account_id);
            match self.mailbox.get_item(iid.account_id(), iid.id()) {
                Ok(_) => result.success_ids.push(formatted),
                Err(RouteError::NoSuchItem(_)) => result.non_existent_ids.push(formatted),
                Err(e) => return Err(e),
            }
        }
        Ok(result)
    }
}

/// Handler for `*ActionRequest`s whose `action@id` may span accounts
pub struct ItemActionProxy {
    dispatcher: Arc<ProxyDispatcher>,
    local: Arc<dyn LocalItemAction>,
}

impl ItemActionProxy {
    pub fn new(dispatcher: Arc<ProxyDispatcher>, local: Arc<dyn LocalItemAction>) -> Self {
        Self { dispatcher, local }
    }

    /// Qualified destination folder, a local mountpoint replaced by its target
    fn destination(&self, l: &str, ctx: &RequestContext) -> Result<ItemId> {
        let folder = ItemId::parse(l, &ctx.requested_account_id)?;
        match self.dispatcher.resolver().follow_mountpoint(&folder)? {
            Some(target) => {
                debug!(mountpoint = %folder, target = %target, "Destination is a mountpoint");
                Ok(target)
            }
            None => Ok(folder),
        }
    }

    /// Run the local batch, forward the remote batches, merge the results
    pub async fn execute(&self, request: &Element, ctx: &RequestContext) -> Result<ItemActionResult> {
        let action = request.require_child("action")?;
        let op = action.require_attribute("op")?;
        let ids = action.require_attribute("id")?;

        let parts = partition_items(ids, ctx)?;
        let mut result = ItemActionResult::new(op);
        if parts.is_empty() {
            return Ok(result);
        }

        // qualify the target folder before anything runs, so a bad one fails fast
        let folder = match action.attribute("l") {
            Some(l) => Some(self.destination(l, ctx)?),
            None => None,
        };

        if !parts.local.is_empty() {
            debug!(op, count = parts.local.len(), "Applying item action locally");
            let mut local_action = action.clone();
            if let Some(folder) = &folder {
                local_action.set_attribute("l", folder.to_string());
            }
            result.append(self.local.apply(op, &parts.local, &local_action, ctx)?);
        }

        if parts.remote.is_empty() {
            return Ok(result);
        }

        let mut outgoing = request.clone();
        for (account, iids) in &parts.remote {
            let id_list = iids
                .iter()
                .map(ItemId::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let out_action = outgoing
                .child_mut("action")
                .ok_or_else(|| RouteError::InvalidRequest("missing action".to_string()))?;
            out_action.set_attribute("id", id_list);
            if let Some(folder) = &folder {
                out_action.set_attribute("l", folder.to_string());
            }

            let response = self
                .dispatcher
                .proxy_request(&outgoing, ctx, account, false)
                .await?;
            if !result.append_remote(&response) {
                warn!(
                    account = %account,
                    op,
                    "Could not extract item action successes from proxied response"
                );
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl Handler for ItemActionProxy {
    async fn handle(&self, request: &Element, ctx: &RequestContext) -> Result<Element> {
        let result = self.execute(request, ctx).await?;
        let name = request.local_name().replace("Request", "Response");
        Ok(result.to_response(&name))
    }
}
