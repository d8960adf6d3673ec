//! Mountpoint resolution
//!
//! Decides whether an item id has to be served somewhere else: either it
//! names another account's item outright, or it names a local mountpoint
//! whose shared folder lives in another account.

use crate::context::RequestContext;
use crate::mailbox::MailboxStore;
use crate::{Result, RouteError};
use itemid::ItemId;
use std::sync::Arc;
use tracing::debug;

/// Follows item ids through mountpoints using the local mailbox store
#[derive(Clone)]
pub struct MountpointResolver {
    mailbox: Arc<dyn MailboxStore>,
}

impl MountpointResolver {
    pub fn new(mailbox: Arc<dyn MailboxStore>) -> Self {
        Self { mailbox }
    }

    /// Whether `account_id`'s mailbox is in this process
    pub fn is_local(&self, account_id: &str) -> bool {
        self.mailbox.serves(account_id)
    }

    /// Where a request about `requested` has to go
    ///
    /// Returns the id to forward to, or None when the request is handled
    /// against the local mailbox as is.
    ///
    /// # Errors
    /// - `ProxyLoop` when a mountpoint would be followed into another one
    /// - `NoSuchItem` / `PermissionDenied` from the mailbox lookup
    pub fn resolve_proxy_target(
        &self,
        ctx: &RequestContext,
        requested: &ItemId,
        check_mountpoint: bool,
    ) -> Result<Option<ItemId>> {
        if !requested.belongs_to(&ctx.requested_account_id) {
            debug!(item = %requested, "Item belongs to another account");
            return Ok(Some(requested.clone()));
        }

        if !check_mountpoint {
            return Ok(None);
        }

        if !self.is_local(&ctx.requested_account_id) {
            debug!(
                account = %ctx.requested_account_id,
                "Requested account not served here, skipping mountpoint check"
            );
            return Ok(None);
        }

        let item = self
            .mailbox
            .get_item(requested.account_id(), requested.id())?;
        let Some(target) = item.mountpoint_target() else {
            return Ok(None);
        };

        if ctx.mountpoint_traversed {
            return Err(RouteError::ProxyLoop(requested.to_string()));
        }

        // Mountpoints never chain; catch it here when the owner is local too.
        if self.is_local(target.account_id()) {
            let shared = self.mailbox.get_item(target.account_id(), target.id())?;
            if shared.is_mountpoint() {
                return Err(RouteError::ProxyLoop(target.to_string()));
            }
        }

        debug!(mountpoint = %requested, target = %target, "Resolved mountpoint");
        Ok(Some(target))
    }

    /// The folder a local mountpoint stands in for
    ///
    /// None when `folder` is not in a local mailbox, does not exist, or is
    /// not a mountpoint. Used for destination folders, which are never
    /// forwarded to themselves.
    pub fn follow_mountpoint(&self, folder: &ItemId) -> Result<Option<ItemId>> {
        if !self.is_local(folder.account_id()) {
            return Ok(None);
        }
        match self.mailbox.get_item(folder.account_id(), folder.id()) {
            Ok(item) => Ok(item.mountpoint_target()),
            Err(RouteError::NoSuchItem(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{MailItem, MemoryMailbox};

    fn resolver() -> MountpointResolver {
        let store = MemoryMailbox::new();
        store.insert("acct-a", MailItem::folder(2, "Inbox")).unwrap();
        store
            .insert("acct-a", MailItem::mountpoint(42, "Shared", "acct-b", 99))
            .unwrap();
        MountpointResolver::new(Arc::new(store))
    }

    fn ctx() -> RequestContext {
        RequestContext::new("acct-a")
    }

    #[test]
    fn test_foreign_id_returned_unchanged() {
        let r = resolver();
        let iid = ItemId::new("acct-b", 55);
        assert_eq!(
            r.resolve_proxy_target(&ctx(), &iid, true).unwrap(),
            Some(iid.clone())
        );
        assert_eq!(r.resolve_proxy_target(&ctx(), &iid, false).unwrap(), Some(iid));
    }

    #[test]
    fn test_plain_folder_is_local() {
        let r = resolver();
        let iid = ItemId::new("acct-a", 2);
        assert_eq!(r.resolve_proxy_target(&ctx(), &iid, true).unwrap(), None);
        assert_eq!(r.resolve_proxy_target(&ctx(), &iid, false).unwrap(), None);
    }

    #[test]
    fn test_mountpoint_resolves_to_target() {
        let r = resolver();
        let iid = ItemId::parse("42", "acct-a").unwrap();
        assert_eq!(
            r.resolve_proxy_target(&ctx(), &iid, true).unwrap(),
            Some(ItemId::new("acct-b", 99))
        );
        assert_eq!(r.resolve_proxy_target(&ctx(), &iid, false).unwrap(), None);
    }

    #[test]
    fn test_ownership_check_is_case_insensitive() {
        let r = resolver();
        let iid = ItemId::new("ACCT-A", 42);
        assert_eq!(
            r.resolve_proxy_target(&ctx(), &iid, true).unwrap(),
            Some(ItemId::new("acct-b", 99))
        );
    }

    #[test]
    fn test_unserved_account_skips_lookup() {
        let r = resolver();
        let remote_ctx = RequestContext::new("acct-c");
        let iid = ItemId::new("acct-c", 42);
        assert_eq!(r.resolve_proxy_target(&remote_ctx, &iid, true).unwrap(), None);
    }

    #[test]
    fn test_missing_item_propagates() {
        let r = resolver();
        let iid = ItemId::new("acct-a", 777);
        assert!(matches!(
            r.resolve_proxy_target(&ctx(), &iid, true),
            Err(RouteError::NoSuchItem(_))
        ));
    }

    #[test]
    fn test_traversed_context_refuses_second_mountpoint() {
        let r = resolver();
        let mut traversed = ctx();
        traversed.mountpoint_traversed = true;
        let iid = ItemId::new("acct-a", 42);
        assert!(matches!(
            r.resolve_proxy_target(&traversed, &iid, true),
            Err(RouteError::ProxyLoop(_))
        ));
        // plain folders are still fine
        let folder = ItemId::new("acct-a", 2);
        assert_eq!(r.resolve_proxy_target(&traversed, &folder, true).unwrap(), None);
    }

    #[test]
    fn test_chained_local_mountpoints() {
        let store = MemoryMailbox::new();
        store
            .insert("acct-a", MailItem::mountpoint(42, "To B", "acct-b", 99))
            .unwrap();
        store
            .insert("acct-b", MailItem::mountpoint(99, "To C", "acct-c", 7))
            .unwrap();
        let r = MountpointResolver::new(Arc::new(store));

        let iid = ItemId::new("acct-a", 42);
        match r.resolve_proxy_target(&ctx(), &iid, true) {
            Err(RouteError::ProxyLoop(id)) => assert_eq!(id, "acct-b:99"),
            other => panic!("expected ProxyLoop, got {:?}", other),
        }
    }

    #[test]
    fn test_follow_mountpoint() {
        let r = resolver();
        assert_eq!(
            r.follow_mountpoint(&ItemId::new("acct-a", 42)).unwrap(),
            Some(ItemId::new("acct-b", 99))
        );
        assert_eq!(r.follow_mountpoint(&ItemId::new("acct-a", 2)).unwrap(), None);
        assert_eq!(r.follow_mountpoint(&ItemId::new("acct-a", 404)).unwrap(), None);
        assert_eq!(r.follow_mountpoint(&ItemId::new("acct-z", 1)).unwrap(), None);
    }
}
