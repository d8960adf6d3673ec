//! Response rewriting after a mountpoint hop
//!
//! The owner's server answers in terms of the shared folder (`acct-b:99`);
//! the caller asked about its mountpoint (`42`). Folder references in the
//! response are mapped back so the caller keeps one consistent hierarchy.

use crate::context::RequestContext;
use crate::soap::{get_xpath_element_mut, Element, XPath};
use itemid::ItemId;
use tracing::debug;

/// Folder attribute rewritten on response items
pub const FOLDER_ATTR: &str = "l";

/// Replace `target` folder references under `path` with `mountpoint`
///
/// Only direct children of the element at `path` are inspected. A child
/// matches when its `l` equals the target in qualified form, or relative to
/// the authenticated account (how the owner renders ids it considers its
/// own). Returns how many attributes were rewritten; a missing path is not
/// an error.
pub fn rewrite_mountpoint_references(
    response: &mut Element,
    path: &XPath,
    mountpoint: &ItemId,
    target: &ItemId,
    ctx: &RequestContext,
) -> usize {
    let Some(parent) = get_xpath_element_mut(response, path) else {
        return 0;
    };

    let qualified = target.to_string();
    let relative = target.to_string_relative(&ctx.authenticated_account_id);
    let local = mountpoint.to_string_relative(&ctx.authenticated_account_id);

    let mut count = 0;
    for child in parent.children_mut().iter_mut() {
        let matches = child
            .attribute(FOLDER_ATTR)
            .map(|l| l == qualified || l == relative)
            .unwrap_or(false);
        if matches {
            child.set_attribute(FOLDER_ATTR, local.as_str());
            count += 1;
        }
    }

    debug!(
        path = %path,
        mountpoint = %mountpoint,
        target = %target,
        rewritten = count,
        "Rewrote mountpoint references"
    );
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (ItemId, ItemId) {
        (ItemId::new("acct-a", 42), ItemId::new("acct-b", 99))
    }

    #[test]
    fn test_rewrites_matching_children_at_root() {
        let (mp, target) = ids();
        let mut resp = Element::new("CreateFolderResponse")
            .with_child(Element::new("folder").with_attr("id", "acct-b:300").with_attr("l", "acct-b:99"))
            .with_child(Element::new("folder").with_attr("id", "acct-b:301").with_attr("l", "acct-b:5"));

        let n = rewrite_mountpoint_references(&mut resp, &XPath::root(), &mp, &target, &RequestContext::new("acct-a"));
        assert_eq!(n, 1);
        assert_eq!(resp.children()[0].attribute("l"), Some("42"));
        assert_eq!(resp.children()[1].attribute("l"), Some("acct-b:5"));
    }

    #[test]
    fn test_nested_path_and_delegated_caller() {
        let (mp, target) = ids();
        let mut resp = Element::new("SyncResponse").with_child(
            Element::new("folder").with_child(Element::new("m").with_attr("l", "acct-b:99")),
        );
        // caller authenticated as someone else: mountpoint stays qualified
        let ctx = RequestContext::delegated("acct-x", "acct-a");
        let n = rewrite_mountpoint_references(&mut resp, &"folder".into(), &mp, &target, &ctx);
        assert_eq!(n, 1);
        assert_eq!(
            resp.child("folder").unwrap().children()[0].attribute("l"),
            Some("acct-a:42")
        );
    }

    #[test]
    fn test_relative_target_form_matches() {
        // owner answered to its own account and wrote the folder bare
        let mp = ItemId::new("acct-a", 42);
        let target = ItemId::new("acct-b", 99);
        let ctx = RequestContext::new("acct-b");
        let mut resp = Element::new("R").with_child(Element::new("cn").with_attr("l", "99"));
        assert_eq!(rewrite_mountpoint_references(&mut resp, &XPath::root(), &mp, &target, &ctx), 1);
        assert_eq!(resp.children()[0].attribute("l"), Some("acct-a:42"));
    }

    #[test]
    fn test_missing_path_is_noop() {
        let (mp, target) = ids();
        let mut resp = Element::new("GetMsgResponse").with_child(Element::new("m").with_attr("l", "acct-b:99"));
        let before = resp.clone();
        let n = rewrite_mountpoint_references(&mut resp, &"c".into(), &mp, &target, &RequestContext::new("acct-a"));
        assert_eq!(n, 0);
        assert_eq!(resp, before);
    }

    #[test]
    fn test_rewrite_then_resolve_is_inverse() {
        use crate::mailbox::{MailItem, MemoryMailbox};
        use crate::resolver::MountpointResolver;
        use std::sync::Arc;

        let store = MemoryMailbox::new();
        store.insert("acct-a", MailItem::mountpoint(42, "Shared", "acct-b", 99)).unwrap();
        let resolver = MountpointResolver::new(Arc::new(store));
        let ctx = RequestContext::new("acct-a");

        let (mp, target) = ids();
        let mut resp = Element::new("R").with_child(Element::new("folder").with_attr("l", "acct-b:99"));
        rewrite_mountpoint_references(&mut resp, &XPath::root(), &mp, &target, &ctx);

        let rewritten = resp.children()[0].attribute("l").unwrap();
        let reparsed = ItemId::parse(rewritten, &ctx.requested_account_id).unwrap();
        assert_eq!(
            resolver.resolve_proxy_target(&ctx, &reparsed, true).unwrap(),
            Some(target)
        );
    }
}
