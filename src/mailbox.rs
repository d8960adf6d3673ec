//! Mailbox store collaborator
//!
//! Routing only needs "get item by id" and "is this account's mailbox
//! here". [`MemoryMailbox`] backs tests and the demo server; it is not a
//! storage engine.

use crate::{Result, RouteError};
use itemid::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// What kind of thing an item is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ItemKind {
    Folder,
    /// Local alias of a folder shared from another account
    Mountpoint {
        owner_id: String,
        remote_id: i32,
    },
    Message,
    Contact,
    Document,
    Other,
}

/// An item as returned by the mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailItem {
    pub id: i32,

    /// Parent folder id
    #[serde(default = "default_folder")]
    pub folder_id: i32,

    #[serde(default)]
    pub name: String,

    #[serde(flatten)]
    pub kind: ItemKind,
}

fn default_folder() -> i32 {
    1
}

impl MailItem {
    pub fn folder(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            folder_id: default_folder(),
            name: name.into(),
            kind: ItemKind::Folder,
        }
    }

    pub fn mountpoint(
        id: i32,
        name: impl Into<String>,
        owner_id: impl Into<String>,
        remote_id: i32,
    ) -> Self {
        Self {
            id,
            folder_id: default_folder(),
            name: name.into(),
            kind: ItemKind::Mountpoint {
                owner_id: owner_id.into(),
                remote_id,
            },
        }
    }

    pub fn message(id: i32, folder_id: i32) -> Self {
        Self {
            id,
            folder_id,
            name: String::new(),
            kind: ItemKind::Message,
        }
    }

    pub fn is_mountpoint(&self) -> bool {
        matches!(self.kind, ItemKind::Mountpoint { .. })
    }

    /// The shared folder a mountpoint stands in for
    pub fn mountpoint_target(&self) -> Option<ItemId> {
        match &self.kind {
            ItemKind::Mountpoint {
                owner_id,
                remote_id,
            } => Some(ItemId::new(owner_id.as_str(), *remote_id)),
            _ => None,
        }
    }
}

/// Read access to mailboxes hosted by this process
pub trait MailboxStore: Send + Sync {
    /// Whether this process holds `account_id`'s mailbox
    fn serves(&self, account_id: &str) -> bool;

    /// Fetch an item; returns an owned copy so no lock outlives the call
    ///
    /// # Errors
    /// `NoSuchItem` if absent, `NoSuchAccount` if the mailbox is not here.
    fn get_item(&self, account_id: &str, id: i32) -> Result<MailItem>;
}

/// In-memory mailboxes keyed by account id
#[derive(Debug, Default)]
pub struct MemoryMailbox {
    mailboxes: RwLock<HashMap<String, HashMap<i32, MailItem>>>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a map of account id to items
    pub fn from_items(items: &HashMap<String, Vec<MailItem>>) -> Result<Self> {
        let store = Self::new();
        for (account, list) in items {
            store.create_mailbox(account)?;
            for item in list {
                store.insert(account, item.clone())?;
            }
        }
        Ok(store)
    }

    /// Create an empty mailbox (no-op if present)
    pub fn create_mailbox(&self, account_id: &str) -> Result<()> {
        let mut guard = self.write()?;
        guard.entry(account_id.to_lowercase()).or_default();
        Ok(())
    }

    /// Add or replace an item, creating the mailbox if needed
    pub fn insert(&self, account_id: &str, item: MailItem) -> Result<()> {
        let mut guard = self.write()?;
        guard
            .entry(account_id.to_lowercase())
            .or_default()
            .insert(item.id, item);
        Ok(())
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, HashMap<i32, MailItem>>>> {
        self.mailboxes
            .write()
            .map_err(|_| RouteError::Other("mailbox lock poisoned".to_string()))
    }
}

impl MailboxStore for MemoryMailbox {
    fn serves(&self, account_id: &str) -> bool {
        self.mailboxes
            .read()
            .map(|guard| guard.contains_key(&account_id.to_lowercase()))
            .unwrap_or(false)
    }

    fn get_item(&self, account_id: &str, id: i32) -> Result<MailItem> {
        let guard = self
            .mailboxes
            .read()
            .map_err(|_| RouteError::Other("mailbox lock poisoned".to_string()))?;
        let mailbox = guard
            .get(&account_id.to_lowercase())
            .ok_or_else(|| RouteError::NoSuchAccount(account_id.to_string()))?;
        mailbox
            .get(&id)
            .cloned()
            .ok_or_else(|| RouteError::NoSuchItem(ItemId::new(account_id, id).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_item() {
        let store = MemoryMailbox::new();
        store.insert("acct-a", MailItem::folder(2, "Inbox")).unwrap();
        store
            .insert("acct-a", MailItem::mountpoint(42, "Shared", "acct-b", 99))
            .unwrap();

        assert!(store.serves("ACCT-A"));
        assert!(!store.serves("acct-b"));

        let inbox = store.get_item("acct-a", 2).unwrap();
        assert!(!inbox.is_mountpoint());
        assert_eq!(inbox.mountpoint_target(), None);

        let mp = store.get_item("acct-a", 42).unwrap();
        assert_eq!(mp.mountpoint_target(), Some(ItemId::new("acct-b", 99)));
    }

    #[test]
    fn test_missing_item_and_mailbox() {
        let store = MemoryMailbox::new();
        store.create_mailbox("acct-a").unwrap();
        assert!(matches!(
            store.get_item("acct-a", 7),
            Err(RouteError::NoSuchItem(id)) if id == "acct-a:7"
        ));
        assert!(matches!(
            store.get_item("acct-b", 7),
            Err(RouteError::NoSuchAccount(_))
        ));
    }

    #[test]
    fn test_items_from_yaml() {
        let yaml = r#"
acct-a:
  - id: 2
    name: Inbox
    kind: folder
  - id: 42
    name: Shared
    kind: mountpoint
    owner_id: acct-b
    remote_id: 99
  - id: 300
    folder_id: 2
    kind: message
"#;
        let items: HashMap<String, Vec<MailItem>> = serde_yaml::from_str(yaml).unwrap();
        let store = MemoryMailbox::from_items(&items).unwrap();
        assert_eq!(
            store.get_item("acct-a", 42).unwrap(),
            MailItem::mountpoint(42, "Shared", "acct-b", 99)
        );
        assert_eq!(store.get_item("acct-a", 300).unwrap().folder_id, 2);
    }
}
