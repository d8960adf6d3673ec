//! Account-qualified mail item identifiers
//!
//! An item id names one item (message, folder, contact, mountpoint, ...) in one
//! account's mailbox. The numeric id only means something relative to its
//! owning account, so every parsed id carries the account it belongs to.
//!
//! # Encoding
//!
//! - `acct-uuid:257` - item 257 in the mailbox of `acct-uuid`
//! - `acct-uuid:257-3` - subpart 3 of item 257 (e.g. an invite component)
//! - `257` / `257-3` - same, relative to a default (the requested) account
//!
//! Account ids may themselves contain `-`; the subpart separator is only
//! searched for after the `:`.
//!
//! # Example
//!
//! ```
//! use itemid::ItemId;
//!
//! let iid = ItemId::parse("acct-b:99", "acct-a").unwrap();
//! assert_eq!(iid.account_id(), "acct-b");
//! assert_eq!(iid.id(), 99);
//! assert!(!iid.belongs_to("acct-a"));
//!
//! let local = ItemId::parse("42", "acct-a").unwrap();
//! assert!(local.belongs_to("ACCT-A"));
//! assert_eq!(local.to_string(), "acct-a:42");
//! assert_eq!(local.to_string_relative("acct-a"), "42");
//! # Ok::<(), itemid::ItemIdError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between the account id and the item id
pub const ACCOUNT_DELIMITER: char = ':';

/// Separator between the item id and the subpart id
pub const PART_DELIMITER: char = '-';

/// Errors produced while parsing an item id
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ItemIdError {
    #[error("item id cannot be empty")]
    Empty,

    #[error("item id '{0}' is not qualified with an account and no default account was given")]
    MissingAccount(String),

    #[error("invalid account in item id '{0}'")]
    InvalidAccount(String),

    #[error("invalid numeric id in item id '{0}'")]
    InvalidId(String),

    #[error("invalid subpart in item id '{0}'")]
    InvalidSubpart(String),
}

/// Result type for item id operations
pub type Result<T> = std::result::Result<T, ItemIdError>;

/// A parsed, account-qualified item identifier
///
/// Immutable once parsed. Two ids are equal iff account, id and subpart all
/// match exactly; use [`ItemId::belongs_to`] for the case-insensitive
/// ownership check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId {
    account_id: String,
    id: i32,
    subpart: Option<u32>,
}

impl ItemId {
    /// Create an id for an item in the given account
    pub fn new(account_id: impl Into<String>, id: i32) -> Self {
        Self {
            account_id: account_id.into(),
            id,
            subpart: None,
        }
    }

    /// Create an id addressing a subpart of an item
    pub fn with_subpart(account_id: impl Into<String>, id: i32, subpart: u32) -> Self {
        Self {
            account_id: account_id.into(),
            id,
            subpart: Some(subpart),
        }
    }

    /// Parse an encoded id, resolving bare ids against `default_account`
    ///
    /// # Errors
    /// Returns an error if the input is empty, the account part is empty, or
    /// the numeric parts are malformed.
    pub fn parse(raw: &str, default_account: &str) -> Result<Self> {
        if default_account.is_empty() {
            return Self::parse_parts(raw, None);
        }
        Self::parse_parts(raw, Some(default_account))
    }

    fn parse_parts(raw: &str, default_account: Option<&str>) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ItemIdError::Empty);
        }

        let (account_id, rest) = match raw.split_once(ACCOUNT_DELIMITER) {
            Some((account, rest)) => {
                if account.is_empty() || rest.is_empty() {
                    return Err(ItemIdError::InvalidAccount(raw.to_string()));
                }
                (account, rest)
            }
            None => match default_account {
                Some(account) => (account, raw),
                None => return Err(ItemIdError::MissingAccount(raw.to_string())),
            },
        };

        let (id_part, subpart) = match rest.rsplit_once(PART_DELIMITER) {
            Some((id_part, sub)) => {
                let sub = parse_digits(sub)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| ItemIdError::InvalidSubpart(raw.to_string()))?;
                (id_part, Some(sub))
            }
            None => (rest, None),
        };

        let id = parse_digits(id_part)
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| ItemIdError::InvalidId(raw.to_string()))?;

        Ok(Self {
            account_id: account_id.to_string(),
            id,
            subpart,
        })
    }

    /// The owning account's id
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// The item id within the owning account's mailbox
    pub fn id(&self) -> i32 {
        self.id
    }

    /// The subpart id, if any
    pub fn subpart(&self) -> Option<u32> {
        self.subpart
    }

    /// Whether this id addresses a subpart of an item
    pub fn has_subpart(&self) -> bool {
        self.subpart.is_some()
    }

    /// Check whether this id belongs to the given account
    ///
    /// Account ids are compared case-insensitively since callers and the
    /// directory may canonicalize them differently.
    pub fn belongs_to(&self, account_id: &str) -> bool {
        self.account_id.eq_ignore_ascii_case(account_id)
    }

    /// Format the id relative to an account
    ///
    /// Omits the account prefix when the id belongs to `account_id`, which is
    /// how clients see ids in their own mailbox.
    pub fn to_string_relative(&self, account_id: &str) -> String {
        if self.belongs_to(account_id) {
            self.local_part()
        } else {
            self.to_string()
        }
    }

    fn local_part(&self) -> String {
        match self.subpart {
            Some(sub) => format!("{}{}{}", self.id, PART_DELIMITER, sub),
            None => self.id.to_string(),
        }
    }
}

/// Parse a run of ASCII digits, rejecting signs and whitespace
fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.account_id, ACCOUNT_DELIMITER, self.local_part())
    }
}

impl FromStr for ItemId {
    type Err = ItemIdError;

    /// Parse a fully-qualified id; bare ids are rejected
    fn from_str(s: &str) -> Result<Self> {
        Self::parse_parts(s, None)
    }
}

impl TryFrom<String> for ItemId {
    type Error = ItemIdError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ItemId> for String {
    fn from(iid: ItemId) -> Self {
        iid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qualified() {
        let iid = ItemId::parse("acct-b:55", "acct-a").unwrap();
        assert_eq!(iid.account_id(), "acct-b");
        assert_eq!(iid.id(), 55);
        assert_eq!(iid.subpart(), None);
    }

    #[test]
    fn test_parse_bare_uses_default_account() {
        let iid = ItemId::parse("42", "acct-a").unwrap();
        assert_eq!(iid, ItemId::new("acct-a", 42));
    }

    #[test]
    fn test_parse_subpart() {
        let iid = ItemId::parse("acct-b:257-3", "acct-a").unwrap();
        assert_eq!(iid.id(), 257);
        assert_eq!(iid.subpart(), Some(3));
        assert!(iid.has_subpart());

        let bare = ItemId::parse("257-3", "acct-a").unwrap();
        assert_eq!(bare, ItemId::with_subpart("acct-a", 257, 3));
    }

    #[test]
    fn test_uuid_account_with_dashes() {
        let raw = "6b2c1d0e-1f2a-4b3c-9d8e-7f6a5b4c3d2e:1024";
        let iid = ItemId::parse(raw, "other").unwrap();
        assert_eq!(iid.account_id(), "6b2c1d0e-1f2a-4b3c-9d8e-7f6a5b4c3d2e");
        assert_eq!(iid.id(), 1024);
        assert_eq!(iid.to_string(), raw);
    }

    #[test]
    fn test_malformed_ids() {
        assert_eq!(ItemId::parse("", "a"), Err(ItemIdError::Empty));
        assert!(matches!(
            ItemId::parse("abc", "a"),
            Err(ItemIdError::InvalidId(_))
        ));
        assert!(matches!(
            ItemId::parse("acct:", "a"),
            Err(ItemIdError::InvalidAccount(_))
        ));
        assert!(matches!(
            ItemId::parse(":12", "a"),
            Err(ItemIdError::InvalidAccount(_))
        ));
        assert!(matches!(
            ItemId::parse("acct:12-x", "a"),
            Err(ItemIdError::InvalidSubpart(_))
        ));
        assert!(matches!(
            ItemId::parse("acct:-3", "a"),
            Err(ItemIdError::InvalidId(_))
        ));
        assert!(matches!(
            ItemId::parse("+7", "a"),
            Err(ItemIdError::InvalidId(_))
        ));
        assert!(matches!(
            ItemId::parse("99999999999", "a"),
            Err(ItemIdError::InvalidId(_))
        ));
    }

    #[test]
    fn test_bare_id_without_default_account() {
        assert!(matches!(
            "42".parse::<ItemId>(),
            Err(ItemIdError::MissingAccount(_))
        ));
        assert!(matches!(
            ItemId::parse("42", ""),
            Err(ItemIdError::MissingAccount(_))
        ));
    }

    #[test]
    fn test_belongs_to_is_case_insensitive() {
        let iid = ItemId::new("Acct-A", 7);
        assert!(iid.belongs_to("acct-a"));
        assert!(iid.belongs_to("ACCT-A"));
        assert!(!iid.belongs_to("acct-b"));
    }

    #[test]
    fn test_equality_is_exact() {
        assert_ne!(ItemId::new("acct-a", 7), ItemId::new("acct-a", 8));
        assert_ne!(ItemId::new("acct-a", 7), ItemId::new("acct-b", 7));
        assert_ne!(ItemId::new("acct-a", 7), ItemId::with_subpart("acct-a", 7, 1));
    }

    #[test]
    fn test_relative_formatting() {
        let iid = ItemId::with_subpart("acct-a", 42, 2);
        assert_eq!(iid.to_string(), "acct-a:42-2");
        assert_eq!(iid.to_string_relative("ACCT-A"), "42-2");
        assert_eq!(iid.to_string_relative("acct-b"), "acct-a:42-2");
    }

    #[test]
    fn test_serde_roundtrip() {
        let iid = ItemId::new("acct-b", 99);
        let json = serde_json::to_string(&iid).unwrap();
        assert_eq!(json, "\"acct-b:99\"");

        let parsed: ItemId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, iid);

        assert!(serde_json::from_str::<ItemId>("\"99\"").is_err());
    }
}
