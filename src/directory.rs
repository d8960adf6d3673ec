//! Account and server directory
//!
//! The provisioning layer that says which server hosts an account's mailbox
//! and who may act on it. Routing only ever reads from it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A provisioned account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account id (usually a UUID)
    pub id: String,

    /// Primary name, e.g. `user@example.com`
    pub name: String,

    /// Name of the server hosting this account's mailbox
    pub server: String,

    /// Accounts allowed to act on this account's mailbox
    #[serde(default)]
    pub delegates: Vec<String>,
}

impl Account {
    pub fn new(id: impl Into<String>, name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            server: server.into(),
            delegates: Vec::new(),
        }
    }

    /// Builder-style delegate grant
    pub fn with_delegate(mut self, account_id: impl Into<String>) -> Self {
        self.delegates.push(account_id.into());
        self
    }

    /// Whether the account is homed on `server`
    pub fn is_on(&self, server: &str) -> bool {
        self.server.eq_ignore_ascii_case(server)
    }
}

/// A mailbox server reachable over SOAP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,

    /// Endpoint forwarded requests are posted to
    pub soap_url: String,
}

impl Server {
    pub fn new(name: impl Into<String>, soap_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            soap_url: soap_url.into(),
        }
    }
}

/// Read-only account and server lookups
pub trait Directory: Send + Sync {
    /// Account by id (case-insensitive)
    fn account_by_id(&self, id: &str) -> Option<Account>;

    /// Server by name
    fn server(&self, name: &str) -> Option<Server>;

    /// Whether `authenticated` may act on `target`'s mailbox
    fn can_access(&self, authenticated: &str, target: &str) -> bool {
        if authenticated.eq_ignore_ascii_case(target) {
            return true;
        }
        self.account_by_id(target)
            .map(|acct| {
                acct.delegates
                    .iter()
                    .any(|d| d.eq_ignore_ascii_case(authenticated))
            })
            .unwrap_or(false)
    }
}

/// Directory backed by fixed account and server lists
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    accounts: HashMap<String, Account>,
    servers: HashMap<String, Server>,
}

impl StaticDirectory {
    pub fn new(accounts: Vec<Account>, servers: Vec<Server>) -> Self {
        let mut dir = Self::default();
        for server in servers {
            dir.add_server(server);
        }
        for account in accounts {
            dir.add_account(account);
        }
        dir
    }

    pub fn add_account(&mut self, account: Account) {
        self.accounts.insert(account.id.to_lowercase(), account);
    }

    pub fn add_server(&mut self, server: Server) {
        self.servers.insert(server.name.to_lowercase(), server);
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }
}

impl Directory for StaticDirectory {
    fn account_by_id(&self, id: &str) -> Option<Account> {
        self.accounts.get(&id.to_lowercase()).cloned()
    }

    fn server(&self, name: &str) -> Option<Server> {
        self.servers.get(&name.to_lowercase()).cloned()
    }
}
