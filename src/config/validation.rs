//! Configuration validation
//!
//! Checks a router configuration for consistency before serving:
//! - Server and account names are unique
//! - Every account's server exists, and this server is listed
//! - SOAP URLs are http(s)
//! - Hosted mailboxes belong to accounts homed on this server
//! - Route entries declare at least one id path

use super::router_config::RouterConfig;
use crate::RouteError;
use std::collections::HashSet;

/// Validation error details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub context: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref ctx) = self.context {
            write!(f, "[{}] {}: {}", ctx, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a router configuration, collecting every problem
pub fn validate_config(config: &RouterConfig) -> ValidationResult {
    let mut errors = Vec::new();
    let directory = &config.directory;

    if config.server.name.trim().is_empty() {
        errors.push(ValidationError::new("server.name", "Server name cannot be empty"));
    }
    if config.proxy.timeout_secs == 0 {
        errors.push(ValidationError::new(
            "proxy.timeout_secs",
            "Timeout must be greater than zero",
        ));
    }
    if matches!(&config.proxy.peer_token, Some(token) if token.trim().is_empty()) {
        errors.push(ValidationError::new(
            "proxy.peer_token",
            "Peer token cannot be empty; omit it to trust no peer",
        ));
    }

    let mut server_names = HashSet::new();
    for server in &directory.servers {
        if !server_names.insert(server.name.to_lowercase()) {
            errors.push(
                ValidationError::new("name", format!("Duplicate server name: {}", server.name))
                    .with_context(&server.name),
            );
        }
        if !server.soap_url.starts_with("http://") && !server.soap_url.starts_with("https://") {
            errors.push(
                ValidationError::new(
                    "soap_url",
                    format!("URL must start with http:// or https://: {}", server.soap_url),
                )
                .with_context(&server.name),
            );
        }
    }

    if !directory.servers.is_empty() && !server_names.contains(&config.server.name.to_lowercase())
    {
        errors.push(ValidationError::new(
            "server.name",
            format!(
                "This server ({}) is not listed in directory.servers",
                config.server.name
            ),
        ));
    }

    let mut account_ids = HashSet::new();
    for account in &directory.accounts {
        if account.id.trim().is_empty() {
            errors.push(ValidationError::new("id", "Account id cannot be empty").with_context(&account.name));
            continue;
        }
        if account.id.contains(itemid::ACCOUNT_DELIMITER) {
            errors.push(
                ValidationError::new(
                    "id",
                    format!("Account id cannot contain '{}'", itemid::ACCOUNT_DELIMITER),
                )
                .with_context(&account.id),
            );
        }
        if !account_ids.insert(account.id.to_lowercase()) {
            errors.push(
                ValidationError::new("id", format!("Duplicate account id: {}", account.id))
                    .with_context(&account.id),
            );
        }
        if !server_names.contains(&account.server.to_lowercase()) {
            errors.push(
                ValidationError::new("server", format!("Unknown server: {}", account.server))
                    .with_context(&account.id),
            );
        }
    }

    for account_id in config.mailboxes.keys() {
        match directory
            .accounts
            .iter()
            .find(|a| a.id.eq_ignore_ascii_case(account_id))
        {
            None => errors.push(
                ValidationError::new("mailboxes", "Mailbox for an unknown account")
                    .with_context(account_id),
            ),
            Some(account) if !account.is_on(&config.server.name) => errors.push(
                ValidationError::new(
                    "mailboxes",
                    format!("Account is homed on {}, not this server", account.server),
                )
                .with_context(account_id),
            ),
            Some(_) => {}
        }
    }

    for (name, route) in &config.routes {
        if route.id_paths.is_empty() || route.id_paths.iter().any(|p| p.is_root()) {
            errors.push(
                ValidationError::new("id_paths", "At least one non-empty id path is required")
                    .with_context(name),
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and return a Result with combined error message
pub fn validate_config_result(config: &RouterConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        RouteError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Account, Server};
    use crate::mailbox::MailItem;
    use crate::route::RouteConfig;

    fn valid_config() -> RouterConfig {
        let mut config = RouterConfig::new();
        config.server.name = "mbs1".to_string();
        config.directory.servers = vec![
            Server::new("mbs1", "http://mbs1:7070/service/soap"),
            Server::new("mbs2", "https://mbs2:7070/service/soap"),
        ];
        config.directory.accounts = vec![
            Account::new("acct-a", "alice@example.com", "mbs1"),
            Account::new("acct-b", "bob@example.com", "mbs2"),
        ];
        config
            .mailboxes
            .insert("acct-a".to_string(), vec![MailItem::folder(2, "Inbox")]);
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
        assert!(validate_config_result(&valid_config()).is_ok());
    }

    #[test]
    fn test_duplicate_names() {
        let mut config = valid_config();
        config
            .directory
            .servers
            .push(Server::new("MBS2", "http://other/service/soap"));
        config
            .directory
            .accounts
            .push(Account::new("ACCT-A", "dup@example.com", "mbs1"));

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("Duplicate server")));
        assert!(errors.iter().any(|e| e.message.contains("Duplicate account")));
    }

    #[test]
    fn test_bad_references() {
        let mut config = valid_config();
        config.server.name = "mbs9".to_string();
        config.directory.servers[1].soap_url = "ftp://mbs2".to_string();
        config
            .directory
            .accounts
            .push(Account::new("acct-c", "carol@example.com", "mbs3"));
        config
            .mailboxes
            .insert("acct-b".to_string(), vec![MailItem::folder(2, "Inbox")]);
        config.mailboxes.insert("acct-q".to_string(), Vec::new());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"server.name"));
        assert!(fields.contains(&"soap_url"));
        assert!(fields.contains(&"server"));
        // acct-a (mbs1), acct-b (mbs2) and acct-q (unknown) are all wrong for mbs9
        assert_eq!(fields.iter().filter(|f| **f == "mailboxes").count(), 3);
    }

    #[test]
    fn test_account_id_with_delimiter() {
        let mut config = valid_config();
        config
            .directory
            .accounts
            .push(Account::new("bad:id", "x@example.com", "mbs1"));
        let errors = validate_config(&config).unwrap_err();
        assert!(errors[0].to_string().starts_with("[bad:id] id:"));
    }

    #[test]
    fn test_route_without_id_path() {
        let mut config = valid_config();
        config
            .routes
            .insert("GetMsgRequest".to_string(), RouteConfig::default());
        let err = validate_config_result(&config).unwrap_err();
        assert!(err.to_string().contains("[GetMsgRequest] id_paths"));
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = valid_config();
        config.proxy.timeout_secs = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "proxy.timeout_secs");
    }

    #[test]
    fn test_blank_peer_token() {
        let mut config = valid_config();
        config.proxy.peer_token = Some("  ".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "proxy.peer_token");
    }
}
