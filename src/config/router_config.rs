use crate::directory::{Account, Server, StaticDirectory};
use crate::mailbox::MailItem;
use crate::route::{RouteConfig, RouteTable};
use crate::transport::ReconnectConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// This server's identity and listen address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name of this server, as used by accounts' `server` field
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Address the SOAP endpoint binds to
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_server_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_listen() -> String {
    "127.0.0.1:7070".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            listen: default_listen(),
        }
    }
}

/// Outbound forwarding settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Per-request timeout for forwarded requests
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Reconnect attempts when a peer refuses the connection
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Shared secret authenticating hops between this deployment's servers
    ///
    /// Forwarded requests carry it in `X-Peer-Token`. Only requests that
    /// present it may claim an earlier mountpoint hop; without it no peer
    /// is trusted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_token: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            reconnect: ReconnectConfig::default(),
            peer_token: None,
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Accounts and servers known to this deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub servers: Vec<Server>,

    #[serde(default)]
    pub accounts: Vec<Account>,
}

impl DirectoryConfig {
    pub fn to_directory(&self) -> StaticDirectory {
        StaticDirectory::new(self.accounts.clone(), self.servers.clone())
    }
}

/// mailroute configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Items of the mailboxes hosted here, by account id
    #[serde(default)]
    pub mailboxes: HashMap<String, Vec<MailItem>>,

    /// Route entries added to or replacing the built-in table
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub routes: HashMap<String, RouteConfig>,
}

impl RouterConfig {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the default path
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::RouteError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading mailroute configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            server = %config.server.name,
            accounts = config.directory.accounts.len(),
            servers = config.directory.servers.len(),
            mailboxes = config.mailboxes.len(),
            route_overrides = config.routes.len(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving mailroute configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/mailroute/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("mailroute");
        path.push("config.yaml");
        path
    }

    /// Built-in routes plus this config's overrides
    pub fn route_table(&self) -> RouteTable {
        RouteTable::with_overrides(&self.routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::ItemKind;
    use crate::route::MountpointPolicy;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
server:
  name: mbs1
  listen: 0.0.0.0:7070
proxy:
  timeout_secs: 10
  reconnect:
    attempts: 2
  peer_token: cluster-secret
directory:
  servers:
    - name: mbs1
      soap_url: http://mbs1:7070/service/soap
    - name: mbs2
      soap_url: http://mbs2:7070/service/soap
  accounts:
    - id: acct-a
      name: alice@example.com
      server: mbs1
    - id: acct-b
      name: bob@example.com
      server: mbs2
      delegates: [acct-a]
mailboxes:
  acct-a:
    - id: 42
      name: Bob's Stuff
      kind: mountpoint
      owner_id: acct-b
      remote_id: 99
routes:
  GetMsgRequest:
    id_paths: [m/id]
    mountpoint: always
"#;

    #[test]
    fn test_parse_sample() {
        let config: RouterConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.server.name, "mbs1");
        assert_eq!(config.proxy.timeout(), Duration::from_secs(10));
        assert_eq!(config.proxy.reconnect.attempts, 2);
        assert_eq!(config.proxy.reconnect.delay_ms, 250);
        assert_eq!(config.proxy.peer_token.as_deref(), Some("cluster-secret"));
        assert_eq!(config.directory.accounts[1].delegates, vec!["acct-a"]);
        assert!(matches!(
            config.mailboxes["acct-a"][0].kind,
            ItemKind::Mountpoint { .. }
        ));

        let table = config.route_table();
        assert_eq!(
            table.get("GetMsgRequest").unwrap().mountpoint,
            MountpointPolicy::Always
        );
        assert!(table.get("FolderActionRequest").is_some());
    }

    #[test]
    fn test_defaults() {
        let config: RouterConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:7070");
        assert_eq!(config.proxy.timeout_secs, 30);
        assert!(!config.proxy.reconnect.is_enabled());
        assert!(config.proxy.peer_token.is_none());
        assert!(config.directory.accounts.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.yaml");

        let config: RouterConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.save(&path).unwrap();

        let loaded = RouterConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = RouterConfig::load(temp_dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(crate::RouteError::Config(_))));
    }

    #[test]
    fn test_default_path() {
        let path = RouterConfig::default_path();
        assert!(path.ends_with(".config/mailroute/config.yaml"));
    }
}
