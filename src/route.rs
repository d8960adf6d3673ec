//! Per-request-type routing declarations
//!
//! Each request name maps to a [`RouteConfig`]: where the identifier to
//! route on lives, whether a mountpoint at that id is followed, and where in
//! the response folder ids need translating back. The built-in table covers
//! the standard mail requests; the config file can add or replace entries.

use crate::soap::{get_xpath, Element, XPath};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Folder operations that are routed by the folder id
pub const FOLDER_OPS: &[&str] = &[
    "empty",
    "sync",
    "url",
    "import",
    "fb",
    "check",
    "!check",
    "grant",
    "!grant",
    "revokeorphangrants",
    "update",
    "syncon",
    "!syncon",
    "retentionpolicy",
    "disableactivesync",
    "!disableactivesync",
    "webofflinesyncdays",
];

/// Folder operations that pass through a mountpoint to the shared folder
pub const MOUNTPOINT_FOLDER_OPS: &[&str] = &["grant", "!grant", "revokeorphangrants"];

/// Matches a request by the value found at `path` (e.g. `action/op`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpFilter {
    pub path: XPath,
    pub ops: Vec<String>,
}

impl OpFilter {
    pub fn new(path: &str, ops: &[&str]) -> Self {
        Self {
            path: XPath::from(path),
            ops: ops.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Whether the request's value at `path` is one of `ops` (case-insensitive)
    pub fn matches(&self, request: &Element) -> bool {
        match get_xpath(request, &self.path) {
            Some(op) => self.ops.iter().any(|o| o.eq_ignore_ascii_case(op)),
            None => false,
        }
    }
}

/// When a mountpoint found at the routed id is followed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountpointPolicy {
    Always,
    #[default]
    Never,
    /// Only for requests matching the filter
    ForOps(OpFilter),
}

impl MountpointPolicy {
    pub fn applies_to(&self, request: &Element) -> bool {
        match self {
            MountpointPolicy::Always => true,
            MountpointPolicy::Never => false,
            MountpointPolicy::ForOps(filter) => filter.matches(request),
        }
    }
}

/// Routing declaration for one request type
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Candidate id locations; the first one present in the request wins
    #[serde(default)]
    pub id_paths: Vec<XPath>,

    /// Only route by id when the request matches this filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_ops: Option<OpFilter>,

    #[serde(default)]
    pub mountpoint: MountpointPolicy,

    /// Element whose children carry `l` attributes to rewrite after a
    /// mountpoint hop; empty means the response root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_path: Option<XPath>,
}

impl RouteConfig {
    pub fn new(id_path: &str) -> Self {
        Self {
            id_paths: vec![XPath::from(id_path)],
            ..Default::default()
        }
    }

    /// Add a fallback id location
    pub fn or_path(mut self, id_path: &str) -> Self {
        self.id_paths.push(XPath::from(id_path));
        self
    }

    pub fn with_mountpoint(mut self, policy: MountpointPolicy) -> Self {
        self.mountpoint = policy;
        self
    }

    pub fn with_proxy_ops(mut self, filter: OpFilter) -> Self {
        self.proxy_ops = Some(filter);
        self
    }

    pub fn with_response_path(mut self, path: &str) -> Self {
        self.response_path = Some(XPath::from(path));
        self
    }

    /// Id location to route this request on, None to handle it locally
    pub fn id_path(&self, request: &Element) -> Option<&XPath> {
        if let Some(filter) = &self.proxy_ops {
            if !filter.matches(request) {
                return None;
            }
        }
        self.id_paths
            .iter()
            .find(|path| get_xpath(request, path).is_some())
    }

    pub fn check_mountpoint(&self, request: &Element) -> bool {
        self.mountpoint.applies_to(request)
    }
}

lazy_static! {
    static ref DEFAULT_ROUTES: HashMap<String, RouteConfig> = {
        let mut m = HashMap::new();
        let create = |path: &str| {
            RouteConfig::new(path)
                .with_mountpoint(MountpointPolicy::Always)
                .with_response_path("")
        };

        m.insert("CreateFolderRequest".to_string(), create("folder/l"));
        m.insert("CreateMountpointRequest".to_string(), create("link/l"));
        m.insert("CreateSearchFolderRequest".to_string(), create("search/l"));
        m.insert("CreateContactRequest".to_string(), create("cn/l"));
        m.insert("CreateNoteRequest".to_string(), create("note/l"));
        m.insert(
            "SaveDocumentRequest".to_string(),
            create("doc/id").or_path("doc/l"),
        );
        m.insert(
            "SyncRequest".to_string(),
            RouteConfig::new("l").with_mountpoint(MountpointPolicy::Always),
        );
        m.insert("GetMsgRequest".to_string(), RouteConfig::new("m/id"));
        m.insert("GetItemRequest".to_string(), RouteConfig::new("item/id"));
        m.insert("SendInviteReplyRequest".to_string(), RouteConfig::new("id"));
        m.insert(
            "SendShareNotificationRequest".to_string(),
            RouteConfig::new("item/id"),
        );
        m.insert(
            "FolderActionRequest".to_string(),
            RouteConfig::new("action/id")
                .with_proxy_ops(OpFilter::new("action/op", FOLDER_OPS))
                .with_mountpoint(MountpointPolicy::ForOps(OpFilter::new(
                    "action/op",
                    MOUNTPOINT_FOLDER_OPS,
                ))),
        );
        m
    };
}

/// Lookup table from request name to routing declaration
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<String, RouteConfig>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            routes: DEFAULT_ROUTES.clone(),
        }
    }
}

impl RouteTable {
    /// An empty table
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Built-in routes with `overrides` added or replacing entries
    pub fn with_overrides(overrides: &HashMap<String, RouteConfig>) -> Self {
        let mut table = Self::default();
        for (name, route) in overrides {
            table.insert(name.clone(), route.clone());
        }
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, route: RouteConfig) {
        self.routes.insert(name.into(), route);
    }

    /// Route for a request name (e.g. `FolderActionRequest`)
    pub fn get(&self, name: &str) -> Option<&RouteConfig> {
        self.routes.get(name)
    }

    /// Route for a request element, by its local name
    pub fn for_request(&self, request: &Element) -> Option<&RouteConfig> {
        self.get(request.local_name())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Request names in sorted order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
