//! Error types for mailroute
//!
//! Every failure a routing decision or a proxied round trip can produce.
//! Each variant maps onto a SOAP fault code so the server can report it the
//! same way the rest of the groupware stack does.

use itemid::ItemIdError;
use thiserror::Error;

/// Result type alias for mailroute operations
pub type Result<T> = std::result::Result<T, RouteError>;

/// Error type for routing, proxying and the surrounding plumbing
#[derive(Error, Debug)]
pub enum RouteError {
    /// Malformed item identifier
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] ItemIdError),

    /// Account id does not resolve to a live account
    #[error("no such account: {0}")]
    NoSuchAccount(String),

    /// Server named by an account does not exist in the directory
    #[error("no such server: {0}")]
    NoSuchServer(String),

    /// Item does not exist in the mailbox
    #[error("no such item: {0}")]
    NoSuchItem(String),

    /// Caller lacks rights on the requested account or item
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Routing would chain through another mountpoint or revisit a server
    #[error("proxy loop detected at {0}")]
    ProxyLoop(String),

    /// Request has been forwarded too many times
    #[error("too many proxy hops ({0})")]
    TooManyHops(u32),

    /// Forwarding to the remote server failed
    #[error("transport failure contacting {server}: {message}")]
    Transport { server: String, message: String },

    /// Remote server answered with a SOAP fault
    #[error("remote fault {code}: {reason}")]
    RemoteFault { code: String, reason: String },

    /// Request is structurally invalid
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No handler is registered for the request
    #[error("unknown document: {0}")]
    UnknownRequest(String),

    /// No authenticated identity accompanied the request
    #[error("authentication required")]
    AuthRequired,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// XML parsing/writing errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl RouteError {
    /// SOAP fault code reported to the client
    pub fn fault_code(&self) -> String {
        match self {
            RouteError::InvalidIdentifier(_) | RouteError::InvalidRequest(_) => {
                "service.INVALID_REQUEST".to_string()
            }
            RouteError::NoSuchAccount(_) => "account.NO_SUCH_ACCOUNT".to_string(),
            RouteError::NoSuchServer(_) => "service.PROXY_ERROR".to_string(),
            RouteError::NoSuchItem(_) => "mail.NO_SUCH_ITEM".to_string(),
            RouteError::PermissionDenied(_) => "service.PERM_DENIED".to_string(),
            RouteError::ProxyLoop(_) => "service.PROXY_ERROR".to_string(),
            RouteError::TooManyHops(_) => "service.TOO_MANY_HOPS".to_string(),
            RouteError::Transport { .. } => "service.FAILURE".to_string(),
            RouteError::RemoteFault { code, .. } => code.clone(),
            RouteError::UnknownRequest(_) => "service.UNKNOWN_DOCUMENT".to_string(),
            RouteError::AuthRequired => "service.AUTH_REQUIRED".to_string(),
            RouteError::Parse(_) => "service.PARSE_ERROR".to_string(),
            RouteError::Config(_)
            | RouteError::Io(_)
            | RouteError::Yaml(_)
            | RouteError::Other(_) => "service.FAILURE".to_string(),
        }
    }

    /// Whether the fault is the caller's doing (`soap:Sender`) rather than ours
    pub fn is_sender_fault(&self) -> bool {
        match self {
            RouteError::InvalidIdentifier(_)
            | RouteError::NoSuchAccount(_)
            | RouteError::NoSuchItem(_)
            | RouteError::PermissionDenied(_)
            | RouteError::InvalidRequest(_)
            | RouteError::UnknownRequest(_)
            | RouteError::AuthRequired
            | RouteError::Parse(_) => true,
            RouteError::RemoteFault { code, .. } => !code.starts_with("service.FAILURE"),
            _ => false,
        }
    }

    /// Whether the client may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, RouteError::Transport { .. })
    }
}
