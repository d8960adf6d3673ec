//! Re-sending a forward that never reached the peer
//!
//! Forwarded requests are often writes (create, move, delete), so a request
//! is only sent again when the connection to the peer could not be opened.
//! A failure after the request went out is reported as is: the peer may
//! already have applied it.

use crate::{Result, RouteError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Reconnect settings for `proxy.reconnect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Extra connection attempts after the first one is refused
    pub attempts: u32,

    /// Pause before each extra attempt
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            attempts: 0,
            delay_ms: 250,
        }
    }
}

impl ReconnectConfig {
    pub fn is_enabled(&self) -> bool {
        self.attempts > 0
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// How far a single send got before failing
#[derive(Debug)]
pub enum SendFailure {
    /// No connection to the peer; nothing was sent
    Unsent(RouteError),

    /// The request went out (or the response was what failed)
    Sent(RouteError),
}

impl SendFailure {
    pub fn into_error(self) -> RouteError {
        match self {
            SendFailure::Unsent(e) | SendFailure::Sent(e) => e,
        }
    }

    /// Classify a reqwest failure for `server`
    pub fn from_reqwest(server: &str, err: reqwest::Error) -> Self {
        let unsent = err.is_connect();
        let err = RouteError::Transport {
            server: server.to_string(),
            message: err.to_string(),
        };
        if unsent {
            SendFailure::Unsent(err)
        } else {
            SendFailure::Sent(err)
        }
    }
}

impl From<RouteError> for SendFailure {
    fn from(err: RouteError) -> Self {
        SendFailure::Sent(err)
    }
}

/// Run `send`, opening a new connection while the peer refuses it
///
/// Only [`SendFailure::Unsent`] is retried, at most `config.attempts` times.
pub async fn send_reconnecting<T, F, Fut>(
    config: &ReconnectConfig,
    server: &str,
    mut send: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, SendFailure>>,
{
    let mut left = config.attempts;
    loop {
        match send().await {
            Ok(value) => return Ok(value),
            Err(SendFailure::Unsent(e)) if left > 0 => {
                left -= 1;
                warn!(server, error = %e, attempts_left = left, "Peer refused connection, reconnecting");
                tokio::time::sleep(config.delay()).await;
            }
            Err(failure) => return Err(failure.into_error()),
        }
    }
}
