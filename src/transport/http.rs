//! SOAP-over-HTTP forwarder

use super::reconnect::{send_reconnecting, ReconnectConfig, SendFailure};
use super::{Forwarder, AUTH_ACCOUNT_HEADER, PEER_TOKEN_HEADER};
use crate::context::{RequestContext, ResponseFormat};
use crate::directory::Server;
use crate::soap::{decode_fault, Element, Envelope};
use crate::{Result, RouteError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Content type of SOAP 1.2 requests
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Posts forwarded requests to a server's SOAP endpoint
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    reconnect: ReconnectConfig,
    peer_token: Option<String>,
}

impl HttpForwarder {
    /// Create a forwarder whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RouteError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            reconnect: ReconnectConfig::default(),
            peer_token: None,
        })
    }

    /// Reconnect to peers that refuse the connection, per `reconnect`
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Authenticate hops to peers with the deployment's shared secret
    pub fn with_peer_token(mut self, token: Option<String>) -> Self {
        self.peer_token = token;
        self
    }

    async fn post_once(
        &self,
        body: &str,
        server: &Server,
        ctx: &RequestContext,
    ) -> std::result::Result<Element, SendFailure> {
        let transport = |message: String| RouteError::Transport {
            server: server.name.clone(),
            message,
        };

        debug!(server = %server.name, url = %server.soap_url, "Posting forwarded request");

        let mut post = self
            .client
            .post(&server.soap_url)
            .header(reqwest::header::CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .header(AUTH_ACCOUNT_HEADER, ctx.authenticated_account_id.as_str());
        if let Some(token) = &self.peer_token {
            post = post.header(PEER_TOKEN_HEADER, token.as_str());
        }

        let response = post
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| SendFailure::from_reqwest(&server.name, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SendFailure::Sent(transport(e.to_string())))?;

        let envelope = match Envelope::parse(&text) {
            Ok(env) => env,
            Err(e) if status.is_success() => {
                return Err(transport(format!("invalid SOAP response: {}", e)).into())
            }
            Err(_) => return Err(transport(format!("HTTP {}", status)).into()),
        };

        if let Some(fault) = decode_fault(&envelope.body) {
            return Err(fault.into());
        }
        if !status.is_success() {
            return Err(transport(format!("HTTP {}", status)).into());
        }
        Ok(envelope.body)
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        request: &Element,
        server: &Server,
        ctx: &RequestContext,
    ) -> Result<Element> {
        // Responses between servers are always XML; the caller's format is
        // applied once, at the edge.
        let mut hop = ctx.clone();
        hop.format = ResponseFormat::Xml;

        info!(
            request = request.local_name(),
            server = %server.name,
            account = %hop.requested_account_id,
            hops = hop.hop_count,
            "Forwarding request"
        );

        let body = Envelope::new(Some(hop.to_header()), request.clone()).to_xml()?;
        let (body, hop) = (body.as_str(), &hop);
        send_reconnecting(&self.reconnect, &server.name, move || {
            self.post_once(body, server, hop)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Router};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    fn closed_port() -> std::net::SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let forwarder = HttpForwarder::new(Duration::from_secs(2))
            .unwrap()
            .with_reconnect(ReconnectConfig {
                attempts: 1,
                delay_ms: 0,
            });
        let server = Server::new("mbs2", format!("http://{}/service/soap", closed_port()));
        let err = forwarder
            .forward(
                &Element::new("NoOpRequest"),
                &server,
                &RequestContext::new("acct-a"),
            )
            .await
            .unwrap_err();

        match err {
            RouteError::Transport { server, .. } => assert_eq!(server, "mbs2"),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_token_is_sent() {
        let seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let recorded = seen.clone();
        let app = Router::new().route(
            "/service/soap",
            post(move |headers: HeaderMap| {
                let recorded = recorded.clone();
                async move {
                    *recorded.lock().unwrap() = headers
                        .get(PEER_TOKEN_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><NoOpResponse/></soap:Body></soap:Envelope>"#
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let forwarder = HttpForwarder::new(Duration::from_secs(2))
            .unwrap()
            .with_peer_token(Some("cluster-secret".into()));
        let server = Server::new("mbs2", format!("http://{}/service/soap", addr));
        let response = forwarder
            .forward(&Element::new("NoOpRequest"), &server, &RequestContext::new("acct-a"))
            .await
            .unwrap();

        assert_eq!(response.local_name(), "NoOpResponse");
        assert_eq!(seen.lock().unwrap().as_deref(), Some("cluster-secret"));
    }
}
