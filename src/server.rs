//! HTTP front end for the routing engine
//!
//! # Routes
//!
//! - `GET /health` - Liveness plus the registered request names
//! - `POST /service/soap` - SOAP 1.2 endpoint; the authenticated account is
//!   taken from the `X-Auth-Account` header
//!
//! Only peers presenting the deployment's `X-Peer-Token` may claim earlier
//! hops (`<mountpoint/>`, `via`); from anyone else those claims are dropped.
//!
//! Faults are returned as `soap:Fault` bodies with status 500.

use crate::config::RouterConfig;
use crate::context::{RequestContext, ResponseFormat};
use crate::engine::Engine;
use crate::soap::{fault_element, Envelope};
use crate::transport::{AUTH_ACCOUNT_HEADER, PEER_TOKEN_HEADER};
use crate::{Result, RouteError};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Content type of XML responses
pub const SOAP_XML_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Path of the SOAP endpoint
pub const SOAP_PATH: &str = "/service/soap";

struct AppState {
    engine: Engine,
    peer_token: Option<String>,
    started: DateTime<Utc>,
}

impl AppState {
    fn is_peer(&self, headers: &HeaderMap) -> bool {
        match (&self.peer_token, headers.get(PEER_TOKEN_HEADER)) {
            (Some(expected), Some(presented)) => presented.as_bytes() == expected.as_bytes(),
            _ => false,
        }
    }
}

/// SOAP server wrapping an [`Engine`]
pub struct SoapServer {
    state: Arc<AppState>,
}

impl SoapServer {
    /// A server that trusts no peer
    pub fn new(engine: Engine) -> Self {
        Self::with_peer_token(engine, None)
    }

    /// A server trusting hop claims from callers presenting `peer_token`
    pub fn with_peer_token(engine: Engine, peer_token: Option<String>) -> Self {
        Self {
            state: Arc::new(AppState {
                engine,
                peer_token,
                started: Utc::now(),
            }),
        }
    }

    /// Build the engine and server from configuration
    pub fn from_config(config: &RouterConfig) -> Result<Self> {
        Ok(Self::with_peer_token(
            Engine::from_config(config)?,
            config.proxy.peer_token.clone(),
        ))
    }

    /// The axum router serving this engine
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route(SOAP_PATH, post(soap))
            .with_state(self.state.clone())
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            addr = %addr,
            server = self.state.engine.dispatcher().local_server(),
            "SOAP server listening"
        );
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Bind and serve on the given address
    pub async fn run(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RouteError::Config(format!("Failed to bind {}: {}", addr, e)))?;
        self.serve(listener).await
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse<'a> {
    status: &'static str,
    server: &'a str,
    handlers: Vec<&'a str>,
    started_at: DateTime<Utc>,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server: state.engine.dispatcher().local_server(),
        handlers: state.engine.request_names(),
        started_at: state.started,
    })
    .into_response()
}

async fn soap(State(state): State<Arc<AppState>>, headers: HeaderMap, body: String) -> Response {
    let envelope = match Envelope::parse(&body) {
        Ok(envelope) => envelope,
        Err(e) => return fault_response(&e, ResponseFormat::Xml),
    };

    let authenticated = headers
        .get(AUTH_ACCOUNT_HEADER)
        .and_then(|v| v.to_str().ok());
    let mut ctx = match RequestContext::from_header(envelope.context.as_ref(), authenticated) {
        Ok(ctx) => ctx,
        Err(e) => return fault_response(&e, ResponseFormat::Xml),
    };
    if !state.is_peer(&headers) {
        ctx.clear_peer_claims();
    }

    let request_name = envelope.body.local_name().to_string();
    tracing::debug!(
        request = %request_name,
        account = %ctx.requested_account_id,
        hops = ctx.hop_count,
        "Handling SOAP request"
    );

    match state.engine.handle(envelope.body, &ctx).await {
        Ok(response) => render(&Envelope::new(None, response), ctx.format, StatusCode::OK),
        Err(e) => {
            tracing::warn!(
                request = %request_name,
                code = %e.fault_code(),
                error = %e,
                "Request failed"
            );
            fault_response(&e, ctx.format)
        }
    }
}

fn fault_response(err: &RouteError, format: ResponseFormat) -> Response {
    render(
        &Envelope::new(None, fault_element(err)),
        format,
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}

fn render(envelope: &Envelope, format: ResponseFormat, status: StatusCode) -> Response {
    match format {
        ResponseFormat::Js => (status, Json(envelope.to_json())).into_response(),
        ResponseFormat::Xml => match envelope.to_xml() {
            Ok(xml) => (status, [(header::CONTENT_TYPE, SOAP_XML_CONTENT_TYPE)], xml).into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize response");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: e.to_string(),
                    }),
                )
                    .into_response()
            }
        },
    }
}

/// Fallback body when a response cannot be rendered as SOAP
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
