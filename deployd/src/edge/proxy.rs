//! Reverse proxy handler

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use http::{header, HeaderMap, StatusCode};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::edge::{resolve_artifact_key, subdomain_of, upstream_url};
use crate::errors::DeployError;
use crate::store::DeploymentStore;

/// Largest request body forwarded upstream
const MAX_REQUEST_BODY: usize = 10 * 1024 * 1024;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared router state
pub struct EdgeState {
    pub store: Arc<dyn DeploymentStore>,
    pub client: reqwest::Client,
    pub artifact_base_url: String,
}

impl EdgeState {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        artifact_base_url: impl Into<String>,
    ) -> Result<Self, DeployError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self {
            store,
            client,
            artifact_base_url: artifact_base_url.into(),
        })
    }
}

/// Router that proxies every request
pub fn edge_router(state: Arc<EdgeState>) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug)]
enum ProxyError {
    MissingHost,
    BadRequest(String),
    Lookup(DeployError),
    Upstream(reqwest::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ProxyError::MissingHost => (StatusCode::BAD_REQUEST, "Missing Host header".to_string()),
            ProxyError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ProxyError::Lookup(e) => {
                warn!("Project lookup failed: {}", e);
                (StatusCode::BAD_GATEWAY, "Project lookup failed".to_string())
            }
            ProxyError::Upstream(e) => {
                warn!("Upstream request failed: {}", e);
                (StatusCode::BAD_GATEWAY, "Upstream request failed".to_string())
            }
        };
        (status, message).into_response()
    }
}

async fn proxy_handler(State(state): State<Arc<EdgeState>>, request: Request) -> Response {
    match forward(&state, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn forward(state: &EdgeState, request: Request) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .ok_or(ProxyError::MissingHost)?;
    let subdomain = subdomain_of(&host).ok_or(ProxyError::MissingHost)?;

    let artifact_key = resolve_artifact_key(state.store.as_ref(), &subdomain)
        .await
        .map_err(ProxyError::Lookup)?;
    let url = upstream_url(
        &state.artifact_base_url,
        &artifact_key,
        parts.uri.path(),
        parts.uri.query(),
    );
    debug!("{} {} -> {}", parts.method, host, url);

    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| ProxyError::BadRequest(format!("Unreadable request body: {e}")))?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    let upstream = state
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(ProxyError::Upstream)?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
