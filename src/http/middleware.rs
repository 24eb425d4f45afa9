//! Request middleware: CORS, session logging and audit logging.
//!
//! # Design Decisions
//! - Each middleware is a plain `axum::middleware::from_fn` function so the
//!   chain in `server.rs` reads top to bottom
//! - The session logger is the single place request metrics are recorded
//! - Audit events go to the `audit` target; the logging setup routes them

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::observability::logging::AUDIT_TARGET;
use crate::observability::metrics;
use crate::security::access_control::Subject;

const X_REQUEST_ID: &str = "x-request-id";

fn client_of(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn request_id_of(request: &Request<Body>) -> String {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// CORS settings applied to every response.
#[derive(Debug, Clone)]
pub struct CorsState {
    pub allow_origin: HeaderValue,
}

impl CorsState {
    /// `allow_origin`, or `*` when empty or not a valid header value.
    pub fn new(allow_origin: &str) -> Arc<Self> {
        let allow_origin = match allow_origin {
            "" => HeaderValue::from_static("*"),
            origin => HeaderValue::from_str(origin).unwrap_or_else(|_| {
                tracing::warn!(origin, "invalid allow_origin, falling back to *");
                HeaderValue::from_static("*")
            }),
        };
        Arc::new(Self { allow_origin })
    }
}

pub async fn cors_middleware(
    State(cors): State<Arc<CorsState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, cors.allow_origin.clone());
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("HEAD,GET,POST,OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Authorization"),
    );
    response
}

/// One log line per request, plus request metrics.
pub async fn session_logger(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request_id_of(&request);
    let client = client_of(&request);

    let response = next.run(request).await;
    let status = response.status();

    tracing::info!(
        request_id = %request_id,
        client = %client,
        method = %method,
        path = %path,
        status = status.as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "HTTP API"
    );
    metrics::record_request(method.as_str(), status.as_u16(), start);

    response
}

fn is_mutation(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// Emit an audit event for every mutating request.
pub async fn audit_logger(request: Request<Body>, next: Next) -> Response {
    if !is_mutation(request.method()) {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = client_of(&request);
    let subject = request
        .extensions()
        .get::<Subject>()
        .map(|s| s.username.clone())
        .unwrap_or_default();

    let response = next.run(request).await;

    tracing::info!(
        target: AUDIT_TARGET,
        client = %client,
        subject = %subject,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        "HTTP API Audit"
    );

    response
}
