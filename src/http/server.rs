//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the axum Router with content and extension routes
//! - Wire up middleware (rate limiting, request ID, CORS, session log,
//!   panic recovery, audit)
//! - Serve on a pre-bound listener, plain or TLS, under a shared `Handle`
//!
//! # Design Decisions
//! - Layers are added innermost first; the last `.layer` runs first, so
//!   rate limiting is added last
//! - The `Handle` is owned by the controller, which uses it for the bounded
//!   drain at shutdown

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use axum::{http::HeaderName, middleware, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::http::middleware::{audit_logger, cors_middleware, session_logger, CorsState};
use crate::http::routes::{routes, AppState};
use crate::security::rate_limit::{rate_limit_middleware, RateLimiterState};

const X_REQUEST_ID: &str = "x-request-id";

/// Build the full application router.
pub fn build_router(config: &RegistryConfig, state: AppState) -> Router {
    let extensions = state.extensions.clone();
    let topology = state.topology.clone();

    let mut router = routes(state);
    router = extensions.setup_metrics_routes(config, router, &topology);
    router = extensions.setup_search_routes(config, router, &topology);

    if config.log.audit.is_some() {
        router = router.layer(middleware::from_fn(audit_logger));
    }

    let request_id = HeaderName::from_static(X_REQUEST_ID);
    router = router
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn(session_logger))
        .layer(middleware::from_fn_with_state(
            CorsState::new(&config.http.allow_origin),
            cors_middleware,
        ))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid));

    if let Some(rate_limit) = &config.http.rate_limit {
        router = router.layer(middleware::from_fn_with_state(
            Arc::new(RateLimiterState::new(rate_limit)),
            rate_limit_middleware,
        ));
    }

    router
}

/// Serve `router` until `handle` shuts it down.
pub async fn serve(
    router: Router,
    listener: TcpListener,
    tls: Option<RustlsConfig>,
    handle: Handle,
) -> RegistryResult<()> {
    let addr = listener.local_addr()?;
    let app = router.into_make_service_with_connect_info::<SocketAddr>();

    let result = match tls {
        Some(tls) => {
            tracing::info!(address = %addr, "HTTPS server starting");
            axum_server::from_tcp_rustls(listener, tls).handle(handle).serve(app).await
        }
        None => {
            tracing::info!(address = %addr, "HTTP server starting");
            axum_server::from_tcp(listener).handle(handle).serve(app).await
        }
    };

    result.map_err(RegistryError::Serve)?;
    tracing::info!("HTTP server stopped");
    Ok(())
}
