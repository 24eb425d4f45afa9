//! Content routes.
//!
//! # Responsibilities
//! - Serve the `/v2/` API root and blob reads, writes and deletes
//! - Pick the store for a repository from the topology
//! - Check every request against the current access-control rules
//! - Fall back to on-demand sync when a blob is missing
//!
//! # Design Decisions
//! - Repository names contain `/`, so `/v2/{*path}` is split on the last
//!   `/blobs/` by hand
//! - The live rules are loaded once per request; a reload mid-request is not
//!   observed by that request

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::extensions::Extensions;
use crate::lifecycle::live::SharedLiveConfig;
use crate::security::access_control::{AccessRules, Action, Subject};
use crate::storage::{Digest, StorageTopology};

/// Upper bound on a single blob upload.
pub const MAX_BLOB_BYTES: usize = 512 * 1024 * 1024;

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RegistryConfig>,
    pub live: SharedLiveConfig,
    pub topology: Arc<StorageTopology>,
    pub extensions: Arc<dyn Extensions>,
}

/// Registry API error body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "errors": [{ "code": self.code, "message": self.message }] });
        (self.status, Json(body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidDigest(msg) => ApiError::new(StatusCode::BAD_REQUEST, "DIGEST_INVALID", msg),
            RegistryError::Config(msg) => ApiError::new(StatusCode::BAD_REQUEST, "NAME_INVALID", msg),
            other => {
                tracing::error!(error = %other, "storage failure");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "UNKNOWN", other.to_string())
            }
        }
    }
}

/// Split `<name>/blobs/<digest>`.
fn parse_blob_path(path: &str) -> Result<(&str, Digest), ApiError> {
    let (repo, digest) = path
        .rsplit_once("/blobs/")
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "UNSUPPORTED", "unknown route"))?;
    let digest = digest.parse::<Digest>()?;
    Ok((repo, digest))
}

impl AppState {
    fn authorize(&self, request: &Request<Body>, repo: &str, action: Action) -> Result<(), ApiError> {
        let subject = request.extensions().get::<Subject>();
        let live = self.live.load();
        let rules = AccessRules {
            access_control: live.access_control.as_ref(),
            allow_read_access: self.config.http.allow_read_access,
            has_password_auth: self.config.http.has_password_auth(),
        };

        if rules.is_allowed(subject, repo, action) {
            return Ok(());
        }
        tracing::debug!(repo, action = action.as_str(), subject = ?subject, "access denied");
        Err(match subject {
            Some(_) => ApiError::new(StatusCode::FORBIDDEN, "DENIED", "requested access to the resource is denied"),
            None => ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "authentication required"),
        })
    }

    /// Try to pull a missing blob from upstream. Returns whether it now exists.
    async fn sync_on_demand(&self, repo: &str, digest: &Digest) -> bool {
        let live = self.live.load_full();
        if !live.on_demand_sync() {
            return false;
        }

        let config = live.overlay(&self.config);
        let extensions = self.extensions.clone();
        let topology = self.topology.clone();
        let (repo_owned, reference) = (repo.to_string(), digest.to_string());
        let synced = tokio::task::spawn_blocking(move || {
            extensions.sync_one_image(&config, &topology, &repo_owned, &reference, false)
        })
        .await;

        match synced {
            Ok(Ok(())) => self
                .topology
                .store_for(repo)
                .has_blob(repo, digest)
                .await
                .unwrap_or(false),
            Ok(Err(e)) => {
                tracing::warn!(repo, %digest, error = %e, "on-demand sync failed");
                false
            }
            Err(e) => {
                tracing::error!(repo, %digest, error = %e, "on-demand sync task panicked");
                false
            }
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v2/", get(api_root))
        .route("/v2/{*path}", get(get_blob).put(put_blob).delete(delete_blob))
        .with_state(state)
}

async fn api_root() -> Json<serde_json::Value> {
    Json(json!({}))
}

async fn get_blob(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let (repo, digest) = parse_blob_path(&path)?;
    state.authorize(&request, repo, Action::Read)?;
    let store = state.topology.store_for(repo);

    let mut blob = store.get_blob(repo, &digest).await?;
    if blob.is_none() && state.sync_on_demand(repo, &digest).await {
        blob = store.get_blob(repo, &digest).await?;
    }

    match blob {
        Some(data) => Ok((
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
                (
                    header::HeaderName::from_static(DOCKER_CONTENT_DIGEST),
                    HeaderValue::from_str(&digest.to_string()).map_err(|e| {
                        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "UNKNOWN", e.to_string())
                    })?,
                ),
            ],
            data,
        )
            .into_response()),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "BLOB_UNKNOWN", "blob unknown to registry")),
    }
}

async fn put_blob(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let (repo, digest) = parse_blob_path(&path)?;
    state.authorize(&request, repo, Action::Create)?;

    let data: Bytes = axum::body::to_bytes(request.into_body(), MAX_BLOB_BYTES)
        .await
        .map_err(|e| ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "BLOB_UPLOAD_INVALID", e.to_string()))?;

    state.topology.store_for(repo).put_blob(repo, &digest, data).await?;
    tracing::debug!(repo, %digest, "blob stored");

    let location = format!("/v2/{repo}/blobs/{digest}");
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location), (header::HeaderName::from_static(DOCKER_CONTENT_DIGEST), digest.to_string())],
    )
        .into_response())
}

async fn delete_blob(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let (repo, digest) = parse_blob_path(&path)?;
    state.authorize(&request, repo, Action::Delete)?;

    if state.topology.store_for(repo).delete_blob(repo, &digest).await? {
        Ok(StatusCode::ACCEPTED.into_response())
    } else {
        Err(ApiError::new(StatusCode::NOT_FOUND, "BLOB_UNKNOWN", "blob unknown to registry"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AccessControlConfig, PolicyGroup};
    use crate::extensions::DisabledExtensions;
    use crate::lifecycle::live::LiveConfig;
    use crate::storage::{LocalImageStore, StoreOptions};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(dir: &std::path::Path, config: RegistryConfig) -> AppState {
        let store = LocalImageStore::new(
            dir,
            StoreOptions {
                gc: false,
                gc_delay: Duration::ZERO,
                dedupe: false,
                commit: false,
            },
        )
        .unwrap();
        AppState {
            live: LiveConfig::shared(&config),
            config: Arc::new(config),
            topology: Arc::new(StorageTopology::new(Arc::new(store), BTreeMap::new())),
            extensions: Arc::new(DisabledExtensions),
        }
    }

    fn request(method: &str, uri: &str, body: &'static [u8]) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn blob_path_parsing() {
        let digest = Digest::of(b"x");
        let path = format!("team/app/blobs/{digest}");
        let (repo, parsed) = parse_blob_path(&path).unwrap();
        assert_eq!(repo, "team/app");
        assert_eq!(parsed, digest);

        assert!(parse_blob_path("team/app/manifests/latest").is_err());
        assert!(parse_blob_path("team/app/blobs/sha256:short").is_err());
    }

    #[tokio::test]
    async fn api_root_is_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let response = routes(state(dir.path(), RegistryConfig::default()))
            .oneshot(request("GET", "/v2/", b""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"{}");
    }

    #[tokio::test]
    async fn blob_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes(state(dir.path(), RegistryConfig::default()));
        let digest = Digest::of(b"layer");
        let uri = format!("/v2/library/alpine/blobs/{digest}");
        let uri = uri.as_str();

        let missing = app.clone().oneshot(request("GET", uri, b"")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let created = app.clone().oneshot(request("PUT", uri, b"layer")).await.unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        assert_eq!(created.headers()[header::LOCATION], uri);

        let fetched = app.clone().oneshot(request("GET", uri, b"")).await.unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);
        let body = axum::body::to_bytes(fetched.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"layer");

        let deleted = app.clone().oneshot(request("DELETE", uri, b"")).await.unwrap();
        assert_eq!(deleted.status(), StatusCode::ACCEPTED);
        let again = app.oneshot(request("DELETE", uri, b"")).await.unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_content_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes(state(dir.path(), RegistryConfig::default()));
        let uri = format!("/v2/repo/blobs/{}", Digest::of(b"expected"));

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(uri)
                    .body(Body::from("other"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn live_rules_apply_to_next_request() {
        let dir = tempfile::tempdir().unwrap();
        let app_state = state(dir.path(), RegistryConfig::default());
        let app = routes(app_state.clone());
        let uri = format!("/v2/locked/blobs/{}", Digest::of(b"data"));

        let allowed = app
            .clone()
            .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::NOT_FOUND);

        let mut repositories = BTreeMap::new();
        repositories.insert(
            "locked".to_string(),
            PolicyGroup {
                policies: vec![],
                default_policy: vec![],
                anonymous_policy: vec![],
            },
        );
        app_state.live.store(Arc::new(LiveConfig {
            access_control: Some(AccessControlConfig {
                repositories,
                admin_policy: None,
            }),
            sync: None,
        }));

        let denied = app
            .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    }
}
