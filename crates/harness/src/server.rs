//! HTTP surface.
//!
//! Vendor API requests under the configured base path are handed to
//! [`Harness::handle`] through the router's fallback. A handful of control
//! endpoints sit beside them; those are neither recorded nor gated:
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /.well-known/jwks.json` | published verification key set |
//! | `GET /_harness/requests` | recorder snapshot |
//! | `GET /_harness/metrics` | outcome counters and latency percentiles |
//! | `GET /_harness/health` | liveness, backend mode |
//! | `POST /_harness/tokens` | mint a token for load tools |

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::HarnessConfig,
    error::{HarnessError, HarnessResult},
    pipeline::{Harness, HarnessResponse, InboundRequest},
};

#[derive(Clone)]
struct AppState {
    harness: Arc<Harness>,
    base_path: Arc<str>,
}

/// Body of `POST /_harness/tokens`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MintTokenRequest {
    subject: String,
    organization: String,
    #[serde(default)]
    scopes: BTreeSet<String>,
}

/// Builds the router serving `harness` with the limits and base path of
/// `config`.
///
/// Bodies over the configured limit are answered with 413 by
/// [`DefaultBodyLimit`] before the vendor handler runs, so they are never
/// recorded.
pub fn router(harness: Arc<Harness>, config: &HarnessConfig) -> Router {
    let state = AppState { harness, base_path: Arc::from(config.base_path()) };

    Router::new()
        .route("/.well-known/jwks.json", get(jwks))
        .route("/_harness/requests", get(requests))
        .route("/_harness/metrics", get(metrics))
        .route("/_harness/health", get(health))
        .route("/_harness/tokens", post(mint_token))
        .fallback(vendor)
        .layer(DefaultBodyLimit::max(config.body_limit()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the configured address and serves until Ctrl-C.
///
/// # Errors
///
/// Returns [`HarnessError::Io`] if the address cannot be bound or the server
/// fails.
pub async fn serve(harness: Arc<Harness>, config: &HarnessConfig) -> HarnessResult<()> {
    let listener = TcpListener::bind(config.listen()).await?;
    info!(
        addr = %listener.local_addr()?,
        mode = %harness.mode(),
        base_path = config.base_path(),
        kid = harness.token_service().kid(),
        "Vendor harness listening"
    );

    axum::serve(listener, router(Arc::clone(&harness), config))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    harness.metrics().log_metrics();
    info!("Vendor harness stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C; shutting down");
    }
}

/// Path relative to `base`, or `None` when `path` lies outside it.
fn relative_path<'a>(base: &str, path: &'a str) -> Option<&'a str> {
    if base == "/" {
        return Some(path);
    }
    match path.strip_prefix(base)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

async fn vendor(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(path) = relative_path(&state.base_path, uri.path()) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "not found" }))).into_response();
    };

    let mut header_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &headers {
        header_map
            .entry(name.as_str().to_owned())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    let request = InboundRequest {
        method: method.as_str().to_owned(),
        path: path.to_owned(),
        query: uri.query().map(str::to_owned),
        headers: header_map,
        body,
    };

    let HarnessResponse { status, body } = state.harness.handle(request).await;
    (status, Json(body)).into_response()
}

async fn jwks(State(state): State<AppState>) -> Response {
    Json(state.harness.token_service().key_set().clone()).into_response()
}

async fn requests(State(state): State<AppState>) -> Response {
    Json(state.harness.recorder().snapshot()).into_response()
}

async fn metrics(State(state): State<AppState>) -> Response {
    Json(state.harness.metrics().snapshot()).into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    let resources = state.harness.backend().as_simulated().map(|backend| backend.resource_counts());
    Json(json!({
        "status": "ok",
        "mode": state.harness.mode(),
        "resources": resources,
    }))
    .into_response()
}

async fn mint_token(
    State(state): State<AppState>,
    Json(request): Json<MintTokenRequest>,
) -> Response {
    let tokens = state.harness.token_service();
    match tokens.issue(&request.subject, &request.organization, request.scopes) {
        Ok(token) => Json(json!({ "token": token })).into_response(),
        Err(e) => {
            let error = HarnessError::backend_fault(format!("cannot issue token: {e}"));
            let HarnessResponse { status, body } = HarnessResponse::from_error(&error);
            (status, Json(body)).into_response()
        },
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("/api/v2", "/api/v2/login", Some("/login"))]
    #[case("/api/v2", "/api/v2", Some("/"))]
    #[case("/api/v2", "/api/v2x/login", None)]
    #[case("/api/v2", "/other", None)]
    #[case("/", "/login", Some("/login"))]
    fn test_relative_path(#[case] base: &str, #[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(relative_path(base, path), expected);
    }
}
