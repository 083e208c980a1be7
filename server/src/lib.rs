use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use engine::config::SearchConfig;
use engine::search::title_for;
use engine::{IndexError, QueryEngine, QuerySession, SearchHit};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

type ApiError = (StatusCode, String);

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    /// Falls back to the configured default limit; `0` asks for no results.
    pub k: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

/// Shared serving state. The session behind the lock is replaced whole on
/// reload; in-flight queries keep the `Arc` they started with.
#[derive(Clone)]
pub struct AppState {
    pub index_root: PathBuf,
    pub session: Arc<RwLock<Arc<QuerySession>>>,
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn open(index_dir: impl Into<PathBuf>, search: SearchConfig, admin_token: Option<String>) -> Result<Self> {
        let index_root = index_dir.into();
        let session = QuerySession::open(&index_root, search)?;
        Ok(Self { index_root, session: Arc::new(RwLock::new(Arc::new(session))), admin_token })
    }

    pub fn session(&self) -> Arc<QuerySession> {
        self.session.read().clone()
    }
}

pub fn router(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .route("/index/reload", post(reload_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let start = Instant::now();
    let session = state.session();
    let cfg = session.config();
    let k = params.k.unwrap_or(cfg.default_limit).min(cfg.max_limit);
    let deadline = start + Duration::from_millis(cfg.timeout_ms);

    let query = params.q.clone();
    let results = tokio::task::spawn_blocking(move || {
        let terms: Vec<&str> = query.split_whitespace().collect();
        QueryEngine::new(&session).with_deadline(deadline).search(&terms, k)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    .map_err(query_error)?;

    let took_s = start.elapsed().as_secs_f64();
    tracing::debug!(q = %params.q, hits = results.len(), took_s, "search");
    Ok(Json(SearchResponse { query: params.q, took_s, total_hits: results.len(), results }))
}

fn query_error(err: anyhow::Error) -> ApiError {
    match err.downcast_ref::<IndexError>() {
        Some(IndexError::DeadlineExceeded) => (StatusCode::GATEWAY_TIMEOUT, "query deadline exceeded".into()),
        _ => {
            tracing::error!(error = %format!("{err:#}"), "query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "query failed".into())
        }
    }
}

pub async fn doc_handler(State(state): State<AppState>, Path(doc_id): Path<u32>) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state.session();
    let url = session.url(doc_id).ok_or((StatusCode::NOT_FOUND, "not found".into()))?;
    Ok(Json(serde_json::json!({
        "doc_id": doc_id,
        "url": url,
        "title": title_for(url),
        "pagerank": session.pagerank(doc_id),
    })))
}

/// Reopen the index directory and swap the new session in.
async fn reload_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let root = state.index_root.clone();
    let cfg = state.session().config().clone();
    let fresh = tokio::task::spawn_blocking(move || QuerySession::open(&root, cfg))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| {
            tracing::error!(error = %format!("{e:#}"), "reload failed, keeping current index");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("reload failed: {e}"))
        })?;
    let docs = fresh.num_docs();
    *state.session.write() = Arc::new(fresh);
    tracing::info!(docs, root = %state.index_root.display(), "index reloaded");
    Ok(Json(serde_json::json!({ "reloaded": true, "docs": docs })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
