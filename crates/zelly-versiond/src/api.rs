use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::debug;
use zelly_core::AppVersion;

use crate::{
    audit::{AuditEntry, AuditLog},
    catalog::VersionCatalog,
};

/// Version assumed for a check that names none.
pub const DEFAULT_CURRENT_VERSION: &str = "1.0.0";

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<VersionCatalog>,
    pub audit: AuditLog,
}

#[derive(Debug, Deserialize)]
pub struct CheckParams {
    pub current: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/check", get(get_check))
        .route("/version/:version", get(get_version))
        .route("/download/:version", post(post_download))
        .route("/versions", get(get_versions))
        .route("/changelog/:version", get(get_changelog))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn timestamp() -> String {
    Local::now().to_rfc3339()
}

fn client_ip(connect_info: Option<ConnectInfo<SocketAddr>>) -> String {
    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// GET /
pub async fn get_root() -> Response {
    Json(json!({
        "service": "Zelly Update Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "timestamp": timestamp(),
    }))
    .into_response()
}

// GET /health
pub async fn get_health() -> Response {
    Json(json!({
        "status": "healthy",
        "timestamp": timestamp(),
    }))
    .into_response()
}

// GET /check?current=1.0.2
pub async fn get_check(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<CheckParams>,
) -> Response {
    let current = params
        .current
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CURRENT_VERSION.to_string());

    state
        .audit
        .record(AuditEntry::check(client_ip(connect_info), current.clone()));

    let version = match AppVersion::parse(&current) {
        Ok(v) => v,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid version '{}': {}", current, e),
            )
        }
    };

    let answer = state.catalog.check(&version);
    debug!(
        "Check from {} answered, update available: {}",
        current,
        answer.is_update_available()
    );
    Json(answer).into_response()
}

// GET /version/{version}
pub async fn get_version(State(state): State<AppState>, Path(version): Path<String>) -> Response {
    match AppVersion::parse(&version)
        .ok()
        .and_then(|v| state.catalog.get(&v))
    {
        Some(info) => Json(info).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Version not found"),
    }
}

// POST /download/{version}
pub async fn post_download(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Path(version): Path<String>,
) -> Response {
    let Some(info) = AppVersion::parse(&version)
        .ok()
        .and_then(|v| state.catalog.get(&v))
    else {
        return error_response(StatusCode::NOT_FOUND, "Version not found");
    };

    let key = info.version.to_string();
    state
        .audit
        .record(AuditEntry::download(client_ip(connect_info), key.clone()));

    Json(json!({
        "download_url": info.download_url,
        "file_size": info.file_size,
        "sha256_hash": info.sha256_hash,
        "download_count": state.audit.downloads(&key),
        "last_updated": info.release_date,
    }))
    .into_response()
}

// GET /versions
pub async fn get_versions(State(state): State<AppState>) -> Response {
    let versions: serde_json::Map<String, Value> = state
        .catalog
        .iter()
        .filter_map(|info| Some((info.version.to_string(), serde_json::to_value(info).ok()?)))
        .collect();
    Json(json!({
        "versions": versions,
        "latest": state.catalog.latest_version(),
        "total_versions": state.catalog.len(),
    }))
    .into_response()
}

// GET /changelog/{version}
pub async fn get_changelog(State(state): State<AppState>, Path(version): Path<String>) -> Response {
    match AppVersion::parse(&version)
        .ok()
        .and_then(|v| state.catalog.get(&v))
    {
        Some(info) => Json(json!({
            "version": info.version,
            "release_notes": info.release_notes,
            "release_date": info.release_date,
            "changelog_url": info.changelog_url,
        }))
        .into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Version not found"),
    }
}

// GET /stats
pub async fn get_stats(State(state): State<AppState>) -> Response {
    Json(json!({
        "total_update_checks": state.audit.total_checks(),
        "recent_checks_24h": state.audit.recent_checks(Local::now()),
        "latest_version": state.catalog.latest_version(),
        "server_time": Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    }))
    .into_response()
}
