//! HTTP API.
//!
//! - `GET /`: static liveness string
//! - `GET /health`: service status and registry generation
//! - `GET /bridges?id=..&type=..&country_code=..`: bridges to probe;
//!   requires `Authorization: Bearer <token>`

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::config::ConfigFile;
use crate::distributor::{BridgeDistributor, ClientRequest};
use crate::error::{Error, Result};
use crate::registry::RegistryStore;

/// Body of `GET /`.
pub const INDEX_TEXT: &str = "Beware the Wolpertinger.\n";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigFile>,
    pub store: RegistryStore,
    pub distributor: BridgeDistributor,
}

// ── Response Types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApiError {
    pub ok: bool,
    pub error: String,
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    (
        status,
        Json(ApiError {
            ok: false,
            error: msg.to_string(),
        }),
    )
        .into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, &self.to_string())
    }
}

// ── Request Extraction ───────────────────────────────────────────────────────

/// Pull the bearer token out of the `Authorization` header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| Error::BadRequest("request has no 'Authorization' HTTP header".to_string()))?
        .to_str()
        .map_err(|_| Error::BadRequest("'Authorization' header is not valid ASCII".to_string()))?;

    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .ok_or_else(|| Error::BadRequest("authorization header contains no bearer token".to_string()))
}

fn values<'a>(params: &'a [(String, String)], key: &str) -> Vec<&'a str> {
    params
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .collect()
}

fn exactly_one(params: &[(String, String)], key: &str) -> Result<String> {
    match values(params, key).as_slice() {
        [] => Err(Error::BadRequest(format!("key '{}' not found in request", key))),
        [v] => Ok(v.to_string()),
        _ => Err(Error::BadRequest(format!("need exactly one '{}' key", key))),
    }
}

/// Build a [`ClientRequest`] from query parameters. `type` and
/// `country_code` must appear exactly once; `id` must be present but may be
/// empty.
pub fn extract_client_request(params: &[(String, String)]) -> Result<ClientRequest> {
    let id = values(params, "id")
        .first()
        .map(|v| v.to_string())
        .ok_or_else(|| Error::BadRequest("key 'id' not found in request".to_string()))?;

    Ok(ClientRequest {
        id,
        probe_type: exactly_one(params, "type")?,
        country_code: exactly_one(params, "country_code")?,
    })
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /: lets monitoring check that we're alive.
pub async fn index_handler() -> &'static str {
    INDEX_TEXT
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.store.snapshot();
    Json(json!({
        "status": if snapshot.generation > 0 { "ok" } else { "initializing" },
        "service": "wolpertinger",
        "version": env!("CARGO_PKG_VERSION"),
        "generation": snapshot.generation,
        "bridges": snapshot.registry.len(),
        "published_at": snapshot.published_at.to_rfc3339(),
    }))
}

/// GET /bridges: hand out bridges to an authenticated probe.
pub async fn bridges_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse> {
    let token = extract_bearer_token(&headers)?;
    let request = extract_client_request(&params)?;

    let owner = match state.config.authorize(&token) {
        Some(owner) => owner,
        None => {
            tracing::warn!(
                probe_type = request.probe_type.as_str(),
                "Received request with invalid authentication token"
            );
            return Err(Error::Unauthorized);
        }
    };

    tracing::info!(
        organisation = owner.organisation.as_str(),
        probe_type = request.probe_type.as_str(),
        country_code = request.country_code.as_str(),
        "Bridge request"
    );

    Ok(Json(state.distributor.select(&request)))
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/bridges", get(bridges_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
