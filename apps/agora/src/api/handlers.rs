//! # API Endpoint Handlers
//!
//! The query surface:
//! - `GET /agent`: inline query or skill via parameters
//! - `POST /agent`: raw query body or url-encoded form
//! - `POST /skill`: store a skill text
//! - `POST /callback/{correlation}`: out-of-band service responses
//!
//! Every non-reserved query parameter contributes input bindings; warnings
//! collected during federation come back in the `cx_warnings` header with
//! the status escalated to 203.

use super::{AppState, types::{ErrorResponse, HealthResponse, SkillResponse}};
use agora_core::{
    AgoraError, QueryOutcome, TupleSet,
    processor::{QuerySpec, TargetProperties},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::Value;

/// Parameters consumed by the surface itself, not part of the bindings.
const RESERVED_PARAMS: [&str; 2] = ["asset", "query"];

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// AGENT HANDLERS
// =============================================================================

/// Per-request target overrides carried as headers.
fn target_from_headers(headers: &HeaderMap) -> Option<TargetProperties> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let target = TargetProperties {
        target_url: get("x-agora-target-url"),
        auth_key: get("x-agora-auth-key"),
        auth_code: get("x-agora-auth-code"),
        allow_pattern: get("x-agora-allow"),
        deny_pattern: get("x-agora-deny"),
    };
    let any = target.target_url.is_some()
        || target.auth_key.is_some()
        || target.auth_code.is_some()
        || target.allow_pattern.is_some()
        || target.deny_pattern.is_some();
    any.then_some(target)
}

/// Assemble a query spec from request parameters and headers.
fn spec_from_request(
    state: &AppState,
    params: &[(String, String)],
    headers: &HeaderMap,
) -> QuerySpec {
    let find = |name: &str| {
        params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };
    let asset = find("asset");
    // A skill asset resolves through the store; anything else is the
    // logical graph the query addresses.
    let (skill, graph) = match asset {
        Some(asset) if state.processor.skills().is_skill(&asset) => (Some(asset), None),
        other => (None, other),
    };
    let bindings = TupleSet::from_params(
        params
            .iter()
            .filter(|(key, _)| !RESERVED_PARAMS.contains(&key.as_str()))
            .map(|(key, value)| (key.as_str(), value.as_str())),
    );
    QuerySpec {
        query: find("query"),
        skill,
        graph,
        content_type: None,
        bindings,
        target: target_from_headers(headers),
    }
}

/// Execute a query supplied via GET parameters.
pub async fn agent_get(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    let spec = spec_from_request(&state, &params, &headers);
    respond(state.processor.execute(spec).await)
}

/// Execute a query supplied as a POST body (raw or url-encoded form).
pub async fn agent_post(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let mut spec = spec_from_request(&state, &params, &headers);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if !body.is_empty() {
        spec.query = Some(body);
        spec.content_type = content_type;
    }
    respond(state.processor.execute(spec).await)
}

// =============================================================================
// SKILL HANDLER
// =============================================================================

/// Store a skill text under the asset key.
pub async fn skill_post(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    body: String,
) -> Response {
    let Some((_, asset)) = params.iter().find(|(key, _)| key == "asset") else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("missing 'asset' parameter")),
        )
            .into_response();
    };
    let key = state.processor.skills().put(asset, &body);
    (StatusCode::OK, Json(SkillResponse { key })).into_response()
}

// =============================================================================
// CALLBACK HANDLER
// =============================================================================

/// Complete an asynchronous service invocation out of band.
pub async fn callback_post(
    State(state): State<AppState>,
    Path(correlation): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    if state.engine.mapper().callbacks().complete(&correlation, payload) {
        StatusCode::OK.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("unknown correlation id")),
        )
            .into_response()
    }
}

// =============================================================================
// RESPONSE MAPPING
// =============================================================================

/// Map a query outcome (or failure) onto the HTTP surface.
fn respond(outcome: Result<QueryOutcome, AgoraError>) -> Response {
    match outcome {
        Ok(outcome) => {
            let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK);
            let mut response =
                (status, Json(outcome.result.to_sparql_json())).into_response();
            if !outcome.warnings.is_empty() {
                if let Some(value) = serde_json::to_string(&outcome.warnings)
                    .ok()
                    .and_then(|json| HeaderValue::from_str(&json).ok())
                {
                    let headers = response.headers_mut();
                    headers.insert("cx_warnings", value);
                    headers.insert(
                        header::ACCESS_CONTROL_EXPOSE_HEADERS,
                        HeaderValue::from_static("cx_warnings, content-length, content-type"),
                    );
                }
            }
            response
        }
        Err(error) => {
            let status = match &error {
                AgoraError::MalformedBinding(_) | AgoraError::SkillNotFound(_) => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::debug!(%error, status = status.as_u16(), "Query rejected");
            (status, Json(ErrorResponse::new(error.to_string()))).into_response()
        }
    }
}
