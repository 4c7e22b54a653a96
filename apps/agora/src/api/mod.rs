//! # Agora HTTP API Module
//!
//! The axum-based query surface.
//!
//! ## Endpoints
//!
//! - `GET /agent` - Execute an inline query or a stored skill
//! - `POST /agent` - Execute a query body (raw or url-encoded form)
//! - `POST /skill` - Store a skill
//! - `POST /callback/{correlation}` - Deliver an out-of-band service answer
//! - `GET /health` - Health check
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `AGORA_CORS_ORIGINS`: Comma-separated allowed origins, or "*" (default: localhost only)
//! - `AGORA_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `AGORA_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

// Re-exports for external use
pub use auth::get_api_key_from_env;
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
// Re-export handlers and types for integration tests (via `agora::api::*`)
#[allow(unused_imports)]
pub use handlers::{agent_get, agent_post, callback_post, health_handler, skill_post};
#[allow(unused_imports)]
pub use types::{ErrorResponse, HealthResponse, SkillResponse};

use crate::config::Settings;
use crate::engine::FederationEngine;
use crate::remote::HttpBackend;
use agora_core::{
    AgoraError, InMemorySkillStore, InProcessBackend, QueryProcessor, RemotingConfig,
};
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state: the processor plus the engine behind it.
#[derive(Clone)]
pub struct AppState {
    /// Query orchestration.
    pub processor: Arc<QueryProcessor>,
    /// The federation engine, reachable for callback completion.
    pub engine: Arc<FederationEngine>,
}

impl AppState {
    /// Wire the full federation stack from a validated configuration.
    ///
    /// `local` carries the in-process callables answering `local:` service
    /// targets.
    pub fn from_config(
        settings: &Settings,
        remoting: RemotingConfig,
        local: InProcessBackend,
    ) -> Result<Self, AgoraError> {
        let skills = InMemorySkillStore::from_pattern(&settings.agent.asset_reference_pattern)
            .map_err(|e| {
                AgoraError::ConfigInvalid(format!("asset reference pattern: {e}"))
            })?;
        let backend = Arc::new(HttpBackend::new(local));
        let engine = Arc::new(FederationEngine::new(
            Arc::new(remoting),
            backend,
            settings.agent.remote_timeout(),
        ));
        let processor = QueryProcessor::new(
            Arc::clone(&engine) as Arc<dyn agora_core::QueryEngine>,
            Arc::new(skills),
            settings.agent.processor_config(),
        )?;
        Ok(Self {
            processor: Arc::new(processor),
            engine,
        })
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from `AGORA_CORS_ORIGINS`.
///
/// Defaults to localhost origins; `*` opts into a permissive policy. The
/// `cx_warnings` header is always exposed so browser clients can read
/// partial-result metadata.
fn build_cors_layer() -> CorsLayer {
    let exposed = [
        HeaderName::from_static("cx_warnings"),
        header::CONTENT_LENGTH,
        header::CONTENT_TYPE,
    ];
    match std::env::var("AGORA_CORS_ORIGINS").ok().as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (AGORA_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive().expose_headers(exposed)
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(value) => Some(value),
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();
            if allowed.is_empty() {
                tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
                build_localhost_cors().expose_headers(exposed)
            } else {
                CorsLayer::new()
                    .allow_origin(allowed)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                    .expose_headers(exposed)
            }
        }
        None => {
            tracing::info!("CORS: No AGORA_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors().expose_headers(exposed)
        }
    }
}

/// Restrictive CORS: localhost origins only.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. CORS - handles preflight requests
/// 2. Tracing - logs all requests
/// 3. Rate Limiting - protects against overload (if enabled)
/// 4. Authentication - validates API key (if configured)
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - the query surface is publicly accessible! \
             Set AGORA_API_KEY to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route(
            "/agent",
            get(handlers::agent_get).post(handlers::agent_post),
        )
        .route("/skill", post(handlers::skill_post))
        .route("/callback/{correlation}", post(handlers::callback_post));

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server.
pub async fn run_server(addr: &str, state: AppState) -> Result<(), AgoraError> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AgoraError::ConfigInvalid(format!("bind failed on {addr}: {e}")))?;

    tracing::info!("Agora query agent listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| AgoraError::EngineFailure(format!("server error: {e}")))
}
