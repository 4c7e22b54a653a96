//! # API Request/Response Types
//!
//! JSON structures of the HTTP surface. Query answers themselves are
//! rendered in the SPARQL-JSON shape by `agora_core::ResultSet`.

use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// SKILL RESPONSE
// =============================================================================

/// Answer to a stored skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillResponse {
    pub key: String,
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Uniform error body for 4xx/5xx answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}
