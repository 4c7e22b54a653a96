//! Integration tests for the Agora HTTP API.
//!
//! Uses axum-test to drive the router without starting a real server.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use agora::api::{AppState, HealthResponse, SkillResponse, create_router};
use agora::config;
use agora_core::{AgoraError, InProcessBackend};
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use std::sync::Mutex;

/// Mutex to serialize tests that touch environment variables.
static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

const FLAKY: &str = "https://svc.example.com#Flaky";
const ECHO: &str = "https://svc.example.com#Echo";

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Guard wrapper that holds the mutex and scrubs auth state on drop.
struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        // SAFETY: Tests run sequentially under ENV_TEST_MUTEX, so no
        // concurrent env access.
        unsafe { std::env::remove_var("AGORA_API_KEY") };
    }
}

fn test_config() -> String {
    format!(
        r##"
[agent]
source_tenant = "urn:agora:tenant:test"
poll_interval_ms = 10

[service."{ECHO}"]
target = "local:echo"

[service."{ECHO}".arguments."https://svc.example.com#in"]
name = "in"

[service."{ECHO}".result.outputs."https://svc.example.com#out"]
path = "echoed"

[service."{FLAKY}"]
target = "local:flaky"

[service."{FLAKY}".arguments."https://svc.example.com#in"]
name = "in"

[service."{FLAKY}".result.outputs."https://svc.example.com#out"]
path = "out"
"##
    )
}

fn local_services() -> InProcessBackend {
    let mut local = InProcessBackend::new();
    local.register("echo", |payload| Ok(json!({ "echoed": payload["in"] })));
    local.register("flaky", |_| {
        Err(AgoraError::RemoteFailure("participant down".to_string()))
    });
    local
}

/// Create a test server over the federation stack.
/// Returns a guard that must be kept alive during the test.
fn create_test_server() -> (TestServer, TestGuard) {
    let guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under ENV_TEST_MUTEX.
    unsafe { std::env::remove_var("AGORA_API_KEY") };
    let (settings, remoting) = config::parse(&test_config()).unwrap();
    let state = AppState::from_config(&settings, remoting, local_services()).unwrap();
    let router = create_router(state);
    (
        TestServer::new(router).unwrap(),
        TestGuard { _guard: guard },
    )
}

// =============================================================================
// HEALTH ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _guard) = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// AGENT ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_get_agent_answers_sparql_json() {
    let (server, _guard) = create_test_server();

    let response = server
        .get("/agent")
        .add_query_param("query", "SELECT ?s WHERE { ?s ?p ?o }")
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["head"]["vars"][0], "s");
    assert!(body["results"]["bindings"].as_array().unwrap().is_empty());
    assert!(response.headers().get("cx_warnings").is_none());
}

#[tokio::test]
async fn test_service_invocation_binds_outputs() {
    let (server, _guard) = create_test_server();

    let query = format!(
        "SELECT ?inv ?out WHERE {{ ?inv a <{ECHO}>; \
         <https://svc.example.com#in> \"ping\"; \
         <https://svc.example.com#out> ?out. }}"
    );
    let response = server.get("/agent").add_query_param("query", query).await;

    response.assert_status_ok();
    let body: Value = response.json();
    let bindings = body["results"]["bindings"].as_array().unwrap();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0]["out"]["value"], "ping");
    assert_eq!(bindings[0]["inv"]["type"], "uri");
}

#[tokio::test]
async fn test_failed_participant_escalates_to_203_with_warnings() {
    let (server, _guard) = create_test_server();

    let query = format!(
        "SELECT ?inv ?out WHERE {{ ?inv a <{FLAKY}>; \
         <https://svc.example.com#in> \"x\"; \
         <https://svc.example.com#out> ?out. }}"
    );
    let response = server.get("/agent").add_query_param("query", query).await;

    assert_eq!(
        response.status_code(),
        StatusCode::NON_AUTHORITATIVE_INFORMATION
    );
    let header = response
        .headers()
        .get("cx_warnings")
        .expect("warnings header present")
        .to_str()
        .unwrap()
        .to_string();
    let warnings: Value = serde_json::from_str(&header).unwrap();
    assert_eq!(warnings.as_array().unwrap().len(), 1);
    assert_eq!(warnings[0]["targetTenant"], "local:flaky");
    assert!(
        warnings[0]["problem"]
            .as_str()
            .unwrap()
            .contains("partial")
    );
    let exposed = response
        .headers()
        .get("access-control-expose-headers")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(exposed.contains("cx_warnings"));

    // the query still answers with its (empty) result set
    let body: Value = response.json();
    assert!(body["results"]["bindings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unbound_top_level_variable_is_bad_request() {
    let (server, _guard) = create_test_server();

    let response = server
        .get("/agent")
        .add_query_param("query", "SELECT @vin WHERE { ?s ?p ?o }")
        .await;

    response.assert_status_bad_request();
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("no bindings"));
}

#[tokio::test]
async fn test_post_agent_raw_body() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/agent")
        .text("SELECT ?s WHERE { ?s ?p ?o }")
        .content_type("application/sparql-query")
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["head"]["vars"][0], "s");
}

#[tokio::test]
async fn test_post_agent_form_body() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/agent")
        .text("query=SELECT%20%3Fs%20WHERE%20%7B%20%3Fs%20%3Fp%20%3Fo%20%7D")
        .content_type("application/x-www-form-urlencoded")
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["head"]["vars"][0], "s");
}

#[tokio::test]
async fn test_post_agent_form_body_without_query_field() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/agent")
        .text("other=1")
        .content_type("application/x-www-form-urlencoded")
        .await;

    response.assert_status_bad_request();
}

// =============================================================================
// SKILL ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_skill_round_trip_with_bindings() {
    let (server, _guard) = create_test_server();

    let stored = server
        .post("/skill")
        .add_query_param("asset", "urn:agora:SkillAsset#echoByInput")
        .text(format!(
            "SELECT ?inv ?out WHERE {{ ?inv a <{ECHO}>; \
             <https://svc.example.com#in> \"@input\"; \
             <https://svc.example.com#out> ?out. }}"
        ))
        .await;
    stored.assert_status_ok();
    let skill: SkillResponse = stored.json();
    assert_eq!(skill.key, "urn:agora:SkillAsset#echoByInput");

    let response = server
        .get("/agent")
        .add_query_param("asset", "urn:agora:SkillAsset#echoByInput")
        .add_query_param("input", "hello")
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let bindings = body["results"]["bindings"].as_array().unwrap();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0]["out"]["value"], "hello");
}

#[tokio::test]
async fn test_unknown_skill_is_bad_request() {
    let (server, _guard) = create_test_server();

    let response = server
        .get("/agent")
        .add_query_param("asset", "urn:agora:SkillAsset#missing")
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_skill_without_asset_param_is_rejected() {
    let (server, _guard) = create_test_server();

    let response = server.post("/skill").text("SELECT ?s WHERE { }").await;

    response.assert_status_bad_request();
}

// =============================================================================
// CALLBACK ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_unknown_callback_correlation_is_not_found() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/callback/urn:unknown")
        .json(&json!({ "content": "late" }))
        .await;

    response.assert_status_not_found();
}

// =============================================================================
// AUTH TESTS
// =============================================================================

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: serialized under ENV_TEST_MUTEX; the guard scrubs the key.
    unsafe { std::env::set_var("AGORA_API_KEY", "sesame") };
    let _guard = TestGuard { _guard: guard };

    // the auth layer is installed at router construction, so the key must
    // be present before the server is built
    let (settings, remoting) = config::parse(&test_config()).unwrap();
    let state = AppState::from_config(&settings, remoting, local_services()).unwrap();
    let server = TestServer::new(create_router(state)).unwrap();

    let denied = server
        .get("/agent")
        .add_query_param("query", "SELECT ?s WHERE { ?s ?p ?o }")
        .await;
    denied.assert_status_unauthorized();

    let allowed = server
        .get("/agent")
        .add_query_param("query", "SELECT ?s WHERE { ?s ?p ?o }")
        .authorization_bearer("sesame")
        .await;
    allowed.assert_status_ok();

    // health stays reachable for probes
    let health = server.get("/health").await;
    health.assert_status_ok();
}
