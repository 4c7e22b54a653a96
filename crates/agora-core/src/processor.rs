//! # Query Processor
//!
//! The orchestrator behind the query surface: resolves skill references,
//! assembles the per-request execution context, scopes the warning ledger,
//! runs the template pipeline (form extraction → tuple expansion →
//! graph→service rewrite) and maps the outcome onto response statuses.
//!
//! Status mapping: 200 normal success, 203 success with warnings (partial
//! result), client errors for malformed bindings and unknown skills,
//! server errors for engine failures.

use crate::context::RequestContext;
use crate::engine::QueryEngine;
use crate::policy::{DEFAULT_ALLOW, DEFAULT_DENY, EndpointPolicy};
use crate::skills::SkillStore;
use crate::template;
use crate::types::{AgoraError, ResultSet, TupleSet, Warning};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Fixed base address under which local graphs are served.
pub const LOCAL_GRAPH_BASE: &str = "https://w3id.org/agora";
/// Base prefix engines prepend to relative graph names.
pub const UNSET_BASE: &str = "http://server/unset-base/";

/// Global defaults applied to every request.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// This participant's identifier, stamped into warnings.
    pub source_tenant: String,
    /// Base address of locally served graphs.
    pub local_base: String,
    /// Prefix stripped when matching graph clauses.
    pub unset_base: String,
    /// Default allow pattern over endpoint URIs.
    pub allow_pattern: String,
    /// Default deny pattern over endpoint URIs.
    pub deny_pattern: String,
    /// Poll interval for the multiplexed iterator.
    pub poll_interval: Duration,
    /// Optional overall per-query deadline; `None` leaves queries bounded
    /// only by each handle's own timeout.
    pub query_deadline: Option<Duration>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            source_tenant: "urn:agora:tenant:local".to_string(),
            local_base: LOCAL_GRAPH_BASE.to_string(),
            unset_base: UNSET_BASE.to_string(),
            allow_pattern: DEFAULT_ALLOW.to_string(),
            deny_pattern: DEFAULT_DENY.to_string(),
            poll_interval: Duration::from_millis(100),
            query_deadline: None,
        }
    }
}

// =============================================================================
// REQUEST & OUTCOME
// =============================================================================

/// Per-request address properties of the asset to invoke, overriding the
/// global defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetProperties {
    /// Resolved remote address for the active asset.
    pub target_url: Option<String>,
    /// Header name for remote authentication.
    pub auth_key: Option<String>,
    /// Header value for remote authentication.
    pub auth_code: Option<String>,
    /// Allow pattern overriding the global default.
    pub allow_pattern: Option<String>,
    /// Deny pattern overriding the global default.
    pub deny_pattern: Option<String>,
}

/// One inbound query request, decoupled from the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    /// Inline query text (possibly still URL-encoded).
    pub query: Option<String>,
    /// Skill reference resolved through the store instead.
    pub skill: Option<String>,
    /// The logical graph (asset) the query addresses.
    pub graph: Option<String>,
    /// The request's content type, for form-encoded bodies.
    pub content_type: Option<String>,
    /// Input bindings from the request parameters.
    pub bindings: TupleSet,
    /// Per-request target overrides.
    pub target: Option<TargetProperties>,
}

/// Result of a successfully executed query.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// 200, or 203 when warnings were recorded (partial result).
    pub status: u16,
    /// The merged result set.
    pub result: ResultSet,
    /// Warnings collected during this execution.
    pub warnings: Vec<Warning>,
}

// =============================================================================
// QUERY PROCESSOR
// =============================================================================

/// Skill-enabled query processor fronting the underlying engine.
pub struct QueryProcessor {
    engine: Arc<dyn QueryEngine>,
    skills: Arc<dyn SkillStore>,
    config: ProcessorConfig,
    default_policy: EndpointPolicy,
    counter: AtomicU64,
}

impl std::fmt::Debug for QueryProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryProcessor")
            .field("source_tenant", &self.config.source_tenant)
            .finish()
    }
}

impl QueryProcessor {
    /// Create a processor; fails when the default policy patterns do not
    /// compile.
    pub fn new(
        engine: Arc<dyn QueryEngine>,
        skills: Arc<dyn SkillStore>,
        config: ProcessorConfig,
    ) -> Result<Self, AgoraError> {
        let default_policy = EndpointPolicy::compile(&config.allow_pattern, &config.deny_pattern)
            .map_err(|e| AgoraError::ConfigInvalid(format!("policy pattern: {e}")))?;
        Ok(Self {
            engine,
            skills,
            config,
            default_policy,
            counter: AtomicU64::new(0),
        })
    }

    /// The skill store backing skill resolution.
    #[must_use]
    pub fn skills(&self) -> &Arc<dyn SkillStore> {
        &self.skills
    }

    /// Execute one request end to end.
    ///
    /// Warnings recorded during the execution never fail the request; they
    /// escalate the status to 203 so clients can tell partial from
    /// complete results.
    pub async fn execute(&self, spec: QuerySpec) -> Result<QueryOutcome, AgoraError> {
        let text = match (&spec.skill, &spec.query) {
            (Some(skill), _) => self
                .skills
                .get(skill)
                .ok_or_else(|| AgoraError::SkillNotFound(skill.clone()))?,
            (None, Some(query)) => query.clone(),
            (None, None) => {
                return Err(AgoraError::MalformedBinding(
                    "neither a query nor a skill reference was supplied".to_string(),
                ));
            }
        };

        let ctx = self.build_context(&spec)?;
        tracing::debug!(
            context = %ctx.context_id,
            asset = ctx.asset.as_deref().unwrap_or(""),
            "Executing query"
        );

        // Save/clear the ledger for this execution; the scope guard
        // restores the previous value even on the error paths.
        let scope = ctx.ledger.scope();
        let result = self.run(&text, &spec, &ctx).await;
        let warnings = scope.collected();
        drop(scope);

        let result = result?;
        let status = if warnings.is_empty() { 200 } else { 203 };
        Ok(QueryOutcome {
            status,
            result,
            warnings,
        })
    }

    /// Assemble the request context from defaults and target overrides.
    fn build_context(&self, spec: &QuerySpec) -> Result<RequestContext, AgoraError> {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut ctx = RequestContext::new(&self.config.source_tenant, count.to_string());
        ctx.asset = spec.graph.clone();
        ctx.poll_interval = self.config.poll_interval;
        ctx.query_deadline = self.config.query_deadline;
        ctx.policy = self.default_policy.clone();
        if let Some(target) = &spec.target {
            ctx.target_url = target.target_url.clone();
            ctx.auth_key = target.auth_key.clone();
            ctx.auth_code = target.auth_code.clone();
            if target.allow_pattern.is_some() || target.deny_pattern.is_some() {
                let allow = target
                    .allow_pattern
                    .as_deref()
                    .unwrap_or(&self.config.allow_pattern);
                let deny = target
                    .deny_pattern
                    .as_deref()
                    .unwrap_or(&self.config.deny_pattern);
                ctx.policy = EndpointPolicy::compile(allow, deny).map_err(|e| {
                    AgoraError::MalformedBinding(format!("target policy pattern: {e}"))
                })?;
            }
        }
        Ok(ctx)
    }

    /// Extract, expand and rewrite the query text, then run the engine.
    async fn run(
        &self,
        text: &str,
        spec: &QuerySpec,
        ctx: &RequestContext,
    ) -> Result<ResultSet, AgoraError> {
        // A url-encoded form is split first and the query field decoded
        // exactly once; raw query text arrives already decoded by the
        // HTTP layer and must not be decoded again (a second pass would
        // destroy literal '+' and '%' in the query).
        let query = if spec
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/x-www-form-urlencoded"))
        {
            let parts = template::parse_form(text);
            let raw = parts
                .get("query")
                .and_then(|values| values.first())
                .ok_or_else(|| {
                    AgoraError::MalformedBinding(
                        "form body does not carry a 'query' field".to_string(),
                    )
                })?;
            template::url_decode(raw)
        } else {
            text.to_string()
        };

        let query = template::expand(&query, &spec.bindings, ctx)?;
        let query = match (&ctx.asset, &ctx.target_url) {
            (Some(asset), Some(target)) => template::rewrite_graph_to_service(
                &query,
                asset,
                target,
                &self.config.local_base,
                &self.config.unset_base,
            ),
            _ => query,
        };

        self.engine.execute(&query, ctx).await
    }
}

// =============================================================================
// TESTS
// =============================================================================
