//! # Federation Engine
//!
//! The thin engine wired between the query processor and the federation
//! subsystems. It recognizes exactly the shapes the federation layer owns:
//!
//! - top-level `SERVICE <target> { ... }` clauses fan out one sub-query
//!   per participant and merge through the multiplexed iterator
//! - patterns typing a variable as a declared service class go through the
//!   remote-invocation mapper
//!
//! Everything else belongs to the local graph store, an external
//! collaborator behind the same `QueryEngine` seam; this engine answers it
//! with an empty result set.

use agora_core::pattern::{self, ServiceClause};
use agora_core::{
    AgoraError, Binding, DataspaceExecutor, InvocationMapper, MultiplexedBindings, QueryEngine,
    RemotingConfig, RequestContext, ResultSet, ServiceBackend,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// FEDERATION ENGINE
// =============================================================================

/// Query engine covering the federated shapes.
pub struct FederationEngine {
    executor: DataspaceExecutor,
    mapper: InvocationMapper,
}

impl std::fmt::Debug for FederationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationEngine").finish()
    }
}

impl FederationEngine {
    /// Wire the engine over a transport backend and service configuration.
    #[must_use]
    pub fn new(
        config: Arc<RemotingConfig>,
        backend: Arc<dyn ServiceBackend>,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            executor: DataspaceExecutor::new(Arc::clone(&backend), remote_timeout),
            mapper: InvocationMapper::new(config, backend),
        }
    }

    /// The invocation mapper, exposed for the out-of-band callback surface.
    #[must_use]
    pub fn mapper(&self) -> &InvocationMapper {
        &self.mapper
    }

    /// Fan a query's service clauses out and merge the answers.
    async fn execute_clauses(
        &self,
        query: &str,
        clauses: &[ServiceClause],
        ctx: &RequestContext,
    ) -> ResultSet {
        let prefixes = pattern::parse_prologue(query);
        let handles = self.executor.dispatch_clauses(clauses, &prefixes, ctx);
        let bindings = MultiplexedBindings::new(ctx, handles).collect().await;
        ResultSet {
            vars: vars_of(&bindings),
            bindings,
        }
    }
}

/// Distinct variable names across rows, in first-seen order.
fn vars_of(bindings: &[Binding]) -> Vec<String> {
    let mut vars: Vec<String> = Vec::new();
    for row in bindings {
        for var in row.keys() {
            if !vars.contains(var) {
                vars.push(var.clone());
            }
        }
    }
    vars
}

/// Restrict rows to the projected variables.
fn project(bindings: Vec<Binding>, vars: &[String]) -> Vec<Binding> {
    bindings
        .into_iter()
        .map(|row| {
            row.into_iter()
                .filter(|(var, _)| vars.iter().any(|v| v == var))
                .collect()
        })
        .collect()
}

#[async_trait]
impl QueryEngine for FederationEngine {
    async fn execute(&self, query: &str, ctx: &RequestContext) -> Result<ResultSet, AgoraError> {
        let clauses = pattern::find_service_clauses(query);
        if !clauses.is_empty() {
            return Ok(self.execute_clauses(query, &clauses, ctx).await);
        }

        match pattern::parse_select(query) {
            Ok(parsed) => {
                let matched = pattern::match_service(&parsed.pattern, |class| {
                    self.mapper.config().is_service_class(class)
                });
                match matched {
                    Some(matched) => {
                        let handles = self.mapper.dispatch(&matched, ctx);
                        let bindings = MultiplexedBindings::new(ctx, handles).collect().await;
                        let vars = if parsed.select_vars.is_empty() {
                            vars_of(&bindings)
                        } else {
                            parsed.select_vars
                        };
                        let bindings = project(bindings, &vars);
                        Ok(ResultSet { vars, bindings })
                    }
                    // The local graph store answers ordinary patterns; it
                    // is not part of this deployment.
                    None => Ok(ResultSet::empty(parsed.select_vars)),
                }
            }
            Err(error) => {
                tracing::debug!(%error, "Query outside the federated subset");
                Ok(ResultSet::empty(Vec::new()))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use agora_core::InProcessBackend;
    use serde_json::json;

    fn ctx() -> RequestContext {
        let mut ctx = RequestContext::new("urn:tenant:one", "0");
        ctx.poll_interval = Duration::from_millis(10);
        ctx
    }

    fn engine() -> FederationEngine {
        let text = r##"
[service."https://svc.example.com#Echo"]
target = "local:echo"

[service."https://svc.example.com#Echo".arguments."https://svc.example.com#in"]
name = "in"

[service."https://svc.example.com#Echo".result.outputs."https://svc.example.com#out"]
path = "echoed"
"##;
        let config = Arc::new(RemotingConfig::from_toml_str(text).unwrap());
        let mut backend = InProcessBackend::new();
        backend.register("echo", |payload| {
            Ok(json!({ "echoed": payload["in"] }))
        });
        FederationEngine::new(config, Arc::new(backend), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn service_class_patterns_run_through_the_mapper() {
        let query = "PREFIX svc: <https://svc.example.com#> \
             SELECT ?inv ?out WHERE { \
               ?inv a svc:Echo; svc:in \"ping\"; svc:out ?out. }";
        let result = engine().execute(query, &ctx()).await.unwrap();
        assert_eq!(result.vars, vec!["inv", "out"]);
        assert_eq!(result.bindings.len(), 1);
        assert_eq!(result.bindings[0]["out"].as_str(), "ping");
    }

    #[tokio::test]
    async fn plain_patterns_are_the_stores_business() {
        let query = "SELECT ?s WHERE { ?s a <https://other.example.com#Thing>. }";
        let result = engine().execute(query, &ctx()).await.unwrap();
        assert_eq!(result.vars, vec!["s"]);
        assert!(result.bindings.is_empty());
    }

    #[tokio::test]
    async fn unrecognized_syntax_yields_empty_not_error() {
        let result = engine()
            .execute("CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }", &ctx())
            .await
            .unwrap();
        assert!(result.bindings.is_empty());
    }
}
