//! # Dataspace Fan-Out
//!
//! Launches one concurrent sub-query per `SERVICE` target and hands the
//! pending set to the multiplexed iterator. Targets are policy-checked
//! before anything leaves the process; a denied target becomes a warning,
//! not a dispatched call.

use crate::context::RequestContext;
use crate::futures::PendingHandle;
use crate::pattern::ServiceClause;
use crate::remoting::invocation::{CallCredentials, ServiceBackend};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// DATASPACE EXECUTOR
// =============================================================================

/// Dispatches federated sub-queries to remote participants.
pub struct DataspaceExecutor {
    backend: Arc<dyn ServiceBackend>,
    remote_timeout: Duration,
}

impl std::fmt::Debug for DataspaceExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataspaceExecutor")
            .field("remote_timeout", &self.remote_timeout)
            .finish()
    }
}

impl DataspaceExecutor {
    /// Create an executor over a transport backend.
    #[must_use]
    pub fn new(backend: Arc<dyn ServiceBackend>, remote_timeout: Duration) -> Self {
        Self {
            backend,
            remote_timeout,
        }
    }

    /// Dispatch one pending sub-query per service clause.
    ///
    /// The clause block is wrapped into a `SELECT *` sub-query carrying the
    /// surrounding query's prefix declarations. Denied targets are recorded
    /// as warnings and skipped.
    #[must_use]
    pub fn dispatch_clauses(
        &self,
        clauses: &[ServiceClause],
        prefixes: &HashMap<String, String>,
        ctx: &RequestContext,
    ) -> Vec<PendingHandle> {
        let prologue: String = prefixes
            .iter()
            .map(|(prefix, base)| format!("PREFIX {prefix}: <{base}> "))
            .collect();

        let mut handles = Vec::with_capacity(clauses.len());
        for clause in clauses {
            if let Err(denied) = ctx.policy.check(&clause.target) {
                ctx.warn(&clause.target, denied.to_string());
                continue;
            }
            let query = format!("{prologue}SELECT * WHERE {{ {} }}", clause.block);
            let backend = Arc::clone(&self.backend);
            let target = clause.target.clone();
            let creds = CallCredentials::from_context(ctx);
            let timeout = self.remote_timeout;
            handles.push(PendingHandle::spawn(clause.target.clone(), async move {
                let result = tokio::time::timeout(
                    timeout,
                    backend.sparql(&target, &query, creds.as_ref()),
                )
                .await
                .map_err(|_| {
                    crate::types::AgoraError::RemoteFailure(format!(
                        "sub-query against {target} timed out"
                    ))
                })??;
                Ok(result.bindings)
            }));
        }
        handles
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::futures::MultiplexedBindings;
    use crate::policy::EndpointPolicy;
    use crate::remoting::invocation::CallCredentials;
    use crate::types::{AgoraError, Binding, ResultSet, Term};
    use async_trait::async_trait;
    use serde_json::Value;

    struct FakeSparql;

    #[async_trait]
    impl ServiceBackend for FakeSparql {
        async fn invoke(
            &self,
            _target: &str,
            _payload: Value,
            _auth: Option<&CallCredentials>,
        ) -> Result<Value, AgoraError> {
            Err(AgoraError::RemoteFailure("not a service call".to_string()))
        }

        async fn sparql(
            &self,
            target: &str,
            query: &str,
            _auth: Option<&CallCredentials>,
        ) -> Result<ResultSet, AgoraError> {
            assert!(query.starts_with("PREFIX ex: <https://example.com/>"));
            if target.contains("down") {
                return Err(AgoraError::RemoteFailure("connection refused".to_string()));
            }
            let mut row = Binding::new();
            row.insert("s".to_string(), Term::string(target));
            Ok(ResultSet {
                vars: vec!["s".to_string()],
                bindings: vec![row],
            })
        }
    }

    fn ctx() -> RequestContext {
        let mut ctx = RequestContext::new("urn:tenant:one", "0");
        ctx.poll_interval = Duration::from_millis(10);
        ctx
    }

    fn clauses() -> Vec<ServiceClause> {
        vec![
            ServiceClause {
                target: "https://alpha.example.com/sparql".to_string(),
                block: "?s ?p ?o".to_string(),
            },
            ServiceClause {
                target: "https://down.example.com/sparql".to_string(),
                block: "?s ?p ?o".to_string(),
            },
        ]
    }

    fn prefixes() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("ex".to_string(), "https://example.com/".to_string());
        map
    }

    #[tokio::test]
    async fn fans_out_and_tolerates_one_dead_participant() {
        let executor = DataspaceExecutor::new(Arc::new(FakeSparql), Duration::from_secs(5));
        let ctx = ctx();
        let handles = executor.dispatch_clauses(&clauses(), &prefixes(), &ctx);
        assert_eq!(handles.len(), 2);

        let rows = MultiplexedBindings::new(&ctx, handles).collect().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["s"].as_str(), "https://alpha.example.com/sparql");

        let warnings = ctx.ledger.current().expect("dead participant warning");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].target_tenant, "https://down.example.com/sparql");
    }

    #[tokio::test]
    async fn denied_target_is_warned_not_dispatched() {
        let executor = DataspaceExecutor::new(Arc::new(FakeSparql), Duration::from_secs(5));
        let mut ctx = ctx();
        ctx.policy = EndpointPolicy::compile("https://alpha.example.com/.*", "^$")
            .expect("test policy compiles");
        let handles = executor.dispatch_clauses(&clauses(), &prefixes(), &ctx);
        assert_eq!(handles.len(), 1);
        let warnings = ctx.ledger.current().expect("policy warning");
        assert!(warnings[0].problem.contains("allow pattern"));
    }
}
