//! # Invocation Lifecycle
//!
//! Turns a matched service-class pattern into batched, correlated calls
//! and converts the responses back into bindings:
//!
//! RECEIVED → ARGUMENT-BOUND → BATCHED → DISPATCHED → PENDING/COMPLETED →
//! RESULT-EXTRACTED → CORRELATED → joined into the binding stream.
//!
//! Every per-invocation failure (missing argument, policy denial, remote
//! fault, uncorrelated response) is demoted to a warning; the surrounding
//! query keeps running on whatever completed.

use crate::context::RequestContext;
use crate::futures::PendingHandle;
use crate::pattern::{PatternNode, ServiceMatch};
use crate::remoting::config::{
    RemotingConfig, ReturnValueConfig, ServiceConfig, local_name,
};
use crate::types::{AgoraError, Binding, ResultSet, Term, xsd};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

// =============================================================================
// SERVICE BACKEND
// =============================================================================

/// Authentication material attached to outgoing calls.
#[derive(Debug, Clone)]
pub struct CallCredentials {
    /// Header name.
    pub header: String,
    /// Header value.
    pub value: String,
}

impl CallCredentials {
    /// Build credentials from the request context, when both parts are set.
    #[must_use]
    pub fn from_context(ctx: &RequestContext) -> Option<Self> {
        match (&ctx.auth_key, &ctx.auth_code) {
            (Some(header), Some(value)) => Some(Self {
                header: header.clone(),
                value: value.clone(),
            }),
            _ => None,
        }
    }
}

/// Transport seam for dispatched calls.
///
/// The core never opens sockets itself: `local:` targets resolve
/// in-process, everything else is the app's transport implementation.
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    /// Invoke a service target with a JSON payload.
    async fn invoke(
        &self,
        target: &str,
        payload: Value,
        auth: Option<&CallCredentials>,
    ) -> Result<Value, AgoraError>;

    /// Execute a sub-query against a remote query endpoint.
    async fn sparql(
        &self,
        target: &str,
        query: &str,
        auth: Option<&CallCredentials>,
    ) -> Result<ResultSet, AgoraError>;
}

/// Signature of an in-process callable.
pub type LocalService =
    dyn Fn(&Value) -> Result<Value, AgoraError> + Send + Sync;

/// Backend resolving `local:<name>` targets against registered callables.
#[derive(Clone, Default)]
pub struct InProcessBackend {
    services: HashMap<String, Arc<LocalService>>,
}

impl std::fmt::Debug for InProcessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessBackend")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl InProcessBackend {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callable under a `local:` name.
    pub fn register<F>(&mut self, name: impl Into<String>, service: F)
    where
        F: Fn(&Value) -> Result<Value, AgoraError> + Send + Sync + 'static,
    {
        self.services.insert(name.into(), Arc::new(service));
    }
}

#[async_trait]
impl ServiceBackend for InProcessBackend {
    async fn invoke(
        &self,
        target: &str,
        payload: Value,
        _auth: Option<&CallCredentials>,
    ) -> Result<Value, AgoraError> {
        let name = target.strip_prefix("local:").ok_or_else(|| {
            AgoraError::RemoteFailure(format!("not an in-process target: {target}"))
        })?;
        let service = self.services.get(name).ok_or_else(|| {
            AgoraError::RemoteFailure(format!("unknown in-process service: {name}"))
        })?;
        service(&payload)
    }

    async fn sparql(
        &self,
        target: &str,
        _query: &str,
        _auth: Option<&CallCredentials>,
    ) -> Result<ResultSet, AgoraError> {
        Err(AgoraError::RemoteFailure(format!(
            "in-process backend cannot execute sub-queries against {target}"
        )))
    }
}

// =============================================================================
// CALLBACK REGISTRY
// =============================================================================

/// Rendezvous point for asynchronous services: dispatch registers a
/// correlation id here, the out-of-band callback completes it.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry").finish()
    }
}

impl CallbackRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a correlation id, returning the receiver the dispatch task
    /// waits on.
    #[must_use]
    pub fn register(&self, correlation: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(correlation.to_string(), tx);
        rx
    }

    /// Deliver an out-of-band response; false when the correlation id is
    /// unknown or the waiter is gone.
    pub fn complete(&self, correlation: &str, payload: Value) -> bool {
        let sender = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(correlation);
        match sender {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }
}

// =============================================================================
// RESULT EXTRACTION & COERCION
// =============================================================================

/// Resolve a dot path (`a.b[0].c`) into a JSON payload. An empty path
/// yields the payload itself.
fn extract_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    if path.is_empty() {
        return Some(current);
    }
    for segment in path.split('.') {
        let (field, indices) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !field.is_empty() {
            current = current.get(field)?;
        }
        let mut rest = indices;
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']')?;
            let index: usize = stripped[..close].parse().ok()?;
            current = current.get(index)?;
            rest = &stripped[close + 1..];
        }
    }
    Some(current)
}

/// Coerce a raw JSON value into a literal of the declared datatype.
/// Returns `None` when the value cannot represent the datatype.
fn coerce(value: &Value, datatype: &str) -> Option<Term> {
    let lexical = match datatype {
        xsd::INT | xsd::INTEGER | xsd::LONG => match value {
            Value::Number(n) => Some(n.as_i64()?.to_string()),
            Value::String(s) => s.trim().parse::<i64>().ok().map(|v| v.to_string()),
            _ => None,
        },
        xsd::DOUBLE | xsd::FLOAT => match value {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => s.trim().parse::<f64>().ok().map(|_| s.trim().to_string()),
            _ => None,
        },
        xsd::BOOLEAN => match value {
            Value::Bool(b) => Some(b.to_string()),
            Value::String(s) => match s.trim() {
                "true" | "false" => Some(s.trim().to_string()),
                _ => None,
            },
            _ => None,
        },
        xsd::JSON => Some(value.to_string()),
        _ => match value {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        },
    }?;
    Some(Term::typed(lexical, datatype))
}

/// Render a JSON value as the plain string used for correlation matching.
fn correlation_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// INVOCATION MAPPER
// =============================================================================

/// One argument-bound invocation awaiting dispatch.
#[derive(Debug, Clone)]
struct Invocation {
    /// Fresh IRI identifying this invocation.
    id: String,
    /// Argument predicate → resolved value.
    args: BTreeMap<String, String>,
    /// Base bindings carried from the matched pattern row.
    row: Binding,
}

/// Output extraction plan derived from the matched pattern.
#[derive(Debug, Clone)]
struct OutputPlan {
    /// Pattern variable → extraction config for each requested output.
    outputs: Vec<(String, ReturnValueConfig)>,
    /// Variable receiving the whole raw response row, if requested.
    raw_var: Option<String>,
}

/// Converts matched service-class patterns into dispatched calls.
pub struct InvocationMapper {
    config: Arc<RemotingConfig>,
    backend: Arc<dyn ServiceBackend>,
    callbacks: CallbackRegistry,
    counter: AtomicU64,
}

impl std::fmt::Debug for InvocationMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationMapper")
            .field("services", &self.config.services.len())
            .finish()
    }
}

impl InvocationMapper {
    /// Create a mapper over a validated configuration.
    #[must_use]
    pub fn new(config: Arc<RemotingConfig>, backend: Arc<dyn ServiceBackend>) -> Self {
        Self {
            config,
            backend,
            callbacks: CallbackRegistry::new(),
            counter: AtomicU64::new(0),
        }
    }

    /// The validated service configuration.
    #[must_use]
    pub fn config(&self) -> &RemotingConfig {
        &self.config
    }

    /// The registry out-of-band callbacks complete into.
    #[must_use]
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Bind, batch and dispatch a matched pattern.
    ///
    /// Returns one pending handle per dispatched call; per-invocation
    /// failures are recorded as warnings and produce no handle.
    #[must_use]
    pub fn dispatch(&self, matched: &ServiceMatch, ctx: &RequestContext) -> Vec<PendingHandle> {
        let Some(service) = self.config.service(&matched.service_class) else {
            return Vec::new();
        };

        // Classify the pattern's properties into argument sources and
        // output variables.
        let mut arg_sources: HashMap<&str, &PatternNode> = HashMap::new();
        let mut plan = OutputPlan {
            outputs: Vec::new(),
            raw_var: None,
        };
        for (predicate, node) in &matched.properties {
            if service.arguments.contains_key(predicate) {
                arg_sources.insert(predicate.as_str(), node);
            } else if let Some(rv) = service.result.outputs.get(predicate) {
                if let PatternNode::Var(var) = node {
                    plan.outputs.push((var.clone(), rv.clone()));
                }
            } else if service.result.result_name.as_deref() == Some(predicate.as_str()) {
                if let PatternNode::Var(var) = node {
                    plan.raw_var = Some(var.clone());
                }
            } else {
                tracing::debug!(%predicate, "Ignoring undeclared service predicate");
            }
        }

        // RECEIVED + ARGUMENT-BOUND: one invocation per pattern row.
        let mut invocations = Vec::new();
        'rows: for row in &matched.rows {
            let seq = self.counter.fetch_add(1, Ordering::Relaxed);
            let id = format!("{}-{}", matched.service_class, seq);
            let mut args = BTreeMap::new();
            for (predicate, argument) in &service.arguments {
                let resolved = match arg_sources.get(predicate.as_str()) {
                    Some(PatternNode::Literal { lexical, .. }) => Some(lexical.clone()),
                    Some(PatternNode::Iri(iri)) => Some(iri.clone()),
                    Some(PatternNode::Var(var)) => {
                        row.get(var).map(|term| term.as_str().to_string())
                    }
                    None => None,
                };
                match resolved.or_else(|| argument.default_value.clone()) {
                    Some(value) => {
                        args.insert(predicate.clone(), value);
                    }
                    None if argument.mandatory => {
                        let problem = AgoraError::MissingArgument {
                            service: matched.service_class.clone(),
                            predicate: predicate.clone(),
                        };
                        ctx.warn(&service.target, problem.to_string());
                        continue 'rows;
                    }
                    None => {}
                }
            }
            let mut bound_row = row.clone();
            bound_row.insert(matched.subject_var.clone(), Term::iri(id.clone()));
            invocations.push(Invocation {
                id,
                args,
                row: bound_row,
            });
        }

        // BATCHED: group by batch-group values, split by batch size.
        let group_predicates: Vec<String> = service
            .batch_group_predicates()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut groups: BTreeMap<Vec<String>, Vec<Invocation>> = BTreeMap::new();
        for invocation in invocations {
            let key: Vec<String> = group_predicates
                .iter()
                .map(|p| invocation.args.get(p).cloned().unwrap_or_default())
                .collect();
            groups.entry(key).or_default().push(invocation);
        }

        // DISPATCHED: one pending handle per chunk.
        let mut handles = Vec::new();
        for (_, group) in groups {
            for chunk in group.chunks(service.batch_size) {
                if !service.is_local() {
                    if let Err(denied) = ctx.policy.check(&service.target) {
                        ctx.warn(&service.target, denied.to_string());
                        continue;
                    }
                }
                handles.push(self.dispatch_chunk(
                    service.clone(),
                    chunk.to_vec(),
                    plan.clone(),
                    ctx,
                ));
            }
        }
        handles
    }

    /// Spawn one call for a batch chunk.
    fn dispatch_chunk(
        &self,
        service: ServiceConfig,
        chunk: Vec<Invocation>,
        plan: OutputPlan,
        ctx: &RequestContext,
    ) -> PendingHandle {
        let backend = Arc::clone(&self.backend);
        let callbacks = self.callbacks.clone();
        let ctx = ctx.clone();
        let target = service.target.clone();

        PendingHandle::spawn(target.clone(), async move {
            let creds = CallCredentials::from_context(&ctx);
            let correlation_id = chunk
                .first()
                .map(|i| i.id.clone())
                .unwrap_or_default();

            // Payload: one object per invocation, an array for real batches.
            let to_object = |invocation: &Invocation| {
                let mut object = serde_json::Map::new();
                for (predicate, value) in &invocation.args {
                    let key = service
                        .arguments
                        .get(predicate)
                        .map(|a| a.key_for(predicate))
                        .unwrap_or_else(|| local_name(predicate).to_string());
                    object.insert(key, Value::String(value.clone()));
                }
                if let Some(callback) = &service.callback_property {
                    object.insert(
                        local_name(callback).to_string(),
                        Value::String(correlation_id.clone()),
                    );
                }
                Value::Object(object)
            };
            let payload = if chunk.len() == 1 {
                chunk.first().map(to_object).unwrap_or(Value::Null)
            } else {
                Value::Array(chunk.iter().map(to_object).collect())
            };

            let timeout = Duration::from_millis(service.invocation_timeout_ms);

            // PENDING: asynchronous services answer out of band through the
            // callback registry; synchronous services answer at dispatch.
            let response = if service.callback_property.is_some() {
                let receiver = callbacks.register(&correlation_id);
                tokio::time::timeout(timeout, backend.invoke(&target, payload, creds.as_ref()))
                    .await
                    .map_err(|_| {
                        AgoraError::RemoteFailure(format!("invocation of {target} timed out"))
                    })??;
                tokio::time::timeout(timeout, receiver).await.map_err(|_| {
                    AgoraError::RemoteFailure(format!(
                        "callback from {target} not received in time"
                    ))
                })?
                .map_err(|_| {
                    AgoraError::RemoteFailure(format!("callback channel for {target} closed"))
                })?
            } else {
                tokio::time::timeout(timeout, backend.invoke(&target, payload, creds.as_ref()))
                    .await
                    .map_err(|_| {
                        AgoraError::RemoteFailure(format!("invocation of {target} timed out"))
                    })??
            };

            // RESULT-EXTRACTED + CORRELATED.
            Ok(correlate_chunk(&service, &chunk, &plan, &response, &ctx, &target))
        })
    }
}

/// Match response rows back to their originating invocations and extract
/// the declared outputs.
fn correlate_chunk(
    service: &ServiceConfig,
    chunk: &[Invocation],
    plan: &OutputPlan,
    response: &Value,
    ctx: &RequestContext,
    target: &str,
) -> Vec<Binding> {
    let rows: Vec<&Value> = match response {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };

    let mut consumed = vec![false; chunk.len()];
    let mut pairs: Vec<(usize, &Value)> = Vec::new();

    match &service.result.correlation_input {
        Some(correlation) => {
            let Some(echo) = service.result.outputs.get(correlation) else {
                // Rejected at validation; unreachable in a loaded config.
                return Vec::new();
            };
            for row in rows {
                let matched = extract_path(row, &echo.path)
                    .map(correlation_key)
                    .and_then(|key| {
                        chunk.iter().enumerate().find(|(idx, invocation)| {
                            !consumed[*idx]
                                && invocation.args.get(correlation) == Some(&key)
                        })
                    });
                match matched {
                    Some((idx, _)) => {
                        consumed[idx] = true;
                        pairs.push((idx, row));
                    }
                    None => {
                        ctx.warn(
                            target,
                            "Dropping an uncorrelated response row: result may be partial.",
                        );
                    }
                }
            }
        }
        None => {
            // Positional: row i answers invocation i.
            for (idx, row) in rows.into_iter().enumerate() {
                if idx < chunk.len() {
                    pairs.push((idx, row));
                } else {
                    ctx.warn(
                        target,
                        "Dropping an uncorrelated response row: result may be partial.",
                    );
                }
            }
        }
    }

    pairs
        .into_iter()
        .map(|(idx, row)| {
            let mut binding = chunk[idx].row.clone();
            for (var, rv) in &plan.outputs {
                let base = match (row, rv.priority) {
                    (Value::Array(items), Some(p)) => items.get(p.max(0) as usize).unwrap_or(row),
                    _ => row,
                };
                if let Some(value) = extract_path(base, &rv.path) {
                    if let Some(term) = coerce(value, &rv.datatype) {
                        binding.insert(var.clone(), term);
                    }
                }
            }
            if let Some(var) = &plan.raw_var {
                binding.insert(var.clone(), Term::typed(row.to_string(), xsd::JSON));
            }
            binding
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
