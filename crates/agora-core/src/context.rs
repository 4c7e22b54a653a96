//! # Execution Context Module
//!
//! Request-scoped state threaded explicitly through every federation call
//! boundary:
//! - `WarningLedger`: the append-only list of non-fatal problem records,
//!   with save/clear/restore scoping around each execution
//! - `RequestContext`: routing, auth and policy state for one request
//!
//! ## Scoping Discipline
//!
//! The ledger slot is saved and cleared when a `WarningScope` opens and the
//! saved value is reinstated when the scope drops. Nested executions (a
//! federated sub-query triggering another local execution) therefore never
//! leak warnings into the outer request.

use crate::policy::EndpointPolicy;
use crate::types::Warning;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Placeholder for a remote participant that is not yet resolved.
pub const UNKNOWN_TARGET: &str = "<UNKNOWN>";

// =============================================================================
// WARNING LEDGER
// =============================================================================

/// Shared storage slot for one execution's warnings.
///
/// Cheap to clone; every clone refers to the same slot, so warnings
/// appended by concurrently running sub-query tasks all land in the
/// execution that spawned them.
#[derive(Debug, Clone, Default)]
pub struct WarningLedger {
    slot: Arc<Mutex<Option<Vec<Warning>>>>,
}

impl WarningLedger {
    /// Create a ledger with an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a warning, materializing the list on first use.
    pub fn append(&self, warning: Warning) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.get_or_insert_with(Vec::new).push(warning);
    }

    /// Snapshot the current warnings, or `None` when nothing was recorded.
    #[must_use]
    pub fn current(&self) -> Option<Vec<Warning>> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Open a scope: saves the present value and clears the slot.
    ///
    /// Dropping the returned guard restores the saved value.
    #[must_use]
    pub fn scope(&self) -> WarningScope {
        let saved = self
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        WarningScope {
            ledger: self.clone(),
            saved,
        }
    }
}

/// Guard for one execution's warning scope.
///
/// Holds the previously stored warnings; on drop they are reinstated,
/// discarding whatever the guarded execution left in the slot.
#[derive(Debug)]
pub struct WarningScope {
    ledger: WarningLedger,
    saved: Option<Vec<Warning>>,
}

impl WarningScope {
    /// The warnings collected since this scope opened.
    #[must_use]
    pub fn collected(&self) -> Vec<Warning> {
        self.ledger.current().unwrap_or_default()
    }
}

impl Drop for WarningScope {
    fn drop(&mut self) {
        let mut slot = self
            .ledger
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *slot = self.saved.take();
    }
}

// =============================================================================
// REQUEST CONTEXT
// =============================================================================

/// Strongly-typed per-request execution context.
///
/// Carries the routing target, auth material, endpoint policy and warning
/// ledger through the template resolver, the invocation mapper and the
/// multiplexed iterator. Passed by parameter; the only shared state inside
/// is the ledger slot.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// This participant's identifier.
    pub source_tenant: String,
    /// The active logical graph (asset) being federated, if any.
    pub asset: Option<String>,
    /// The resolved remote address for the active asset, if any.
    pub target_url: Option<String>,
    /// Header name for remote authentication.
    pub auth_key: Option<String>,
    /// Header value for remote authentication.
    pub auth_code: Option<String>,
    /// Allow/deny policy for resolved endpoints.
    pub policy: EndpointPolicy,
    /// Upper bound for one wait inside the multiplexed iterator.
    pub poll_interval: Duration,
    /// Optional overall bound across all waits of one query.
    pub query_deadline: Option<Duration>,
    /// Identifier tying warnings to this execution.
    pub context_id: String,
    /// The warning ledger slot for this request.
    pub ledger: WarningLedger,
}

impl RequestContext {
    /// Create a context with default policy and timing.
    #[must_use]
    pub fn new(source_tenant: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            source_tenant: source_tenant.into(),
            asset: None,
            target_url: None,
            auth_key: None,
            auth_code: None,
            policy: EndpointPolicy::default(),
            poll_interval: Duration::from_millis(100),
            query_deadline: None,
            context_id: context_id.into(),
            ledger: WarningLedger::new(),
        }
    }

    /// Record a non-fatal problem against a remote participant.
    pub fn warn(&self, target: &str, problem: impl Into<String>) {
        let warning = Warning {
            source_tenant: self.source_tenant.clone(),
            source_asset: self.asset.clone().unwrap_or_default(),
            target_tenant: target.to_string(),
            target_asset: target.to_string(),
            context: self.context_id.clone(),
            problem: problem.into(),
        };
        tracing::warn!(
            target_tenant = %warning.target_tenant,
            context = %warning.context,
            problem = %warning.problem,
            "Recording federation warning"
        );
        self.ledger.append(warning);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn warning(problem: &str) -> Warning {
        Warning {
            source_tenant: "urn:tenant:one".to_string(),
            source_asset: String::new(),
            target_tenant: UNKNOWN_TARGET.to_string(),
            target_asset: UNKNOWN_TARGET.to_string(),
            context: "0".to_string(),
            problem: problem.to_string(),
        }
    }

    #[test]
    fn ledger_starts_absent_and_materializes_on_append() {
        let ledger = WarningLedger::new();
        assert!(ledger.current().is_none());
        ledger.append(warning("one"));
        assert_eq!(ledger.current().map(|w| w.len()), Some(1));
    }

    #[test]
    fn scope_saves_clears_and_restores() {
        let ledger = WarningLedger::new();
        ledger.append(warning("outer"));
        {
            let scope = ledger.scope();
            assert!(ledger.current().is_none());
            ledger.append(warning("inner"));
            assert_eq!(scope.collected().len(), 1);
        }
        let restored = ledger.current().expect("outer warnings restored");
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].problem, "outer");
    }

    #[test]
    fn nested_scopes_do_not_cross_contaminate() {
        let ledger = WarningLedger::new();
        let outer = ledger.scope();
        ledger.append(warning("outer-level"));
        {
            let inner = ledger.scope();
            ledger.append(warning("inner-level"));
            assert_eq!(inner.collected().len(), 1);
            assert_eq!(inner.collected()[0].problem, "inner-level");
        }
        assert_eq!(outer.collected().len(), 1);
        assert_eq!(outer.collected()[0].problem, "outer-level");
    }

    #[test]
    fn context_warn_fills_source_and_context_fields() {
        let ctx = RequestContext::new("urn:tenant:one", "7");
        ctx.warn("urn:tenant:two", "remote unavailable");
        let warnings = ctx.ledger.current().expect("warning recorded");
        assert_eq!(warnings[0].source_tenant, "urn:tenant:one");
        assert_eq!(warnings[0].target_tenant, "urn:tenant:two");
        assert_eq!(warnings[0].context, "7");
    }
}
