//! # Query Engine Seam
//!
//! The underlying graph-query engine is an external collaborator: parsing,
//! optimization and serialization live behind this trait. The federation
//! layer hands it a fully resolved query string and expects a result set;
//! the engine in turn drives the invocation mapper and the dataspace
//! executor for federated patterns.

use crate::context::RequestContext;
use crate::types::{AgoraError, ResultSet};
use async_trait::async_trait;

/// Executes resolved queries on behalf of the query processor.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Execute a resolved query within a request context.
    ///
    /// Failures local to one federated participant must be recorded in the
    /// context's ledger, not surfaced here; an `Err` means the engine
    /// itself failed and the request answers with a server error.
    async fn execute(&self, query: &str, ctx: &RequestContext) -> Result<ResultSet, AgoraError>;
}
