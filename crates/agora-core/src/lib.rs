//! # agora-core
//!
//! The federation engine for Agora - THE LOGIC.
//!
//! This crate implements the in-memory federation and invocation-mapping
//! layer for a multi-tenant knowledge-graph data-sharing network: queries
//! written against a shared vocabulary transparently fan out to remote
//! participants and external services, partial results are merged back
//! into one stream, and individual failures become warnings instead of
//! failing the whole query.
//!
//! ## Subsystems
//!
//! - `template`: tuple-bound placeholder expansion and graph→service
//!   rewriting of skill texts
//! - `remoting`: declarative service-class invocation mapping (bind,
//!   batch, dispatch, extract, correlate) and dataspace sub-query fan-out
//! - `futures`: the multiplexed binding stream merging pending handles
//! - `processor`: request orchestration and status mapping
//!
//! ## Architectural Constraints
//!
//! - No sockets: remote I/O happens behind the `ServiceBackend` trait,
//!   implemented by the app crate
//! - Warnings are scoped per execution (save/clear/restore) so concurrent
//!   requests never observe each other's partial-failure records
//! - Service configuration is validated eagerly at load and immutable
//!   afterwards

// =============================================================================
// MODULES
// =============================================================================

pub mod context;
pub mod engine;
pub mod futures;
pub mod pattern;
pub mod policy;
pub mod processor;
pub mod remoting;
pub mod skills;
pub mod template;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{AgoraError, Binding, ResultSet, Term, Tuple, TupleSet, Warning};

// =============================================================================
// RE-EXPORTS: Federation Layer
// =============================================================================

pub use context::{RequestContext, UNKNOWN_TARGET, WarningLedger, WarningScope};
pub use engine::QueryEngine;
pub use futures::{MultiplexedBindings, PendingHandle};
pub use policy::EndpointPolicy;
pub use processor::{
    ProcessorConfig, QueryOutcome, QueryProcessor, QuerySpec, TargetProperties,
};
pub use remoting::{
    CallCredentials, CallbackRegistry, DataspaceExecutor, InProcessBackend, InvocationMapper,
    RemotingConfig, ServiceBackend, ServiceConfig,
};
pub use skills::{InMemorySkillStore, SkillStore};
