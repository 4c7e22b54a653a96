//! # Remote Invocation Mapping
//!
//! The declarative layer turning graph-pattern matches against declared
//! "service classes" into batched, correlated calls, and federated
//! `SERVICE` clauses into concurrent sub-queries:
//!
//! - `config`: the service → arguments → result model, validated at load
//! - `invocation`: the bind/batch/dispatch/extract/correlate lifecycle
//! - `executor`: per-participant sub-query fan-out

pub mod config;
pub mod executor;
pub mod invocation;

pub use config::{ArgumentConfig, RemotingConfig, ResultConfig, ReturnValueConfig, ServiceConfig};
pub use executor::DataspaceExecutor;
pub use invocation::{
    CallCredentials, CallbackRegistry, InProcessBackend, InvocationMapper, ServiceBackend,
};
