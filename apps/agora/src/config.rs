//! # Application Settings
//!
//! One TOML document configures the whole agent: the `[agent]` table holds
//! the federation knobs, the `[service."<iri>"]` tables hold the
//! declarative remote-invocation mapping consumed by `agora-core`.
//! Configuration is loaded once at startup; a document failing validation
//! aborts before the listener binds.

use agora_core::processor::{LOCAL_GRAPH_BASE, ProcessorConfig, UNSET_BASE};
use agora_core::{AgoraError, RemotingConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// AGENT SETTINGS
// =============================================================================

/// The `[agent]` table of the configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSettings {
    /// This participant's identifier, stamped into warnings.
    pub source_tenant: String,
    /// Base address under which local graphs are served.
    pub local_base: String,
    /// Prefix stripped when matching graph clauses.
    pub unset_base: String,
    /// Default allow pattern over endpoint URIs.
    pub allow_pattern: String,
    /// Default deny pattern over endpoint URIs.
    pub deny_pattern: String,
    /// Pattern deciding skillhood of asset references (needs an `asset`
    /// capture group).
    pub asset_reference_pattern: String,
    /// Poll interval of the multiplexed iterator, in milliseconds.
    pub poll_interval_ms: u64,
    /// Overall per-query deadline in milliseconds; 0 leaves queries
    /// bounded only by each call's own timeout.
    pub query_deadline_ms: u64,
    /// Timeout for one federated sub-query, in milliseconds.
    pub remote_timeout_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            source_tenant: "urn:agora:tenant:local".to_string(),
            local_base: LOCAL_GRAPH_BASE.to_string(),
            unset_base: UNSET_BASE.to_string(),
            allow_pattern: agora_core::policy::DEFAULT_ALLOW.to_string(),
            deny_pattern: agora_core::policy::DEFAULT_DENY.to_string(),
            asset_reference_pattern: "(?<asset>.+)".to_string(),
            poll_interval_ms: 100,
            query_deadline_ms: 0,
            remote_timeout_ms: 30_000,
        }
    }
}

impl AgentSettings {
    /// Derive the query processor's defaults.
    #[must_use]
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            source_tenant: self.source_tenant.clone(),
            local_base: self.local_base.clone(),
            unset_base: self.unset_base.clone(),
            allow_pattern: self.allow_pattern.clone(),
            deny_pattern: self.deny_pattern.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            query_deadline: match self.query_deadline_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }

    /// The timeout applied to federated sub-queries.
    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

/// The full configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Agent-level knobs.
    #[serde(default)]
    pub agent: AgentSettings,
}

// =============================================================================
// LOADING
// =============================================================================

/// Load and validate the configuration document. With no path, built-in
/// defaults and an empty service mapping apply.
pub fn load(path: Option<&Path>) -> Result<(Settings, RemotingConfig), AgoraError> {
    let Some(path) = path else {
        return Ok((Settings::default(), RemotingConfig::default()));
    };
    let text = std::fs::read_to_string(path).map_err(|e| {
        AgoraError::ConfigInvalid(format!("cannot read {}: {e}", path.display()))
    })?;
    parse(&text)
}

/// Parse and validate a configuration document.
pub fn parse(text: &str) -> Result<(Settings, RemotingConfig), AgoraError> {
    let settings: Settings =
        toml::from_str(text).map_err(|e| AgoraError::ConfigInvalid(e.to_string()))?;
    let remoting = RemotingConfig::from_toml_str(text)?;
    Ok((settings, remoting))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_document() {
        let (settings, remoting) = load(None).unwrap();
        assert_eq!(settings.agent.poll_interval_ms, 100);
        assert!(remoting.services.is_empty());
        assert!(settings.agent.processor_config().query_deadline.is_none());
    }

    #[test]
    fn one_document_feeds_both_models() {
        let text = r##"
[agent]
source_tenant = "urn:agora:tenant:alpha"
query_deadline_ms = 5000

[service."https://svc.example.com#S"]
target = "https://svc.example.com/api"

[service."https://svc.example.com#S".arguments."https://svc.example.com#in"]
name = "in"

[service."https://svc.example.com#S".result.outputs."https://svc.example.com#out"]
path = "out"
"##;
        let (settings, remoting) = parse(text).unwrap();
        assert_eq!(settings.agent.source_tenant, "urn:agora:tenant:alpha");
        assert_eq!(
            settings.agent.processor_config().query_deadline,
            Some(Duration::from_millis(5000))
        );
        assert!(remoting.is_service_class("https://svc.example.com#S"));
    }

    #[test]
    fn invalid_service_definitions_fail_the_load() {
        let text = r##"
[service."https://svc.example.com#S"]
target = ""
"##;
        let err = parse(text).unwrap_err();
        assert!(matches!(err, AgoraError::ConfigInvalid(_)));
    }
}
