//! # Remote Invocation Configuration
//!
//! The declarative service → arguments → result mapping. Loaded once from
//! the agent's configuration document at startup, validated eagerly and
//! immutable afterwards: a broken service definition fails before any
//! query runs, not mid-federation.

use crate::types::AgoraError;
use serde::Deserialize;
use std::collections::BTreeMap;

// =============================================================================
// CONFIGURATION MODEL
// =============================================================================

/// Mapping of one service argument predicate onto a call parameter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgumentConfig {
    /// Parameter name in the dispatched payload.
    #[serde(default)]
    pub name: Option<String>,
    /// Position when no name match is possible; -1 means keyword-only.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Value used when the pattern binds nothing for this argument.
    #[serde(default, rename = "default")]
    pub default_value: Option<String>,
    /// All members of one dispatched batch must share this argument's value.
    #[serde(default)]
    pub batch_group: bool,
    /// Whether an unresolved argument fails the invocation.
    #[serde(default = "default_true")]
    pub mandatory: bool,
}

impl ArgumentConfig {
    /// The payload key for this argument: the configured name, or the
    /// predicate's local name.
    #[must_use]
    pub fn key_for(&self, predicate: &str) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| local_name(predicate).to_string())
    }
}

/// Extraction of one output value from the raw response payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReturnValueConfig {
    /// Path into the response payload (`a.b[0].c`).
    pub path: String,
    /// Target literal datatype.
    #[serde(default = "default_datatype")]
    pub datatype: String,
    /// Ordering for positional responses.
    #[serde(default)]
    pub priority: Option<i32>,
}

/// The response side of a service: correlation plus output extraction.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultConfig {
    /// Argument predicate whose echoed value attributes a response row
    /// back to its originating request row.
    #[serde(default)]
    pub correlation_input: Option<String>,
    /// Predicate binding the whole raw response row as one JSON literal.
    #[serde(default)]
    pub result_name: Option<String>,
    /// Output predicate → extraction config.
    #[serde(default)]
    pub outputs: BTreeMap<String, ReturnValueConfig>,
}

/// One declared service class.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Call target: `https?://…` endpoint or `local:name` in-process
    /// callable.
    pub target: String,
    /// Maximum invocations per dispatched call.
    #[serde(default = "default_batch")]
    pub batch_size: usize,
    /// Marks asynchronous/callback mode; the response arrives out of band.
    #[serde(default)]
    pub callback_property: Option<String>,
    /// Per-call timeout.
    #[serde(default = "default_timeout")]
    pub invocation_timeout_ms: u64,
    /// Argument predicate → mapping.
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgumentConfig>,
    /// Result/correlation mapping.
    #[serde(default)]
    pub result: ResultConfig,
}

impl ServiceConfig {
    /// Whether the target is an in-process callable.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.target.starts_with("local:")
    }

    /// The batch-group argument predicates, in declaration order.
    #[must_use]
    pub fn batch_group_predicates(&self) -> Vec<&str> {
        self.arguments
            .iter()
            .filter(|(_, a)| a.batch_group)
            .map(|(p, _)| p.as_str())
            .collect()
    }
}

/// The full declarative remote-invocation mapping.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemotingConfig {
    /// Service class IRI → service definition.
    #[serde(default, rename = "service")]
    pub services: BTreeMap<String, ServiceConfig>,
}

fn default_priority() -> i32 {
    -1
}

fn default_true() -> bool {
    true
}

fn default_batch() -> usize {
    1
}

fn default_timeout() -> u64 {
    30_000
}

fn default_datatype() -> String {
    crate::types::xsd::STRING.to_string()
}

/// The local name of a predicate IRI (after `#`, else after the last `/`).
#[must_use]
pub fn local_name(iri: &str) -> &str {
    iri.rsplit_once('#')
        .or_else(|| iri.rsplit_once('/'))
        .map_or(iri, |(_, local)| local)
}

/// Syntactic IRI check: absolute reference, no whitespace or brackets.
fn is_valid_iri(iri: &str) -> bool {
    !iri.is_empty()
        && iri.contains(':')
        && !iri
            .chars()
            .any(|c| c.is_ascii_whitespace() || matches!(c, '<' | '>' | '"' | '{' | '}'))
}

// =============================================================================
// LOADING & VALIDATION
// =============================================================================

impl RemotingConfig {
    /// Parse and validate a configuration document.
    pub fn from_toml_str(text: &str) -> Result<Self, AgoraError> {
        let config: Self = toml_parse(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up the definition of a service class.
    #[must_use]
    pub fn service(&self, class: &str) -> Option<&ServiceConfig> {
        self.services.get(class)
    }

    /// Whether the IRI names a declared service class.
    #[must_use]
    pub fn is_service_class(&self, class: &str) -> bool {
        self.services.contains_key(class)
    }

    /// Validate the whole configuration; any failure rejects the load.
    pub fn validate(&self) -> Result<(), AgoraError> {
        for (class, service) in &self.services {
            let fail = |msg: String| Err(AgoraError::ConfigInvalid(format!("{class}: {msg}")));
            if !is_valid_iri(class) {
                return fail("service class is not a valid IRI".to_string());
            }
            if service.target.is_empty() {
                return fail("empty target".to_string());
            }
            let is_remote = service.target.starts_with("http://")
                || service.target.starts_with("https://");
            if !is_remote && !service.is_local() {
                return fail(format!("unsupported target scheme in '{}'", service.target));
            }
            if service.batch_size == 0 {
                return fail("batch size must be at least 1".to_string());
            }
            for (predicate, argument) in &service.arguments {
                if !is_valid_iri(predicate) {
                    return fail(format!("argument predicate '{predicate}' is not a valid IRI"));
                }
                if argument.name.is_none() && argument.priority < 0 {
                    return fail(format!(
                        "argument '{predicate}' needs a name or a non-negative priority"
                    ));
                }
            }
            for predicate in service.result.outputs.keys() {
                if !is_valid_iri(predicate) {
                    return fail(format!("output predicate '{predicate}' is not a valid IRI"));
                }
            }
            if let Some(callback) = &service.callback_property {
                if !is_valid_iri(callback) {
                    return fail("callback property is not a valid IRI".to_string());
                }
            }
            if let Some(result_name) = &service.result.result_name {
                if !is_valid_iri(result_name) {
                    return fail("result name is not a valid IRI".to_string());
                }
            }
            let has_batch_group = !service.batch_group_predicates().is_empty();
            match &service.result.correlation_input {
                Some(correlation) => {
                    if !service.arguments.contains_key(correlation) {
                        return fail(format!(
                            "correlation input '{correlation}' is not a declared argument"
                        ));
                    }
                    if !service.result.outputs.contains_key(correlation) {
                        return fail(format!(
                            "correlation input '{correlation}' has no output mapping to \
                             extract the echoed value"
                        ));
                    }
                }
                None if has_batch_group => {
                    return fail(
                        "batch-group arguments require a correlation input, otherwise \
                         batched responses cannot be attributed back to requests"
                            .to_string(),
                    );
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// Deserialize from TOML text, mapping parse errors to `ConfigInvalid`.
fn toml_parse<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, AgoraError> {
    toml::from_str(text).map_err(|e| AgoraError::ConfigInvalid(e.to_string()))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const HEALTH: &str = "https://w3id.org/agora/ontology/health#HealthIndication";
    const RUL: &str = "https://w3id.org/agora/ontology/rul#RemainingUsefulLife";

    fn sample() -> String {
        format!(
            r##"
[service."{HEALTH}"]
target = "https://partner.example.com/health"
batch_size = 100

[service."{HEALTH}".arguments."https://w3id.org/agora/ontology/health#requestComponentId"]
name = "componentId"
batch_group = true

[service."{HEALTH}".result]
correlation_input = "https://w3id.org/agora/ontology/health#requestComponentId"

[service."{HEALTH}".result.outputs."https://w3id.org/agora/ontology/health#requestComponentId"]
path = "componentId"

[service."{HEALTH}".result.outputs."https://w3id.org/agora/ontology/health#healthIndicator"]
path = "indicator.value"
datatype = "http://www.w3.org/2001/XMLSchema#double"

[service."{RUL}"]
target = "https://partner.example.com/rul"
callback_property = "https://w3id.org/agora/ontology/rul#notification"

[service."{RUL}".arguments."https://w3id.org/agora/ontology/rul#notification"]
name = "notification"
default = "{{}}"
mandatory = false

[service."{RUL}".arguments."https://w3id.org/agora/ontology/rul#component"]
name = "component"

[service."{RUL}".result.outputs."https://w3id.org/agora/ontology/rul#content"]
path = "content"
"##
        )
    }

    #[test]
    fn parses_and_validates_sample() {
        let config = RemotingConfig::from_toml_str(&sample()).unwrap();
        assert_eq!(config.services.len(), 2);

        let health = config.service(HEALTH).unwrap();
        assert_eq!(health.batch_size, 100);
        assert_eq!(
            health.result.correlation_input.as_deref(),
            Some("https://w3id.org/agora/ontology/health#requestComponentId")
        );

        let rul = config.service(RUL).unwrap();
        assert!(rul.callback_property.is_some());
        let notification =
            &rul.arguments["https://w3id.org/agora/ontology/rul#notification"];
        assert_eq!(notification.priority, -1);
        assert!(notification.default_value.is_some());
        assert!(!notification.batch_group);
        assert!(
            rul.result
                .outputs
                .contains_key("https://w3id.org/agora/ontology/rul#content")
        );
    }

    #[test]
    fn rejects_batch_group_without_correlation() {
        let text = r##"
[service."https://svc.example.com#S"]
target = "https://svc.example.com/api"
batch_size = 10

[service."https://svc.example.com#S".arguments."https://svc.example.com#id"]
name = "id"
batch_group = true
"##;
        let err = RemotingConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, AgoraError::ConfigInvalid(_)));
        assert!(err.to_string().contains("correlation"));
    }

    #[test]
    fn rejects_unknown_target_scheme() {
        let text = r##"
[service."https://svc.example.com#S"]
target = "ftp://svc.example.com/api"
"##;
        let err = RemotingConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("target scheme"));
    }

    #[test]
    fn rejects_bad_argument_predicate() {
        let text = r##"
[service."https://svc.example.com#S"]
target = "https://svc.example.com/api"

[service."https://svc.example.com#S".arguments."not an iri"]
name = "x"
"##;
        let err = RemotingConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("not a valid IRI"));
    }

    #[test]
    fn correlation_must_be_extractable() {
        let text = r##"
[service."https://svc.example.com#S"]
target = "https://svc.example.com/api"

[service."https://svc.example.com#S".arguments."https://svc.example.com#id"]
name = "id"
batch_group = true

[service."https://svc.example.com#S".result]
correlation_input = "https://svc.example.com#id"
"##;
        let err = RemotingConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("no output mapping"));
    }

    #[test]
    fn local_targets_pass_validation() {
        let text = r##"
[service."https://svc.example.com#S"]
target = "local:prognosis"

[service."https://svc.example.com#S".arguments."https://svc.example.com#in"]
name = "arg0"
"##;
        let config = RemotingConfig::from_toml_str(text).unwrap();
        assert!(config.service("https://svc.example.com#S").unwrap().is_local());
    }

    #[test]
    fn local_name_splits_on_hash_then_slash() {
        assert_eq!(local_name("https://a.example.com/v#name"), "name");
        assert_eq!(local_name("https://a.example.com/v/name"), "name");
        assert_eq!(local_name("name"), "name");
    }
}
