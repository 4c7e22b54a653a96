//! # Core Type Definitions
//!
//! This module contains the data model shared by all federation subsystems:
//! - RDF-ish terms (`Term`) and result rows (`Binding`, `ResultSet`)
//! - Request-scoped input bindings (`Tuple`, `TupleSet`)
//! - Non-fatal problem records (`Warning`)
//! - Error types (`AgoraError`)
//!
//! ## Partial-Result Discipline
//!
//! The error enum distinguishes request-aborting failures (malformed
//! bindings, engine faults, invalid configuration) from per-invocation
//! failures that are demoted to `Warning` records and never abort a query.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

// =============================================================================
// XSD DATATYPES
// =============================================================================

/// XML Schema datatype IRIs used by result coercion.
pub mod xsd {
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    pub const INT: &str = "http://www.w3.org/2001/XMLSchema#int";
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    pub const LONG: &str = "http://www.w3.org/2001/XMLSchema#long";
    pub const FLOAT: &str = "http://www.w3.org/2001/XMLSchema#float";
    pub const DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    /// JSON-valued literals (whole response rows bound as one term).
    pub const JSON: &str = "https://w3id.org/agora/ontology#Json";
}

// =============================================================================
// TERM
// =============================================================================

/// A single RDF-ish value: an IRI or a typed literal.
///
/// Literals keep their lexical form as a string together with the datatype
/// IRI; the federation layer never interprets values beyond datatype
/// coercion at the invocation-mapping boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    /// An IRI reference.
    Iri(String),
    /// A typed literal.
    Literal {
        /// The lexical form.
        lexical: String,
        /// The datatype IRI.
        datatype: String,
    },
}

impl Term {
    /// Create an IRI term.
    #[must_use]
    pub fn iri(s: impl Into<String>) -> Self {
        Self::Iri(s.into())
    }

    /// Create an `xsd:string` literal.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::Literal {
            lexical: s.into(),
            datatype: xsd::STRING.to_string(),
        }
    }

    /// Create a literal with an explicit datatype.
    #[must_use]
    pub fn typed(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::Literal {
            lexical: lexical.into(),
            datatype: datatype.into(),
        }
    }

    /// The lexical form of a literal, or the IRI string itself.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Iri(iri) => iri,
            Self::Literal { lexical, .. } => lexical,
        }
    }

    /// Whether this term is an IRI.
    #[must_use]
    pub fn is_iri(&self) -> bool {
        matches!(self, Self::Iri(_))
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Iri(iri) => write!(f, "<{iri}>"),
            Self::Literal { lexical, datatype } => write!(f, "\"{lexical}\"^^<{datatype}>"),
        }
    }
}

// =============================================================================
// BINDING & RESULT SET
// =============================================================================

/// One result row: variable name → term.
pub type Binding = BTreeMap<String, Term>;

/// SPARQL-JSON wire representation of a term.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JsonTerm {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    datatype: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JsonHead {
    vars: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JsonResults {
    bindings: Vec<BTreeMap<String, JsonTerm>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JsonResultSet {
    head: JsonHead,
    results: JsonResults,
}

/// A complete query result: projected variables plus rows.
///
/// Serialized on the wire in the SPARQL query-results JSON shape
/// (`{"head": {"vars": [...]}, "results": {"bindings": [...]}}`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    /// Projected variable names, in declaration order.
    pub vars: Vec<String>,
    /// Result rows. Rows may bind a subset of `vars`.
    pub bindings: Vec<Binding>,
}

impl ResultSet {
    /// Create an empty result set projecting the given variables.
    #[must_use]
    pub fn empty(vars: Vec<String>) -> Self {
        Self {
            vars,
            bindings: Vec::new(),
        }
    }

    /// Render in the SPARQL query-results JSON shape.
    #[must_use]
    pub fn to_sparql_json(&self) -> serde_json::Value {
        let bindings = self
            .bindings
            .iter()
            .map(|row| {
                row.iter()
                    .map(|(var, term)| {
                        let jt = match term {
                            Term::Iri(iri) => JsonTerm {
                                kind: "uri".to_string(),
                                value: iri.clone(),
                                datatype: None,
                            },
                            Term::Literal { lexical, datatype } => JsonTerm {
                                kind: "literal".to_string(),
                                value: lexical.clone(),
                                datatype: if datatype == xsd::STRING {
                                    None
                                } else {
                                    Some(datatype.clone())
                                },
                            },
                        };
                        (var.clone(), jt)
                    })
                    .collect()
            })
            .collect();
        let set = JsonResultSet {
            head: JsonHead {
                vars: self.vars.clone(),
            },
            results: JsonResults { bindings },
        };
        serde_json::to_value(set).unwrap_or_else(|_| serde_json::Value::Null)
    }

    /// Parse from the SPARQL query-results JSON shape.
    pub fn from_sparql_json(value: &serde_json::Value) -> Result<Self, AgoraError> {
        let set: JsonResultSet = serde_json::from_value(value.clone())
            .map_err(|e| AgoraError::RemoteFailure(format!("malformed result set: {e}")))?;
        let bindings = set
            .results
            .bindings
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(var, jt)| {
                        let term = if jt.kind == "uri" {
                            Term::Iri(jt.value)
                        } else {
                            Term::Literal {
                                lexical: jt.value,
                                datatype: jt.datatype.unwrap_or_else(|| xsd::STRING.to_string()),
                            }
                        };
                        (var, term)
                    })
                    .collect()
            })
            .collect();
        Ok(Self {
            vars: set.head.vars,
            bindings,
        })
    }
}

// =============================================================================
// TUPLE & TUPLE SET
// =============================================================================

/// One bound set of named variable values used to parameterize a query
/// fragment. Values are literal strings; substitution is textual.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    values: BTreeMap<String, String>,
}

impl Tuple {
    /// Create an empty tuple.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable, consuming and returning the tuple (builder style).
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Look up a variable's value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// The variable names bound by this tuple.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn key(&self) -> BTreeSet<String> {
        self.values.keys().cloned().collect()
    }
}

/// A keyed collection of tuples supplied by the request context.
///
/// Tuples are grouped by their exact variable-name set; lookups with a name
/// combination return every tuple keyed by exactly that set, in insertion
/// order. Built once per inbound request and immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct TupleSet {
    groups: Vec<(BTreeSet<String>, Vec<Tuple>)>,
}

impl TupleSet {
    /// Create an empty tuple set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tuple, grouping it with tuples sharing its variable set.
    pub fn add(&mut self, tuple: Tuple) {
        let key = tuple.key();
        if let Some((_, tuples)) = self.groups.iter_mut().find(|(k, _)| *k == key) {
            tuples.push(tuple);
        } else {
            self.groups.push((key, vec![tuple]));
        }
    }

    /// Build a tuple set from request parameters.
    ///
    /// Each `name=value` pair contributes a single-variable tuple; repeated
    /// names contribute repeated tuples. A parameter named `(a,b)` with a
    /// comma-separated value contributes one multi-variable tuple.
    #[must_use]
    pub fn from_params<'a>(params: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut set = Self::new();
        for (name, value) in params {
            if let Some(group) = name.strip_prefix('(').and_then(|n| n.strip_suffix(')')) {
                let names: Vec<&str> = group.split(',').map(str::trim).collect();
                let raw = value
                    .strip_prefix('(')
                    .and_then(|v| v.strip_suffix(')'))
                    .unwrap_or(value);
                let values: Vec<&str> = raw.split(',').map(str::trim).collect();
                if names.len() != values.len() {
                    tracing::debug!(param = name, "Skipping tuple parameter with mismatched arity");
                    continue;
                }
                let mut tuple = Tuple::new();
                for (n, v) in names.iter().zip(values.iter()) {
                    tuple = tuple.bind(*n, *v);
                }
                set.add(tuple);
            } else {
                set.add(Tuple::new().bind(name, value));
            }
        }
        set
    }

    /// All tuples keyed by exactly this name combination.
    ///
    /// Returns an empty list when none of the names is bound anywhere.
    /// Returns `MalformedBinding` when the names overlap an existing group
    /// without matching it exactly: such a combination cannot be satisfied
    /// consistently.
    pub fn tuples(&self, names: &[String]) -> Result<Vec<Tuple>, AgoraError> {
        let key: BTreeSet<String> = names.iter().cloned().collect();
        if key.is_empty() {
            return Ok(Vec::new());
        }
        if let Some((_, tuples)) = self.groups.iter().find(|(k, _)| *k == key) {
            return Ok(tuples.clone());
        }
        let bound_somewhere = self
            .groups
            .iter()
            .any(|(k, _)| !k.is_disjoint(&key));
        if bound_somewhere {
            return Err(AgoraError::MalformedBinding(format!(
                "Inconsistent binding combination {names:?}"
            )));
        }
        Ok(Vec::new())
    }

    /// Whether no tuples at all were supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

// =============================================================================
// WARNING
// =============================================================================

/// A structured, non-fatal record of a partial failure during federation.
///
/// Warnings are exposed to the caller via the `cx_warnings` response header
/// and never escalate to a query failure on their own. Immutable after
/// creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    /// The tenant issuing the federated query.
    pub source_tenant: String,
    /// The consuming graph/asset on the source side.
    pub source_asset: String,
    /// The remote tenant that failed to answer.
    pub target_tenant: String,
    /// The remote asset that failed to answer.
    pub target_asset: String,
    /// An identifier of the execution context that produced the warning.
    pub context: String,
    /// Human-readable description of the problem.
    pub problem: String,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the federation subsystems.
///
/// Only `MalformedBinding`, `SkillNotFound` (client errors) and
/// `EngineFailure` (server error) abort a request; the per-invocation
/// variants are recorded as warnings by the invocation layer and surface
/// here only when a caller invokes that layer directly.
#[derive(Debug, Error)]
pub enum AgoraError {
    /// Unresolved top-level variables, malformed form bodies, bad
    /// per-request policy patterns. Surfaced as 400; not executed.
    #[error("Malformed binding: {0}")]
    MalformedBinding(String),

    /// A skill reference did not resolve in the skill store.
    #[error("No such skill: {0}")]
    SkillNotFound(String),

    /// A mandatory service argument had neither a binding nor a default.
    #[error("Missing argument {predicate} for service {service}")]
    MissingArgument {
        /// The service class whose invocation failed.
        service: String,
        /// The unresolved argument predicate.
        predicate: String,
    },

    /// A resolved target failed the allow pattern or matched the deny
    /// pattern; the call was not executed.
    #[error("Endpoint denied by policy: {0}")]
    PolicyDenied(String),

    /// A remote call failed or timed out. Per-invocation, non-fatal.
    #[error("Remote invocation failed: {0}")]
    RemoteFailure(String),

    /// The underlying query engine failed. Surfaced as 500.
    #[error("Engine failure: {0}")]
    EngineFailure(String),

    /// A service configuration failed load-time validation. Fatal at
    /// startup; never reaches request serving.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tuple_set_groups_by_exact_variable_set() {
        let mut ts = TupleSet::new();
        ts.add(Tuple::new().bind("a", "1").bind("b", "2"));
        ts.add(Tuple::new().bind("a", "3").bind("b", "4"));
        ts.add(Tuple::new().bind("c", "9"));

        let names = vec!["a".to_string(), "b".to_string()];
        let tuples = ts.tuples(&names).unwrap();
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0].get("a"), Some("1"));
        assert_eq!(tuples[1].get("b"), Some("4"));
    }

    #[test]
    fn tuple_set_order_preserved_within_key() {
        let mut ts = TupleSet::new();
        ts.add(Tuple::new().bind("x", "first"));
        ts.add(Tuple::new().bind("x", "second"));
        let tuples = ts.tuples(&["x".to_string()]).unwrap();
        assert_eq!(tuples[0].get("x"), Some("first"));
        assert_eq!(tuples[1].get("x"), Some("second"));
    }

    #[test]
    fn tuple_set_rejects_partial_overlap() {
        let mut ts = TupleSet::new();
        ts.add(Tuple::new().bind("a", "1").bind("b", "2"));
        let err = ts.tuples(&["a".to_string()]).unwrap_err();
        assert!(matches!(err, AgoraError::MalformedBinding(_)));
    }

    #[test]
    fn tuple_set_unbound_names_yield_empty() {
        let ts = TupleSet::new();
        assert!(ts.tuples(&["nope".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn tuple_set_from_params_multi_variable() {
        let ts = TupleSet::from_params(vec![("(a,b)", "(1,2)"), ("c", "3"), ("c", "4")]);
        let pair = ts
            .tuples(&["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(pair.len(), 1);
        assert_eq!(pair[0].get("b"), Some("2"));
        let singles = ts.tuples(&["c".to_string()]).unwrap();
        assert_eq!(singles.len(), 2);
    }

    #[test]
    fn result_set_sparql_json_round_trip() {
        let mut row = Binding::new();
        row.insert("s".to_string(), Term::iri("https://example.com/x"));
        row.insert("v".to_string(), Term::typed("42", xsd::INT));
        let rs = ResultSet {
            vars: vec!["s".to_string(), "v".to_string()],
            bindings: vec![row],
        };
        let json = rs.to_sparql_json();
        assert_eq!(json["head"]["vars"][0], "s");
        assert_eq!(json["results"]["bindings"][0]["s"]["type"], "uri");
        assert_eq!(json["results"]["bindings"][0]["v"]["datatype"], xsd::INT);

        let back = ResultSet::from_sparql_json(&json).unwrap();
        assert_eq!(back, rs);
    }

    #[test]
    fn plain_string_literal_omits_datatype() {
        let mut row = Binding::new();
        row.insert("n".to_string(), Term::string("hello"));
        let rs = ResultSet {
            vars: vec!["n".to_string()],
            bindings: vec![row],
        };
        let json = rs.to_sparql_json();
        assert!(json["results"]["bindings"][0]["n"].get("datatype").is_none());
    }
}
