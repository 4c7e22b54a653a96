//! # Query Template Resolver
//!
//! Rewrites a skill's query text before it reaches the engine:
//! - tuple-group expansion: parenthesized groups containing `@name`
//!   placeholders are replicated once per matching tuple
//! - top-level binding: remaining placeholders are substituted from the
//!   tuple keyed by the full remaining name set ("first wins" on multiple)
//! - proxy rewrite: `GRAPH <asset>` clauses become `SERVICE <target>`
//!   clauses when the asset resolves to a remote participant
//!
//! All scanning is a single explicit pass over the text: no backtracking,
//! worst-case cost linear in template length times tuple count.

use crate::context::{RequestContext, UNKNOWN_TARGET};
use crate::types::{AgoraError, TupleSet};
use std::collections::HashMap;

// =============================================================================
// URL DECODING & FORM PARSING
// =============================================================================

/// Decode one `application/x-www-form-urlencoded` value
/// (`+` becomes space, `%XX` percent escapes are resolved).
#[must_use]
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            // Decode from the raw bytes: the two positions after '%' need
            // not sit on char boundaries of `s`.
            b'%' if i + 2 < bytes.len() => {
                match (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Parse a url-encoded form body (or query string) into a multi-valued
/// parameter map. Values are returned still encoded; callers decode the
/// parts they consume.
#[must_use]
pub fn parse_form(body: &str) -> HashMap<String, Vec<String>> {
    let mut parts: HashMap<String, Vec<String>> = HashMap::new();
    for pair in body.trim_start_matches('?').split('&') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        parts
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }
    parts
}

// =============================================================================
// PLACEHOLDER SCANNING
// =============================================================================

/// Collect `@name` placeholders in order of first occurrence.
fn collect_placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'@' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_alphanumeric() {
                end += 1;
            }
            if end > start {
                let name = &text[start..end];
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
            i = end.max(i + 1);
        } else {
            i += 1;
        }
    }
    names
}

/// Substitute every `@name` whose name the lookup resolves; unresolved
/// placeholders are copied through unchanged.
fn substitute(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'@' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_alphanumeric() {
                end += 1;
            }
            if end > start {
                if let Some(value) = lookup(&text[start..end]) {
                    out.push_str(&value);
                } else {
                    out.push_str(&text[i..end]);
                }
                i = end;
                continue;
            }
        }
        // Push the full UTF-8 char starting here.
        let ch_len = text[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&text[i..i + ch_len]);
        i += ch_len;
    }
    out
}

// =============================================================================
// TUPLE EXPANSION & TOP-LEVEL BINDING
// =============================================================================

/// Expand a query template against the request's tuple set.
///
/// Parenthesized groups that contain placeholders are replaced by one copy
/// per tuple keyed by exactly the group's name set, space-separated, in
/// tuple-set order; groups without placeholders are copied verbatim. After
/// group expansion, remaining top-level placeholders resolve from the tuple
/// keyed by the full remaining name set. Top-level names without any
/// binding reject the request; multiple candidate tuples use the first and
/// record a warning, so partial answers are flagged instead of queries
/// silently hanging.
pub fn expand(
    template: &str,
    tuples: &TupleSet,
    ctx: &RequestContext,
) -> Result<String, AgoraError> {
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    while i < template.len() {
        let Some(rel) = template[i..].find('(') else {
            out.push_str(&template[i..]);
            break;
        };
        let open = i + rel;
        let tail = &template[open + 1..];
        match tail.find(['(', ')']) {
            // A closing paren with no nested open: a candidate group.
            Some(rel2) if tail.as_bytes()[rel2] == b')' => {
                let close = open + 1 + rel2;
                out.push_str(&template[i..open]);
                let group = &template[open..=close];
                let names = collect_placeholders(group);
                if names.is_empty() {
                    out.push_str(group);
                } else {
                    let matched = tuples.tuples(&names)?;
                    for (idx, tuple) in matched.iter().enumerate() {
                        if idx > 0 {
                            out.push(' ');
                        }
                        out.push_str(&substitute(group, |name| {
                            tuple.get(name).map(str::to_string)
                        }));
                    }
                }
                i = close + 1;
            }
            // Nested open paren: the outer one is plain text.
            Some(rel2) => {
                let inner = open + 1 + rel2;
                out.push_str(&template[i..inner]);
                i = inner;
            }
            // Unclosed paren: the rest is plain text.
            None => {
                out.push_str(&template[i..]);
                break;
            }
        }
    }

    let names = collect_placeholders(&out);
    if names.is_empty() {
        return Ok(out);
    }
    let matched = tuples.tuples(&names)?;
    if matched.is_empty() {
        return Err(AgoraError::MalformedBinding(format!(
            "Got variables {names:?} on top-level but no bindings"
        )));
    }
    if matched.len() > 1 {
        let target = ctx.target_url.as_deref().unwrap_or(UNKNOWN_TARGET);
        ctx.warn(
            target,
            format!(
                "Got {} tuples for top-level bindings of variables {names:?}. \
                 Using only the first one: result may be incomplete.",
                matched.len()
            ),
        );
    }
    let first = &matched[0];
    Ok(substitute(&out, |name| first.get(name).map(str::to_string)))
}

// =============================================================================
// GRAPH -> SERVICE REWRITE
// =============================================================================

/// Whether `s` starts with a `GRAPH <asset>` clause; returns the consumed
/// byte length on match.
fn match_graph_clause(s: &str, asset: &str, unset_base: &str) -> Option<usize> {
    const KEYWORD: &[u8] = b"GRAPH";
    let bytes = s.as_bytes();
    if bytes.len() < KEYWORD.len() || !bytes[..KEYWORD.len()].eq_ignore_ascii_case(KEYWORD) {
        return None;
    }
    let mut j = KEYWORD.len();
    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    let bracket = j < bytes.len() && bytes[j] == b'<';
    if bracket {
        j += 1;
    }
    if s[j..].starts_with(unset_base) {
        j += unset_base.len();
    }
    if !s[j..].starts_with(asset) {
        return None;
    }
    j += asset.len();
    if j < bytes.len() && bytes[j] == b'>' {
        return Some(j + 1);
    }
    if bracket {
        // Opened bracket without a closing one: not a clause we rewrite.
        return None;
    }
    // Bare asset reference: require a clean boundary so a longer IRI
    // sharing the asset as prefix is left alone.
    match bytes.get(j) {
        None => Some(j),
        Some(b) if b.is_ascii_whitespace() || *b == b'{' => Some(j),
        _ => None,
    }
}

/// Replace every `GRAPH <asset>` clause with `SERVICE <target_url>`.
///
/// Applies only when the asset resolves to a remote participant: a target
/// equal to the local graph base means the graph is served locally and the
/// query is returned unchanged. The graph block's content is never touched.
#[must_use]
pub fn rewrite_graph_to_service(
    query: &str,
    asset: &str,
    target_url: &str,
    local_base: &str,
    unset_base: &str,
) -> String {
    if target_url == local_base {
        return query.to_string();
    }
    let mut out = String::with_capacity(query.len());
    let mut i = 0;
    let mut prev_word_char = false;
    while i < query.len() {
        if !prev_word_char {
            if let Some(consumed) = match_graph_clause(&query[i..], asset, unset_base) {
                out.push_str(&format!("SERVICE <{target_url}>"));
                i += consumed;
                prev_word_char = false;
                continue;
            }
        }
        let ch = query[i..].chars().next().unwrap_or('\u{0}');
        prev_word_char = ch.is_ascii_alphanumeric() || ch == '_';
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Tuple;

    fn ctx() -> RequestContext {
        RequestContext::new("urn:tenant:one", "0")
    }

    fn pairs(ts: &mut TupleSet, rows: &[(&str, &str)]) {
        for (a, b) in rows {
            ts.add(Tuple::new().bind("a", *a).bind("b", *b));
        }
    }

    #[test]
    fn group_expansion_preserves_tuple_order() {
        let mut ts = TupleSet::new();
        pairs(&mut ts, &[("1", "2"), ("3", "4")]);
        let out = expand("VALUES (@a @b)", &ts, &ctx()).unwrap();
        assert_eq!(out, "VALUES (1 2) (3 4)");
    }

    #[test]
    fn group_without_placeholders_copied_verbatim() {
        let ts = TupleSet::new();
        let out = expand("SELECT (COUNT(?x) AS ?c)", &ts, &ctx()).unwrap();
        assert_eq!(out, "SELECT (COUNT(?x) AS ?c)");
    }

    #[test]
    fn group_with_no_matching_tuples_vanishes() {
        let ts = TupleSet::new();
        let out = expand("VALUES (@a @b) tail", &ts, &ctx()).unwrap();
        assert_eq!(out, "VALUES  tail");
    }

    #[test]
    fn nested_parens_expand_the_inner_group() {
        let mut ts = TupleSet::new();
        ts.add(Tuple::new().bind("x", "42"));
        let out = expand("f((@x))", &ts, &ctx()).unwrap();
        assert_eq!(out, "f((42))");
    }

    #[test]
    fn top_level_without_binding_is_rejected() {
        let ts = TupleSet::new();
        let err = expand("SELECT @missing", &ts, &ctx()).unwrap_err();
        assert!(matches!(err, AgoraError::MalformedBinding(_)));
    }

    #[test]
    fn top_level_first_tuple_wins_with_warning() {
        let mut ts = TupleSet::new();
        ts.add(Tuple::new().bind("v", "first"));
        ts.add(Tuple::new().bind("v", "second"));
        let ctx = ctx();
        let out = expand("SELECT @v", &ts, &ctx).unwrap();
        assert_eq!(out, "SELECT first");
        let warnings = ctx.ledger.current().expect("warning recorded");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].problem.contains("first one"));
    }

    #[test]
    fn single_top_level_binding_is_silent() {
        let mut ts = TupleSet::new();
        ts.add(Tuple::new().bind("v", "only"));
        let ctx = ctx();
        let out = expand("SELECT @v WHERE { ?s ?p @v }", &ts, &ctx).unwrap();
        assert_eq!(out, "SELECT only WHERE { ?s ?p only }");
        assert!(ctx.ledger.current().is_none());
    }

    #[test]
    fn placeholder_names_do_not_collide_on_prefix() {
        let mut ts = TupleSet::new();
        ts.add(Tuple::new().bind("a", "1").bind("ab", "2"));
        let out = expand("@ab @a", &ts, &ctx()).unwrap();
        assert_eq!(out, "2 1");
    }

    #[test]
    fn rewrite_is_identity_for_local_target() {
        let query = "SELECT * WHERE { GRAPH <urn:asset:g1> { ?s ?p ?o } }";
        let out = rewrite_graph_to_service(
            query,
            "urn:asset:g1",
            "https://w3id.org/agora",
            "https://w3id.org/agora",
            "http://server/unset-base/",
        );
        assert_eq!(out, query);
    }

    #[test]
    fn rewrite_replaces_every_graph_clause() {
        let query =
            "SELECT * WHERE { GRAPH <urn:asset:g1> { ?s ?p ?o } GRAPH <urn:asset:g1> { ?x ?y ?z } }";
        let out = rewrite_graph_to_service(
            query,
            "urn:asset:g1",
            "https://partner.example.com/sparql",
            "https://w3id.org/agora",
            "http://server/unset-base/",
        );
        assert_eq!(
            out,
            "SELECT * WHERE { SERVICE <https://partner.example.com/sparql> { ?s ?p ?o } \
             SERVICE <https://partner.example.com/sparql> { ?x ?y ?z } }"
        );
    }

    #[test]
    fn rewrite_strips_unset_base_prefix() {
        let query = "GRAPH <http://server/unset-base/urn:asset:g1> { ?s ?p ?o }";
        let out = rewrite_graph_to_service(
            query,
            "urn:asset:g1",
            "https://partner.example.com/sparql",
            "https://w3id.org/agora",
            "http://server/unset-base/",
        );
        assert_eq!(
            out,
            "SERVICE <https://partner.example.com/sparql> { ?s ?p ?o }"
        );
    }

    #[test]
    fn rewrite_leaves_other_graphs_alone() {
        let query = "GRAPH <urn:asset:other> { ?s ?p ?o }";
        let out = rewrite_graph_to_service(
            query,
            "urn:asset:g1",
            "https://partner.example.com/sparql",
            "https://w3id.org/agora",
            "http://server/unset-base/",
        );
        assert_eq!(out, query);
    }

    #[test]
    fn form_parsing_keeps_multi_values() {
        let parts = parse_form("?query=SELECT%20*&vin=A&vin=B");
        assert_eq!(parts["query"], vec!["SELECT%20*"]);
        assert_eq!(parts["vin"], vec!["A", "B"]);
    }

    #[test]
    fn url_decode_handles_percent_and_plus() {
        assert_eq!(url_decode("a+b%20c%3D"), "a b c=");
        assert_eq!(url_decode("100%"), "100%");
    }

    #[test]
    fn url_decode_survives_multibyte_neighbours() {
        // '%' followed by one hex digit and a multi-byte char must pass
        // through, not split the char
        assert_eq!(url_decode("%cé"), "%cé");
        assert_eq!(url_decode("%C3%A9"), "é");
        assert_eq!(url_decode("äöü"), "äöü");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // The scanner must never panic, whatever the text.
            #[test]
            fn expansion_never_panics(template in "[ -~]{0,200}") {
                let mut ts = TupleSet::new();
                ts.add(Tuple::new().bind("a", "1"));
                let _ = expand(&template, &ts, &ctx());
            }

            // Placeholder-free text passes through unchanged.
            #[test]
            fn placeholder_free_text_is_fixed_point(template in "[a-z ?<>{}().]{0,200}") {
                let ts = TupleSet::new();
                prop_assert_eq!(expand(&template, &ts, &ctx()).unwrap(), template);
            }

            // Decoding must hold up on any input, multi-byte chars beside
            // '%' included.
            #[test]
            fn url_decode_never_panics(input in "\\PC{0,100}") {
                let _ = url_decode(&input);
            }
        }
    }
}
