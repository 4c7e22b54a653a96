//! # Graph Pattern Module
//!
//! A deliberately small reader for the query shapes the federation layer
//! has to inspect itself:
//! - `SELECT` projections and `PREFIX` declarations
//! - basic graph patterns (triples with `;` continuation and `a` typing)
//! - `VALUES` inline bindings (the source of invocation batches)
//! - top-level `SERVICE <target> { ... }` clause extraction
//!
//! The surrounding engine's full parser is an external collaborator; this
//! module only recognizes what the remote-invocation mapper and the
//! federation fan-out consume, and callers fall back to that engine for
//! anything it does not recognize.

use crate::types::{AgoraError, Binding, Term, xsd};
use std::collections::HashMap;

/// rdf:type, the predicate behind the `a` keyword.
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

// =============================================================================
// LEXER
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// `<...>` IRI reference.
    Iri(String),
    /// `prefix:local` name (prefix may be empty).
    Prefixed(String, String),
    /// `?name` or `$name` variable.
    Var(String),
    /// Quoted literal with optional datatype annotation.
    Literal { lexical: String, datatype: Option<DtRef> },
    /// Bare keyword or identifier.
    Word(String),
    /// Single punctuation character.
    Punct(char),
}

#[derive(Debug, Clone, PartialEq)]
enum DtRef {
    Iri(String),
    Prefixed(String, String),
}

struct Lexer<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.text.as_bytes()
    }

    fn skip_trivia(&mut self) {
        let bytes = self.bytes();
        while self.pos < bytes.len() {
            let b = bytes[self.pos];
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b'#' {
                while self.pos < bytes.len() && bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn read_iri(&mut self) -> Result<String, AgoraError> {
        // self.pos sits on '<'
        let start = self.pos + 1;
        let rest = &self.text[start..];
        let Some(end) = rest.find('>') else {
            return Err(AgoraError::EngineFailure("unterminated IRI".to_string()));
        };
        self.pos = start + end + 1;
        Ok(rest[..end].to_string())
    }

    fn read_name(&mut self) -> String {
        let bytes = self.bytes();
        let start = self.pos;
        while self.pos < bytes.len()
            && (bytes[self.pos].is_ascii_alphanumeric()
                || bytes[self.pos] == b'_'
                || bytes[self.pos] == b'-')
        {
            self.pos += 1;
        }
        self.text[start..self.pos].to_string()
    }

    fn read_quoted(&mut self) -> Result<String, AgoraError> {
        // self.pos sits on '"'
        let bytes = self.bytes();
        let mut out = String::new();
        let mut i = self.pos + 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' if i + 1 < bytes.len() => {
                    let esc = bytes[i + 1];
                    out.push(match esc {
                        b'n' => '\n',
                        b't' => '\t',
                        other => other as char,
                    });
                    i += 2;
                }
                b'"' => {
                    self.pos = i + 1;
                    return Ok(out);
                }
                _ => {
                    let ch_len = self.text[i..].chars().next().map_or(1, char::len_utf8);
                    out.push_str(&self.text[i..i + ch_len]);
                    i += ch_len;
                }
            }
        }
        Err(AgoraError::EngineFailure("unterminated literal".to_string()))
    }

    fn next(&mut self) -> Result<Option<Token>, AgoraError> {
        self.skip_trivia();
        let bytes = self.bytes();
        if self.pos >= bytes.len() {
            return Ok(None);
        }
        let b = bytes[self.pos];
        let token = match b {
            b'<' => Token::Iri(self.read_iri()?),
            b'?' | b'$' => {
                self.pos += 1;
                Token::Var(self.read_name())
            }
            b'"' => {
                let lexical = self.read_quoted()?;
                let mut datatype = None;
                if self.text[self.pos..].starts_with("^^") {
                    self.pos += 2;
                    if self.bytes().get(self.pos) == Some(&b'<') {
                        datatype = Some(DtRef::Iri(self.read_iri()?));
                    } else {
                        let prefix = self.read_name();
                        if self.bytes().get(self.pos) == Some(&b':') {
                            self.pos += 1;
                            datatype = Some(DtRef::Prefixed(prefix, self.read_name()));
                        }
                    }
                } else if self.bytes().get(self.pos) == Some(&b'@') {
                    // language tag, recorded nowhere
                    self.pos += 1;
                    let _ = self.read_name();
                }
                Token::Literal { lexical, datatype }
            }
            b'{' | b'}' | b'(' | b')' | b';' | b',' | b'.' | b'*' => {
                self.pos += 1;
                Token::Punct(b as char)
            }
            b if b.is_ascii_digit() || b == b'-' => {
                let start = self.pos;
                self.pos += 1;
                while self.pos < bytes.len()
                    && (bytes[self.pos].is_ascii_digit() || bytes[self.pos] == b'.')
                {
                    self.pos += 1;
                }
                Token::Literal {
                    lexical: self.text[start..self.pos].to_string(),
                    datatype: Some(DtRef::Iri(xsd::INTEGER.to_string())),
                }
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let word = self.read_name();
                if self.bytes().get(self.pos) == Some(&b':') {
                    self.pos += 1;
                    Token::Prefixed(word, self.read_name())
                } else {
                    Token::Word(word)
                }
            }
            b':' => {
                self.pos += 1;
                Token::Prefixed(String::new(), self.read_name())
            }
            other => {
                return Err(AgoraError::EngineFailure(format!(
                    "unexpected character '{}'",
                    other as char
                )));
            }
        };
        Ok(Some(token))
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, AgoraError> {
    let mut lexer = Lexer::new(text);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next()? {
        tokens.push(token);
    }
    Ok(tokens)
}

// =============================================================================
// PARSED QUERY
// =============================================================================

/// One node of a triple pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternNode {
    /// A query variable.
    Var(String),
    /// A resolved IRI.
    Iri(String),
    /// A typed literal.
    Literal {
        /// The lexical form.
        lexical: String,
        /// The resolved datatype IRI.
        datatype: String,
    },
}

/// One triple pattern of a basic graph pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct TriplePattern {
    pub subject: PatternNode,
    pub predicate: PatternNode,
    pub object: PatternNode,
}

/// The body of a parsed `SELECT` query.
#[derive(Debug, Clone, Default)]
pub struct GraphPattern {
    /// Triple patterns, in query order.
    pub triples: Vec<TriplePattern>,
    /// Variables bound by a `VALUES` clause.
    pub values_vars: Vec<String>,
    /// One row per `VALUES` entry.
    pub values_rows: Vec<Binding>,
}

/// Projection and body of a `SELECT` query.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    /// Declared prefixes.
    pub prefixes: HashMap<String, String>,
    /// Projected variables; empty means `SELECT *`.
    pub select_vars: Vec<String>,
    /// The parsed WHERE pattern.
    pub pattern: GraphPattern,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    prefixes: HashMap<String, String>,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_punct(&mut self, c: char) -> Result<(), AgoraError> {
        match self.bump() {
            Some(Token::Punct(p)) if p == c => Ok(()),
            other => Err(AgoraError::EngineFailure(format!(
                "expected '{c}', found {other:?}"
            ))),
        }
    }

    fn resolve(&self, prefix: &str, local: &str) -> Result<String, AgoraError> {
        self.prefixes
            .get(prefix)
            .map(|base| format!("{base}{local}"))
            .ok_or_else(|| AgoraError::EngineFailure(format!("undeclared prefix '{prefix}:'")))
    }

    fn resolve_dt(&self, dt: Option<DtRef>) -> Result<String, AgoraError> {
        match dt {
            None => Ok(xsd::STRING.to_string()),
            Some(DtRef::Iri(iri)) => Ok(iri),
            Some(DtRef::Prefixed(p, l)) => self.resolve(&p, &l),
        }
    }

    fn node(&mut self) -> Result<PatternNode, AgoraError> {
        match self.bump() {
            Some(Token::Var(name)) => Ok(PatternNode::Var(name)),
            Some(Token::Iri(iri)) => Ok(PatternNode::Iri(iri)),
            Some(Token::Prefixed(p, l)) => Ok(PatternNode::Iri(self.resolve(&p, &l)?)),
            Some(Token::Literal { lexical, datatype }) => Ok(PatternNode::Literal {
                lexical,
                datatype: self.resolve_dt(datatype)?,
            }),
            Some(Token::Word(w)) if w == "a" => Ok(PatternNode::Iri(RDF_TYPE.to_string())),
            other => Err(AgoraError::EngineFailure(format!(
                "expected a term, found {other:?}"
            ))),
        }
    }

    fn term(&mut self) -> Result<Term, AgoraError> {
        match self.node()? {
            PatternNode::Iri(iri) => Ok(Term::Iri(iri)),
            PatternNode::Literal { lexical, datatype } => Ok(Term::Literal { lexical, datatype }),
            PatternNode::Var(v) => Err(AgoraError::EngineFailure(format!(
                "expected a constant, found variable ?{v}"
            ))),
        }
    }

    fn values_clause(&mut self, pattern: &mut GraphPattern) -> Result<(), AgoraError> {
        let mut vars = Vec::new();
        match self.bump() {
            Some(Token::Var(v)) => vars.push(v),
            Some(Token::Punct('(')) => loop {
                match self.bump() {
                    Some(Token::Var(v)) => vars.push(v),
                    Some(Token::Punct(')')) => break,
                    other => {
                        return Err(AgoraError::EngineFailure(format!(
                            "malformed VALUES variable list: {other:?}"
                        )));
                    }
                }
            },
            other => {
                return Err(AgoraError::EngineFailure(format!(
                    "malformed VALUES clause: {other:?}"
                )));
            }
        }
        self.expect_punct('{')?;
        let mut rows = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Punct('}')) => {
                    self.pos += 1;
                    break;
                }
                Some(Token::Punct('(')) => {
                    self.pos += 1;
                    let mut row = Binding::new();
                    for var in &vars {
                        row.insert(var.clone(), self.term()?);
                    }
                    self.expect_punct(')')?;
                    rows.push(row);
                }
                _ => {
                    // single-variable shorthand: bare terms
                    let mut row = Binding::new();
                    let var = vars.first().cloned().ok_or_else(|| {
                        AgoraError::EngineFailure("VALUES row without variable".to_string())
                    })?;
                    row.insert(var, self.term()?);
                    rows.push(row);
                }
            }
        }
        pattern.values_vars = vars;
        pattern.values_rows = rows;
        Ok(())
    }

    fn body(&mut self) -> Result<GraphPattern, AgoraError> {
        let mut pattern = GraphPattern::default();
        loop {
            match self.peek() {
                None | Some(Token::Punct('}')) => {
                    self.pos += 1;
                    break;
                }
                Some(Token::Word(w)) if w.eq_ignore_ascii_case("VALUES") => {
                    self.pos += 1;
                    self.values_clause(&mut pattern)?;
                }
                _ => {
                    let subject = self.node()?;
                    loop {
                        let predicate = self.node()?;
                        let object = self.node()?;
                        pattern.triples.push(TriplePattern {
                            subject: subject.clone(),
                            predicate: predicate.clone(),
                            object,
                        });
                        // object list: `p o1, o2, o3`
                        while matches!(self.peek(), Some(Token::Punct(','))) {
                            self.pos += 1;
                            let extra = self.node()?;
                            pattern.triples.push(TriplePattern {
                                subject: subject.clone(),
                                predicate: predicate.clone(),
                                object: extra,
                            });
                        }
                        if !matches!(self.peek(), Some(Token::Punct(';'))) {
                            break;
                        }
                        self.pos += 1;
                        // a trailing ';' before '.' or '}' ends the list
                        if matches!(self.peek(), Some(Token::Punct('.' | '}')) | None) {
                            break;
                        }
                    }
                    if matches!(self.peek(), Some(Token::Punct('.'))) {
                        self.pos += 1;
                    }
                }
            }
        }
        Ok(pattern)
    }
}

/// Parse a `SELECT` query into projection, prefixes and basic pattern.
///
/// Returns `EngineFailure` for anything beyond the recognized subset;
/// callers treat that as "delegate to the real engine".
pub fn parse_select(query: &str) -> Result<ParsedQuery, AgoraError> {
    let tokens = tokenize(query)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        prefixes: HashMap::new(),
    };

    // prologue
    while let Some(Token::Word(w)) = parser.peek() {
        if !w.eq_ignore_ascii_case("PREFIX") {
            break;
        }
        parser.pos += 1;
        let (prefix, base) = match (parser.bump(), parser.bump()) {
            (Some(Token::Prefixed(p, l)), Some(Token::Iri(iri))) if l.is_empty() => (p, iri),
            other => {
                return Err(AgoraError::EngineFailure(format!(
                    "malformed PREFIX declaration: {other:?}"
                )));
            }
        };
        parser.prefixes.insert(prefix, base);
    }

    match parser.bump() {
        Some(Token::Word(w)) if w.eq_ignore_ascii_case("SELECT") => {}
        other => {
            return Err(AgoraError::EngineFailure(format!(
                "expected SELECT, found {other:?}"
            )));
        }
    }

    let mut select_vars = Vec::new();
    loop {
        match parser.peek() {
            Some(Token::Var(v)) => {
                select_vars.push(v.clone());
                parser.pos += 1;
            }
            Some(Token::Punct('*')) => {
                parser.pos += 1;
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("WHERE") => {
                parser.pos += 1;
                break;
            }
            other => {
                return Err(AgoraError::EngineFailure(format!(
                    "unsupported SELECT clause element: {other:?}"
                )));
            }
        }
    }
    parser.expect_punct('{')?;
    let pattern = parser.body()?;

    Ok(ParsedQuery {
        prefixes: parser.prefixes,
        select_vars,
        pattern,
    })
}

/// Best-effort extraction of the `PREFIX` prologue of a query, for
/// rebuilding sub-queries whose full body this module cannot parse.
#[must_use]
pub fn parse_prologue(query: &str) -> HashMap<String, String> {
    let mut prefixes = HashMap::new();
    let mut lexer = Lexer::new(query);
    loop {
        match lexer.next() {
            Ok(Some(Token::Word(w))) if w.eq_ignore_ascii_case("PREFIX") => {
                match (lexer.next(), lexer.next()) {
                    (Ok(Some(Token::Prefixed(p, l))), Ok(Some(Token::Iri(iri))))
                        if l.is_empty() =>
                    {
                        prefixes.insert(p, iri);
                    }
                    _ => break,
                }
            }
            _ => break,
        }
    }
    prefixes
}

// =============================================================================
// SERVICE CLAUSE EXTRACTION
// =============================================================================

/// One `SERVICE <target> { ... }` clause found in a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceClause {
    /// The remote endpoint named by the clause.
    pub target: String,
    /// The raw text between the clause's braces.
    pub block: String,
}

/// Extract every top-level `SERVICE <target> { ... }` clause.
///
/// Scans the raw text; nested braces inside the block are balanced, quoted
/// strings are skipped over.
#[must_use]
pub fn find_service_clauses(query: &str) -> Vec<ServiceClause> {
    const KEYWORD: &[u8] = b"SERVICE";
    let bytes = query.as_bytes();
    let mut clauses = Vec::new();
    let mut i = 0;
    let mut prev_word_char = false;
    while i < bytes.len() {
        let b = bytes[i];
        // Byte-wise keyword check: a hit starts with ASCII 'S'/'s', so the
        // index is always a char boundary when we slice below.
        if !prev_word_char
            && bytes.len() - i >= KEYWORD.len()
            && bytes[i..i + KEYWORD.len()].eq_ignore_ascii_case(KEYWORD)
        {
            if let Some((clause, consumed)) = match_service_clause(&query[i..]) {
                clauses.push(clause);
                i += consumed;
                prev_word_char = false;
                continue;
            }
        }
        prev_word_char = b.is_ascii_alphanumeric() || b == b'_';
        i += 1;
    }
    clauses
}

fn match_service_clause(s: &str) -> Option<(ServiceClause, usize)> {
    let bytes = s.as_bytes();
    let mut j = "SERVICE".len();
    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    if bytes.get(j) != Some(&b'<') {
        return None;
    }
    let close = s[j..].find('>')? + j;
    let target = s[j + 1..close].to_string();
    j = close + 1;
    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    if bytes.get(j) != Some(&b'{') {
        return None;
    }
    let block_start = j + 1;
    let mut depth = 1usize;
    let mut k = block_start;
    let mut in_string = false;
    while k < bytes.len() {
        match bytes[k] {
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let block = s[block_start..k].trim().to_string();
                    return Some((ServiceClause { target, block }, k + 1));
                }
            }
            _ => {}
        }
        k += 1;
    }
    None
}

// =============================================================================
// SERVICE-CLASS MATCHING
// =============================================================================

/// A graph pattern recognized as an invocation of a declared service class.
#[derive(Debug, Clone)]
pub struct ServiceMatch {
    /// The matched service class IRI.
    pub service_class: String,
    /// The variable standing for the invocation itself.
    pub subject_var: String,
    /// Predicate/object pairs attached to the invocation subject,
    /// excluding the `rdf:type` triple.
    pub properties: Vec<(String, PatternNode)>,
    /// Variables bound by the pattern's `VALUES` clause.
    pub values_vars: Vec<String>,
    /// One row per invocation: the `VALUES` rows, or a single empty row.
    pub rows: Vec<Binding>,
}

/// Match a parsed pattern against the declared service classes.
///
/// Recognizes `?inv a <ServiceClass>` plus the predicate/object pairs
/// sharing `?inv` as subject. Returns `None` when no triple types a
/// variable as a declared class.
#[must_use]
pub fn match_service(
    pattern: &GraphPattern,
    is_class: impl Fn(&str) -> bool,
) -> Option<ServiceMatch> {
    let (subject_var, service_class) = pattern.triples.iter().find_map(|t| {
        if let (PatternNode::Var(s), PatternNode::Iri(p), PatternNode::Iri(o)) =
            (&t.subject, &t.predicate, &t.object)
        {
            if p == RDF_TYPE && is_class(o) {
                return Some((s.clone(), o.clone()));
            }
        }
        None
    })?;

    let properties = pattern
        .triples
        .iter()
        .filter_map(|t| {
            if let (PatternNode::Var(s), PatternNode::Iri(p)) = (&t.subject, &t.predicate) {
                if *s == subject_var && p != RDF_TYPE {
                    return Some((p.clone(), t.object.clone()));
                }
            }
            None
        })
        .collect();

    let rows = if pattern.values_rows.is_empty() {
        vec![Binding::new()]
    } else {
        pattern.values_rows.clone()
    };

    Some(ServiceMatch {
        service_class,
        subject_var,
        properties,
        values_vars: pattern.values_vars.clone(),
        rows,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PROGNOSIS: &str = "PREFIX xsd: <http://www.w3.org/2001/XMLSchema#> \
         PREFIX prognosis: <https://w3id.org/agora/ontology/prognosis#> \
         SELECT ?invocation ?output \
         WHERE { \
             ?invocation a prognosis:Prognosis; \
                         prognosis:input1 \"1\"^^xsd:string; \
                         prognosis:input2 \"2\"^^xsd:string; \
                         prognosis:output ?output. \
         }";

    #[test]
    fn parses_select_projection_and_prefixes() {
        let parsed = parse_select(PROGNOSIS).unwrap();
        assert_eq!(parsed.select_vars, vec!["invocation", "output"]);
        assert_eq!(
            parsed.prefixes["prognosis"],
            "https://w3id.org/agora/ontology/prognosis#"
        );
        assert_eq!(parsed.pattern.triples.len(), 4);
    }

    #[test]
    fn resolves_a_keyword_and_datatypes() {
        let parsed = parse_select(PROGNOSIS).unwrap();
        let first = &parsed.pattern.triples[0];
        assert_eq!(first.predicate, PatternNode::Iri(RDF_TYPE.to_string()));
        let second = &parsed.pattern.triples[1];
        assert_eq!(
            second.object,
            PatternNode::Literal {
                lexical: "1".to_string(),
                datatype: xsd::STRING.to_string()
            }
        );
    }

    #[test]
    fn parses_values_rows() {
        let query = "PREFIX xsd: <http://www.w3.org/2001/XMLSchema#> \
             SELECT ?input WHERE { \
               VALUES (?input) { (\"Ada\"^^xsd:string) (\"Grace\"^^xsd:string) } \
               ?invocation <https://svc.example.com#name> ?input. \
             }";
        let parsed = parse_select(query).unwrap();
        assert_eq!(parsed.pattern.values_vars, vec!["input"]);
        assert_eq!(parsed.pattern.values_rows.len(), 2);
        assert_eq!(
            parsed.pattern.values_rows[1]["input"],
            Term::string("Grace")
        );
    }

    #[test]
    fn matches_service_class_pattern() {
        let parsed = parse_select(PROGNOSIS).unwrap();
        let matched = match_service(&parsed.pattern, |c| {
            c == "https://w3id.org/agora/ontology/prognosis#Prognosis"
        })
        .unwrap();
        assert_eq!(matched.subject_var, "invocation");
        assert_eq!(matched.properties.len(), 3);
        assert_eq!(matched.rows.len(), 1);
    }

    #[test]
    fn no_service_class_means_no_match() {
        let parsed = parse_select(PROGNOSIS).unwrap();
        assert!(match_service(&parsed.pattern, |_| false).is_none());
    }

    #[test]
    fn finds_service_clauses_with_nested_braces() {
        let query = "SELECT * WHERE { \
             SERVICE <https://a.example.com/sparql> { ?s ?p ?o . FILTER { ?s a ?c } } \
             SERVICE <https://b.example.com/sparql> { ?x ?y ?z } }";
        let clauses = find_service_clauses(query);
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].target, "https://a.example.com/sparql");
        assert!(clauses[0].block.contains("FILTER"));
        assert_eq!(clauses[1].block, "?x ?y ?z");
    }

    #[test]
    fn unsupported_syntax_is_an_engine_error() {
        let err = parse_select("ASK { ?s ?p ?o }").unwrap_err();
        assert!(matches!(err, AgoraError::EngineFailure(_)));
    }
}
