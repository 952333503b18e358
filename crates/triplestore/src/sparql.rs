//! SPARQL operation classification, result normalization and the shared
//! SPARQL-over-HTTP client used by the server-backed adapters.

use std::{collections::HashMap, fmt, time::Duration};

use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;

use crate::{
    config::Credentials,
    error::{Result, TriplestoreError},
};

const UPDATE_KEYWORDS: &[&str] = &[
    "INSERT", "DELETE", "LOAD", "CLEAR", "CREATE", "DROP", "MOVE", "COPY", "ADD", "WITH", "MODIFY",
];

const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";
const TURTLE: &str = "text/turtle";

/// Top-level operation of a SPARQL string, decided by its first keyword only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Ask,
    /// CONSTRUCT or DESCRIBE
    Graph,
    Update,
}

impl QueryKind {
    /// Classify by the first whitespace-delimited token, case-insensitively.
    ///
    /// Returns the upper-cased token on failure. A `SELECT` nested inside a
    /// `CONSTRUCT` does not matter: only the leading token counts.
    pub fn classify(sparql: &str) -> std::result::Result<Self, String> {
        let token = leading_keyword(sparql);
        match token.as_str() {
            "SELECT" => Ok(Self::Select),
            "ASK" => Ok(Self::Ask),
            "CONSTRUCT" | "DESCRIBE" => Ok(Self::Graph),
            other if UPDATE_KEYWORDS.iter().any(|keyword| *keyword == other) => Ok(Self::Update),
            _ => Err(token),
        }
    }
}

/// First whitespace-delimited token of `sparql`, upper-cased.
pub fn leading_keyword(sparql: &str) -> String {
    sparql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

/// [`QueryKind::classify`] with the error mapped for `backend`.
pub fn classify(backend: &'static str, sparql: &str) -> Result<QueryKind> {
    QueryKind::classify(sparql)
        .map_err(|token| TriplestoreError::UnsupportedOperation { backend, token })
}

/// One SELECT row: variable name to lexical value, in projection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding(Vec<(String, String)>);

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `variable`, replacing an earlier value so keys stay unique.
    pub fn insert(&mut self, variable: impl Into<String>, value: impl Into<String>) {
        let variable = variable.into();
        let value = value.into();
        match self.0.iter_mut().find(|(name, _)| *name == variable) {
            Some(slot) => slot.1 = value,
            None => self.0.push((variable, value)),
        }
    }

    pub fn get(&self, variable: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == variable)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Binding {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut binding = Self::new();
        for (variable, value) in iter {
            binding.insert(variable, value);
        }
        binding
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (name, value)) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value:?}")?;
        }
        f.write_str("}")
    }
}

/// Uniform result of `execute`, tagged by the classified operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Bindings(Vec<Binding>),
    Boolean(bool),
    /// Serialized RDF returned by CONSTRUCT/DESCRIBE
    Graph(String),
    Unit,
}

impl QueryResult {
    pub fn kind(&self) -> QueryKind {
        match self {
            Self::Bindings(_) => QueryKind::Select,
            Self::Boolean(_) => QueryKind::Ask,
            Self::Graph(_) => QueryKind::Graph,
            Self::Unit => QueryKind::Update,
        }
    }
}

#[derive(Deserialize)]
struct SparqlJsonResponse {
    #[serde(default)]
    head: SparqlJsonHead,
    results: Option<SparqlJsonResults>,
    boolean: Option<bool>,
}

#[derive(Deserialize, Default)]
struct SparqlJsonHead {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Deserialize)]
struct SparqlJsonResults {
    bindings: Vec<HashMap<String, SparqlJsonTerm>>,
}

#[derive(Deserialize)]
struct SparqlJsonTerm {
    value: String,
}

/// Flatten SPARQL JSON results into bindings ordered by `head.vars`.
pub fn parse_select_json(backend: &'static str, json: &str) -> Result<Vec<Binding>> {
    let response: SparqlJsonResponse =
        serde_json::from_str(json).map_err(|e| TriplestoreError::Parse {
            backend,
            reason: format!("Failed to parse SELECT response: {e}"),
        })?;

    let Some(results) = response.results else {
        return Err(TriplestoreError::Parse {
            backend,
            reason: "SELECT response has no results member".to_string(),
        });
    };

    let vars = response.head.vars;
    let rows = results
        .bindings
        .into_iter()
        .map(|mut row| {
            let mut binding = Binding::new();
            for var in &vars {
                if let Some(term) = row.remove(var) {
                    binding.insert(var.clone(), term.value);
                }
            }
            // Variables missing from head still belong to the row.
            let mut rest: Vec<_> = row.into_iter().collect();
            rest.sort_by(|a, b| a.0.cmp(&b.0));
            for (var, term) in rest {
                binding.insert(var, term.value);
            }
            binding
        })
        .collect();

    Ok(rows)
}

/// Read the `boolean` member of an ASK response.
pub fn parse_ask_json(backend: &'static str, json: &str) -> Result<bool> {
    let response: SparqlJsonResponse =
        serde_json::from_str(json).map_err(|e| TriplestoreError::Parse {
            backend,
            reason: format!("Failed to parse ASK response: {e}"),
        })?;

    response.boolean.ok_or_else(|| TriplestoreError::Parse {
        backend,
        reason: "ASK response has no boolean member".to_string(),
    })
}

/// How a server expects SPARQL text to be posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encoding {
    /// Raw body with `application/sparql-query` or `application/sparql-update`
    Body,
    /// `application/x-www-form-urlencoded` with a `query` or `update` field
    Form,
}

/// Build the pooled HTTP client shared by one backend instance.
pub(crate) fn http_client(backend: &'static str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .map_err(|source| TriplestoreError::Request {
            backend,
            operation: "client setup",
            source,
        })
}

/// SPARQL 1.1 protocol client bound to one query and one update endpoint.
pub(crate) struct SparqlHttp {
    backend: &'static str,
    client: Client,
    query_url: String,
    update_url: String,
    query_encoding: Encoding,
    update_encoding: Encoding,
    auth: Option<Credentials>,
    timeout: Duration,
}

impl SparqlHttp {
    pub(crate) fn new(
        backend: &'static str,
        query_url: impl Into<String>,
        update_url: impl Into<String>,
        auth: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            backend,
            client: http_client(backend, timeout)?,
            query_url: query_url.into(),
            update_url: update_url.into(),
            query_encoding: Encoding::Form,
            update_encoding: Encoding::Body,
            auth,
            timeout,
        })
    }

    pub(crate) fn with_query_encoding(mut self, encoding: Encoding) -> Self {
        self.query_encoding = encoding;
        self
    }

    pub(crate) fn with_update_encoding(mut self, encoding: Encoding) -> Self {
        self.update_encoding = encoding;
        self
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Apply credentials and the per-request timeout.
    pub(crate) fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.timeout(self.timeout);
        match &self.auth {
            Some(credentials) => {
                builder.basic_auth(&credentials.username, Some(&credentials.password))
            }
            None => builder,
        }
    }

    /// Send with credentials and timeout, leaving status handling to the caller.
    pub(crate) async fn send_unchecked(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<Response> {
        self.authorize(builder)
            .send()
            .await
            .map_err(|source| TriplestoreError::Request {
                backend: self.backend,
                operation,
                source,
            })
    }

    /// Send and turn any non-2xx answer into a transport error.
    pub(crate) async fn send(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<Response> {
        let response = self.send_unchecked(operation, builder).await?;
        ensure_success(self.backend, operation, response).await
    }

    pub(crate) async fn text(&self, operation: &'static str, response: Response) -> Result<String> {
        response
            .text()
            .await
            .map_err(|source| TriplestoreError::Request {
                backend: self.backend,
                operation,
                source,
            })
    }

    async fn read_query(&self, operation: &'static str, sparql: &str, accept: &str) -> Result<String> {
        tracing::debug!(backend = %self.backend, operation, "Dispatching SPARQL query");
        let request = self.client.post(&self.query_url).header("Accept", accept);
        let request = match self.query_encoding {
            Encoding::Body => request
                .header("Content-Type", "application/sparql-query")
                .body(sparql.to_string()),
            Encoding::Form => request.form(&[("query", sparql)]),
        };
        let response = self.send(operation, request).await?;
        self.text(operation, response).await
    }

    /// Raw SPARQL JSON results of a SELECT.
    pub(crate) async fn select_json(&self, sparql: &str) -> Result<String> {
        self.read_query("SELECT query", sparql, SPARQL_RESULTS_JSON).await
    }

    pub(crate) async fn select(&self, sparql: &str) -> Result<Vec<Binding>> {
        let body = self.select_json(sparql).await?;
        parse_select_json(self.backend, &body)
    }

    pub(crate) async fn ask(&self, sparql: &str) -> Result<bool> {
        let body = self.read_query("ASK query", sparql, SPARQL_RESULTS_JSON).await?;
        parse_ask_json(self.backend, &body)
    }

    pub(crate) async fn graph(&self, sparql: &str) -> Result<String> {
        self.read_query("graph query", sparql, TURTLE).await
    }

    pub(crate) async fn update(&self, sparql: &str) -> Result<()> {
        tracing::debug!(backend = %self.backend, "Dispatching SPARQL update");
        let request = self.client.post(&self.update_url);
        let request = match self.update_encoding {
            Encoding::Body => request
                .header("Content-Type", "application/sparql-update")
                .body(sparql.to_string()),
            Encoding::Form => request.form(&[("update", sparql)]),
        };
        self.send("SPARQL update", request).await?;
        Ok(())
    }

    /// Classify `sparql` and route it to the matching request shape.
    pub(crate) async fn execute(&self, sparql: &str) -> Result<QueryResult> {
        match classify(self.backend, sparql)? {
            QueryKind::Select => self.select(sparql).await.map(QueryResult::Bindings),
            QueryKind::Ask => self.ask(sparql).await.map(QueryResult::Boolean),
            QueryKind::Graph => self.graph(sparql).await.map(QueryResult::Graph),
            QueryKind::Update => self.update(sparql).await.map(|()| QueryResult::Unit),
        }
    }
}

/// Pass 2xx responses through; otherwise read the body into a transport error.
pub(crate) async fn ensure_success(
    backend: &'static str,
    operation: &'static str,
    response: Response,
) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(TriplestoreError::Transport {
        backend,
        operation,
        status,
        body,
    })
}

/// `<s> <p> <o> .` for three IRIs.
pub(crate) fn triple_pattern(subject: &str, predicate: &str, object: &str) -> String {
    format!("<{subject}> <{predicate}> <{object}> .")
}

/// `INSERT DATA`/`DELETE DATA` for one triple, wrapped in `GRAPH` when scoped.
pub(crate) fn data_update(
    verb: &str,
    graph: Option<&str>,
    subject: &str,
    predicate: &str,
    object: &str,
) -> String {
    let triple = triple_pattern(subject, predicate, object);
    match graph {
        Some(graph) => format!("{verb} DATA {{ GRAPH <{graph}> {{ {triple} }} }}"),
        None => format!("{verb} DATA {{ {triple} }}"),
    }
}

/// `CLEAR GRAPH <g>` or `CLEAR DEFAULT`.
pub(crate) fn clear_update(graph: Option<&str>) -> String {
    match graph {
        Some(graph) => format!("CLEAR SILENT GRAPH <{graph}>"),
        None => "CLEAR SILENT DEFAULT".to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn classifies_by_leading_keyword() {
        let cases = [
            ("SELECT ?s WHERE { ?s ?p ?o }", QueryKind::Select),
            ("  \n\tselect * { ?s ?p ?o }", QueryKind::Select),
            ("ASK { ?s ?p ?o }", QueryKind::Ask),
            ("CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }", QueryKind::Graph),
            ("describe <http://ex/s>", QueryKind::Graph),
            ("INSERT DATA { <a> <b> <c> }", QueryKind::Update),
            ("DELETE WHERE { ?s ?p ?o }", QueryKind::Update),
            ("DELETE { ?s ?p ?o } WHERE { ?s ?p ?o }", QueryKind::Update),
            ("load <http://ex/data.ttl>", QueryKind::Update),
            ("CLEAR DEFAULT", QueryKind::Update),
            ("CREATE GRAPH <g>", QueryKind::Update),
            ("DROP GRAPH <g>", QueryKind::Update),
            ("MOVE <a> TO <b>", QueryKind::Update),
            ("COPY <a> TO <b>", QueryKind::Update),
            ("ADD <a> TO <b>", QueryKind::Update),
            ("WITH <g> DELETE { ?s ?p ?o } WHERE { ?s ?p ?o }", QueryKind::Update),
            ("MODIFY <g>", QueryKind::Update),
        ];
        for (sparql, expected) in cases {
            assert_eq!(QueryKind::classify(sparql), Ok(expected), "{sparql}");
        }
    }

    #[test]
    fn only_the_first_token_decides() {
        let sparql = "CONSTRUCT { ?s ?p ?o } WHERE { { SELECT ?s ?p ?o WHERE { ?s ?p ?o } } }";
        assert_eq!(QueryKind::classify(sparql), Ok(QueryKind::Graph));
    }

    #[test]
    fn other_tokens_are_unsupported() {
        assert_eq!(
            QueryKind::classify("PREFIX ex: <http://ex/> SELECT * {}"),
            Err("PREFIX".to_string())
        );
        assert_eq!(QueryKind::classify("explain select"), Err("EXPLAIN".to_string()));
        assert_eq!(QueryKind::classify("   "), Err(String::new()));

        let error = classify("jena", "FOO bar").unwrap_err();
        assert!(matches!(error, TriplestoreError::UnsupportedOperation { ref token, .. } if token == "FOO"));
        assert!(error.to_string().contains("FOO"));
    }

    #[test]
    fn select_json_is_flattened_in_projection_order() {
        let json = r#"{
            "head": { "vars": ["s", "p", "o"] },
            "results": { "bindings": [
                { "o": { "type": "literal", "value": "x" },
                  "s": { "type": "uri", "value": "http://ex/s" },
                  "p": { "type": "uri", "value": "http://ex/p" } },
                { "s": { "type": "bnode", "value": "b0" } }
            ] }
        }"#;

        let rows = parse_select_json("test", json).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].variables().collect::<Vec<_>>(), ["s", "p", "o"]);
        assert_eq!(rows[0].get("o"), Some("x"));
        assert_eq!(rows[1].len(), 1);
        assert_eq!(rows[1].get("s"), Some("b0"));
    }

    #[test]
    fn empty_select_results_yield_no_rows() {
        let json = r#"{ "head": { "vars": ["s"] }, "results": { "bindings": [] } }"#;
        assert!(parse_select_json("test", json).unwrap().is_empty());
    }

    #[test]
    fn ask_json_reads_boolean() {
        assert!(parse_ask_json("test", r#"{ "head": {}, "boolean": true }"#).unwrap());
        assert!(!parse_ask_json("test", r#"{ "boolean": false }"#).unwrap());
        assert!(parse_ask_json("test", r#"{ "head": {} }"#).is_err());
        assert!(parse_ask_json("test", "not json").is_err());
    }

    #[test]
    fn binding_keys_stay_unique() {
        let binding: Binding = [("s", "a"), ("p", "b"), ("s", "c")].into_iter().collect();
        assert_eq!(binding.len(), 2);
        assert_eq!(binding.get("s"), Some("c"));
        assert_eq!(binding.to_string(), r#"{s: "c", p: "b"}"#);
    }

    #[test]
    fn data_updates_respect_graph_scope() {
        assert_eq!(
            data_update("INSERT", None, "http://s", "http://p", "http://o"),
            "INSERT DATA { <http://s> <http://p> <http://o> . }"
        );
        assert_eq!(
            data_update("DELETE", Some("http://g"), "http://s", "http://p", "http://o"),
            "DELETE DATA { GRAPH <http://g> { <http://s> <http://p> <http://o> . } }"
        );
        assert_eq!(clear_update(Some("http://g")), "CLEAR SILENT GRAPH <http://g>");
        assert_eq!(clear_update(None), "CLEAR SILENT DEFAULT");
    }
}
