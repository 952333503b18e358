use std::path::Path;

use async_trait::async_trait;

use super::{
    DEFAULT_TIMEOUT, TriplestoreBackend, provisioning_error, read_data_file, require_select,
    trim_base_url,
};
use crate::{
    config::{BackendConfig, ConfigSchema, DefaultValue},
    error::Result,
    sparql::{Binding, QueryKind, QueryResult, SparqlHttp, classify, clear_update, data_update},
};

const NAME: &str = "blazegraph";

pub(crate) const SCHEMA: ConfigSchema = ConfigSchema {
    required: &["name"],
    optional: &[
        ("base_url", DefaultValue::Str("http://localhost:9999/blazegraph")),
        ("auth", DefaultValue::Null),
        ("graph", DefaultValue::Null),
        ("timeout_ms", DefaultValue::UInt(60_000)),
    ],
    aliases: &[("namespace", "name"), ("graph_uri", "graph")],
};

/// Blazegraph triple store backend implementation
pub struct BlazegraphBackend {
    base_url: String,
    namespace: String,
    graph: Option<String>,
    http: SparqlHttp,
}

impl BlazegraphBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = trim_base_url(config.required_str("base_url")?);
        let namespace = config.required_str("name")?.to_string();
        let endpoint = format!("{base_url}/namespace/{namespace}/sparql");

        let http = SparqlHttp::new(
            NAME,
            endpoint.clone(),
            endpoint,
            config.auth()?,
            config.duration_ms("timeout_ms", DEFAULT_TIMEOUT)?,
        )?;

        Ok(Self {
            base_url,
            namespace,
            graph: config.graph()?,
            http,
        })
    }

    fn namespace_endpoint(&self) -> String {
        format!("{}/namespace", self.base_url)
    }

    fn sparql_endpoint(&self) -> String {
        format!("{}/{}/sparql", self.namespace_endpoint(), self.namespace)
    }

    /// Quad-mode namespace properties (Java properties format)
    fn namespace_properties(&self) -> String {
        let name = &self.namespace;
        format!(
            "com.bigdata.rdf.sail.truthMaintenance=false\n\
             com.bigdata.namespace.{name}.spo.com.bigdata.btree.BTree.branchingFactor=1024\n\
             com.bigdata.rdf.store.AbstractTripleStore.textIndex=false\n\
             com.bigdata.rdf.store.AbstractTripleStore.justify=false\n\
             com.bigdata.rdf.store.AbstractTripleStore.statementIdentifiers=false\n\
             com.bigdata.rdf.store.AbstractTripleStore.axiomsClass=com.bigdata.rdf.axioms.NoAxioms\n\
             com.bigdata.rdf.sail.namespace={name}\n\
             com.bigdata.rdf.store.AbstractTripleStore.quads=true\n\
             com.bigdata.namespace.{name}.lex.com.bigdata.btree.BTree.branchingFactor=400\n\
             com.bigdata.rdf.store.AbstractTripleStore.geoSpatial=false\n\
             com.bigdata.journal.Journal.groupCommit=false\n\
             com.bigdata.rdf.sail.isolatableIndices=false\n"
        )
    }
}

#[async_trait]
impl TriplestoreBackend for BlazegraphBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn load(&self, path: &Path) -> Result<()> {
        let data = read_data_file(NAME, path).await?;

        let mut request = self
            .http
            .client()
            .post(self.sparql_endpoint())
            .header("Content-Type", "text/turtle")
            .body(data);
        if let Some(graph) = &self.graph {
            request = request.query(&[("context-uri", graph)]);
        }
        self.http.send("Load", request).await?;

        tracing::info!(path = %path.display(), namespace = %self.namespace, "Loaded file into Blazegraph");
        Ok(())
    }

    async fn add(&self, subject: &str, predicate: &str, object: &str) -> Result<()> {
        self.http
            .update(&data_update("INSERT", self.graph.as_deref(), subject, predicate, object))
            .await
    }

    async fn delete(&self, subject: &str, predicate: &str, object: &str) -> Result<()> {
        self.http
            .update(&data_update("DELETE", self.graph.as_deref(), subject, predicate, object))
            .await
    }

    async fn query(&self, sparql: &str) -> Result<Vec<Binding>> {
        require_select(NAME, sparql)?;
        self.http.select(sparql).await
    }

    async fn execute(&self, sparql: &str) -> Result<QueryResult> {
        match classify(NAME, sparql)? {
            QueryKind::Graph => {
                let text = self.http.graph(sparql).await?;
                Ok(QueryResult::Graph(decode_unicode_escapes(&text)))
            }
            _ => self.http.execute(sparql).await,
        }
    }

    async fn clear(&self) -> Result<()> {
        self.http.update(&clear_update(self.graph.as_deref())).await
    }

    async fn repository_exists(&self) -> Result<bool> {
        let url = format!(
            "{}/{}/properties?describe-each-named-graph=false",
            self.namespace_endpoint(),
            self.namespace
        );
        let request = self
            .http
            .client()
            .get(&url)
            .header("Accept", "application/ld+json");
        let response = self.http.send_unchecked("namespace lookup", request).await?;

        // 404 means namespace doesn't exist, success means it does
        if response.status().as_u16() == 404 {
            Ok(false)
        } else {
            Ok(response.status().is_success())
        }
    }

    async fn create_repository(&self) -> Result<()> {
        let request = self
            .http
            .client()
            .post(self.namespace_endpoint())
            .header("Content-Type", "text/plain")
            .body(self.namespace_properties());
        let response = self.http.send_unchecked("namespace creation", request).await?;

        if response.status().is_success() {
            tracing::info!(namespace = %self.namespace, "Created Blazegraph namespace");
            Ok(())
        } else {
            Err(provisioning_error(NAME, "POST /namespace".to_string(), response, "").await)
        }
    }
}

/// Decode Blazegraph's escaped Unicode sequences (`\Uxxxxxxxx`, `\uxxxx`)
fn decode_unicode_escapes(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        let width = match chars.peek() {
            Some('U') => 8,
            Some('u') => 4,
            _ => {
                result.push(c);
                continue;
            }
        };
        let marker = chars.next().unwrap_or_default();
        let hex: String = chars.by_ref().take(width).collect();
        if hex.len() == width
            && let Ok(code) = u32::from_str_radix(&hex, 16)
            && let Some(decoded) = char::from_u32(code)
        {
            result.push(decoded);
            continue;
        }
        // Fallback: keep original
        result.push('\\');
        result.push(marker);
        result.push_str(&hex);
    }

    result
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use serde_json::json;

    use super::*;
    use crate::config::{ConfigMap, normalize};

    #[test]
    fn decodes_both_escape_widths() {
        assert_eq!(decode_unicode_escapes(r#""caf\u00e9""#), "\"café\"");
        assert_eq!(decode_unicode_escapes(r"\U0001F600"), "\u{1F600}");
        assert_eq!(decode_unicode_escapes(r"\uZZZZ"), r"\uZZZZ");
        assert_eq!(decode_unicode_escapes(r"a\nb"), r"a\nb");
    }

    #[test]
    fn namespace_properties_enable_quads() {
        let map: ConfigMap = serde_json::from_value(json!({ "namespace": "kb" })).unwrap();
        let backend = BlazegraphBackend::new(&normalize(&map, &SCHEMA, NAME).unwrap()).unwrap();

        assert_eq!(
            backend.sparql_endpoint(),
            "http://localhost:9999/blazegraph/namespace/kb/sparql"
        );
        let properties = backend.namespace_properties();
        assert!(properties.contains("com.bigdata.rdf.sail.namespace=kb\n"));
        assert!(properties.contains("AbstractTripleStore.quads=true"));
    }
}
