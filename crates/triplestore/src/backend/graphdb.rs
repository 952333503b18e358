use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use super::{
    DEFAULT_TIMEOUT, TriplestoreBackend, provisioning_error, read_data_file, require_select,
    trim_base_url,
};
use crate::{
    config::{BackendConfig, ConfigSchema, DefaultValue},
    error::{Result, TriplestoreError},
    sparql::{Binding, QueryResult, SparqlHttp, clear_update, data_update},
};

const NAME: &str = "graphdb";

pub(crate) const SCHEMA: ConfigSchema = ConfigSchema {
    required: &["repository"],
    optional: &[
        ("base_url", DefaultValue::Str("http://localhost:7200")),
        ("auth", DefaultValue::Null),
        ("graph", DefaultValue::Null),
        ("timeout_ms", DefaultValue::UInt(60_000)),
    ],
    aliases: &[("name", "repository"), ("graph_uri", "graph")],
};

const DESKTOP_HINT: &str = "\nHint: GraphDB Desktop restricts repository creation over REST. \
    Create the repository in the Workbench, or run GraphDB in server mode with the admin REST API enabled.";

/// Ontotext GraphDB over the RDF4J repository protocol
pub struct GraphDbBackend {
    base_url: String,
    repository: String,
    graph: Option<String>,
    http: SparqlHttp,
}

impl GraphDbBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = trim_base_url(config.required_str("base_url")?);
        let repository = config.required_str("repository")?.to_string();
        let repository_url = format!("{base_url}/repositories/{repository}");

        let http = SparqlHttp::new(
            NAME,
            repository_url.clone(),
            format!("{repository_url}/statements"),
            config.auth()?,
            config.duration_ms("timeout_ms", DEFAULT_TIMEOUT)?,
        )?;

        Ok(Self {
            base_url,
            repository,
            graph: config.graph()?,
            http,
        })
    }

    fn repository_url(&self) -> String {
        format!("{}/repositories/{}", self.base_url, self.repository)
    }

    fn repository_config(&self) -> String {
        format!(
            r#"@prefix st: <http://www.openrdf.org/config/repository#> .
@prefix sr: <http://www.openrdf.org/config/repository/sail#> .
@prefix sail: <http://www.openrdf.org/config/sail#> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
@prefix graphdb: <http://www.ontotext.com/config/graphdb#> .

[] a st:Repository ;
    st:repositoryID "{}" ;
    st:repositoryImpl [
        st:repositoryType "graphdb:SailRepository" ;
        sr:sailImpl [
            sail:sailType "graphdb:Sail" ;
            graphdb:ruleset "rdfsplus-optimized" ;
            graphdb:enable-context-index "true"^^xsd:boolean ;
            graphdb:enable-predicate-list "true"^^xsd:boolean ;
            graphdb:in-memory-literal-properties "false"^^xsd:boolean ;
            graphdb:enable-literal-index "true"^^xsd:boolean ;
            graphdb:enable-geo-spatial "false"^^xsd:boolean ;
            graphdb:enable-full-text-search "false"^^xsd:boolean ;
            graphdb:fts-index-policy "ALL" ;
            graphdb:strict-parsing "true"^^xsd:boolean ;
            graphdb:enable-query-logging "false"^^xsd:boolean
        ]
    ] .
"#,
            self.repository
        )
    }
}

#[async_trait]
impl TriplestoreBackend for GraphDbBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn load(&self, path: &Path) -> Result<()> {
        let data = read_data_file(NAME, path).await?;

        let mut request = self
            .http
            .client()
            .post(format!("{}/statements", self.repository_url()))
            .header("Content-Type", "text/turtle")
            .body(data);
        if let Some(graph) = &self.graph {
            request = request.query(&[("context", format!("<{graph}>"))]);
        }
        self.http.send("Load", request).await?;

        tracing::info!(path = %path.display(), repository = %self.repository, "Loaded file into GraphDB");
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
        self.http.execute(sparql).await
    }

    async fn clear(&self) -> Result<()> {
        self.http.update(&clear_update(self.graph.as_deref())).await
    }

    /// Restricted repositories (401/403) count as existing.
    async fn repository_exists(&self) -> Result<bool> {
        let response = self
            .http
            .send_unchecked("repository lookup", self.http.client().get(self.repository_url()))
            .await?;

        Ok(matches!(response.status().as_u16(), 200 | 401 | 403))
    }

    async fn create_repository(&self) -> Result<()> {
        let part = Part::text(self.repository_config())
            .file_name("repo-config.ttl")
            .mime_str("application/x-turtle")
            .map_err(|source| TriplestoreError::Request {
                backend: NAME,
                operation: "repository creation",
                source,
            })?;
        let request = self
            .http
            .client()
            .post(format!("{}/rest/repositories", self.base_url))
            .multipart(Form::new().part("config", part));
        let response = self.http.send_unchecked("repository creation", request).await?;

        match response.status().as_u16() {
            200 | 201 | 204 => {
                tracing::info!(repository = %self.repository, "Created GraphDB repository");
                Ok(())
            }
            403 => Err(provisioning_error(
                NAME,
                "POST /rest/repositories".to_string(),
                response,
                DESKTOP_HINT,
            )
            .await),
            _ => Err(provisioning_error(NAME, "POST /rest/repositories".to_string(), response, "").await),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use serde_json::json;

    use super::*;
    use crate::config::{ConfigMap, normalize};

    #[test]
    fn repository_config_names_the_repository() {
        let map: ConfigMap = serde_json::from_value(json!({ "name": "bench" })).unwrap();
        let backend = GraphDbBackend::new(&normalize(&map, &SCHEMA, NAME).unwrap()).unwrap();

        assert_eq!(backend.repository_url(), "http://localhost:7200/repositories/bench");
        let ttl = backend.repository_config();
        assert!(ttl.contains(r#"st:repositoryID "bench""#));
        assert!(ttl.contains("graphdb:SailRepository"));
    }
}
