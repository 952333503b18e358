use std::{env, path::Path};

use async_trait::async_trait;

use super::{
    DEFAULT_TIMEOUT, TriplestoreBackend, provisioning_error, read_data_file, require_select,
    trim_base_url,
};
use crate::{
    config::{BackendConfig, ConfigSchema, Credentials, DefaultValue},
    error::Result,
    sparql::{Binding, Encoding, QueryResult, SparqlHttp, clear_update, data_update},
};

const NAME: &str = "allegrograph";

pub(crate) const SCHEMA: ConfigSchema = ConfigSchema {
    required: &["repository"],
    optional: &[
        ("base_url", DefaultValue::Str("http://localhost:10035")),
        ("auth", DefaultValue::Null),
        ("graph", DefaultValue::Null),
        ("timeout_ms", DefaultValue::UInt(60_000)),
    ],
    aliases: &[("name", "repository"), ("graph_uri", "graph")],
};

const CREDENTIALS_HINT: &str =
    "\nHint: set `auth` in the config, or AG_USERNAME and AG_PASSWORD in the environment.";

/// Franz AllegroGraph over its SPARQL HTTP interface
///
/// Updates are posted form-encoded to the repository URL itself.
pub struct AllegroGraphBackend {
    repository: String,
    repository_url: String,
    graph: Option<String>,
    http: SparqlHttp,
}

impl AllegroGraphBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = trim_base_url(config.required_str("base_url")?);
        let repository = config.required_str("repository")?.to_string();
        let repository_url = format!("{base_url}/repositories/{repository}");
        let auth = config.auth()?.or_else(credentials_from_env);

        let http = SparqlHttp::new(
            NAME,
            repository_url.clone(),
            repository_url.clone(),
            auth,
            config.duration_ms("timeout_ms", DEFAULT_TIMEOUT)?,
        )?
        .with_update_encoding(Encoding::Form);

        Ok(Self {
            repository,
            repository_url,
            graph: config.graph()?,
            http,
        })
    }
}

fn credentials_from_env() -> Option<Credentials> {
    match (env::var("AG_USERNAME"), env::var("AG_PASSWORD")) {
        (Ok(username), Ok(password)) if !username.is_empty() => {
            Some(Credentials { username, password })
        }
        _ => None,
    }
}

#[async_trait]
impl TriplestoreBackend for AllegroGraphBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn load(&self, path: &Path) -> Result<()> {
        let data = read_data_file(NAME, path).await?;

        let mut request = self
            .http
            .client()
            .post(format!("{}/statements", self.repository_url))
            .header("Content-Type", "text/turtle")
            .body(data);
        if let Some(graph) = &self.graph {
            request = request.query(&[("context", format!("<{graph}>"))]);
        }
        self.http.send("Load", request).await?;

        tracing::info!(path = %path.display(), repository = %self.repository, "Loaded file into AllegroGraph");
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

    async fn repository_exists(&self) -> Result<bool> {
        let request = self.http.client().get(format!("{}/size", self.repository_url));
        let response = self.http.send_unchecked("repository lookup", request).await?;

        let hint = match response.status().as_u16() {
            200 => return Ok(true),
            404 => return Ok(false),
            401 | 403 => CREDENTIALS_HINT,
            _ => "",
        };
        Err(provisioning_error(
            NAME,
            format!("GET /repositories/{}/size", self.repository),
            response,
            hint,
        )
        .await)
    }

    async fn create_repository(&self) -> Result<()> {
        let request = self.http.client().put(&self.repository_url);
        let response = self.http.send_unchecked("repository creation", request).await?;

        if response.status().is_success() {
            tracing::info!(repository = %self.repository, "Created AllegroGraph repository");
            Ok(())
        } else {
            Err(provisioning_error(
                NAME,
                format!("PUT /repositories/{}", self.repository),
                response,
                "",
            )
            .await)
        }
    }
}
