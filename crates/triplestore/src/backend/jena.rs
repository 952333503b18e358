//! Apache Jena Fuseki over its SPARQL 1.1 protocol and admin endpoints.
//!
//! With `launch` set, a local `fuseki-server` is started from a generated
//! TDB2 configuration unless one already answers on `base_url`.

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    DEFAULT_TIMEOUT, TriplestoreBackend, provisioning_error, read_data_file, require_select,
    trim_base_url,
};
use crate::{
    config::{BackendConfig, ConfigSchema, DefaultValue},
    error::{Result, TriplestoreError},
    process::{ProcessLifecycleManager, ServerSpec, home_dir},
    rewrite::scope_to_graph,
    sparql::{Binding, QueryKind, QueryResult, SparqlHttp, classify, clear_update, data_update},
};

const NAME: &str = "jena";

pub(crate) const SCHEMA: ConfigSchema = ConfigSchema {
    required: &["name"],
    optional: &[
        ("base_url", DefaultValue::Str("http://localhost:3030")),
        ("auth", DefaultValue::Null),
        ("graph", DefaultValue::Null),
        ("launch", DefaultValue::Bool(true)),
        ("show_server_logs", DefaultValue::Bool(false)),
        ("startup_timeout_secs", DefaultValue::UInt(20)),
        ("timeout_ms", DefaultValue::UInt(60_000)),
    ],
    aliases: &[("dataset", "name"), ("graph_uri", "graph")],
};

const INSTALL_GUIDANCE: &str = "How to fix:\n  \
    - Install Apache Jena Fuseki and set FUSEKI_HOME to its installation directory, or\n  \
    - put the directory containing 'fuseki-server' on your PATH.\n  \
    On Windows the launcher may be 'fuseki-server.bat' or 'fuseki-server.cmd'.";

const JAVA_TOOL_OPTIONS: &str = "-Xms4g -Xmx8g";

pub struct JenaBackend {
    base_url: String,
    dataset: String,
    graph: Option<String>,
    http: SparqlHttp,
    server: Option<Mutex<ProcessLifecycleManager>>,
}

impl JenaBackend {
    /// Build the client and, when `launch` is set, make sure Fuseki is up.
    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        let base_url = trim_base_url(config.required_str("base_url")?);
        let dataset = sanitize_dataset_name(config.required_str("name")?);
        let timeout = config.duration_ms("timeout_ms", DEFAULT_TIMEOUT)?;

        let http = SparqlHttp::new(
            NAME,
            format!("{base_url}/{dataset}/query"),
            format!("{base_url}/{dataset}/update"),
            config.auth()?,
            timeout,
        )?;

        let server = if config.bool("launch")? {
            let startup = Duration::from_secs(config.u64("startup_timeout_secs")?.unwrap_or(20));
            let manager =
                Self::start_server(&base_url, &dataset, config.bool("show_server_logs")?, startup)
                    .await?;
            Some(Mutex::new(manager))
        } else {
            None
        };

        Ok(Self {
            base_url,
            dataset,
            graph: config.graph()?,
            http,
            server,
        })
    }

    async fn start_server(
        base_url: &str,
        dataset: &str,
        show_output: bool,
        startup_timeout: Duration,
    ) -> Result<ProcessLifecycleManager> {
        let mut spec = ServerSpec::new(NAME, "fuseki-server", format!("{base_url}/$/ping"));
        spec.home_env = Some("FUSEKI_HOME");
        spec.install_guidance = INSTALL_GUIDANCE.to_string();
        spec.show_output = show_output;
        spec.startup_timeout = startup_timeout;

        if !ProcessLifecycleManager::new(spec.clone())?.probe().await {
            let config_path = write_fuseki_config(dataset).await?;
            spec.args = vec!["--config".into(), config_path.into_os_string()];
            if env::var_os("JAVA_TOOL_OPTIONS").is_none() {
                spec.envs
                    .push(("JAVA_TOOL_OPTIONS".to_string(), JAVA_TOOL_OPTIONS.to_string()));
            }
        }

        let mut manager = ProcessLifecycleManager::new(spec)?;
        manager.ensure_running().await?;
        Ok(manager)
    }

    /// Sanitized dataset (service) name used in every endpoint path.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    fn scoped<'a>(&self, sparql: &'a str) -> std::borrow::Cow<'a, str> {
        match &self.graph {
            Some(graph) => scope_to_graph(sparql, graph),
            None => sparql.into(),
        }
    }
}

#[async_trait]
impl TriplestoreBackend for JenaBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn load(&self, path: &Path) -> Result<()> {
        let data = read_data_file(NAME, path).await?;

        let mut request = self
            .http
            .client()
            .post(format!("{}/{}/data", self.base_url, self.dataset))
            .header("Content-Type", "text/turtle")
            .body(data);
        if let Some(graph) = &self.graph {
            request = request.query(&[("graph", graph)]);
        }
        self.http.send("Import", request).await?;

        tracing::info!(path = %path.display(), dataset = %self.dataset, "Loaded file into Fuseki");
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
        self.http.select(&self.scoped(sparql)).await
    }

    async fn execute(&self, sparql: &str) -> Result<QueryResult> {
        match classify(NAME, sparql)? {
            QueryKind::Select => self
                .http
                .select(&self.scoped(sparql))
                .await
                .map(QueryResult::Bindings),
            _ => self.http.execute(sparql).await,
        }
    }

    async fn clear(&self) -> Result<()> {
        self.http.update(&clear_update(self.graph.as_deref())).await
    }

    async fn repository_exists(&self) -> Result<bool> {
        let url = format!("{}/$/datasets/{}", self.base_url, self.dataset);
        let response = self
            .http
            .send_unchecked("dataset lookup", self.http.client().get(&url))
            .await?;

        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(provisioning_error(
                NAME,
                format!("GET /$/datasets/{}", self.dataset),
                response,
                "",
            )
            .await),
        }
    }

    async fn create_repository(&self) -> Result<()> {
        let request = self
            .http
            .client()
            .post(format!("{}/$/datasets", self.base_url))
            .form(&[("dbName", self.dataset.as_str()), ("dbType", "tdb2")]);
        let response = self.http.send_unchecked("dataset creation", request).await?;

        if !response.status().is_success() {
            return Err(provisioning_error(NAME, "POST /$/datasets".to_string(), response, "").await);
        }

        tracing::info!(dataset = %self.dataset, "Created Fuseki dataset");
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(server) = &self.server {
            server.lock().await.stop().await;
        }
    }
}

/// Fuseki service names keep `[A-Za-z0-9_-]`; other runs collapse to `-`.
///
/// Leading and trailing dashes are dropped and an empty result becomes `ds`.
pub fn sanitize_dataset_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            cleaned.push(ch);
        } else if !cleaned.ends_with('-') {
            cleaned.push('-');
        }
    }

    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "ds".to_string()
    } else {
        trimmed.to_string()
    }
}

fn fuseki_base() -> Option<PathBuf> {
    env::var_os("FUSEKI_BASE").map(|base| crate::process::expand_home(Path::new(&base)))
}

/// TDB2 directory: `dirname($FUSEKI_BASE)/DB2`, else `~/fuseki/DB2`.
pub fn tdb2_location() -> PathBuf {
    match fuseki_base() {
        Some(base) => base
            .parent()
            .map_or_else(|| base.join("DB2"), |parent| parent.join("DB2")),
        None => home_dir().unwrap_or_default().join("fuseki").join("DB2"),
    }
}

/// Generated config path: `$FUSEKI_BASE/config.ttl`, else `~/fuseki/base/config.ttl`.
pub fn fuseki_config_path() -> PathBuf {
    fuseki_base()
        .unwrap_or_else(|| home_dir().unwrap_or_default().join("fuseki").join("base"))
        .join("config.ttl")
}

fn fuseki_config(service: &str, tdb2: &Path) -> String {
    format!(
        r#"PREFIX fuseki:  <http://jena.apache.org/fuseki#>
PREFIX tdb2:    <http://jena.apache.org/2016/tdb#>
PREFIX ja:      <http://jena.hpl.hp.com/2005/11/Assembler#>

<#service> a fuseki:Service ;
  fuseki:name "{service}" ;
  fuseki:endpoint [ fuseki:operation fuseki:query  ; fuseki:name "query"  ] ;
  fuseki:endpoint [ fuseki:operation fuseki:update ; fuseki:name "update" ] ;
  fuseki:endpoint [ fuseki:operation fuseki:gsp_rw ; fuseki:name "data"   ] ;
  fuseki:endpoint [ fuseki:operation fuseki:upload ; fuseki:name "upload" ] ;
  fuseki:dataset <#dataset> .

<#dataset> a tdb2:DatasetTDB2 ;
  tdb2:location "{}" .
"#,
        tdb2.display().to_string().replace('\\', "/")
    )
}

async fn write_fuseki_config(service: &str) -> Result<PathBuf> {
    let tdb2 = tdb2_location();
    tokio::fs::create_dir_all(&tdb2)
        .await
        .map_err(TriplestoreError::io(NAME, format!("creating {}", tdb2.display())))?;

    let config_path = fuseki_config_path();
    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(TriplestoreError::io(NAME, format!("creating {}", parent.display())))?;
    }
    tokio::fs::write(&config_path, fuseki_config(service, &tdb2))
        .await
        .map_err(TriplestoreError::io(NAME, format!("writing {}", config_path.display())))?;

    tracing::debug!(path = %config_path.display(), service, "Wrote Fuseki config");
    Ok(config_path)
}
