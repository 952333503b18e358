#[cfg(feature = "allegrograph")]
mod allegrograph;
#[cfg(feature = "blazegraph")]
mod blazegraph;
#[cfg(feature = "graphdb")]
mod graphdb;
#[cfg(feature = "jena")]
mod jena;
#[cfg(feature = "millenniumdb")]
mod millenniumdb;
#[cfg(feature = "oxigraph")]
mod oxigraph_backend;

use std::{path::Path, time::Duration};

#[cfg(feature = "allegrograph")]
pub use allegrograph::AllegroGraphBackend;
use async_trait::async_trait;
#[cfg(feature = "blazegraph")]
pub use blazegraph::BlazegraphBackend;
#[cfg(feature = "graphdb")]
pub use graphdb::GraphDbBackend;
#[cfg(feature = "jena")]
pub use jena::{JenaBackend, fuseki_config_path, sanitize_dataset_name, tdb2_location};
#[cfg(feature = "millenniumdb")]
pub use millenniumdb::MillenniumDbBackend;
#[cfg(feature = "oxigraph")]
pub use oxigraph_backend::OxigraphBackend;

#[cfg(feature = "allegrograph")]
pub(crate) use allegrograph::SCHEMA as ALLEGROGRAPH_SCHEMA;
#[cfg(feature = "blazegraph")]
pub(crate) use blazegraph::SCHEMA as BLAZEGRAPH_SCHEMA;
#[cfg(feature = "graphdb")]
pub(crate) use graphdb::SCHEMA as GRAPHDB_SCHEMA;
#[cfg(feature = "jena")]
pub(crate) use jena::SCHEMA as JENA_SCHEMA;
#[cfg(feature = "millenniumdb")]
pub(crate) use millenniumdb::SCHEMA as MILLENNIUMDB_SCHEMA;
#[cfg(feature = "oxigraph")]
pub(crate) use oxigraph_backend::SCHEMA as OXIGRAPH_SCHEMA;

use crate::{
    error::{Result, TriplestoreError},
    sparql::{Binding, QueryKind, QueryResult, leading_keyword},
};

/// Capability contract shared by every triplestore adapter.
///
/// All operations are graph-scoped when the instance was configured with a
/// `graph`; otherwise they act on the default graph.
#[async_trait]
pub trait TriplestoreBackend: Send + Sync {
    /// Registered name of the backend, lower-case
    fn name(&self) -> &'static str;

    /// Bulk-ingest a Turtle document.
    async fn load(&self, path: &Path) -> Result<()>;

    /// Insert exactly one triple of IRIs.
    async fn add(&self, subject: &str, predicate: &str, object: &str) -> Result<()>;

    /// Remove exactly one triple; removing an absent triple is not an error.
    async fn delete(&self, subject: &str, predicate: &str, object: &str) -> Result<()>;

    /// Run a SELECT and return its rows. Other query forms go through `execute`.
    async fn query(&self, sparql: &str) -> Result<Vec<Binding>>;

    /// Classify `sparql` by its leading keyword and route it.
    async fn execute(&self, sparql: &str) -> Result<QueryResult>;

    /// Remove every triple of the configured graph.
    async fn clear(&self) -> Result<()>;

    /// Check if the configured repository/namespace/dataset exists
    async fn repository_exists(&self) -> Result<bool> {
        Ok(true)
    }

    /// Create the repository/namespace/dataset with appropriate settings
    async fn create_repository(&self) -> Result<()> {
        Ok(())
    }

    /// Release servers this instance spawned. Safe to call more than once.
    async fn shutdown(&self) {}
}

/// Per-request timeout when `timeout_ms` is not configured
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Read a failed admin response into a provisioning error naming the call.
pub(crate) async fn provisioning_error(
    backend: &'static str,
    call: String,
    response: reqwest::Response,
    hint: &str,
) -> TriplestoreError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    TriplestoreError::Provisioning {
        backend,
        call,
        status,
        body,
        hint: hint.to_string(),
    }
}

/// Reject anything but a SELECT before it reaches a `query` implementation.
pub(crate) fn require_select(backend: &'static str, sparql: &str) -> Result<()> {
    match QueryKind::classify(sparql) {
        Ok(QueryKind::Select) => Ok(()),
        _ => Err(TriplestoreError::UnsupportedOperation {
            backend,
            token: leading_keyword(sparql),
        }),
    }
}

/// `NotFound` for a missing `load` input, before any remote call is made.
pub(crate) fn ensure_file(backend: &'static str, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(TriplestoreError::FileNotFound {
            backend,
            path: path.to_path_buf(),
        })
    }
}

/// Contents of a `load` input, after the existence check.
pub(crate) async fn read_data_file(backend: &'static str, path: &Path) -> Result<Vec<u8>> {
    ensure_file(backend, path)?;
    tokio::fs::read(path)
        .await
        .map_err(TriplestoreError::io(backend, format!("reading {}", path.display())))
}

/// Trim a trailing slash so endpoint paths can be appended with `/`.
pub(crate) fn trim_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}
