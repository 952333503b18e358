use std::path::Path;

use crate::{
    backend::TriplestoreBackend,
    config::ConfigMap,
    error::Result,
    factory::BackendFactory,
    sparql::{Binding, QueryResult},
};

/// Uniform load/add/delete/query/execute/clear surface over one backend.
pub struct Triplestore {
    backend: Box<dyn TriplestoreBackend>,
}

impl Triplestore {
    /// Build `name` with the built-in registry.
    pub async fn open(name: &str, config: &ConfigMap) -> Result<Self> {
        Self::with_factory(&BackendFactory::default(), name, config).await
    }

    pub async fn with_factory(
        factory: &BackendFactory,
        name: &str,
        config: &ConfigMap,
    ) -> Result<Self> {
        Ok(Self::from_backend(factory.create(name, config).await?))
    }

    pub fn from_backend(backend: Box<dyn TriplestoreBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn backend(&self) -> &dyn TriplestoreBackend {
        self.backend.as_ref()
    }

    pub async fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        tracing::debug!(backend = %self.backend_name(), path = %path.display(), "load");
        self.backend.load(path).await
    }

    pub async fn add(&self, subject: &str, predicate: &str, object: &str) -> Result<()> {
        self.backend.add(subject, predicate, object).await
    }

    pub async fn delete(&self, subject: &str, predicate: &str, object: &str) -> Result<()> {
        self.backend.delete(subject, predicate, object).await
    }

    pub async fn query(&self, sparql: &str) -> Result<Vec<Binding>> {
        tracing::debug!(backend = %self.backend_name(), "query");
        self.backend.query(sparql).await
    }

    pub async fn execute(&self, sparql: &str) -> Result<QueryResult> {
        tracing::debug!(backend = %self.backend_name(), "execute");
        self.backend.execute(sparql).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    /// Stop any server this store launched.
    pub async fn shutdown(&self) {
        self.backend.shutdown().await;
    }
}
