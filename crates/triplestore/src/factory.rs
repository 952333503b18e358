use std::sync::Arc;

#[allow(unused_imports)]
use crate::backend;
use crate::{
    backend::TriplestoreBackend,
    config::{ConfigMap, normalize},
    error::{Result, TriplestoreError},
    registry::{BackendKind, BackendRegistry},
};

/// Turns `(name, config)` into a ready backend.
///
/// Resolution goes through the registry, the adapter's schema normalizes the
/// configuration, and the remote repository is provisioned before the
/// instance is handed out.
#[derive(Debug, Clone)]
pub struct BackendFactory {
    registry: Arc<BackendRegistry>,
}

impl Default for BackendFactory {
    fn default() -> Self {
        Self::new(Arc::new(BackendRegistry::discovered()))
    }
}

impl BackendFactory {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub async fn create(
        &self,
        name: &str,
        user_config: &ConfigMap,
    ) -> Result<Box<dyn TriplestoreBackend>> {
        let name = name.to_ascii_lowercase();
        let descriptor = self.registry.lookup(&name)?;

        let kind = match descriptor.kind() {
            Some(kind) if self.registry.is_importable(&descriptor.implementation) => kind,
            _ => return Err(self.registry.not_installed(descriptor)),
        };

        let Some(backend) = construct(kind, &name, user_config).await? else {
            return Err(self.registry.not_installed(descriptor));
        };

        if backend.name() != kind.name() {
            backend.shutdown().await;
            return Err(TriplestoreError::ContractViolation {
                name,
                reason: format!(
                    "'{}' resolved to an adapter reporting itself as '{}'",
                    descriptor.implementation,
                    backend.name()
                ),
            });
        }

        if let Err(error) = ensure_repository(backend.as_ref()).await {
            backend.shutdown().await;
            return Err(error);
        }

        tracing::debug!(backend = %name, "Backend ready");
        Ok(backend)
    }
}

/// Create the configured repository/namespace/dataset when it is missing.
pub async fn ensure_repository(backend: &dyn TriplestoreBackend) -> Result<()> {
    if !backend.repository_exists().await? {
        tracing::info!(backend = %backend.name(), "Repository does not exist, creating...");
        backend.create_repository().await?;
    }
    Ok(())
}

/// Normalize against the adapter's schema and build it. `None` when the
/// adapter is not compiled into this build.
#[allow(unused_variables)]
async fn construct(
    kind: BackendKind,
    name: &str,
    user_config: &ConfigMap,
) -> Result<Option<Box<dyn TriplestoreBackend>>> {
    let backend: Box<dyn TriplestoreBackend> = match kind {
        #[cfg(feature = "allegrograph")]
        BackendKind::AllegroGraph => {
            let config = normalize(user_config, &backend::ALLEGROGRAPH_SCHEMA, name)?;
            Box::new(backend::AllegroGraphBackend::new(&config)?)
        }
        #[cfg(feature = "blazegraph")]
        BackendKind::Blazegraph => {
            let config = normalize(user_config, &backend::BLAZEGRAPH_SCHEMA, name)?;
            Box::new(backend::BlazegraphBackend::new(&config)?)
        }
        #[cfg(feature = "graphdb")]
        BackendKind::GraphDb => {
            let config = normalize(user_config, &backend::GRAPHDB_SCHEMA, name)?;
            Box::new(backend::GraphDbBackend::new(&config)?)
        }
        #[cfg(feature = "jena")]
        BackendKind::Jena => {
            let config = normalize(user_config, &backend::JENA_SCHEMA, name)?;
            Box::new(backend::JenaBackend::connect(&config).await?)
        }
        #[cfg(feature = "millenniumdb")]
        BackendKind::MillenniumDb => {
            let config = normalize(user_config, &backend::MILLENNIUMDB_SCHEMA, name)?;
            Box::new(backend::MillenniumDbBackend::new(&config)?)
        }
        #[cfg(feature = "oxigraph")]
        BackendKind::Oxigraph => {
            let config = normalize(user_config, &backend::OXIGRAPH_SCHEMA, name)?;
            Box::new(backend::OxigraphBackend::new(&config)?)
        }
        #[allow(unreachable_patterns)]
        _ => return Ok(None),
    };
    Ok(Some(backend))
}
