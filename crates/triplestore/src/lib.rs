pub mod backend;
pub mod config;
pub mod error;
mod factory;
pub mod process;
mod registry;
pub mod rewrite;
pub mod sparql;
mod store;

pub use backend::TriplestoreBackend;
pub use config::{BackendConfig, ConfigMap, ConfigSchema, Credentials, DefaultValue, normalize};
pub use error::{Result, TriplestoreError};
pub use factory::{BackendFactory, ensure_repository};
pub use process::{ProcessLifecycleManager, ProcessState, ServerSpec};
pub use registry::{BackendDescriptor, BackendKind, BackendRegistry};
pub use rewrite::scope_to_graph;
pub use sparql::{Binding, QueryKind, QueryResult};
pub use store::Triplestore;

#[cfg(test)]
mod tests;
