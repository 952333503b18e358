use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Triplestore layer errors
#[derive(Error, Debug)]
pub enum TriplestoreError {
    /// One or more required configuration keys are absent after alias resolution
    #[error("[{backend}] Configuration error: missing required config keys: '{}'", .keys.join(", "))]
    MissingConfig { backend: String, keys: Vec<String> },

    /// A configuration value has the wrong shape, or a schema alias points nowhere
    #[error("[{backend}] Invalid config value for '{key}': {reason}")]
    InvalidConfig {
        backend: String,
        key: String,
        reason: String,
    },

    /// No backend is registered under the requested name
    #[error(
        "Backend '{name}' is not recognized by this build.\n\
         Supported backends: {}.\n\
         Currently available backends: {}.",
        list_or_none(.registered),
        list_or_none(.available)
    )]
    BackendNotFound {
        name: String,
        registered: Vec<String>,
        available: Vec<String>,
    },

    /// The backend is registered but its adapter was not compiled in
    #[error(
        "Backend '{name}' is not installed.\n\
         To install it, {hint}.\n\
         Supported backends: {}.\n\
         Currently available backends: {}.",
        list_or_none(.registered),
        list_or_none(.available)
    )]
    BackendNotInstalled {
        name: String,
        hint: String,
        registered: Vec<String>,
        available: Vec<String>,
    },

    /// The registration table produced an instance that does not honor the contract
    #[error("Backend '{name}' violates the triplestore backend contract: {reason}")]
    ContractViolation { name: String, reason: String },

    /// The server answered with a non-success status
    #[error("[{backend}] {operation} failed with status {status}:\n{body}")]
    Transport {
        backend: &'static str,
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The request never produced a response (connect error, timeout, ...)
    #[error("[{backend}] {operation} request failed: {source}")]
    Request {
        backend: &'static str,
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The leading SPARQL keyword is outside the closed classification
    #[error("[{backend}] Unsupported SPARQL keyword: '{token}'")]
    UnsupportedOperation { backend: &'static str, token: String },

    /// Remote dataset/namespace/repository could not be provisioned
    #[error("[{backend}] {call} returned status {status}: {body}{hint}")]
    Provisioning {
        backend: &'static str,
        call: String,
        status: u16,
        body: String,
        hint: String,
    },

    /// Server executable could not be located
    #[error("[{server}] Unable to locate the '{executable}' executable.\n{guidance}")]
    ExecutableNotFound {
        server: &'static str,
        executable: String,
        guidance: String,
    },

    /// Server did not answer its readiness probe in time
    #[error("[{server}] Server did not become ready within {:.1}s", .elapsed.as_secs_f64())]
    StartupTimeout {
        server: &'static str,
        elapsed: Duration,
    },

    /// Input file for `load` does not exist
    #[error("[{backend}] File not found: {}", .path.display())]
    FileNotFound {
        backend: &'static str,
        path: PathBuf,
    },

    /// Local file or process I/O failed
    #[error("[{backend}] {operation} failed: {source}")]
    Io {
        backend: &'static str,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// An embedded engine rejected the SPARQL text
    #[error("[{backend}] Invalid SPARQL: {reason}")]
    InvalidQuery {
        backend: &'static str,
        reason: String,
    },

    /// Failed to parse a server response
    #[error("[{backend}] Failed to parse response: {reason}")]
    Parse {
        backend: &'static str,
        reason: String,
    },

    /// Store-side failure outside the HTTP exchange
    #[error("[{backend}] {reason}")]
    Store {
        backend: &'static str,
        reason: String,
    },
}

impl TriplestoreError {
    /// `map_err` adapter naming the backend and what was being done.
    pub(crate) fn io(
        backend: &'static str,
        operation: impl Into<String>,
    ) -> impl FnOnce(std::io::Error) -> Self {
        let operation = operation.into();
        move |source| Self::Io {
            backend,
            operation,
            source,
        }
    }
}

fn list_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, TriplestoreError>;
