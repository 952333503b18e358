mod defaults;
mod error;

use std::{collections::BTreeMap, path::Path};

pub(crate) use error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use triplestore::ConfigMap;

use crate::logger::LoggerConfig;

/// Prefix of environment overrides, e.g. `TRIPLESTORE_BACKENDS__JENA__BASE_URL`.
const ENV_PREFIX: &str = "TRIPLESTORE_";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct Config {
    pub logger: LoggerConfig,
    /// Option map handed to the backend factory, keyed by backend name
    #[serde(default)]
    pub backends: BTreeMap<String, ConfigMap>,
}

impl Config {
    /// Options for `backend`; an unconfigured backend gets an empty map.
    pub(crate) fn backend(&self, backend: &str) -> ConfigMap {
        self.backends
            .get(&backend.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }
}

/// Layer built-in defaults, then `config_path` (TOML), then environment.
pub(crate) fn load(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(defaults::config()));

    if let Some(path) = config_path {
        if !path.is_file() {
            return Err(ConfigError::MissingConfig(path.display().to_string()));
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract().map_err(Box::new)?;
    Ok(config)
}
