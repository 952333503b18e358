use std::{
    collections::BTreeMap,
    process::Command,
    time::{SystemTime, UNIX_EPOCH},
};

use serde_json::json;
use triplestore::ConfigMap;

use super::Config;
use crate::logger::LoggerConfig;

pub(crate) const TEST_GRAPH: &str = "http://example.org/test";

/// Built-in configuration: per-backend settings for a throwaway
/// `testns-<unix time>` repository scoped to the test graph.
pub(crate) fn config() -> Config {
    let namespace = format!("testns-{}", unix_secs());

    let mut backends: BTreeMap<String, ConfigMap> = BTreeMap::new();
    backends.insert("oxigraph".to_string(), ConfigMap::new());
    backends.insert(
        "jena".to_string(),
        map(json!({
            "base_url": "http://127.0.0.1:3030",
            "dataset": namespace,
            "graph": TEST_GRAPH,
        })),
    );
    backends.insert(
        "graphdb".to_string(),
        map(json!({
            "base_url": detect_host_url(7200, ""),
            "repository": namespace,
            "graph": TEST_GRAPH,
        })),
    );
    backends.insert(
        "blazegraph".to_string(),
        map(json!({
            "base_url": "http://localhost:9999/blazegraph",
            "namespace": namespace,
            "graph": TEST_GRAPH,
        })),
    );
    backends.insert(
        "allegrograph".to_string(),
        map(json!({
            "base_url": "http://localhost:10035",
            "repository": namespace,
            "graph": TEST_GRAPH,
        })),
    );
    backends.insert("millenniumdb".to_string(), ConfigMap::new());

    Config {
        logger: LoggerConfig::default(),
        backends,
    }
}

fn map(value: serde_json::Value) -> ConfigMap {
    match value {
        serde_json::Value::Object(object) => object.into_iter().collect(),
        _ => ConfigMap::new(),
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Base URL for a service on `port`: the Windows host when running under
/// WSL, `localhost` otherwise.
pub(crate) fn detect_host_url(port: u16, path: &str) -> String {
    match wsl_host_ip() {
        Some(ip) => format!("http://{ip}:{port}{path}"),
        None => format!("http://localhost:{port}{path}"),
    }
}

fn wsl_host_ip() -> Option<String> {
    let release = std::fs::read_to_string("/proc/sys/kernel/osrelease").ok()?;
    if !release.to_lowercase().contains("microsoft") {
        return None;
    }

    let output = match Command::new("ip").arg("route").output() {
        Ok(output) => output,
        Err(error) => {
            tracing::warn!(error = %error, "Auto-detection of host IP failed");
            return None;
        }
    };
    default_gateway(&String::from_utf8_lossy(&output.stdout))
}

/// Gateway address of the `default via <ip> ...` route.
fn default_gateway(routes: &str) -> Option<String> {
    routes
        .lines()
        .find(|line| line.starts_with("default via"))
        .and_then(|line| line.split_whitespace().nth(2))
        .map(str::to_string)
}
