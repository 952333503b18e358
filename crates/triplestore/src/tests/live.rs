//! Round trips against real servers, opt-in per backend.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};

use super::{config, require_live};
use crate::Triplestore;

const GRAPH: &str = "http://example.org/test";
const ALL: &str = "SELECT ?s ?p ?o WHERE { ?s ?p ?o }";

fn test_namespace() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    format!("testns-{secs}")
}

fn url_from_env(variable: &str, default: &str) -> String {
    std::env::var(variable).unwrap_or_else(|_| default.to_string())
}

async fn round_trip(backend: &str, settings: Value) {
    let store = Triplestore::open(backend, &config(settings)).await.unwrap();
    store.clear().await.unwrap();

    store
        .add("http://ex/s", "http://ex/p", "http://ex/o")
        .await
        .unwrap();
    let rows = store.query(ALL).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("o"), Some("http://ex/o"));

    store
        .delete("http://ex/s", "http://ex/p", "http://ex/o")
        .await
        .unwrap();
    assert!(store.query(ALL).await.unwrap().is_empty());

    store.clear().await.unwrap();
    store.shutdown().await;
}

#[cfg(feature = "jena")]
#[tokio::test]
async fn jena_round_trip() {
    if !require_live("jena") {
        return;
    }
    round_trip(
        "jena",
        json!({
            "name": test_namespace(),
            "base_url": url_from_env("JENA_URL", "http://localhost:3030"),
            "graph": GRAPH,
        }),
    )
    .await;
}

#[cfg(feature = "graphdb")]
#[tokio::test]
async fn graphdb_round_trip() {
    if !require_live("graphdb") {
        return;
    }
    round_trip(
        "graphdb",
        json!({
            "repository": test_namespace(),
            "base_url": url_from_env("GRAPHDB_URL", "http://localhost:7200"),
            "graph": GRAPH,
        }),
    )
    .await;
}

#[cfg(feature = "blazegraph")]
#[tokio::test]
async fn blazegraph_round_trip() {
    if !require_live("blazegraph") {
        return;
    }
    round_trip(
        "blazegraph",
        json!({
            "name": test_namespace(),
            "base_url": url_from_env("BLAZEGRAPH_URL", "http://localhost:9999/blazegraph"),
            "graph": GRAPH,
        }),
    )
    .await;
}

#[cfg(feature = "allegrograph")]
#[tokio::test]
async fn allegrograph_round_trip() {
    if !require_live("allegrograph") {
        return;
    }
    round_trip(
        "allegrograph",
        json!({
            "repository": test_namespace(),
            "base_url": url_from_env("ALLEGROGRAPH_URL", "http://localhost:10035"),
            "graph": GRAPH,
        }),
    )
    .await;
}

#[cfg(feature = "millenniumdb")]
#[tokio::test]
async fn millenniumdb_round_trip() {
    if !require_live("millenniumdb") {
        return;
    }
    round_trip(
        "millenniumdb",
        json!({ "mdb_home": url_from_env("MDB_HOME", "~/projects/MillenniumDB") }),
    )
    .await;
}
