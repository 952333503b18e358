#![allow(clippy::unwrap_used)]

mod fake_server;
mod live;
mod process;

use serde_json::Value;

use crate::config::ConfigMap;

pub(super) fn config(value: Value) -> ConfigMap {
    serde_json::from_value(value).unwrap()
}

/// Live-server tests only run with `RUN_<BACKEND>_TESTS=1`.
pub(super) fn require_live(backend: &str) -> bool {
    let variable = format!("RUN_{}_TESTS", backend.to_ascii_uppercase());
    if std::env::var(&variable).ok().as_deref() == Some("1") {
        true
    } else {
        eprintln!("Skipping {backend} live tests (set {variable}=1)");
        false
    }
}
