use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::error::{Result, TriplestoreError};

/// Closed set of adapters this crate can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    AllegroGraph,
    Blazegraph,
    GraphDb,
    Jena,
    MillenniumDb,
    Oxigraph,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        Self::AllegroGraph,
        Self::Blazegraph,
        Self::GraphDb,
        Self::Jena,
        Self::MillenniumDb,
        Self::Oxigraph,
    ];

    /// Public name, also the cargo feature that compiles the adapter in.
    pub fn name(self) -> &'static str {
        match self {
            Self::AllegroGraph => "allegrograph",
            Self::Blazegraph => "blazegraph",
            Self::GraphDb => "graphdb",
            Self::Jena => "jena",
            Self::MillenniumDb => "millenniumdb",
            Self::Oxigraph => "oxigraph",
        }
    }

    /// Implementation reference recorded in the manifest.
    pub fn implementation(self) -> &'static str {
        match self {
            Self::AllegroGraph => "triplestore::backend::AllegroGraphBackend",
            Self::Blazegraph => "triplestore::backend::BlazegraphBackend",
            Self::GraphDb => "triplestore::backend::GraphDbBackend",
            Self::Jena => "triplestore::backend::JenaBackend",
            Self::MillenniumDb => "triplestore::backend::MillenniumDbBackend",
            Self::Oxigraph => "triplestore::backend::OxigraphBackend",
        }
    }

    pub fn from_implementation(implementation: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.implementation() == implementation)
    }

    /// Whether the adapter was compiled into this build.
    pub fn is_compiled(self) -> bool {
        match self {
            Self::AllegroGraph => cfg!(feature = "allegrograph"),
            Self::Blazegraph => cfg!(feature = "blazegraph"),
            Self::GraphDb => cfg!(feature = "graphdb"),
            Self::Jena => cfg!(feature = "jena"),
            Self::MillenniumDb => cfg!(feature = "millenniumdb"),
            Self::Oxigraph => cfg!(feature = "oxigraph"),
        }
    }

    pub fn install_hint(self) -> String {
        format!(
            "rebuild with the `{0}` feature enabled (`cargo build --features {0}`)",
            self.name()
        )
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == lowered)
            .ok_or_else(|| format!("unknown backend '{s}'"))
    }
}

/// Built-in entry points: public name -> implementation reference.
const MANIFEST: &[(&str, &str)] = &[
    ("allegrograph", "triplestore::backend::AllegroGraphBackend"),
    ("blazegraph", "triplestore::backend::BlazegraphBackend"),
    ("graphdb", "triplestore::backend::GraphDbBackend"),
    ("jena", "triplestore::backend::JenaBackend"),
    ("millenniumdb", "triplestore::backend::MillenniumDbBackend"),
    ("oxigraph", "triplestore::backend::OxigraphBackend"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub name: String,
    pub implementation: String,
}

impl BackendDescriptor {
    /// Adapter behind this descriptor, if the reference names one.
    pub fn kind(&self) -> Option<BackendKind> {
        BackendKind::from_implementation(&self.implementation)
    }
}

/// Name -> implementation table, filled once from the manifest.
///
/// Availability is never cached: every call re-checks whether the referenced
/// adapter is present in this build.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    descriptors: BTreeMap<String, BackendDescriptor>,
    discovered: bool,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in manifest already discovered.
    pub fn discovered() -> Self {
        let mut registry = Self::new();
        registry.discover();
        registry
    }

    /// Load the manifest. Later calls do nothing.
    pub fn discover(&mut self) {
        if self.discovered {
            return;
        }
        for (name, implementation) in MANIFEST {
            self.register(name, implementation);
        }
        self.discovered = true;
        tracing::debug!(backends = self.descriptors.len(), "Discovered triplestore backends");
    }

    /// Add (or replace) an entry under the lower-cased `name`.
    pub fn register(&mut self, name: &str, implementation: &str) {
        let name = name.to_ascii_lowercase();
        self.descriptors.insert(
            name.clone(),
            BackendDescriptor {
                name,
                implementation: implementation.to_string(),
            },
        );
    }

    /// Resolve an implementation reference. Never fails: anything that does
    /// not name a compiled-in adapter is simply not importable.
    pub fn is_importable(&self, implementation: &str) -> bool {
        BackendKind::from_implementation(implementation).is_some_and(BackendKind::is_compiled)
    }

    /// Every registered name, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    /// Registered names whose adapter is importable right now, sorted.
    pub fn available_backends(&self) -> Vec<String> {
        self.descriptors
            .values()
            .filter(|descriptor| self.is_importable(&descriptor.implementation))
            .map(|descriptor| descriptor.name.clone())
            .collect()
    }

    pub fn lookup(&self, name: &str) -> Result<&BackendDescriptor> {
        self.descriptors
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| TriplestoreError::BackendNotFound {
                name: name.to_string(),
                registered: self.registered_names(),
                available: self.available_backends(),
            })
    }

    pub(crate) fn not_installed(&self, descriptor: &BackendDescriptor) -> TriplestoreError {
        let hint = descriptor.kind().map_or_else(
            || {
                format!(
                    "register '{}' with a valid implementation reference (got '{}')",
                    descriptor.name, descriptor.implementation
                )
            },
            BackendKind::install_hint,
        );
        TriplestoreError::BackendNotInstalled {
            name: descriptor.name.clone(),
            hint,
            registered: self.registered_names(),
            available: self.available_backends(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn manifest_matches_the_closed_kind_set() {
        for kind in BackendKind::ALL {
            assert!(
                MANIFEST.contains(&(kind.name(), kind.implementation())),
                "{kind} missing from manifest"
            );
            assert_eq!(kind.name().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!(MANIFEST.len(), BackendKind::ALL.len());
    }

    #[test]
    fn discovery_runs_once() {
        let mut registry = BackendRegistry::discovered();
        registry.register("Custom", "triplestore::backend::JenaBackend");
        registry.discover();

        assert_eq!(registry.registered_names().len(), MANIFEST.len() + 1);
        assert_eq!(registry.lookup("CUSTOM").unwrap().kind(), Some(BackendKind::Jena));
    }

    #[test]
    fn malformed_references_are_not_importable() {
        let registry = BackendRegistry::discovered();
        assert!(!registry.is_importable(""));
        assert!(!registry.is_importable("triplestore::backend"));
        assert!(!registry.is_importable("some::other::Thing"));
    }

    #[test]
    fn available_backends_follow_enabled_features() {
        let mut registry = BackendRegistry::discovered();
        registry.register("broken", "not::a::Backend");

        let available = registry.available_backends();
        let mut sorted = available.clone();
        sorted.sort();
        assert_eq!(available, sorted);
        assert!(!available.contains(&"broken".to_string()));
        assert_eq!(
            available.contains(&"oxigraph".to_string()),
            cfg!(feature = "oxigraph")
        );
        assert!(registry.registered_names().contains(&"broken".to_string()));
    }

    #[test]
    fn unknown_names_list_both_sets() {
        let registry = BackendRegistry::discovered();
        let error = registry.lookup("nosuchbackend").unwrap_err();
        let message = error.to_string();
        for (name, _) in MANIFEST {
            assert!(message.contains(name), "{name} not listed in: {message}");
        }
        assert!(message.contains("Currently available backends"));
    }

    #[test]
    fn not_installed_hint_names_the_feature() {
        let registry = BackendRegistry::discovered();
        let descriptor = registry.lookup("graphdb").unwrap();
        let message = registry.not_installed(descriptor).to_string();
        assert!(message.contains("--features graphdb"));
    }
}
