use std::{fs::File, io::BufReader, path::Path};

use async_trait::async_trait;
use oxigraph::{
    io::{RdfFormat, RdfParser},
    model::{GraphName, NamedNode, QuadRef, Term},
    sparql::{QueryResults, SparqlEvaluator},
    store::Store,
};

use super::{TriplestoreBackend, ensure_file, require_select};
use crate::{
    config::{BackendConfig, ConfigSchema, DefaultValue},
    error::{Result, TriplestoreError},
    rewrite::scope_to_graph,
    sparql::{Binding, QueryKind, QueryResult, classify},
};

const NAME: &str = "oxigraph";

pub(crate) const SCHEMA: ConfigSchema = ConfigSchema {
    required: &[],
    optional: &[("graph", DefaultValue::Null), ("path", DefaultValue::Null)],
    aliases: &[("graph_uri", "graph")],
};

/// Oxigraph embedded triple store backend
///
/// In-memory unless `path` is configured, in which case the store is
/// persisted on disk. No server process is involved.
pub struct OxigraphBackend {
    store: Store,
    graph: GraphName,
    graph_iri: Option<String>,
}

impl OxigraphBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let store = match config.str("path")? {
            Some(path) => Self::open_store(Path::new(path))?,
            None => Store::new().map_err(|e| {
                store_error(format!("Failed to create in-memory Oxigraph store: {e}"))
            })?,
        };

        let graph_iri = config.graph()?;
        let graph = match &graph_iri {
            Some(iri) => GraphName::NamedNode(named_node(iri)?),
            None => GraphName::DefaultGraph,
        };

        Ok(Self {
            store,
            graph,
            graph_iri,
        })
    }

    fn open_store(path: &Path) -> Result<Store> {
        let store = Store::open(path)
            .map_err(|e| store_error(format!("Failed to open Oxigraph store: {e}")))?;
        tracing::info!(path = %path.display(), "Opened Oxigraph persistent store");
        Ok(store)
    }

    /// Direct access to the underlying store
    pub fn store(&self) -> &Store {
        &self.store
    }

    fn scoped<'a>(&self, sparql: &'a str) -> std::borrow::Cow<'a, str> {
        match &self.graph_iri {
            Some(graph) => scope_to_graph(sparql, graph),
            None => sparql.into(),
        }
    }

    async fn read(&self, sparql: &str) -> Result<QueryResult> {
        let prepared = SparqlEvaluator::new()
            .parse_query(sparql)
            .map_err(|e| TriplestoreError::InvalidQuery {
                backend: NAME,
                reason: format!("Failed to parse SPARQL query: {e}"),
            })?;

        self.blocking(move |store| {
            let results = prepared
                .on_store(store)
                .execute()
                .map_err(|e| store_error(format!("SPARQL query failed: {e}")))?;

            match results {
                QueryResults::Solutions(solutions) => {
                    let variables = solutions.variables().to_vec();
                    let mut rows = Vec::new();
                    for solution in solutions {
                        let solution = solution
                            .map_err(|e| store_error(format!("Failed to read solution: {e}")))?;
                        let binding: Binding = variables
                            .iter()
                            .filter_map(|variable| {
                                solution
                                    .get(variable)
                                    .map(|term| (variable.as_str().to_string(), lexical(term)))
                            })
                            .collect();
                        rows.push(binding);
                    }
                    Ok(QueryResult::Bindings(rows))
                }
                QueryResults::Boolean(value) => Ok(QueryResult::Boolean(value)),
                QueryResults::Graph(triples) => {
                    let mut output = Vec::new();
                    for triple in triples {
                        let triple = triple
                            .map_err(|e| store_error(format!("Failed to read triple: {e}")))?;
                        output.push(format!(
                            "{} {} {} .",
                            triple.subject, triple.predicate, triple.object
                        ));
                    }
                    Ok(QueryResult::Graph(output.join("\n")))
                }
            }
        })
        .await
    }

    /// Run store work on the blocking pool; persistent stores hit RocksDB.
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || work(&store))
            .await
            .map_err(|e| store_error(format!("Task join error: {e}")))?
    }

    async fn update(&self, sparql: &str) -> Result<()> {
        let prepared = SparqlEvaluator::new()
            .parse_update(sparql)
            .map_err(|e| TriplestoreError::InvalidQuery {
                backend: NAME,
                reason: format!("Failed to parse SPARQL UPDATE: {e}"),
            })?;

        self.blocking(move |store| {
            prepared
                .on_store(store)
                .execute()
                .map_err(|e| store_error(format!("SPARQL UPDATE failed: {e}")))
        })
        .await?;

        Ok(())
    }

    fn triple_iris(
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<(NamedNode, NamedNode, NamedNode)> {
        Ok((named_node(subject)?, named_node(predicate)?, named_node(object)?))
    }
}

#[async_trait]
impl TriplestoreBackend for OxigraphBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn load(&self, path: &Path) -> Result<()> {
        ensure_file(NAME, path)?;

        let file = File::open(path)
            .map(BufReader::new)
            .map_err(TriplestoreError::io(NAME, format!("opening {}", path.display())))?;
        let parser = RdfParser::from_format(RdfFormat::Turtle).with_default_graph(self.graph.clone());
        self.blocking(move |store| {
            store
                .load_from_reader(parser, file)
                .map_err(|e| store_error(format!("Failed to load Turtle: {e}")))
        })
        .await?;

        tracing::info!(path = %path.display(), graph = ?self.graph_iri, "Loaded file into Oxigraph");
        Ok(())
    }

    async fn add(&self, subject: &str, predicate: &str, object: &str) -> Result<()> {
        let (s, p, o) = Self::triple_iris(subject, predicate, object)?;
        let graph = self.graph.clone();
        self.blocking(move |store| {
            store
                .insert(QuadRef::new(s.as_ref(), p.as_ref(), o.as_ref(), graph.as_ref()))
                .map_err(|e| store_error(format!("Failed to insert triple: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, subject: &str, predicate: &str, object: &str) -> Result<()> {
        let (s, p, o) = Self::triple_iris(subject, predicate, object)?;
        let graph = self.graph.clone();
        self.blocking(move |store| {
            store
                .remove(QuadRef::new(s.as_ref(), p.as_ref(), o.as_ref(), graph.as_ref()))
                .map_err(|e| store_error(format!("Failed to remove triple: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn query(&self, sparql: &str) -> Result<Vec<Binding>> {
        require_select(NAME, sparql)?;
        match self.read(&self.scoped(sparql)).await? {
            QueryResult::Bindings(rows) => Ok(rows),
            other => Err(store_error(format!(
                "Expected SELECT to return solutions, got {:?}",
                other.kind()
            ))),
        }
    }

    async fn execute(&self, sparql: &str) -> Result<QueryResult> {
        match classify(NAME, sparql)? {
            QueryKind::Update => self.update(sparql).await.map(|()| QueryResult::Unit),
            QueryKind::Select => self.read(&self.scoped(sparql)).await,
            QueryKind::Ask | QueryKind::Graph => self.read(sparql).await,
        }
    }

    async fn clear(&self) -> Result<()> {
        let graph = self.graph.clone();
        self.blocking(move |store| {
            store
                .clear_graph(graph.as_ref())
                .map_err(|e| store_error(format!("Failed to clear graph: {e}")))
        })
        .await
    }
}

fn named_node(iri: &str) -> Result<NamedNode> {
    NamedNode::new(iri).map_err(|e| TriplestoreError::InvalidQuery {
        backend: NAME,
        reason: format!("'{iri}' is not a valid IRI: {e}"),
    })
}

/// Lexical form of a term: IRI text, blank node id or literal value.
fn lexical(term: &Term) -> String {
    match term {
        Term::NamedNode(node) => node.as_str().to_string(),
        Term::BlankNode(node) => node.as_str().to_string(),
        Term::Literal(literal) => literal.value().to_string(),
        #[allow(unreachable_patterns)]
        other => other.to_string(),
    }
}

fn store_error(reason: String) -> TriplestoreError {
    TriplestoreError::Store {
        backend: NAME,
        reason,
    }
}
