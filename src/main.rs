mod config;
mod logger;

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Instant,
};

use clap::Parser;
use dotenvy::dotenv;
use triplestore::{BackendFactory, ConfigMap, Triplestore};

use crate::logger::LogFormat;

/// Load a Turtle file and run a sample query on the chosen triplestore backend.
#[derive(Debug, Parser)]
#[command(name = "triplestore", version)]
struct Args {
    /// Backend to use
    #[arg(short, long, required_unless_present = "list_backends")]
    backend: Option<String>,

    /// Turtle file to load before querying (the graph is cleared first)
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// SPARQL SELECT to run (default: two triples)
    #[arg(short, long)]
    query: Option<String>,

    /// Custom config file (.toml format)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print registered backends and whether this build includes them
    #[arg(long)]
    list_backends: bool,

    /// Override the configured log format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

const EXIT_FAILURE: u8 = 1;
const EXIT_INIT_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let args = Args::parse();

    let config = match config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::from(EXIT_INIT_FAILURE);
        }
    };

    let mut logger_config = config.logger.clone();
    if let Some(format) = args.log_format {
        logger_config.format = format;
    }
    logger::initialize(&logger_config);

    let factory = BackendFactory::default();
    if args.list_backends {
        list_backends(&factory);
        return ExitCode::SUCCESS;
    }

    let Some(backend) = args.backend.as_deref() else {
        tracing::error!("No backend selected");
        return ExitCode::from(EXIT_INIT_FAILURE);
    };
    let settings = config.backend(backend);
    let query = args
        .query
        .clone()
        .unwrap_or_else(|| default_query(&settings));

    tracing::info!(backend, "Testing backend");
    let store = match Triplestore::with_factory(&factory, backend, &settings).await {
        Ok(store) => store,
        Err(error) => {
            tracing::error!(backend, error = %error, "Failed to initialize backend");
            return ExitCode::from(EXIT_INIT_FAILURE);
        }
    };

    let code = tokio::select! {
        code = run(&store, args.file.as_deref(), &query) => code,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, shutting down");
            ExitCode::from(EXIT_FAILURE)
        }
    };

    store.shutdown().await;
    code
}

async fn run(store: &Triplestore, file: Option<&Path>, query: &str) -> ExitCode {
    if let Some(file) = file {
        if !file.is_file() {
            tracing::error!(path = %file.display(), "File not found");
            return ExitCode::from(EXIT_INIT_FAILURE);
        }

        let started = Instant::now();
        if let Err(error) = async {
            store.clear().await?;
            store.load(file).await
        }
        .await
        {
            tracing::error!(error = %error, "Load failed");
            return ExitCode::from(EXIT_FAILURE);
        }
        tracing::info!(
            path = %file.display(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Loaded data"
        );
    }

    let rows = match store.query(query).await {
        Ok(rows) => rows,
        Err(error) => {
            tracing::error!(error = %error, "Query failed");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    if rows.is_empty() {
        println!("Query returned 0 results.");
        return ExitCode::SUCCESS;
    }

    println!("Query returned {} rows. Showing up to 2:", rows.len());
    for (index, row) in rows.iter().take(2).enumerate() {
        println!("  {}. {row}", index + 1);
    }

    if let Err(error) = store.clear().await {
        tracing::error!(error = %error, "Clear failed");
        return ExitCode::from(EXIT_FAILURE);
    }
    ExitCode::SUCCESS
}

/// Two triples, from the configured graph when there is one.
fn default_query(settings: &ConfigMap) -> String {
    let graph = ["graph", "graph_uri"]
        .iter()
        .find_map(|key| settings.get(*key).and_then(serde_json::Value::as_str))
        .filter(|graph| !graph.is_empty());

    match graph {
        Some(graph) => format!("SELECT ?s ?p ?o WHERE {{ GRAPH <{graph}> {{ ?s ?p ?o }} }} LIMIT 2"),
        None => "SELECT ?s ?p ?o WHERE { ?s ?p ?o } LIMIT 2".to_string(),
    }
}

fn list_backends(factory: &BackendFactory) {
    let registry = factory.registry();
    let available = registry.available_backends();
    for name in registry.registered_names() {
        let status = if available.contains(&name) {
            "available"
        } else {
            "not installed"
        };
        println!("{name:<14} {status}");
    }
}
