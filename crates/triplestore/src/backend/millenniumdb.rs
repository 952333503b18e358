//! MillenniumDB driven through its CLI tools.
//!
//! The database directory is rebuilt by `mdb-import` whenever data changes and
//! served read-only by a managed `mdb-server`. Edits (single triples, or
//! `INSERT DATA`/`DELETE DATA`/`CLEAR` through `execute`) therefore dump the
//! current contents, rewrite them and re-import.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{process::Command, sync::Mutex};

use super::{DEFAULT_TIMEOUT, TriplestoreBackend, ensure_file, require_select};
use crate::{
    config::{BackendConfig, ConfigSchema, DefaultValue},
    error::{Result, TriplestoreError},
    process::{ProcessLifecycleManager, ServerSpec, expand_home},
    sparql::{
        Binding, Encoding, QueryKind, QueryResult, SparqlHttp, classify, leading_keyword,
        triple_pattern,
    },
};

const NAME: &str = "millenniumdb";

pub(crate) const SCHEMA: ConfigSchema = ConfigSchema {
    required: &[],
    optional: &[
        ("mdb_home", DefaultValue::Str("~/projects/MillenniumDB")),
        ("port", DefaultValue::UInt(1234)),
        ("graph", DefaultValue::Null),
        ("show_server_logs", DefaultValue::Bool(false)),
        ("startup_timeout_secs", DefaultValue::UInt(60)),
        ("timeout_ms", DefaultValue::UInt(60_000)),
    ],
    aliases: &[("home", "mdb_home")],
};

const BIN_DIR: &str = "build/Release/bin";
const DB_DIR: &str = "mdb_benchmark_db";
const DUMP_QUERY: &str = "SELECT ?s ?p ?o WHERE { ?s ?p ?o }";

const BUILD_GUIDANCE: &str = "How to fix:\n  \
    - Point `mdb_home` (or MDB_HOME) at a MillenniumDB checkout, and\n  \
    - build it with `cmake -Bbuild/Release -DCMAKE_BUILD_TYPE=Release && cmake --build build/Release`.";

pub struct MillenniumDbBackend {
    home: PathBuf,
    db_dir: PathBuf,
    bin_dir: PathBuf,
    http: SparqlHttp,
    server: Mutex<ProcessLifecycleManager>,
}

impl MillenniumDbBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let home = expand_home(Path::new(config.required_str("mdb_home")?));
        if !home.is_dir() {
            return Err(TriplestoreError::FileNotFound {
                backend: NAME,
                path: home,
            });
        }
        if let Some(graph) = config.graph()? {
            tracing::warn!(graph = %graph, "MillenniumDB has no named graphs, ignoring graph");
        }

        let port = config.u64("port")?.unwrap_or(1234);
        let endpoint = format!("http://localhost:{port}/sparql");
        let db_dir = home.join(DB_DIR);
        let bin_dir = home.join(BIN_DIR);

        let http = SparqlHttp::new(
            NAME,
            endpoint.clone(),
            endpoint.clone(),
            None,
            config.duration_ms("timeout_ms", DEFAULT_TIMEOUT)?,
        )?
        .with_query_encoding(Encoding::Body);

        let mut spec = ServerSpec::new(NAME, "mdb-server", endpoint);
        spec.search_dirs = vec![bin_dir.clone()];
        spec.home_env = Some("MDB_HOME");
        spec.home_subdir = BIN_DIR;
        spec.install_guidance = BUILD_GUIDANCE.to_string();
        spec.args = vec![db_dir.clone().into_os_string()];
        spec.current_dir = Some(home.clone());
        spec.show_output = config.bool("show_server_logs")?;
        spec.startup_timeout =
            Duration::from_secs(config.u64("startup_timeout_secs")?.unwrap_or(60));

        Ok(Self {
            home,
            db_dir,
            bin_dir,
            http,
            server: Mutex::new(ProcessLifecycleManager::new(spec)?),
        })
    }

    fn import_bin(&self) -> PathBuf {
        self.bin_dir.join("mdb-import")
    }

    /// Replace the database directory with the contents of `source`.
    async fn import(&self, source: &Path) -> Result<()> {
        let import_bin = self.import_bin();
        if !import_bin.is_file() {
            return Err(TriplestoreError::ExecutableNotFound {
                server: NAME,
                executable: import_bin.display().to_string(),
                guidance: BUILD_GUIDANCE.to_string(),
            });
        }

        if self.db_exists().await? {
            tokio::fs::remove_dir_all(&self.db_dir).await.map_err(TriplestoreError::io(
                NAME,
                format!("removing {}", self.db_dir.display()),
            ))?;
        }

        let output = Command::new(&import_bin)
            .arg(source)
            .arg(&self.db_dir)
            .current_dir(&self.home)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(TriplestoreError::io(NAME, format!("running {}", import_bin.display())))?;
        if !output.status.success() {
            return Err(TriplestoreError::Store {
                backend: NAME,
                reason: format!(
                    "mdb-import exited with {}:\n{}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        tracing::debug!(source = %source.display(), "Imported into MillenniumDB");
        Ok(())
    }

    async fn db_exists(&self) -> Result<bool> {
        tokio::fs::try_exists(&self.db_dir)
            .await
            .map_err(TriplestoreError::io(NAME, format!("checking {}", self.db_dir.display())))
    }

    /// Stop the server, re-import from `source`, start it again.
    ///
    /// Refuses when the answering server was started elsewhere: it would keep
    /// serving the old files while `db_dir` is rebuilt underneath it.
    async fn reimport(&self, server: &mut ProcessLifecycleManager, source: &Path) -> Result<()> {
        if !server.owns_process() && server.probe().await {
            return Err(TriplestoreError::Store {
                backend: NAME,
                reason: format!(
                    "an mdb-server not started by this backend is answering on {}; \
                     stop it before changing data so the re-import can restart the server",
                    server.spec().readiness_url
                ),
            });
        }
        server.stop().await;
        self.import(source).await?;
        server.ensure_running().await
    }

    /// Re-import exactly `triples` (N-Triples lines).
    async fn rewrite(&self, server: &mut ProcessLifecycleManager, triples: &[String]) -> Result<()> {
        let file = tempfile::Builder::new()
            .prefix("mdb-")
            .suffix(".ttl")
            .tempfile()
            .map_err(TriplestoreError::io(NAME, "creating re-import file"))?;
        let mut contents = triples.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        tokio::fs::write(file.path(), contents)
            .await
            .map_err(TriplestoreError::io(NAME, format!("writing {}", file.path().display())))?;
        self.reimport(server, file.path()).await
    }

    /// Start the server, importing an empty database first if none exists.
    async fn ensure_server(&self, server: &mut ProcessLifecycleManager) -> Result<()> {
        if !self.db_exists().await? {
            let empty = tempfile::Builder::new()
                .suffix(".ttl")
                .tempfile()
                .map_err(TriplestoreError::io(NAME, "creating empty import file"))?;
            self.import(empty.path()).await?;
        }
        server.ensure_running().await
    }

    async fn dump(&self) -> Result<Vec<String>> {
        let json = self.http.select_json(DUMP_QUERY).await?;
        parse_dump(&json)
    }

    /// Apply `update` to the dumped contents and re-import when anything changed.
    async fn apply(&self, server: &mut ProcessLifecycleManager, update: DataUpdate) -> Result<()> {
        let triples = match update {
            DataUpdate::Unchanged => return Ok(()),
            DataUpdate::Clear => Vec::new(),
            DataUpdate::Insert(added) => {
                self.ensure_server(server).await?;
                let mut triples = self.dump().await?;
                let before = triples.len();
                for triple in added {
                    if !triples.contains(&triple) {
                        triples.push(triple);
                    }
                }
                if triples.len() == before {
                    return Ok(());
                }
                triples
            }
            DataUpdate::Delete(removed) => {
                self.ensure_server(server).await?;
                let mut triples = self.dump().await?;
                let before = triples.len();
                triples.retain(|existing| !removed.contains(existing));
                if triples.len() == before {
                    return Ok(());
                }
                triples
            }
        };
        self.rewrite(server, &triples).await
    }

    async fn run_cmake(&self, args: &[&str]) -> Result<()> {
        let status = Command::new("cmake")
            .args(args)
            .current_dir(&self.home)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|error| match error.kind() {
                std::io::ErrorKind::NotFound => TriplestoreError::ExecutableNotFound {
                    server: NAME,
                    executable: "cmake".to_string(),
                    guidance: BUILD_GUIDANCE.to_string(),
                },
                _ => TriplestoreError::io(NAME, format!("running cmake {}", args.join(" ")))(error),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(TriplestoreError::Store {
                backend: NAME,
                reason: format!("cmake {} exited with {status}", args.join(" ")),
            })
        }
    }
}

#[async_trait]
impl TriplestoreBackend for MillenniumDbBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn load(&self, path: &Path) -> Result<()> {
        ensure_file(NAME, path)?;
        let mut server = self.server.lock().await;
        self.reimport(&mut server, path).await?;
        tracing::info!(path = %path.display(), "Loaded file into MillenniumDB");
        Ok(())
    }

    async fn add(&self, subject: &str, predicate: &str, object: &str) -> Result<()> {
        let mut server = self.server.lock().await;
        self.apply(&mut server, DataUpdate::Insert(vec![triple_pattern(subject, predicate, object)]))
            .await
    }

    async fn delete(&self, subject: &str, predicate: &str, object: &str) -> Result<()> {
        let mut server = self.server.lock().await;
        self.apply(&mut server, DataUpdate::Delete(vec![triple_pattern(subject, predicate, object)]))
            .await
    }

    async fn query(&self, sparql: &str) -> Result<Vec<Binding>> {
        require_select(NAME, sparql)?;
        let mut server = self.server.lock().await;
        self.ensure_server(&mut server).await?;
        self.http.select(sparql).await
    }

    /// Updates limited to `INSERT DATA`, `DELETE DATA` and `CLEAR`/`DROP`
    /// go through a dump and re-import; other update forms are unsupported.
    async fn execute(&self, sparql: &str) -> Result<QueryResult> {
        let kind = classify(NAME, sparql)?;
        let mut server = self.server.lock().await;
        if kind == QueryKind::Update {
            let update = DataUpdate::parse(sparql)?;
            self.apply(&mut server, update).await?;
            return Ok(QueryResult::Unit);
        }
        self.ensure_server(&mut server).await?;
        self.http.execute(sparql).await
    }

    async fn clear(&self) -> Result<()> {
        let mut server = self.server.lock().await;
        self.apply(&mut server, DataUpdate::Clear).await
    }

    /// The "repository" is the built CLI toolchain.
    async fn repository_exists(&self) -> Result<bool> {
        Ok(self.import_bin().is_file() && self.bin_dir.join("mdb-server").is_file())
    }

    async fn create_repository(&self) -> Result<()> {
        tracing::info!(home = %self.home.display(), "Building MillenniumDB");
        self.run_cmake(&["-Bbuild/Release", "-DCMAKE_BUILD_TYPE=Release"])
            .await?;
        self.run_cmake(&["--build", "build/Release", "-j", "4"]).await
    }

    async fn shutdown(&self) {
        self.server.lock().await.stop().await;
    }
}

/// Data change an update string boils down to, as N-Triples lines.
#[derive(Debug, PartialEq, Eq)]
enum DataUpdate {
    Insert(Vec<String>),
    Delete(Vec<String>),
    Clear,
    /// The store has only a default graph, so named-graph targets hold nothing.
    Unchanged,
}

impl DataUpdate {
    fn parse(sparql: &str) -> Result<Self> {
        let unsupported = || TriplestoreError::UnsupportedOperation {
            backend: NAME,
            token: leading_keyword(sparql),
        };
        let keyword = leading_keyword(sparql);
        let rest = sparql
            .trim_start()
            .split_once(char::is_whitespace)
            .map_or("", |(_, rest)| rest)
            .trim_start();

        match keyword.as_str() {
            "INSERT" | "DELETE" => {
                let Some(block) = strip_keyword(rest, "DATA") else {
                    return Err(unsupported());
                };
                let triples = parse_data_block(block)?;
                Ok(if keyword == "INSERT" {
                    Self::Insert(triples)
                } else {
                    Self::Delete(triples)
                })
            }
            "CLEAR" | "DROP" => {
                let rest = strip_keyword(rest, "SILENT").unwrap_or(rest);
                let target = rest.split_whitespace().next().unwrap_or_default().to_uppercase();
                match target.as_str() {
                    "DEFAULT" | "ALL" => Ok(Self::Clear),
                    "NAMED" | "GRAPH" => Ok(Self::Unchanged),
                    _ => Err(unsupported()),
                }
            }
            _ => Err(unsupported()),
        }
    }
}

/// `input` after a leading case-insensitive `keyword`, if it starts with one.
fn strip_keyword<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let head = input.get(..keyword.len())?;
    let tail = &input[keyword.len()..];
    let boundary = tail
        .chars()
        .next()
        .is_none_or(|ch| ch.is_whitespace() || ch == '{');
    (head.eq_ignore_ascii_case(keyword) && boundary).then(|| tail.trim_start())
}

fn invalid_data(reason: impl Into<String>) -> TriplestoreError {
    TriplestoreError::InvalidQuery {
        backend: NAME,
        reason: reason.into(),
    }
}

/// Triples of a `{ ... }` data block written with IRIs, blank nodes and literals.
fn parse_data_block(block: &str) -> Result<Vec<String>> {
    let body = block
        .trim()
        .strip_prefix('{')
        .and_then(|inner| inner.strip_suffix('}'))
        .ok_or_else(|| invalid_data("expected a single { ... } data block"))?;

    let mut triples = Vec::new();
    let mut terms: Vec<String> = Vec::with_capacity(3);
    let mut rest = body.trim_start();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            if terms.len() != 3 {
                return Err(invalid_data("each statement needs subject, predicate and object"));
            }
            triples.push(format!("{} {} {} .", terms[0], terms[1], terms[2]));
            terms.clear();
            rest = after.trim_start();
            continue;
        }
        if terms.len() == 3 {
            return Err(invalid_data("expected '.' after three terms"));
        }
        let (term, after) = next_term(rest)?;
        terms.push(term);
        rest = after.trim_start();
    }
    match terms.len() {
        0 => Ok(triples),
        3 => {
            triples.push(format!("{} {} {} .", terms[0], terms[1], terms[2]));
            Ok(triples)
        }
        _ => Err(invalid_data("each statement needs subject, predicate and object")),
    }
}

/// Split one N-Triples term off the front of `input`.
fn next_term(input: &str) -> Result<(String, &str)> {
    if input.starts_with('<') {
        let end = input.find('>').ok_or_else(|| invalid_data("unterminated IRI"))?;
        return Ok((input[..=end].to_string(), &input[end + 1..]));
    }

    if input.starts_with("_:") {
        let end = input
            .find(|ch: char| ch.is_whitespace() || ch == '.' || ch == '}')
            .unwrap_or(input.len());
        return Ok((input[..end].to_string(), &input[end..]));
    }

    if input.starts_with('"') {
        let bytes = input.as_bytes();
        let mut idx = 1;
        let close = loop {
            match bytes.get(idx) {
                Some(b'\\') => idx += 2,
                Some(b'"') => break idx,
                Some(_) => idx += 1,
                None => return Err(invalid_data("unterminated literal")),
            }
        };

        let mut end = close + 1;
        let tail = &input[end..];
        if let Some(language) = tail.strip_prefix('@') {
            end += 1 + language
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '-'))
                .unwrap_or(language.len());
        } else if let Some(datatype) = tail.strip_prefix("^^<") {
            let len = datatype
                .find('>')
                .ok_or_else(|| invalid_data("unterminated datatype IRI"))?;
            end += 3 + len + 1;
        }
        return Ok((input[..end].to_string(), &input[end..]));
    }

    Err(invalid_data(format!(
        "only IRIs, blank nodes and literals are supported in data blocks, found '{}'",
        input.split_whitespace().next().unwrap_or_default()
    )))
}

#[derive(Deserialize)]
struct DumpResponse {
    results: DumpResults,
}

#[derive(Deserialize)]
struct DumpResults {
    bindings: Vec<HashMap<String, DumpTerm>>,
}

#[derive(Deserialize)]
struct DumpTerm {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    datatype: Option<String>,
    #[serde(rename = "xml:lang")]
    language: Option<String>,
}

impl DumpTerm {
    fn to_ntriples(&self) -> String {
        match self.kind.as_str() {
            "uri" => format!("<{}>", self.value),
            "bnode" => format!("_:{}", self.value),
            _ => {
                let literal = format!("\"{}\"", escape_literal(&self.value));
                match (&self.language, &self.datatype) {
                    (Some(language), _) => format!("{literal}@{language}"),
                    (None, Some(datatype)) => format!("{literal}^^<{datatype}>"),
                    (None, None) => literal,
                }
            }
        }
    }
}

fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Turn a `?s ?p ?o` dump into N-Triples lines.
fn parse_dump(json: &str) -> Result<Vec<String>> {
    let response: DumpResponse = serde_json::from_str(json).map_err(|e| TriplestoreError::Parse {
        backend: NAME,
        reason: format!("Failed to parse dump: {e}"),
    })?;

    response
        .results
        .bindings
        .into_iter()
        .map(|row| match (row.get("s"), row.get("p"), row.get("o")) {
            (Some(s), Some(p), Some(o)) => Ok(format!(
                "{} {} {} .",
                s.to_ntriples(),
                p.to_ntriples(),
                o.to_ntriples()
            )),
            _ => Err(TriplestoreError::Parse {
                backend: NAME,
                reason: "dump row is missing ?s, ?p or ?o".to_string(),
            }),
        })
        .collect()
}
