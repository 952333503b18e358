//! In-process stand-in for a SPARQL server: records every request and answers
//! from a table of canned replies keyed by method and path.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use reqwest::Url;
use tokio::{net::TcpListener, task::JoinHandle};

pub(crate) const SPARQL_JSON: &str = "application/sparql-results+json";

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub accept: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

impl RecordedRequest {
    /// Decoded value of a form field in an urlencoded body.
    pub fn form_value(&self, key: &str) -> Option<String> {
        decode_pairs(&self.body, key)
    }

    /// Decoded value of a query-string parameter.
    pub fn query_value(&self, key: &str) -> Option<String> {
        decode_pairs(self.query.as_deref().unwrap_or_default(), key)
    }
}

fn decode_pairs(encoded: &str, key: &str) -> Option<String> {
    let url = Url::parse(&format!("http://fake.invalid/?{encoded}")).ok()?;
    url.query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

#[derive(Debug, Clone)]
struct Reply {
    status: u16,
    content_type: &'static str,
    body: String,
}

#[derive(Default)]
struct Shared {
    replies: Mutex<HashMap<(String, String), Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub(crate) struct FakeServer {
    base_url: String,
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let shared = Arc::new(Shared::default());
        let app = Router::new()
            .fallback(handle_request)
            .with_state(shared.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{address}"),
            shared,
            handle,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Answer `method path` with `status`; unmatched requests get an empty 200.
    pub fn reply(&self, method: &str, path: &str, status: u16, content_type: &'static str, body: &str) {
        self.shared.replies.lock().unwrap().insert(
            (method.to_string(), path.to_string()),
            Reply {
                status,
                content_type,
                body: body.to_string(),
            },
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().unwrap().clone()
    }

    /// The single recorded request for `method path`.
    pub fn only(&self, method: &str, path: &str) -> RecordedRequest {
        let matching: Vec<_> = self
            .requests()
            .into_iter()
            .filter(|request| request.method == method && request.path == path)
            .collect();
        assert_eq!(matching.len(), 1, "expected one {method} {path}, got {matching:?}");
        matching.into_iter().next().unwrap()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn handle_request(
    State(shared): State<Arc<Shared>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        content_type: header_value(&headers, header::CONTENT_TYPE),
        accept: header_value(&headers, header::ACCEPT),
        authorization: header_value(&headers, header::AUTHORIZATION),
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    let key = (request.method.clone(), request.path.clone());
    shared.requests.lock().unwrap().push(request);

    let reply = shared.replies.lock().unwrap().get(&key).cloned();
    match reply {
        Some(reply) => (
            StatusCode::from_u16(reply.status).unwrap(),
            [(header::CONTENT_TYPE, reply.content_type)],
            reply.body,
        )
            .into_response(),
        None => StatusCode::OK.into_response(),
    }
}

/// SPARQL JSON for one row binding `?s ?p ?o` to IRIs.
pub(crate) fn one_row(s: &str, p: &str, o: &str) -> String {
    serde_json::json!({
        "head": { "vars": ["s", "p", "o"] },
        "results": { "bindings": [{
            "s": { "type": "uri", "value": s },
            "p": { "type": "uri", "value": p },
            "o": { "type": "uri", "value": o },
        }] }
    })
    .to_string()
}
