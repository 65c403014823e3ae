// Shared fixtures: an in-process echo backend and on-disk gateway configs.
#![allow(dead_code)]

use std::{
    convert::Infallible,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    routing::{any, get},
};
use futures_util::{StreamExt, stream};
use serde_json::{Value, json};

#[derive(Clone)]
pub struct Backend {
    pub id: &'static str,
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    abandoned: Arc<AtomicBool>,
}

impl Backend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Whether a `/hold` handler was dropped before it finished.
    pub fn abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }
}

/// Flags the backend when a `/hold` handler future is dropped unfinished.
struct HoldGuard {
    abandoned: Arc<AtomicBool>,
    finished: bool,
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.abandoned.store(true, Ordering::SeqCst);
        }
    }
}

fn header(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn echo(State(backend): State<Backend>, req: Request) -> Json<Value> {
    backend.hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "backend": backend.id,
        "method": req.method().as_str(),
        "path": req.uri().path(),
        "query": req.uri().query(),
        "host": header(&req, "host"),
        "xTest": header(&req, "x-test"),
        "xForwardedFor": header(&req, "x-forwarded-for"),
        "xForwardedHost": header(&req, "x-forwarded-host"),
        "requestId": header(&req, "x-request-id"),
    }))
}

async fn slow(State(backend): State<Backend>) -> &'static str {
    backend.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(3)).await;
    "too late"
}

async fn hold(State(backend): State<Backend>) -> &'static str {
    backend.hits.fetch_add(1, Ordering::SeqCst);
    let mut guard = HoldGuard {
        abandoned: backend.abandoned.clone(),
        finished: false,
    };
    tokio::time::sleep(Duration::from_secs(10)).await;
    guard.finished = true;
    "held"
}

/// Sends the headers and one chunk, then never finishes the body.
async fn stall(State(backend): State<Backend>) -> Body {
    backend.hits.fetch_add(1, Ordering::SeqCst);
    let chunks = stream::once(async { Ok::<_, Infallible>("partial") }).chain(stream::pending());
    Body::from_stream(chunks)
}

/// Start an echo backend on an ephemeral port. `/slow` sleeps for 3 seconds,
/// `/hold` for 10, and `/stall` stops sending after the first body chunk.
pub async fn spawn_backend(id: &'static str) -> Backend {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = Backend {
        id,
        addr: listener.local_addr().unwrap(),
        hits: Arc::new(AtomicUsize::new(0)),
        abandoned: Arc::new(AtomicBool::new(false)),
    };

    let app = Router::new()
        .route("/slow", get(slow))
        .route("/hold", get(hold))
        .route("/stall", get(stall))
        .route("/", any(echo))
        .route("/{*path}", any(echo))
        .with_state(backend.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    backend
}

/// Write `gateway.json` into `dir` with an ephemeral listener and `apis/` directory.
pub fn write_gateway_config(dir: &Path, extra: Value) -> PathBuf {
    let mut config = json!({
        "listenPort": 0,
        "adminPort": 0,
        "listenAddress": "127.0.0.1",
        "apiPath": "apis",
        "logger": {"level": "warn", "format": "pretty"},
    });
    if let (Some(config), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
        config.extend(extra.clone());
    }

    std::fs::create_dir_all(dir.join("apis")).unwrap();
    let path = dir.join("gateway.json");
    std::fs::write(&path, config.to_string()).unwrap();
    path
}

pub fn write_api(dir: &Path, file: &str, api: &Value) {
    std::fs::write(dir.join("apis").join(file), api.to_string()).unwrap();
}

pub fn api(name: &str, path: &str, target: &str) -> Value {
    json!({
        "name": name,
        "proxy": {"path": path, "target": {"path": target}}
    })
}
