use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use keygate::{
    router, AdmissionGate, AppState, Capability, CapabilityError, CapabilityParams,
    CapabilityRegistry, GatePolicy, KeyRecord, KeyStore, KeyTable,
};
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Build a table from `(key, used, limit)` triples.
pub fn table(entries: &[(&str, u64, u64)]) -> KeyTable {
    entries.iter().map(|(k, used, limit)| (*k, KeyRecord::new(*used, *limit))).collect()
}

/// Write `table` as the key file inside `dir` and return its path.
pub fn write_key_file(dir: &Path, table: &KeyTable) -> PathBuf {
    let path = dir.join("apiKeys.json");
    std::fs::write(&path, serde_json::to_vec_pretty(table).expect("serialize")).expect("write");
    path
}

pub fn read_key_file(path: &Path) -> KeyTable {
    serde_json::from_slice(&std::fs::read(path).expect("read")).expect("parse")
}

/// Returns a fixed payload and counts its calls.
#[derive(Debug, Default, Clone)]
pub struct Fixed {
    pub calls: Arc<AtomicUsize>,
}

impl Fixed {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for Fixed {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn invoke(&self, params: &CapabilityParams) -> Result<JsonValue, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "value": 42, "params": params.len() }))
    }
}

/// Always fails as an upstream error.
pub struct Broken;

#[async_trait]
impl Capability for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn invoke(&self, _params: &CapabilityParams) -> Result<JsonValue, CapabilityError> {
        Err(CapabilityError::Upstream("upstream is down".into()))
    }
}

/// Requires a `q` parameter.
pub struct Picky;

#[async_trait]
impl Capability for Picky {
    fn name(&self) -> &'static str {
        "picky"
    }

    async fn invoke(&self, params: &CapabilityParams) -> Result<JsonValue, CapabilityError> {
        match params.get("q") {
            Some(q) => Ok(json!({ "q": q })),
            None => Err(CapabilityError::MissingParam("q")),
        }
    }
}

/// Sleeps before answering.
pub struct Slow(pub Duration);

#[async_trait]
impl Capability for Slow {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn invoke(&self, _params: &CapabilityParams) -> Result<JsonValue, CapabilityError> {
        tokio::time::sleep(self.0).await;
        Ok(json!({ "late": true }))
    }
}

/// Router over `store` with every stub capability and `/` open.
pub fn app<S>(store: S, fixed: Fixed, handler_timeout: Duration) -> Router
where
    S: KeyStore + 'static,
{
    let gate = AdmissionGate::new(store).with_handler_timeout(handler_timeout);
    let capabilities = CapabilityRegistry::new()
        .with(fixed)
        .with(Broken)
        .with(Picky)
        .with(Slow(Duration::from_secs(5)));
    router(AppState::new(gate, capabilities), GatePolicy::new(["/"]))
}

/// Issue a GET and return status, headers and the JSON body.
pub async fn get(app: &Router, uri: &str) -> (StatusCode, HeaderMap, JsonValue) {
    let request = Request::builder().uri(uri).body(Body::empty()).expect("request");
    let response = app.clone().oneshot(request).await.expect("infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let body = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, headers, body)
}
